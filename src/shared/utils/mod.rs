pub mod logger;
pub mod retry_policy;

pub use logger::{init_logger, LogContext, TimedOperation};
pub use retry_policy::RetryPolicy;
