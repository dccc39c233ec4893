pub mod http_transport;
pub mod retryable;

pub use http_transport::{HttpAssetTransport, HttpTransportConfig};
pub use retryable::is_retryable_error;
