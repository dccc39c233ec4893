// Shared kernel: configuration, errors and logging used by every module

pub mod config;
pub mod errors;
pub mod utils;

pub use config::UploadConfig;
pub use errors::{AppError, AppResult};
