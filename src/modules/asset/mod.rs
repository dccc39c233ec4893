//! Asset uploads: URL and file assets deduplicated through single-flight caches

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::AssetUploader;
pub use domain::AssetTransport;
pub use infrastructure::{HttpAssetTransport, HttpTransportConfig};
