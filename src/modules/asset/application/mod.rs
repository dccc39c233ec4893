pub mod asset_uploader;

pub use asset_uploader::AssetUploader;
