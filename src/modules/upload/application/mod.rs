pub mod batch_uploader;

pub use batch_uploader::{BatchUploader, UploadOperation, UploadSummary};
