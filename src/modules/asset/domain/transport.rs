use std::path::Path;

use async_trait::async_trait;

use crate::shared::errors::AppResult;

/// Remote endpoint that accepts assets and answers with the stored file name
#[async_trait]
pub trait AssetTransport: Send + Sync {
    /// Register a remote asset by URL
    async fn upload_url(&self, url: &str) -> AppResult<String>;

    /// Upload a local file
    async fn upload_file(&self, path: &Path) -> AppResult<String>;
}
