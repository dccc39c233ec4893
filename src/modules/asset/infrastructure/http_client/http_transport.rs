//! Asset API client with client-side pacing and retries

use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter as GovernorRateLimiter};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::time::sleep;

use super::retryable::{is_retryable_error, is_retryable_status, retry_after};
use crate::modules::asset::domain::AssetTransport;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::RetryPolicy;
use crate::{log_debug, log_warn};

type DirectRateLimiter = GovernorRateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
    governor::middleware::NoOpMiddleware,
>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    file_name: String,
}

/// Settings for [`HttpAssetTransport`]
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub base_url: String,
    /// Bearer token, obtained by the caller
    pub access_token: Option<String>,
    pub requests_per_second: f64,
    pub burst_size: u32,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl HttpTransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_token: None,
            requests_per_second: 50.0,
            burst_size: 25,
            request_timeout: Duration::from_secs(60),
            user_agent: format!("adaptive-upload/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}

/// [`AssetTransport`] over the REST asset endpoints
pub struct HttpAssetTransport {
    client: Client,
    rate_limiter: DirectRateLimiter,
    retry_policy: RetryPolicy,
    config: HttpTransportConfig,
}

impl HttpAssetTransport {
    pub fn new(config: HttpTransportConfig, retry_policy: RetryPolicy) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to build HTTP client: {}", e)))?;
        let rate_limiter = create_rate_limiter(config.requests_per_second, config.burst_size)?;

        Ok(Self {
            client,
            rate_limiter,
            retry_policy,
            config,
        })
    }

    /// Whether the pacing budget allows a request right now
    pub fn can_make_request_now(&self) -> bool {
        self.rate_limiter.check().is_ok()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send the request built by `build` until it succeeds or retries run out
    async fn send_with_retries<F>(&self, operation: &str, build: F) -> AppResult<String>
    where
        F: Fn() -> AppResult<RequestBuilder>,
    {
        let attempts = self.retry_policy.total_attempts();

        for attempt in 0..attempts {
            self.rate_limiter.until_ready().await;
            let is_last = attempt + 1 == attempts;

            match self.authorize(build()?).send().await {
                Ok(response) if response.status().is_success() => {
                    return parse_response(operation, response).await;
                }
                Ok(response) => {
                    let status = response.status();
                    if !is_retryable_status(status) || is_last {
                        return Err(status_error(operation, status, attempt + 1));
                    }

                    let delay = self
                        .retry_policy
                        .calculate_delay(attempt, retry_after(response.headers()));
                    log_warn!(
                        "{} returned {} (attempt {}/{}). Retrying in {:?}",
                        operation,
                        status,
                        attempt + 1,
                        attempts,
                        delay
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    if !is_retryable_error(&e) || is_last {
                        return Err(AppError::from(e));
                    }

                    let delay = self.retry_policy.calculate_delay(attempt, None);
                    log_warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        operation,
                        attempt + 1,
                        attempts,
                        e,
                        delay
                    );
                    sleep(delay).await;
                }
            }
        }

        Err(AppError::UploadError(format!(
            "{} failed after {} attempts",
            operation, attempts
        )))
    }
}

#[async_trait]
impl AssetTransport for HttpAssetTransport {
    async fn upload_url(&self, url: &str) -> AppResult<String> {
        let endpoint = self.endpoint("asset/url");
        log_debug!("POST {} url={}", endpoint, url);

        self.send_with_retries("Asset URL upload", || {
            Ok(self.client.post(&endpoint).query(&[("url", url)]))
        })
        .await
    }

    async fn upload_file(&self, path: &Path) -> AppResult<String> {
        let endpoint = self.endpoint("asset/file");
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| AppError::InvalidInput(format!("No file name: {}", path.display())))?;
        log_debug!("POST {} file={} ({} bytes)", endpoint, file_name, bytes.len());

        self.send_with_retries("Asset file upload", || {
            let part = Part::bytes(bytes.clone()).file_name(file_name.clone());
            Ok(self
                .client
                .post(&endpoint)
                .multipart(Form::new().part("file", part)))
        })
        .await
    }
}

/// Direct limiter allowing `requests_per_second` with bursts of `burst_size`
fn create_rate_limiter(requests_per_second: f64, burst_size: u32) -> AppResult<DirectRateLimiter> {
    if requests_per_second.is_nan() || requests_per_second <= 0.0 {
        return Err(AppError::ValidationError(format!(
            "requests_per_second must be positive, got {}",
            requests_per_second
        )));
    }

    let period = Duration::try_from_secs_f64(1.0 / requests_per_second)
        .map_err(|e| AppError::ValidationError(format!("Invalid request rate: {}", e)))?;
    let quota = Quota::with_period(period)
        .ok_or_else(|| AppError::ValidationError("Request period must be non-zero".to_string()))?
        .allow_burst(NonZeroU32::new(burst_size.max(1)).unwrap_or(NonZeroU32::MIN));

    Ok(GovernorRateLimiter::direct(quota))
}

async fn parse_response(operation: &str, response: Response) -> AppResult<String> {
    let body = response.text().await.map_err(|e| {
        AppError::SerializationError(format!("Failed to read {} response: {}", operation, e))
    })?;
    let parsed: UploadResponse = serde_json::from_str(&body).map_err(|e| {
        AppError::SerializationError(format!(
            "Failed to parse {} response: {}. Response: {}",
            operation,
            e,
            truncate(&body, 200)
        ))
    })?;
    Ok(parsed.file_name)
}

fn status_error(operation: &str, status: StatusCode, attempts: u32) -> AppError {
    let message = format!("{} returned {} after {} attempt(s)", operation, status, attempts);
    match status {
        StatusCode::TOO_MANY_REQUESTS => AppError::RateLimitError(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::Unauthorized(message),
        StatusCode::NOT_FOUND => AppError::NotFound(message),
        status if status.is_client_error() => AppError::InvalidInput(message),
        _ => AppError::ExternalServiceError(message),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
