//! Shared reqwest plumbing for the Drive and GitHub clients.

use drive_sync_core::error::{SyncError, SyncResult};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const USER_AGENT: &str = concat!("drive-sync/", env!("CARGO_PKG_VERSION"));

pub fn build_client() -> SyncResult<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))
}

pub fn network(e: reqwest::Error) -> SyncError {
    SyncError::Network(e.to_string())
}

/// Map a non-2xx response onto the core error taxonomy.
pub async fn checked(response: Response) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(%status, %url, body = %body, "HTTP request failed");
    Err(classify(status, &url, body))
}

fn classify(status: StatusCode, url: &str, body: String) -> SyncError {
    match status {
        StatusCode::NOT_FOUND => SyncError::NotFound(url.to_string()),
        StatusCode::UNAUTHORIZED => SyncError::Auth(body),
        StatusCode::TOO_MANY_REQUESTS => SyncError::RateLimited(body),
        StatusCode::FORBIDDEN if is_rate_limit_body(&body) => SyncError::RateLimited(body),
        _ => SyncError::Api {
            status: status.as_u16(),
            message: body,
        },
    }
}

fn is_rate_limit_body(body: &str) -> bool {
    body.contains("rateLimitExceeded")
        || body.contains("userRateLimitExceeded")
        || body.to_ascii_lowercase().contains("rate limit exceeded")
}
