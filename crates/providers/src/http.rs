//! Shared HTTP plumbing: client construction and error classification.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use sem_core::{PipelineError, PipelineResult, ProviderError};
use std::time::Duration;

/// Builds a JSON client with bearer auth and any extra headers.
pub(crate) fn build_client(
    bearer: &str,
    extra_headers: &[(&'static str, &str)],
    timeout_ms: u64,
) -> PipelineResult<reqwest::Client> {
    let mut headers = HeaderMap::new();
    let auth = format!("Bearer {}", bearer.trim());
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&auth)
            .map_err(|e| PipelineError::Config(format!("invalid API credential: {e}")))?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for &(name, value) in extra_headers {
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| PipelineError::Config(format!("invalid {name} header: {e}")))?;
        headers.insert(HeaderName::from_static(name), value);
    }

    reqwest::Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .default_headers(headers)
        .build()
        .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {e}")))
}

/// Maps a non-success HTTP status onto the provider error taxonomy.
pub(crate) fn status_error(status: StatusCode, body: &str) -> ProviderError {
    let message = format!("{status}: {}", truncate(body, 300));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderError::Timeout(message),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(message),
        s if s.is_server_error() => ProviderError::Unavailable(message),
        _ => ProviderError::Rejected(message),
    }
}

pub(crate) fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else if err.is_decode() {
        ProviderError::Malformed(err.to_string())
    } else {
        ProviderError::Unavailable(err.to_string())
    }
}

/// Sends the request and returns the body of a successful response.
pub(crate) async fn send_json(request: reqwest::RequestBuilder) -> Result<String, ProviderError> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(status_error(status, &body))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(status_error(StatusCode::UNAUTHORIZED, "").is_auth());
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, ""),
            ProviderError::Unavailable(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, "bad field"),
            ProviderError::Rejected(_)
        ));
    }

    #[test]
    fn test_truncate_long_bodies() {
        let body = "x".repeat(1000);
        assert_eq!(truncate(&body, 10).chars().count(), 11);
        assert_eq!(truncate("short", 10), "short");
    }
}
