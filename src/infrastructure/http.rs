//! Mapping of HTTP outcomes onto `ExternalError` classes.

use crate::domain::errors::ExternalError;
use reqwest::StatusCode;
use std::time::Duration;

pub fn build_client(timeout: Duration) -> Result<reqwest::Client, ExternalError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ExternalError::Permanent(format!("Failed to build HTTP client: {}", e)))
}

/// 429 is a quota problem, 5xx and 408 are worth retrying, other 4xx are not
pub fn classify_status(status: StatusCode, body: &str) -> ExternalError {
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body, 200));
    if status == StatusCode::TOO_MANY_REQUESTS {
        ExternalError::Quota(detail)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ExternalError::Transient(detail)
    } else {
        ExternalError::Permanent(detail)
    }
}

/// Connection failures and timeouts are transient; anything else is a bug
/// in how the request was built
pub fn classify_transport(error: reqwest::Error) -> ExternalError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        ExternalError::Transient(error.to_string())
    } else if error.is_decode() {
        ExternalError::Parse(error.to_string())
    } else if let Some(status) = error.status() {
        classify_status(status, &error.to_string())
    } else {
        ExternalError::Transient(error.to_string())
    }
}

/// Read the body of a response, turning non-2xx statuses into errors
pub async fn read_body(response: reqwest::Response) -> Result<String, ExternalError> {
    let status = response.status();
    let body = response.text().await.map_err(classify_transport)?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(classify_status(status, &body))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
