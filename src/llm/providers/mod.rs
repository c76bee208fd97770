pub mod gemini;
pub mod ollama;
pub mod remote;

use reqwest::{Response, StatusCode};
use std::time::Duration;

use super::LlmError;
use crate::config::LlmConfig;

pub(crate) fn build_client(config: &LlmConfig) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| LlmError::Connection(e.to_string()))
}

pub(crate) fn send_error(error: reqwest::Error) -> LlmError {
    if error.is_timeout() {
        LlmError::Timeout(error.to_string())
    } else {
        LlmError::Connection(error.to_string())
    }
}

/// Maps non-success statuses onto the retry taxonomy, keeping the body for diagnostics.
pub(crate) async fn check_status(response: Response) -> Result<Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("{} - {}", status, body.chars().take(300).collect::<String>());
    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited(message),
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
            LlmError::Unavailable(message)
        }
        _ => LlmError::Response(message),
    })
}
