use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::connection::HttpAuth;
use crate::error::{EngineError, Result};

use super::ConnectionTest;

const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

pub fn build_client(timeout: Duration, connect_timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| EngineError::configuration(format!("failed to build HTTP client: {}", e)))
}

/// Attaches the API key header, then a bearer token or, failing that, basic auth.
pub fn apply_auth(mut request: RequestBuilder, auth: &HttpAuth) -> RequestBuilder {
    if let Some(api_key) = auth.api_key.as_deref().filter(|key| !key.is_empty()) {
        let header = auth
            .api_key_header
            .as_deref()
            .filter(|header| !header.is_empty())
            .unwrap_or(DEFAULT_API_KEY_HEADER);
        request = request.header(header, api_key);
    }

    if let Some(token) = auth.bearer_token.as_deref().filter(|token| !token.is_empty()) {
        request = request.bearer_auth(token);
    } else if let Some(username) = auth.username.as_deref().filter(|user| !user.is_empty()) {
        request = request.basic_auth(username, auth.password.as_deref());
    }

    request
}

pub fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = path.trim();
    if path.is_empty() {
        return base.to_string();
    }
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

pub fn require_base_url(base_url: &str) -> Result<()> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(EngineError::configuration("base_url is required"));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(EngineError::configuration(format!(
            "base_url must be an http(s) URL, got '{}'",
            trimmed
        )));
    }
    Ok(())
}

/// Issues an authenticated GET and treats any status below 500 as reachable.
pub async fn check_reachable(client: &Client, url: &str, auth: &HttpAuth) -> ConnectionTest {
    let started = Instant::now();
    debug!("Probing {}", url);

    match apply_auth(client.get(url), auth).send().await {
        Ok(response) => {
            let status = response.status();
            let latency = started.elapsed();
            if status.is_server_error() {
                ConnectionTest::failed(format!("Server responded with {}", status))
            } else if status.is_success() {
                ConnectionTest::succeeded(format!("Connected ({})", status), latency)
            } else {
                ConnectionTest::succeeded(
                    format!("Reachable, but the server responded with {}", status),
                    latency,
                )
            }
        }
        Err(e) if e.is_timeout() => ConnectionTest::failed(format!("Request timed out: {}", e)),
        Err(e) => ConnectionTest::failed(format!("Connection failed: {}", e)),
    }
}

/// Reads a response body as JSON, falling back to `{"body": text}` for other content.
pub async fn read_json_body(response: reqwest::Response) -> Result<serde_json::Value> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(EngineError::execution(format!(
            "HTTP request failed with status {}: {}",
            status,
            truncate(&text, 200)
        )));
    }

    if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }

    Ok(serde_json::from_str(&text).unwrap_or_else(|_| serde_json::json!({ "body": text })))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url_handles_slashes() {
        assert_eq!(join_url("https://api.x.io/", "/users"), "https://api.x.io/users");
        assert_eq!(join_url("https://api.x.io", "users"), "https://api.x.io/users");
        assert_eq!(join_url("https://api.x.io/", ""), "https://api.x.io");
    }

    #[test]
    fn test_require_base_url() {
        assert!(require_base_url("").is_err());
        assert!(require_base_url("ftp://files").is_err());
        assert!(require_base_url("https://api.x.io").is_ok());
    }

    #[test]
    fn test_apply_auth_sets_configured_headers() {
        let client = Client::new();
        let auth = HttpAuth {
            api_key: Some("abc".to_string()),
            api_key_header: Some("X-Custom-Key".to_string()),
            bearer_token: Some("tok".to_string()),
            username: None,
            password: None,
        };

        let request = apply_auth(client.get("http://localhost/"), &auth)
            .build()
            .unwrap();
        assert_eq!(request.headers()["X-Custom-Key"], "abc");
        assert_eq!(request.headers()["authorization"], "Bearer tok");
    }

    #[test]
    fn test_apply_auth_basic() {
        let client = Client::new();
        let auth = HttpAuth {
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            ..HttpAuth::default()
        };

        let request = apply_auth(client.get("http://localhost/"), &auth)
            .build()
            .unwrap();
        // base64("user:pass")
        assert_eq!(request.headers()["authorization"], "Basic dXNlcjpwYXNz");
        assert!(request.headers().get(DEFAULT_API_KEY_HEADER).is_none());
    }
}
