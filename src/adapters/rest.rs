use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::{debug, info};

use crate::connection::{BackendConfig, BackendType, RestApiConfig};
use crate::error::{EngineError, Result};
use crate::schema::SchemaInfo;

use super::http::{apply_auth, build_client, check_reachable, join_url, read_json_body, require_base_url};
use super::{
    AdapterSettings, BackendAdapter, ConnectionTest, ResultRow, TargetKind, normalize_payload,
};

/// A request line produced by translation: `METHOD /path?query` plus an optional JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl ApiCall {
    pub fn is_read_only(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }
}

/// Parses `GET /users?limit=5`, a bare `/users` (GET), or a full URL under `base_url`.
/// Anything after the first line that parses as JSON becomes the request body.
pub fn parse_api_call(text: &str, base_url: &str) -> Result<ApiCall> {
    let text = text.trim();
    let (request_line, rest) = match text.split_once('\n') {
        Some((line, rest)) => (line.trim(), rest.trim()),
        None => (text, ""),
    };

    let mut parts = request_line.split_whitespace();
    let first = parts
        .next()
        .ok_or_else(|| EngineError::execution("empty API call"))?;

    let (method, target) = if first.starts_with('/') || first.starts_with("http") {
        (Method::GET, first)
    } else {
        let method = Method::from_bytes(first.to_uppercase().as_bytes())
            .map_err(|_| EngineError::execution(format!("unknown HTTP method '{}'", first)))?;
        let target = parts
            .next()
            .ok_or_else(|| EngineError::execution(format!("no path after {}", method)))?;
        (method, target)
    };

    let path = if target.starts_with("http://") || target.starts_with("https://") {
        let base = base_url.trim_end_matches('/');
        match target.strip_prefix(base) {
            Some(path) => path.to_string(),
            None => {
                return Err(EngineError::UnsafeQuery(format!(
                    "API call targets a host outside the connection: {}",
                    target
                )));
            }
        }
    } else if target.starts_with('/') {
        target.to_string()
    } else {
        return Err(EngineError::execution(format!(
            "API call path must start with '/': {}",
            target
        )));
    };

    let body = if rest.is_empty() {
        None
    } else {
        Some(serde_json::from_str(rest).map_err(|e| {
            EngineError::execution(format!("API call body is not valid JSON: {}", e))
        })?)
    };

    Ok(ApiCall { method, path, body })
}

pub struct RestAdapter {
    client: Client,
}

impl RestAdapter {
    pub fn new(settings: AdapterSettings) -> Result<Self> {
        let client = build_client(settings.http_timeout, settings.connect_timeout)?;
        Ok(Self { client })
    }

    fn api_config<'a>(&self, config: &'a BackendConfig) -> Result<&'a RestApiConfig> {
        match config {
            BackendConfig::RestApi(api) => Ok(api),
            other => Err(EngineError::configuration(format!(
                "rest_api adapter cannot use a '{}' configuration",
                other.kind_name()
            ))),
        }
    }
}

#[async_trait]
impl BackendAdapter for RestAdapter {
    fn backend_type(&self) -> BackendType {
        BackendType::RestApi
    }

    fn validate_config(&self, config: &BackendConfig) -> Result<()> {
        let api = self.api_config(config)?;
        require_base_url(&api.base_url)?;
        if let Some(endpoint) = api.endpoints.iter().find(|e| !e.path.starts_with('/')) {
            return Err(EngineError::configuration(format!(
                "endpoint path must start with '/': {}",
                endpoint.path
            )));
        }
        Ok(())
    }

    fn describe_target(&self, config: &BackendConfig) -> Result<TargetKind> {
        let api = self.api_config(config)?;
        if api.endpoints.is_empty() {
            return Err(EngineError::configuration(
                "REST connection has no endpoints configured",
            ));
        }
        Ok(TargetKind::Api {
            endpoints: api.endpoints.clone(),
        })
    }

    async fn test_connection(&self, config: &BackendConfig) -> ConnectionTest {
        match self.api_config(config) {
            Ok(api) => {
                let url = join_url(&api.base_url, api.health_path.as_deref().unwrap_or(""));
                check_reachable(&self.client, &url, &api.auth).await
            }
            Err(e) => ConnectionTest::failed(e.to_string()),
        }
    }

    async fn introspect_schema(&self, _config: &BackendConfig) -> Result<SchemaInfo> {
        Err(EngineError::UnsupportedOperation {
            operation: "schema introspection",
            backend: BackendType::RestApi,
        })
    }

    async fn execute_query(&self, config: &BackendConfig, query: &str) -> Result<Vec<ResultRow>> {
        let cleaned = self.sanitize(query)?;
        let api = self.api_config(config)?;
        let call = parse_api_call(&cleaned, &api.base_url)?;

        if !call.is_read_only() && !api.allow_writes {
            return Err(EngineError::UnsafeQuery(format!(
                "{} requests are not allowed on this connection",
                call.method
            )));
        }

        let url = join_url(&api.base_url, &call.path);
        debug!("Calling {} {}", call.method, url);

        let mut request = apply_auth(self.client.request(call.method.clone(), &url), &api.auth);
        if let Some(body) = &call.body {
            request = request.json(body);
        }

        let payload = read_json_body(request.send().await?).await?;
        let rows = normalize_payload(payload);
        info!("{} {} returned {} rows", call.method, call.path, rows.len());
        Ok(rows)
    }
}
