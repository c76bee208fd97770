pub mod http;
pub mod registry;
pub mod relational;
pub mod rest;
pub mod virtual_table;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::connection::{ApiEndpoint, BackendConfig, BackendType};
use crate::error::Result;
use crate::schema::SchemaInfo;

pub use registry::AdapterRegistry;

/// Outcome of a connectivity check. Failures are reported here rather than as errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionTest {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl ConnectionTest {
    pub fn succeeded(message: impl Into<String>, latency: Duration) -> Self {
        Self {
            success: true,
            message: message.into(),
            latency_ms: Some(latency.as_millis() as u64),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            latency_ms: None,
        }
    }
}

/// Envelope shared by relational rows and REST payload items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub data: serde_json::Value,
}

impl ResultRow {
    pub fn new(data: serde_json::Value) -> Self {
        Self { data }
    }
}

/// What the translator needs to know about a backend to prompt for it.
#[derive(Debug, Clone, PartialEq)]
pub enum TranslationTarget {
    Database {
        dialect: &'static str,
        database: String,
        schema: SchemaInfo,
        simple_select_only: bool,
    },
    Api {
        endpoints: Vec<ApiEndpoint>,
    },
}

/// Target description before schema introspection has happened.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetKind {
    Database {
        dialect: &'static str,
        database: String,
        simple_select_only: bool,
    },
    Api {
        endpoints: Vec<ApiEndpoint>,
    },
}

impl TargetKind {
    /// API targets are translated from their endpoint list alone.
    pub fn needs_schema(&self) -> bool {
        matches!(self, TargetKind::Database { .. })
    }

    pub fn with_schema(self, schema: SchemaInfo) -> TranslationTarget {
        match self {
            TargetKind::Database {
                dialect,
                database,
                simple_select_only,
            } => TranslationTarget::Database {
                dialect,
                database,
                schema,
                simple_select_only,
            },
            TargetKind::Api { endpoints } => TranslationTarget::Api { endpoints },
        }
    }
}

/// Timeout budget and limits applied by every adapter.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
    pub http_timeout: Duration,
    pub default_row_limit: usize,
}

impl AdapterSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            query_timeout: Duration::from_secs(config.query_timeout_secs),
            http_timeout: Duration::from_secs(config.http_timeout_secs),
            default_row_limit: config.default_row_limit,
        }
    }
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// The query capability set every backend kind implements.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn backend_type(&self) -> BackendType;

    /// Rejects configurations of the wrong kind or with missing required fields.
    fn validate_config(&self, config: &BackendConfig) -> Result<()>;

    fn describe_target(&self, config: &BackendConfig) -> Result<TargetKind>;

    async fn test_connection(&self, config: &BackendConfig) -> ConnectionTest;

    async fn introspect_schema(&self, config: &BackendConfig) -> Result<SchemaInfo>;

    /// Sanitizes `query` and runs it. Never executes text the sanitizer rejected.
    async fn execute_query(&self, config: &BackendConfig, query: &str) -> Result<Vec<ResultRow>>;

    fn sanitize(&self, query: &str) -> Result<String> {
        self.backend_type().sanitizer().sanitize(query)
    }
}

/// Flattens an HTTP payload into rows: arrays as-is, wrapped collections unwrapped,
/// anything else as a single row.
pub fn normalize_payload(payload: serde_json::Value) -> Vec<ResultRow> {
    const COLLECTION_KEYS: &[&str] = &["data", "items", "results", "rows", "records", "value"];

    match payload {
        serde_json::Value::Array(items) => items.into_iter().map(ResultRow::new).collect(),
        serde_json::Value::Object(mut map) => {
            let key = COLLECTION_KEYS
                .iter()
                .find(|key| matches!(map.get(**key), Some(serde_json::Value::Array(_))));
            match key.and_then(|key| map.remove(*key)) {
                Some(serde_json::Value::Array(items)) => {
                    items.into_iter().map(ResultRow::new).collect()
                }
                _ => vec![ResultRow::new(serde_json::Value::Object(map))],
            }
        }
        serde_json::Value::Null => Vec::new(),
        other => vec![ResultRow::new(other)],
    }
}
