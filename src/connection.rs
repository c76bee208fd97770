use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::sanitizer::QuerySanitizer;

const REDACTED: &str = "********";

/// The kind of backend a connection points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    Mysql,
    Postgresql,
    VirtualTable,
    RestApi,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Mysql => "mysql",
            BackendType::Postgresql => "postgresql",
            BackendType::VirtualTable => "virtual_table",
            BackendType::RestApi => "rest_api",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "mysql" => Some(BackendType::Mysql),
            "postgresql" => Some(BackendType::Postgresql),
            "virtual_table" => Some(BackendType::VirtualTable),
            "rest_api" => Some(BackendType::RestApi),
            _ => None,
        }
    }

    /// Dialect name used when prompting the model.
    pub fn dialect_name(&self) -> &'static str {
        match self {
            BackendType::Mysql => "MySQL",
            BackendType::Postgresql => "PostgreSQL",
            BackendType::VirtualTable => "ANSI SQL",
            BackendType::RestApi => "HTTP",
        }
    }

    pub fn sanitizer(&self) -> QuerySanitizer {
        match self {
            BackendType::RestApi => QuerySanitizer::Http,
            _ => QuerySanitizer::Sql,
        }
    }

    pub fn supports_introspection(&self) -> bool {
        !matches!(self, BackendType::RestApi)
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Inactive,
    Active,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Inactive => "inactive",
            ConnectionStatus::Active => "active",
            ConnectionStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inactive" => Some(ConnectionStatus::Inactive),
            "active" => Some(ConnectionStatus::Active),
            "error" => Some(ConnectionStatus::Error),
            _ => None,
        }
    }
}

/// Credentials shared by the HTTP-based backends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Header carrying `api_key`; `X-API-Key` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl HttpAuth {
    fn redacted(&self) -> Self {
        Self {
            api_key: self.api_key.as_ref().map(|_| REDACTED.to_string()),
            api_key_header: self.api_key_header.clone(),
            bearer_token: self.bearer_token.as_ref().map(|_| REDACTED.to_string()),
            username: self.username.clone(),
            password: self.password.as_ref().map(|_| REDACTED.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationalConfig {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub database: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Forces TLS on or off; detected from the host name when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualTableConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Path of the self-description document, relative to `base_url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_path: Option<String>,
    #[serde(flatten)]
    pub auth: HttpAuth,
}

/// One endpoint the model may choose from when targeting a REST API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEndpoint {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestApiConfig {
    pub base_url: String,
    #[serde(default)]
    pub endpoints: Vec<ApiEndpoint>,
    /// Path requested by connection tests; the base URL itself when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_path: Option<String>,
    /// Allows methods other than GET and HEAD.
    #[serde(default)]
    pub allow_writes: bool,
    #[serde(flatten)]
    pub auth: HttpAuth,
}

/// Backend-specific connection settings. Only the adapter owning the backend kind
/// reads the fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Relational(RelationalConfig),
    VirtualTable(VirtualTableConfig),
    RestApi(RestApiConfig),
}

impl BackendConfig {
    /// Copy of the configuration with every secret masked.
    pub fn redacted(&self) -> Self {
        match self {
            BackendConfig::Relational(config) => BackendConfig::Relational(RelationalConfig {
                password: config.password.as_ref().map(|_| REDACTED.to_string()),
                ..config.clone()
            }),
            BackendConfig::VirtualTable(config) => {
                BackendConfig::VirtualTable(VirtualTableConfig {
                    auth: config.auth.redacted(),
                    ..config.clone()
                })
            }
            BackendConfig::RestApi(config) => BackendConfig::RestApi(RestApiConfig {
                auth: config.auth.redacted(),
                ..config.clone()
            }),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            BackendConfig::Relational(_) => "relational",
            BackendConfig::VirtualTable(_) => "virtual_table",
            BackendConfig::RestApi(_) => "rest_api",
        }
    }
}

/// A tenant-owned definition of a queryable backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub backend_type: BackendType,
    pub config: BackendConfig,
    pub status: ConnectionStatus,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_tested_at: Option<DateTime<Utc>>,
}

impl Connection {
    pub fn new(tenant_id: &str, definition: NewConnection) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name: definition.name,
            backend_type: definition.backend_type,
            config: definition.config,
            status: ConnectionStatus::Inactive,
            is_default: definition.is_default,
            created_at: now,
            updated_at: now,
            last_tested_at: None,
        }
    }

    pub fn redacted(&self) -> Self {
        Self {
            config: self.config.redacted(),
            ..self.clone()
        }
    }
}

/// Definition of a connection that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewConnection {
    pub name: String,
    pub backend_type: BackendType,
    pub config: BackendConfig,
    #[serde(default)]
    pub is_default: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_deserializes_from_tagged_json() {
        let config: BackendConfig = serde_json::from_value(json!({
            "kind": "rest_api",
            "base_url": "https://api.example.com",
            "endpoints": [{"method": "GET", "path": "/albums", "description": "All albums"}],
            "api_key": "secret",
        }))
        .unwrap();

        match config {
            BackendConfig::RestApi(rest) => {
                assert_eq!(rest.endpoints.len(), 1);
                assert_eq!(rest.auth.api_key.as_deref(), Some("secret"));
                assert!(!rest.allow_writes);
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[test]
    fn test_redaction_masks_every_secret() {
        let connection = Connection::new(
            "tenant-a",
            NewConnection {
                name: "warehouse".to_string(),
                backend_type: BackendType::VirtualTable,
                config: BackendConfig::VirtualTable(VirtualTableConfig {
                    base_url: "https://vt.example.com".to_string(),
                    database: Some("sales".to_string()),
                    schema_path: None,
                    auth: HttpAuth {
                        api_key: Some("k".to_string()),
                        api_key_header: None,
                        bearer_token: Some("t".to_string()),
                        username: Some("bob".to_string()),
                        password: Some("p".to_string()),
                    },
                }),
                is_default: false,
            },
        );

        let rendered = serde_json::to_string(&connection.redacted()).unwrap();
        assert!(rendered.contains(REDACTED));
        assert!(rendered.contains("bob"));
        assert!(!rendered.contains("\"k\""));
        assert!(!rendered.contains("\"t\""));
        assert!(!rendered.contains("\"p\""));
        assert_eq!(connection.status, ConnectionStatus::Inactive);
    }

    #[test]
    fn test_relational_password_is_redacted() {
        let config = BackendConfig::Relational(RelationalConfig {
            host: "db.internal".to_string(),
            port: None,
            database: "shop".to_string(),
            username: "app".to_string(),
            password: Some("hunter2".to_string()),
            ssl: None,
        });

        match config.redacted() {
            BackendConfig::Relational(relational) => {
                assert_eq!(relational.password.as_deref(), Some(REDACTED));
                assert_eq!(relational.username, "app");
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[test]
    fn test_backend_type_round_trips_through_str() {
        for backend in [
            BackendType::Mysql,
            BackendType::Postgresql,
            BackendType::VirtualTable,
            BackendType::RestApi,
        ] {
            assert_eq!(BackendType::parse(backend.as_str()), Some(backend));
        }
        assert!(!BackendType::RestApi.supports_introspection());
        assert_eq!(BackendType::RestApi.sanitizer(), QuerySanitizer::Http);
    }
}
