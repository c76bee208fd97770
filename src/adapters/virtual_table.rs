//! Adapter for table stores that are reachable only over HTTP.
//!
//! The store has no catalog and no SQL endpoint, so only two query shapes can be
//! executed faithfully: `SELECT <cols|*> FROM t [LIMIT n]` and `SELECT COUNT(*) FROM t`.
//! Both map onto `GET {base_url}/{t}`; anything else is refused.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::connection::{BackendConfig, BackendType, VirtualTableConfig};
use crate::error::{EngineError, Result};
use crate::schema::{ColumnInfo, SchemaInfo, TableInfo};

use super::http::{apply_auth, build_client, check_reachable, join_url, read_json_body, require_base_url};
use super::{
    AdapterSettings, BackendAdapter, ConnectionTest, ResultRow, TargetKind, normalize_payload,
};

const DEFAULT_SCHEMA_PATH: &str = "/openapi.json";
const SYNTHETIC_TABLE: &str = "records";
const COUNT_KEYS: &[&str] = &["count", "total", "totalCount", "total_count"];

static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)^\s*select\s+count\s*\(\s*\*\s*\)(?:\s+as\s+[`"]?\w+[`"]?)?\s+from\s+[`"]?([A-Za-z_][\w.]*)[`"]?\s*;?\s*$"#,
    )
    .expect("count pattern is valid")
});

static SELECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)^\s*select\s+(.+?)\s+from\s+[`"]?([A-Za-z_][\w.]*)[`"]?(?:\s+limit\s+(\d+))?\s*;?\s*$"#,
    )
    .expect("select pattern is valid")
});

static COLUMN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[`"]?([A-Za-z_]\w*)[`"]?$"#).expect("column pattern is valid")
});

/// The subset of SQL the table store can answer.
#[derive(Debug, Clone, PartialEq)]
pub enum SimpleQuery {
    Select {
        table: String,
        columns: Option<Vec<String>>,
        limit: Option<usize>,
    },
    Count {
        table: String,
    },
}

fn table_segment(name: &str) -> String {
    name.rsplit('.').next().unwrap_or(name).to_string()
}

fn unsupported(sql: &str) -> EngineError {
    EngineError::execution(format!(
        "complex queries unsupported by the virtual table store; only SELECT ... FROM table [LIMIT n] and SELECT COUNT(*) FROM table are supported (got: {})",
        sql
    ))
}

pub fn parse_simple_query(sql: &str) -> Result<SimpleQuery> {
    if let Some(captures) = COUNT_RE.captures(sql) {
        return Ok(SimpleQuery::Count {
            table: table_segment(&captures[1]),
        });
    }

    let captures = SELECT_RE.captures(sql).ok_or_else(|| unsupported(sql))?;
    let projection = captures[1].trim();

    let columns = if projection == "*" {
        None
    } else {
        let mut columns = Vec::new();
        for part in projection.split(',') {
            let column = COLUMN_RE
                .captures(part.trim())
                .ok_or_else(|| unsupported(sql))?;
            columns.push(column[1].to_string());
        }
        Some(columns)
    };

    let limit = match captures.get(3) {
        Some(limit) => Some(
            limit
                .as_str()
                .parse::<usize>()
                .map_err(|_| unsupported(sql))?,
        ),
        None => None,
    };

    Ok(SimpleQuery::Select {
        table: table_segment(&captures[2]),
        columns,
        limit,
    })
}

fn project(row: ResultRow, columns: &[String]) -> ResultRow {
    match row.data {
        Value::Object(mut map) => {
            let projected: Map<String, Value> = columns
                .iter()
                .map(|column| (column.clone(), map.remove(column).unwrap_or(Value::Null)))
                .collect();
            ResultRow::new(Value::Object(projected))
        }
        other => ResultRow::new(other),
    }
}

fn reported_count(payload: &Value) -> Option<u64> {
    let object = payload.as_object()?;
    COUNT_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_u64))
}

/// Single stand-in table used when the store describes nothing discoverable.
pub fn synthetic_schema(config: &VirtualTableConfig) -> SchemaInfo {
    let name = config
        .database
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(SYNTHETIC_TABLE);

    SchemaInfo::new(vec![TableInfo::new(
        name,
        vec![
            ColumnInfo::new("id", "string", false),
            ColumnInfo::new("data", "object", true),
        ],
    )])
}

fn column_type(property: &Value) -> String {
    if property.get("$ref").is_some() {
        return "object".to_string();
    }
    let base = property
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("string");
    match property.get("format").and_then(Value::as_str) {
        Some(format) => format!("{}({})", base, format),
        None => base.to_string(),
    }
}

fn columns_from_object_schema(schema: &Value) -> Vec<ColumnInfo> {
    let required: HashSet<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .map(|(name, property)| {
                    let nullable = !required.contains(name.as_str())
                        || property.get("nullable").and_then(Value::as_bool) == Some(true);
                    ColumnInfo::new(name.clone(), column_type(property), nullable)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn find_component_schema<'a>(document: &'a Value, table: &str) -> Option<&'a Value> {
    let schemas = document
        .pointer("/components/schemas")
        .or_else(|| document.get("definitions"))?
        .as_object()?;

    let wanted = table.to_lowercase();
    let singular = wanted.trim_end_matches('s');
    schemas.iter().find_map(|(name, schema)| {
        let name = name.to_lowercase();
        (name == wanted || name == singular).then_some(schema)
    })
}

fn is_table_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !segment.starts_with('{')
        && !segment.starts_with(':')
        && segment != "api"
        && !(segment.starts_with('v') && segment[1..].chars().all(|c| c.is_ascii_digit()))
}

/// Derives tables from a self-description: either `{"tables": [...]}` or an
/// OpenAPI-style document with `paths`.
pub fn derive_schema(document: &Value) -> Option<SchemaInfo> {
    if let Some(described) = document.get("tables").and_then(Value::as_array) {
        let tables: Vec<TableInfo> = described
            .iter()
            .filter_map(|table| {
                let name = table.get("name")?.as_str()?;
                let columns = table
                    .get("columns")
                    .and_then(Value::as_array)
                    .map(|columns| {
                        columns
                            .iter()
                            .filter_map(|column| {
                                let name = column.get("name")?.as_str()?;
                                let data_type = column
                                    .get("type")
                                    .and_then(Value::as_str)
                                    .unwrap_or("string");
                                let nullable = column
                                    .get("nullable")
                                    .and_then(Value::as_bool)
                                    .unwrap_or(true);
                                Some(ColumnInfo::new(name, data_type, nullable))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Some(TableInfo::new(name, columns))
            })
            .collect();
        if !tables.is_empty() {
            return Some(SchemaInfo::new(tables));
        }
    }

    let paths = document.get("paths")?.as_object()?;
    let mut seen = HashSet::new();
    let mut tables = Vec::new();
    for path in paths.keys() {
        let Some(segment) = path.split('/').find(|segment| is_table_segment(segment)) else {
            continue;
        };
        if seen.insert(segment.to_string()) {
            let columns = find_component_schema(document, segment)
                .map(columns_from_object_schema)
                .unwrap_or_default();
            tables.push(TableInfo::new(segment, columns));
        }
    }

    if tables.is_empty() {
        None
    } else {
        Some(SchemaInfo::new(tables))
    }
}

pub struct VirtualTableAdapter {
    client: Client,
    settings: AdapterSettings,
}

impl VirtualTableAdapter {
    pub fn new(settings: AdapterSettings) -> Result<Self> {
        let client = build_client(settings.http_timeout, settings.connect_timeout)?;
        Ok(Self { client, settings })
    }

    fn table_config<'a>(&self, config: &'a BackendConfig) -> Result<&'a VirtualTableConfig> {
        match config {
            BackendConfig::VirtualTable(table) => Ok(table),
            other => Err(EngineError::configuration(format!(
                "virtual_table adapter cannot use a '{}' configuration",
                other.kind_name()
            ))),
        }
    }

    async fn fetch_table(
        &self,
        config: &VirtualTableConfig,
        table: &str,
        limit: Option<usize>,
    ) -> Result<Value> {
        let url = join_url(&config.base_url, table);
        let mut request = self.client.get(&url);
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }

        debug!("Fetching virtual table {} from {}", table, url);
        let response = apply_auth(request, &config.auth).send().await?;
        read_json_body(response).await
    }
}

#[async_trait]
impl BackendAdapter for VirtualTableAdapter {
    fn backend_type(&self) -> BackendType {
        BackendType::VirtualTable
    }

    fn validate_config(&self, config: &BackendConfig) -> Result<()> {
        let table = self.table_config(config)?;
        require_base_url(&table.base_url)
    }

    fn describe_target(&self, config: &BackendConfig) -> Result<TargetKind> {
        let table = self.table_config(config)?;
        Ok(TargetKind::Database {
            dialect: BackendType::VirtualTable.dialect_name(),
            database: table
                .database
                .clone()
                .unwrap_or_else(|| "default".to_string()),
            simple_select_only: true,
        })
    }

    async fn test_connection(&self, config: &BackendConfig) -> ConnectionTest {
        match self.table_config(config) {
            Ok(table) => check_reachable(&self.client, &table.base_url, &table.auth).await,
            Err(e) => ConnectionTest::failed(e.to_string()),
        }
    }

    async fn introspect_schema(&self, config: &BackendConfig) -> Result<SchemaInfo> {
        let table = self.table_config(config)?;
        let schema_path = table.schema_path.as_deref().unwrap_or(DEFAULT_SCHEMA_PATH);
        let url = join_url(&table.base_url, schema_path);

        let response = apply_auth(self.client.get(&url), &table.auth)
            .send()
            .await?;

        let derived = match read_json_body(response).await {
            Ok(document) => derive_schema(&document),
            Err(e) => {
                debug!("Self-description at {} unavailable: {}", url, e);
                None
            }
        };

        match derived {
            Some(schema) => {
                info!("Derived {} tables from {}", schema.total_tables, url);
                Ok(schema)
            }
            None => {
                // TODO: confirm with product whether a synthetic table should be flagged to the caller
                warn!(
                    "No discoverable structure at {}, using a synthetic table",
                    url
                );
                Ok(synthetic_schema(table))
            }
        }
    }

    async fn execute_query(&self, config: &BackendConfig, query: &str) -> Result<Vec<ResultRow>> {
        let sql = self.sanitize(query)?;
        let table_config = self.table_config(config)?;

        match parse_simple_query(&sql)? {
            SimpleQuery::Count { table } => {
                let payload = self.fetch_table(table_config, &table, None).await?;
                let count = match reported_count(&payload) {
                    Some(count) => count,
                    None => normalize_payload(payload).len() as u64,
                };
                Ok(vec![ResultRow::new(json!({ "count": count }))])
            }
            SimpleQuery::Select {
                table,
                columns,
                limit,
            } => {
                let limit = limit.unwrap_or(self.settings.default_row_limit);
                let payload = self.fetch_table(table_config, &table, Some(limit)).await?;

                let rows = normalize_payload(payload).into_iter().take(limit);
                let rows: Vec<ResultRow> = match columns {
                    Some(columns) => rows.map(|row| project(row, &columns)).collect(),
                    None => rows.collect(),
                };
                info!("Virtual table {} returned {} rows", table, rows.len());
                Ok(rows)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_select_star_with_limit() {
        assert_eq!(
            parse_simple_query("SELECT * FROM customers LIMIT 25;").unwrap(),
            SimpleQuery::Select {
                table: "customers".to_string(),
                columns: None,
                limit: Some(25),
            }
        );
    }

    #[test]
    fn test_parse_select_columns_and_qualified_table() {
        assert_eq!(
            parse_simple_query("select id, \"name\" from sales.customers").unwrap(),
            SimpleQuery::Select {
                table: "customers".to_string(),
                columns: Some(vec!["id".to_string(), "name".to_string()]),
                limit: None,
            }
        );
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(
            parse_simple_query("SELECT COUNT(*) AS total FROM orders").unwrap(),
            SimpleQuery::Count {
                table: "orders".to_string()
            }
        );
    }

    #[test]
    fn test_complex_queries_are_refused() {
        for sql in [
            "SELECT * FROM orders WHERE total > 10",
            "SELECT a.id FROM a JOIN b ON a.id = b.id",
            "SELECT SUM(total) FROM orders",
            "SELECT region, COUNT(*) FROM orders GROUP BY region",
            "SELECT 'no answer' AS error",
        ] {
            let err = parse_simple_query(sql).unwrap_err();
            assert!(
                err.to_string().contains("complex queries unsupported"),
                "{} gave {}",
                sql,
                err
            );
        }
    }

    #[test]
    fn test_derive_schema_from_openapi_paths() {
        let document = json!({
            "openapi": "3.0.0",
            "paths": {
                "/api/v1/customers": {},
                "/api/v1/customers/{id}": {},
                "/api/v1/orders": {},
            },
            "components": {"schemas": {
                "Customer": {
                    "required": ["id"],
                    "properties": {
                        "id": {"type": "integer"},
                        "signup": {"type": "string", "format": "date"},
                    }
                }
            }}
        });

        let schema = derive_schema(&document).unwrap();
        assert_eq!(schema.total_tables, 2);
        assert_eq!(schema.tables[0].name, "customers");
        assert_eq!(schema.tables[0].columns.len(), 2);
        let id = &schema.tables[0].columns[0];
        assert_eq!((id.name.as_str(), id.nullable), ("id", false));
        assert_eq!(schema.tables[0].columns[1].data_type, "string(date)");
        assert!(schema.tables[1].columns.is_empty());
    }

    #[test]
    fn test_derive_schema_from_table_listing() {
        let document = json!({"tables": [
            {"name": "events", "columns": [{"name": "ts", "type": "timestamp", "nullable": false}]}
        ]});
        let schema = derive_schema(&document).unwrap();
        assert_eq!(schema.tables[0].name, "events");
        assert!(!schema.tables[0].columns[0].nullable);
    }

    #[test]
    fn test_nothing_discoverable_yields_none() {
        assert!(derive_schema(&json!({"status": "ok"})).is_none());
        assert!(derive_schema(&json!({"paths": {"/{id}": {}}})).is_none());
    }

    #[test]
    fn test_synthetic_schema_is_never_empty() {
        let config = VirtualTableConfig {
            base_url: "https://vt.example.com".to_string(),
            database: None,
            schema_path: None,
            auth: Default::default(),
        };
        let schema = synthetic_schema(&config);
        assert_eq!(schema.total_tables, 1);
        assert_eq!(schema.tables[0].name, SYNTHETIC_TABLE);
    }

    #[test]
    fn test_projection_keeps_requested_columns_only() {
        let row = ResultRow::new(json!({"id": 1, "name": "a", "secret": "x"}));
        let projected = project(row, &["name".to_string(), "missing".to_string()]);
        assert_eq!(projected.data, json!({"name": "a", "missing": null}));
    }
}
