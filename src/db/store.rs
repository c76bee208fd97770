use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use duckdb::params;
use r2d2::Pool;
use tracing::debug;

use crate::connection::{BackendType, Connection, ConnectionStatus};
use crate::error::{EngineError, Result};
use crate::orchestrator::{QueryHistoryRecord, QueryStatus};

use super::db_pool::DuckDBConnectionManager;
use super::{ConnectionStore, HistoryStore};

const CONNECTION_COLUMNS: &str = "id, tenant_id, name, backend_type, config, status, is_default, created_at, updated_at, last_tested_at";

const HISTORY_COLUMNS: &str = "id, tenant_id, connection_id, user_id, natural_language, generated_query, results, execution_time_ms, status, error_message, confidence, advisory, created_at";

/// Raw column values, converted outside the row callback so parse errors surface as ours.
struct ConnectionRow {
    id: String,
    tenant_id: String,
    name: String,
    backend_type: String,
    config: String,
    status: String,
    is_default: bool,
    created_at: String,
    updated_at: String,
    last_tested_at: Option<String>,
}

struct HistoryRow {
    id: String,
    tenant_id: String,
    connection_id: String,
    user_id: String,
    natural_language: String,
    generated_query: String,
    results: String,
    execution_time_ms: i64,
    status: String,
    error_message: Option<String>,
    confidence: f64,
    advisory: Option<String>,
    created_at: String,
}

// fixed width so text ordering matches time ordering
fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|e| EngineError::storage(format!("invalid timestamp '{}': {}", value, e)))
}

impl ConnectionRow {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            name: row.get(2)?,
            backend_type: row.get(3)?,
            config: row.get(4)?,
            status: row.get(5)?,
            is_default: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            last_tested_at: row.get(9)?,
        })
    }

    fn into_connection(self) -> Result<Connection> {
        let backend_type = BackendType::parse(&self.backend_type).ok_or_else(|| {
            EngineError::storage(format!("unknown backend type '{}'", self.backend_type))
        })?;
        let status = ConnectionStatus::parse(&self.status).ok_or_else(|| {
            EngineError::storage(format!("unknown connection status '{}'", self.status))
        })?;

        Ok(Connection {
            id: self.id,
            tenant_id: self.tenant_id,
            name: self.name,
            backend_type,
            config: serde_json::from_str(&self.config)?,
            status,
            is_default: self.is_default,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            last_tested_at: self
                .last_tested_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
        })
    }
}

impl HistoryRow {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            connection_id: row.get(2)?,
            user_id: row.get(3)?,
            natural_language: row.get(4)?,
            generated_query: row.get(5)?,
            results: row.get(6)?,
            execution_time_ms: row.get(7)?,
            status: row.get(8)?,
            error_message: row.get(9)?,
            confidence: row.get(10)?,
            advisory: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    fn into_record(self) -> Result<QueryHistoryRecord> {
        let status = QueryStatus::parse(&self.status).ok_or_else(|| {
            EngineError::storage(format!("unknown query status '{}'", self.status))
        })?;

        Ok(QueryHistoryRecord {
            id: self.id,
            tenant_id: self.tenant_id,
            connection_id: self.connection_id,
            user_id: self.user_id,
            natural_language: self.natural_language,
            generated_query: self.generated_query,
            results: serde_json::from_str(&self.results)?,
            execution_time_ms: self.execution_time_ms.max(0) as u64,
            status,
            error_message: self.error_message,
            confidence: self.confidence,
            advisory: self.advisory,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

/// Connection and history store on a DuckDB file. Every call runs on the blocking pool.
#[derive(Clone)]
pub struct DuckDbStore {
    pool: Pool<DuckDBConnectionManager>,
}

impl DuckDbStore {
    pub fn new(pool: Pool<DuckDBConnectionManager>) -> Self {
        Self { pool }
    }

    async fn with_conn<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&duckdb::Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            work(&conn)
        })
        .await?
    }
}

#[async_trait]
impl ConnectionStore for DuckDbStore {
    async fn create_connection(&self, connection: Connection) -> Result<Connection> {
        let stored = connection.clone();
        let config = serde_json::to_string(&connection.config)?;

        self.with_conn(move |conn| {
            if connection.is_default {
                conn.execute(
                    "UPDATE connections SET is_default = false WHERE tenant_id = ? AND is_default",
                    params![connection.tenant_id],
                )?;
            }

            conn.execute(
                &format!(
                    "INSERT INTO connections ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    CONNECTION_COLUMNS
                ),
                params![
                    connection.id,
                    connection.tenant_id,
                    connection.name,
                    connection.backend_type.as_str(),
                    config,
                    connection.status.as_str(),
                    connection.is_default,
                    format_timestamp(&connection.created_at),
                    format_timestamp(&connection.updated_at),
                    connection.last_tested_at.as_ref().map(format_timestamp),
                ],
            )?;
            debug!("Stored connection {}", connection.id);
            Ok(())
        })
        .await?;

        Ok(stored)
    }

    async fn get_connection(&self, tenant_id: &str, id: &str) -> Result<Connection> {
        let tenant_id = tenant_id.to_string();
        let id = id.to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM connections WHERE tenant_id = ? AND id = ?",
                CONNECTION_COLUMNS
            ))?;
            let mut rows = stmt.query_map(params![tenant_id, id], ConnectionRow::from_row)?;

            match rows.next() {
                Some(row) => row?.into_connection(),
                None => Err(EngineError::ConnectionNotFound { connection_id: id }),
            }
        })
        .await
    }

    async fn list_connections(&self, tenant_id: &str) -> Result<Vec<Connection>> {
        let tenant_id = tenant_id.to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM connections WHERE tenant_id = ? ORDER BY created_at",
                CONNECTION_COLUMNS
            ))?;
            let rows = stmt.query_map(params![tenant_id], ConnectionRow::from_row)?;

            let mut connections = Vec::new();
            for row in rows {
                connections.push(row?.into_connection()?);
            }
            Ok(connections)
        })
        .await
    }

    async fn delete_connection(&self, tenant_id: &str, id: &str) -> Result<()> {
        let tenant_id = tenant_id.to_string();
        let id = id.to_string();

        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM connections WHERE tenant_id = ? AND id = ?",
                params![tenant_id, id],
            )?;
            if deleted == 0 {
                return Err(EngineError::ConnectionNotFound { connection_id: id });
            }
            Ok(())
        })
        .await
    }

    async fn record_test(
        &self,
        tenant_id: &str,
        id: &str,
        status: ConnectionStatus,
        tested_at: DateTime<Utc>,
    ) -> Result<()> {
        let tenant_id = tenant_id.to_string();
        let id = id.to_string();
        let tested_at = format_timestamp(&tested_at);

        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE connections SET status = ?, last_tested_at = ?, updated_at = ? WHERE tenant_id = ? AND id = ?",
                params![status.as_str(), tested_at, tested_at, tenant_id, id],
            )?;
            if updated == 0 {
                return Err(EngineError::ConnectionNotFound { connection_id: id });
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl HistoryStore for DuckDbStore {
    async fn append_history(&self, record: &QueryHistoryRecord) -> Result<()> {
        let record = record.clone();
        let results = serde_json::to_string(&record.results)?;

        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO query_history ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    HISTORY_COLUMNS
                ),
                params![
                    record.id,
                    record.tenant_id,
                    record.connection_id,
                    record.user_id,
                    record.natural_language,
                    record.generated_query,
                    results,
                    record.execution_time_ms as i64,
                    record.status.as_str(),
                    record.error_message,
                    record.confidence,
                    record.advisory,
                    format_timestamp(&record.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_history(&self, tenant_id: &str, id: &str) -> Result<Option<QueryHistoryRecord>> {
        let tenant_id = tenant_id.to_string();
        let id = id.to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM query_history WHERE tenant_id = ? AND id = ?",
                HISTORY_COLUMNS
            ))?;
            let mut rows = stmt.query_map(params![tenant_id, id], HistoryRow::from_row)?;

            match rows.next() {
                Some(row) => Ok(Some(row?.into_record()?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn list_history(
        &self,
        tenant_id: &str,
        connection_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<QueryHistoryRecord>> {
        let tenant_id = tenant_id.to_string();
        let connection_id = connection_id.map(str::to_string);
        let limit = limit as i64;

        self.with_conn(move |conn| {
            let mut records = Vec::new();
            match connection_id {
                Some(connection_id) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM query_history WHERE tenant_id = ? AND connection_id = ? ORDER BY created_at DESC LIMIT ?",
                        HISTORY_COLUMNS
                    ))?;
                    let rows = stmt.query_map(
                        params![tenant_id, connection_id, limit],
                        HistoryRow::from_row,
                    )?;
                    for row in rows {
                        records.push(row?.into_record()?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM query_history WHERE tenant_id = ? ORDER BY created_at DESC LIMIT ?",
                        HISTORY_COLUMNS
                    ))?;
                    let rows = stmt.query_map(params![tenant_id, limit], HistoryRow::from_row)?;
                    for row in rows {
                        records.push(row?.into_record()?);
                    }
                }
            }
            Ok(records)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ResultRow;
    use crate::connection::{ApiEndpoint, BackendConfig, HttpAuth, NewConnection, RestApiConfig};
    use crate::db::db_pool::build_pool;
    use serde_json::json;

    fn store(dir: &tempfile::TempDir) -> DuckDbStore {
        let path = dir.path().join("store.db");
        DuckDbStore::new(build_pool(path.to_str().unwrap(), 2).unwrap())
    }

    fn rest_connection(tenant: &str, name: &str, is_default: bool) -> Connection {
        Connection::new(
            tenant,
            NewConnection {
                name: name.to_string(),
                backend_type: BackendType::RestApi,
                config: BackendConfig::RestApi(RestApiConfig {
                    base_url: "https://api.example.com".to_string(),
                    endpoints: vec![ApiEndpoint {
                        method: "GET".to_string(),
                        path: "/albums".to_string(),
                        description: String::new(),
                    }],
                    health_path: None,
                    allow_writes: false,
                    auth: HttpAuth {
                        api_key: Some("secret".to_string()),
                        ..HttpAuth::default()
                    },
                }),
                is_default,
            },
        )
    }

    #[tokio::test]
    async fn test_connections_round_trip_and_stay_tenant_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let created = store
            .create_connection(rest_connection("acme", "albums", false))
            .await
            .unwrap();

        let loaded = store.get_connection("acme", &created.id).await.unwrap();
        assert_eq!(loaded.config, created.config);
        assert_eq!(loaded.status, ConnectionStatus::Inactive);

        let err = store.get_connection("globex", &created.id).await.unwrap_err();
        assert!(matches!(err, EngineError::ConnectionNotFound { .. }));
        assert!(store.list_connections("globex").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_new_default_clears_previous_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let first = store
            .create_connection(rest_connection("acme", "first", true))
            .await
            .unwrap();
        let second = store
            .create_connection(rest_connection("acme", "second", true))
            .await
            .unwrap();

        let connections = store.list_connections("acme").await.unwrap();
        let default_ids: Vec<&str> = connections
            .iter()
            .filter(|c| c.is_default)
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(default_ids, vec![second.id.as_str()]);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_record_test_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let created = store
            .create_connection(rest_connection("acme", "albums", false))
            .await
            .unwrap();

        let tested_at = Utc::now();
        store
            .record_test("acme", &created.id, ConnectionStatus::Active, tested_at)
            .await
            .unwrap();
        let loaded = store.get_connection("acme", &created.id).await.unwrap();
        assert_eq!(loaded.status, ConnectionStatus::Active);
        assert_eq!(
            loaded.last_tested_at.map(|at| at.timestamp()),
            Some(tested_at.timestamp())
        );

        store.delete_connection("acme", &created.id).await.unwrap();
        assert!(store.delete_connection("acme", &created.id).await.is_err());
    }

    #[tokio::test]
    async fn test_history_is_filtered_and_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let mut older = QueryHistoryRecord::new("acme", "c1", "u1", "show albums");
        older.created_at = Utc::now() - chrono::Duration::seconds(10);
        older.status = QueryStatus::Success;
        older.results = vec![ResultRow::new(json!({"id": 1}))];
        let mut newer = QueryHistoryRecord::new("acme", "c1", "u1", "delete all records");
        newer.error_message = Some("unsafe query rejected: prohibited keyword 'DELETE'".to_string());
        let other = QueryHistoryRecord::new("acme", "c2", "u1", "count rows");

        for record in [&older, &newer, &other] {
            store.append_history(record).await.unwrap();
        }

        let listed = store.list_history("acme", Some("c1"), 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].results, older.results);

        assert_eq!(store.list_history("acme", None, 10).await.unwrap().len(), 3);
        assert_eq!(store.list_history("acme", None, 1).await.unwrap().len(), 1);
        assert!(store.get_history("globex", &older.id).await.unwrap().is_none());
        assert_eq!(
            store.get_history("acme", &newer.id).await.unwrap().unwrap().status,
            QueryStatus::Error
        );
    }

    #[tokio::test]
    async fn test_concurrent_calls_see_the_same_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let store = DuckDbStore::new(build_pool(path.to_str().unwrap(), 4).unwrap());

        let record = QueryHistoryRecord::new("acme", "c1", "u1", "show albums");
        let (first, second, appended, listed) = tokio::join!(
            store.create_connection(rest_connection("acme", "first", false)),
            store.create_connection(rest_connection("acme", "second", false)),
            store.append_history(&record),
            store.list_connections("acme"),
        );
        first.unwrap();
        second.unwrap();
        appended.unwrap();
        assert!(listed.unwrap().len() <= 2);

        let (connections, history) = tokio::join!(
            store.list_connections("acme"),
            store.list_history("acme", None, 10),
        );
        assert_eq!(connections.unwrap().len(), 2);
        assert_eq!(history.unwrap().len(), 1);
    }
}
