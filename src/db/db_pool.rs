use duckdb::Connection;
use r2d2::{ManageConnection, Pool};
use std::sync::Mutex;
use tracing::info;

use crate::error::Result;

const MIGRATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS connections (
    id VARCHAR PRIMARY KEY,
    tenant_id VARCHAR NOT NULL,
    name VARCHAR NOT NULL,
    backend_type VARCHAR NOT NULL,
    config VARCHAR NOT NULL,
    status VARCHAR NOT NULL,
    is_default BOOLEAN NOT NULL,
    created_at VARCHAR NOT NULL,
    updated_at VARCHAR NOT NULL,
    last_tested_at VARCHAR
);

CREATE TABLE IF NOT EXISTS query_history (
    id VARCHAR PRIMARY KEY,
    tenant_id VARCHAR NOT NULL,
    connection_id VARCHAR NOT NULL,
    user_id VARCHAR NOT NULL,
    natural_language VARCHAR NOT NULL,
    generated_query VARCHAR NOT NULL,
    results VARCHAR NOT NULL,
    execution_time_ms BIGINT NOT NULL,
    status VARCHAR NOT NULL,
    error_message VARCHAR,
    confidence DOUBLE NOT NULL,
    advisory VARCHAR,
    created_at VARCHAR NOT NULL
);
"#;

/// Hands out clones of one root connection, so every pooled connection shares the
/// same database instance and catalog.
pub struct DuckDBConnectionManager {
    root: Mutex<Connection>,
}

impl DuckDBConnectionManager {
    pub fn new(connection_string: &str) -> duckdb::Result<Self> {
        Ok(Self {
            root: Mutex::new(Connection::open(connection_string)?),
        })
    }
}

impl ManageConnection for DuckDBConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let root = self
            .root
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        root.try_clone()
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.execute("SELECT 1", [])?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Opens the store database and creates its tables if they do not exist yet.
pub fn build_pool(connection_string: &str, pool_size: usize) -> Result<Pool<DuckDBConnectionManager>> {
    info!("Initializing DuckDB connection pool at {}", connection_string);
    let manager = DuckDBConnectionManager::new(connection_string)?;
    let pool = Pool::builder()
        .max_size(pool_size.max(1) as u32)
        .build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch(MIGRATIONS)?;

    Ok(pool)
}
