pub mod db_pool;
pub mod memory;
pub mod store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::connection::{Connection, ConnectionStatus};
use crate::error::Result;
use crate::orchestrator::QueryHistoryRecord;

pub use memory::MemoryStore;
pub use store::DuckDbStore;

/// Tenant-scoped connection definitions. Lookups for another tenant's connection
/// behave exactly like lookups for a missing one.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Stores a new connection. A default connection clears the tenant's previous default.
    async fn create_connection(&self, connection: Connection) -> Result<Connection>;

    async fn get_connection(&self, tenant_id: &str, id: &str) -> Result<Connection>;

    async fn list_connections(&self, tenant_id: &str) -> Result<Vec<Connection>>;

    async fn delete_connection(&self, tenant_id: &str, id: &str) -> Result<()>;

    /// Last write wins when tests race on the same connection.
    async fn record_test(
        &self,
        tenant_id: &str,
        id: &str,
        status: ConnectionStatus,
        tested_at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Append-only query history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append_history(&self, record: &QueryHistoryRecord) -> Result<()>;

    async fn get_history(&self, tenant_id: &str, id: &str) -> Result<Option<QueryHistoryRecord>>;

    /// Newest first.
    async fn list_history(
        &self,
        tenant_id: &str,
        connection_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<QueryHistoryRecord>>;
}

pub trait Store: ConnectionStore + HistoryStore {}

impl<T: ConnectionStore + HistoryStore> Store for T {}

pub const IN_MEMORY: &str = ":memory:";

/// Opens the configured store: `:memory:` keeps everything in process, anything else is a DuckDB file.
pub fn open_store(config: &DatabaseConfig) -> Result<Arc<dyn Store>> {
    if config.connection_string == IN_MEMORY {
        info!("Using in-memory connection and history store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let pool = db_pool::build_pool(&config.connection_string, config.pool_size)?;
    Ok(Arc::new(DuckDbStore::new(pool)))
}
