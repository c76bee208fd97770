use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::connection::{Connection, ConnectionStatus};
use crate::error::{EngineError, Result};
use crate::orchestrator::QueryHistoryRecord;

use super::{ConnectionStore, HistoryStore};

/// In-process store for `:memory:` deployments and tests.
#[derive(Default)]
pub struct MemoryStore {
    connections: RwLock<HashMap<String, Connection>>,
    history: RwLock<Vec<QueryHistoryRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(id: &str) -> EngineError {
    EngineError::ConnectionNotFound {
        connection_id: id.to_string(),
    }
}

#[async_trait]
impl ConnectionStore for MemoryStore {
    async fn create_connection(&self, connection: Connection) -> Result<Connection> {
        let mut connections = self.connections.write().await;
        if connection.is_default {
            for existing in connections
                .values_mut()
                .filter(|existing| existing.tenant_id == connection.tenant_id)
            {
                existing.is_default = false;
            }
        }
        connections.insert(connection.id.clone(), connection.clone());
        Ok(connection)
    }

    async fn get_connection(&self, tenant_id: &str, id: &str) -> Result<Connection> {
        self.connections
            .read()
            .await
            .get(id)
            .filter(|connection| connection.tenant_id == tenant_id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn list_connections(&self, tenant_id: &str) -> Result<Vec<Connection>> {
        let mut connections: Vec<Connection> = self
            .connections
            .read()
            .await
            .values()
            .filter(|connection| connection.tenant_id == tenant_id)
            .cloned()
            .collect();
        connections.sort_by_key(|connection| connection.created_at);
        Ok(connections)
    }

    async fn delete_connection(&self, tenant_id: &str, id: &str) -> Result<()> {
        let mut connections = self.connections.write().await;
        match connections.get(id) {
            Some(connection) if connection.tenant_id == tenant_id => {
                connections.remove(id);
                Ok(())
            }
            _ => Err(not_found(id)),
        }
    }

    async fn record_test(
        &self,
        tenant_id: &str,
        id: &str,
        status: ConnectionStatus,
        tested_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut connections = self.connections.write().await;
        let connection = connections
            .get_mut(id)
            .filter(|connection| connection.tenant_id == tenant_id)
            .ok_or_else(|| not_found(id))?;

        connection.status = status;
        connection.last_tested_at = Some(tested_at);
        connection.updated_at = tested_at;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn append_history(&self, record: &QueryHistoryRecord) -> Result<()> {
        self.history.write().await.push(record.clone());
        Ok(())
    }

    async fn get_history(&self, tenant_id: &str, id: &str) -> Result<Option<QueryHistoryRecord>> {
        Ok(self
            .history
            .read()
            .await
            .iter()
            .find(|record| record.id == id && record.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_history(
        &self,
        tenant_id: &str,
        connection_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<QueryHistoryRecord>> {
        let mut records: Vec<QueryHistoryRecord> = self
            .history
            .read()
            .await
            .iter()
            .filter(|record| record.tenant_id == tenant_id)
            .filter(|record| connection_id.is_none_or(|id| record.connection_id == id))
            .cloned()
            .collect();

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }
}
