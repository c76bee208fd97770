//! Top-level query service.
//!
//! One invocation walks a fixed sequence: load the connection, introspect its schema
//! (database-like backends only), translate, sanitize, execute, persist history. A
//! missing connection or an invalid configuration is returned to the caller directly.
//! Any later failure is written into the history record instead, so every accepted
//! request leaves exactly one record behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::{AdapterRegistry, BackendAdapter, ResultRow, TargetKind};
use crate::connection::{BackendConfig, Connection, ConnectionStatus, NewConnection};
use crate::db::Store;
use crate::error::{EngineError, Result};
use crate::schema::{SchemaInfo, SchemaPreview};
use crate::translator::QueryTranslator;

const SCHEMA_PREVIEW_TABLES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Success,
    Error,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Success => "success",
            QueryStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(QueryStatus::Success),
            "error" => Some(QueryStatus::Error),
            _ => None,
        }
    }
}

/// The audit trail of one query attempt. Never updated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHistoryRecord {
    pub id: String,
    pub tenant_id: String,
    pub connection_id: String,
    pub user_id: String,
    pub natural_language: String,
    pub generated_query: String,
    pub results: Vec<ResultRow>,
    pub execution_time_ms: u64,
    pub status: QueryStatus,
    pub error_message: Option<String>,
    pub confidence: f64,
    pub advisory: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QueryHistoryRecord {
    /// A record with no query, no rows and status `Error` until an attempt succeeds.
    pub fn new(tenant_id: &str, connection_id: &str, user_id: &str, natural_language: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            connection_id: connection_id.to_string(),
            user_id: user_id.to_string(),
            natural_language: natural_language.to_string(),
            generated_query: String::new(),
            results: Vec::new(),
            execution_time_ms: 0,
            status: QueryStatus::Error,
            error_message: None,
            confidence: 0.0,
            advisory: None,
            created_at: Utc::now(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.results.len()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub connection_id: String,
    pub natural_language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionTestReport {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_preview: Option<SchemaPreview>,
}

pub struct QueryOrchestrator {
    store: Arc<dyn Store>,
    adapters: AdapterRegistry,
    translator: QueryTranslator,
}

impl QueryOrchestrator {
    pub fn new(store: Arc<dyn Store>, adapters: AdapterRegistry, translator: QueryTranslator) -> Self {
        Self {
            store,
            adapters,
            translator,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Validates a definition against its adapter and stores it as inactive.
    pub async fn register_connection(
        &self,
        tenant_id: &str,
        definition: NewConnection,
    ) -> Result<Connection> {
        let adapter = self.adapters.get(definition.backend_type)?;
        adapter.validate_config(&definition.config)?;

        let connection = Connection::new(tenant_id, definition);
        info!(
            tenant_id,
            connection_id = %connection.id,
            backend = %connection.backend_type,
            "Registering connection {}",
            connection.name
        );
        self.store.create_connection(connection).await
    }

    pub async fn execute_query(
        &self,
        tenant_id: &str,
        user_id: &str,
        request: QueryRequest,
    ) -> Result<QueryHistoryRecord> {
        let started = Instant::now();

        let connection = self
            .store
            .get_connection(tenant_id, &request.connection_id)
            .await?;
        let adapter = self.adapters.get(connection.backend_type)?;
        adapter.validate_config(&connection.config)?;
        let target = adapter.describe_target(&connection.config)?;

        info!(
            tenant_id,
            connection_id = %connection.id,
            backend = %connection.backend_type,
            "Executing natural language query"
        );

        let mut record = QueryHistoryRecord::new(
            tenant_id,
            &connection.id,
            user_id,
            &request.natural_language,
        );

        match self
            .run_pipeline(
                adapter.as_ref(),
                &connection.config,
                target,
                &request.natural_language,
                &mut record,
            )
            .await
        {
            Ok(rows) => {
                record.status = QueryStatus::Success;
                record.results = rows;
            }
            Err(e) => {
                warn!(connection_id = %connection.id, "Query failed: {}", e);
                record.status = QueryStatus::Error;
                record.error_message = Some(e.to_string());
                record.results = Vec::new();
            }
        }

        record.execution_time_ms = started.elapsed().as_millis() as u64;
        self.store.append_history(&record).await?;

        info!(
            connection_id = %connection.id,
            status = record.status.as_str(),
            rows = record.row_count(),
            "Query finished in {} ms",
            record.execution_time_ms
        );
        Ok(record)
    }

    /// Steps after the connection is loaded. The record picks up the generated query
    /// and its confidence as soon as they exist.
    async fn run_pipeline(
        &self,
        adapter: &dyn BackendAdapter,
        config: &BackendConfig,
        target: TargetKind,
        natural_language: &str,
        record: &mut QueryHistoryRecord,
    ) -> Result<Vec<ResultRow>> {
        let schema = if target.needs_schema() {
            adapter.introspect_schema(config).await?
        } else {
            SchemaInfo::new(Vec::new())
        };
        let target = target.with_schema(schema);

        let translation = self.translator.translate(natural_language, &target).await;
        record.generated_query = translation.query.clone();
        record.confidence = translation.confidence;
        record.advisory = translation.advisory.clone();

        if let Some(message) = translation.error_message() {
            return Err(EngineError::Translation(message.to_string()));
        }

        let query = adapter.sanitize(&translation.query)?;
        adapter.execute_query(config, &query).await
    }

    /// Ad-hoc test of a definition that has not been stored.
    pub async fn test_connection(&self, definition: &NewConnection) -> Result<ConnectionTestReport> {
        let adapter = self.adapters.get(definition.backend_type)?;
        adapter.validate_config(&definition.config)?;
        Ok(self.run_test(adapter.as_ref(), &definition.config).await)
    }

    /// Tests a stored connection and records the outcome as its status.
    pub async fn test_existing_connection(
        &self,
        tenant_id: &str,
        connection_id: &str,
    ) -> Result<ConnectionTestReport> {
        let connection = self.store.get_connection(tenant_id, connection_id).await?;
        let adapter = self.adapters.get(connection.backend_type)?;

        let report = match adapter.validate_config(&connection.config) {
            Ok(()) => self.run_test(adapter.as_ref(), &connection.config).await,
            Err(e) => ConnectionTestReport {
                success: false,
                message: e.to_string(),
                latency_ms: None,
                schema_preview: None,
            },
        };

        let status = if report.success {
            ConnectionStatus::Active
        } else {
            ConnectionStatus::Error
        };
        self.store
            .record_test(tenant_id, connection_id, status, Utc::now())
            .await?;

        info!(
            tenant_id,
            connection_id,
            status = status.as_str(),
            "Connection test finished: {}",
            report.message
        );
        Ok(report)
    }

    async fn run_test(&self, adapter: &dyn BackendAdapter, config: &BackendConfig) -> ConnectionTestReport {
        let test = adapter.test_connection(config).await;
        let mut report = ConnectionTestReport {
            success: test.success,
            message: test.message,
            latency_ms: test.latency_ms,
            schema_preview: None,
        };

        if report.success && adapter.backend_type().supports_introspection() {
            // enrichment only; a failure here leaves success untouched
            match adapter.introspect_schema(config).await {
                Ok(schema) => report.schema_preview = Some(schema.preview(SCHEMA_PREVIEW_TABLES)),
                Err(e) => {
                    warn!("Schema preview unavailable: {}", e);
                    report.message = format!("{} (schema unavailable: {})", report.message, e);
                }
            }
        }

        report
    }

    pub async fn introspect_schema(&self, tenant_id: &str, connection_id: &str) -> Result<SchemaInfo> {
        let connection = self.store.get_connection(tenant_id, connection_id).await?;
        let adapter = self.adapters.get(connection.backend_type)?;
        adapter.validate_config(&connection.config)?;
        adapter.introspect_schema(&connection.config).await
    }

    pub async fn history(
        &self,
        tenant_id: &str,
        connection_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<QueryHistoryRecord>> {
        self.store.list_history(tenant_id, connection_id, limit).await
    }
}
