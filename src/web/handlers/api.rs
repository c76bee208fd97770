use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use super::{engine_error, identity};
use crate::connection::{Connection, NewConnection};
use crate::db::IN_MEMORY;
use crate::orchestrator::{ConnectionTestReport, QueryHistoryRecord, QueryRequest, QueryStatus};
use crate::schema::SchemaInfo;
use crate::web::state::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub connection_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct InsightsResponse {
    pub history_id: String,
    pub insights: String,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub llm_provider: String,
    pub store: String,
}

// Connections

pub async fn list_connections(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Connection>>, (StatusCode, String)> {
    let identity = identity(&headers)?;
    let connections = state
        .orchestrator
        .store()
        .list_connections(&identity.tenant_id)
        .await
        .map_err(engine_error)?;

    Ok(Json(connections.iter().map(Connection::redacted).collect()))
}

pub async fn create_connection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<NewConnection>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let identity = identity(&headers)?;
    let connection = state
        .orchestrator
        .register_connection(&identity.tenant_id, payload)
        .await
        .map_err(engine_error)?;

    Ok((StatusCode::CREATED, Json(connection.redacted())))
}

pub async fn get_connection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Connection>, (StatusCode, String)> {
    let identity = identity(&headers)?;
    let connection = state
        .orchestrator
        .store()
        .get_connection(&identity.tenant_id, &id)
        .await
        .map_err(engine_error)?;

    Ok(Json(connection.redacted()))
}

pub async fn delete_connection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let identity = identity(&headers)?;
    state
        .orchestrator
        .store()
        .delete_connection(&identity.tenant_id, &id)
        .await
        .map_err(engine_error)?;

    info!("Deleted connection {} for tenant {}", id, identity.tenant_id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn test_connection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<NewConnection>,
) -> Result<Json<ConnectionTestReport>, (StatusCode, String)> {
    identity(&headers)?;
    let report = state
        .orchestrator
        .test_connection(&payload)
        .await
        .map_err(engine_error)?;

    Ok(Json(report))
}

pub async fn test_existing_connection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ConnectionTestReport>, (StatusCode, String)> {
    let identity = identity(&headers)?;
    let report = state
        .orchestrator
        .test_existing_connection(&identity.tenant_id, &id)
        .await
        .map_err(engine_error)?;

    Ok(Json(report))
}

pub async fn get_schema(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<SchemaInfo>, (StatusCode, String)> {
    let identity = identity(&headers)?;
    let schema = state
        .orchestrator
        .introspect_schema(&identity.tenant_id, &id)
        .await
        .map_err(engine_error)?;

    Ok(Json(schema))
}

// Queries

pub async fn execute_query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<QueryHistoryRecord>, (StatusCode, String)> {
    let identity = identity(&headers)?;
    if payload.natural_language.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "natural_language must not be empty".to_string(),
        ));
    }

    let record = state
        .orchestrator
        .execute_query(&identity.tenant_id, &identity.user_id, payload)
        .await
        .map_err(engine_error)?;

    Ok(Json(record))
}

pub async fn list_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<QueryHistoryRecord>>, (StatusCode, String)> {
    let identity = identity(&headers)?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);

    let records = state
        .orchestrator
        .history(&identity.tenant_id, params.connection_id.as_deref(), limit)
        .await
        .map_err(engine_error)?;

    Ok(Json(records))
}

pub async fn generate_insights(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<InsightsResponse>, (StatusCode, String)> {
    let identity = identity(&headers)?;
    let record = state
        .orchestrator
        .store()
        .get_history(&identity.tenant_id, &id)
        .await
        .map_err(engine_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("history record '{}' not found", id),
            )
        })?;

    if record.status != QueryStatus::Success {
        return Err((
            StatusCode::CONFLICT,
            "insights are only available for successful queries".to_string(),
        ));
    }

    let insights = state.insights.generate(&record).await.map_err(|e| {
        error!("Insight generation failed for {}: {}", id, e);
        (StatusCode::BAD_GATEWAY, e.to_string())
    })?;

    Ok(Json(InsightsResponse {
        history_id: record.id,
        insights,
    }))
}

// System status

pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    let now = chrono::Utc::now();
    let uptime = now.signed_duration_since(state.startup_time).num_seconds();

    let store = if state.config.database.connection_string == IN_MEMORY {
        "memory"
    } else {
        "duckdb"
    };

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        llm_provider: state.llm_provider.clone(),
        store: store.to_string(),
    })
}
