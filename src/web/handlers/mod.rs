pub mod api;

use axum::http::{HeaderMap, StatusCode};
use tracing::error;

use crate::error::EngineError;

pub const TENANT_HEADER: &str = "X-Tenant-ID";
pub const USER_HEADER: &str = "X-User-ID";

const ANONYMOUS_USER: &str = "anonymous";

/// Caller identity as asserted by the authenticating proxy in front of this service.
#[derive(Debug, Clone)]
pub struct Identity {
    pub tenant_id: String,
    pub user_id: String,
}

pub fn identity(headers: &HeaderMap) -> Result<Identity, (StatusCode, String)> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    let tenant_id = header(TENANT_HEADER).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!("missing {} header", TENANT_HEADER),
        )
    })?;

    Ok(Identity {
        tenant_id,
        user_id: header(USER_HEADER).unwrap_or_else(|| ANONYMOUS_USER.to_string()),
    })
}

pub fn engine_error(e: EngineError) -> (StatusCode, String) {
    let status = match &e {
        EngineError::ConnectionNotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::UnsupportedOperation { .. } | EngineError::UnsafeQuery(_) => {
            StatusCode::BAD_REQUEST
        }
        EngineError::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Translation(_) | EngineError::Execution(_) | EngineError::Storage(_) => {
            error!("Request failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, e.to_string())
}
