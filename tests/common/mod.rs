#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::Query,
    http::{HeaderMap, StatusCode},
    routing::get,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use nl_bridge::adapters::{AdapterRegistry, AdapterSettings};
use nl_bridge::connection::{
    ApiEndpoint, BackendConfig, BackendType, HttpAuth, NewConnection, RelationalConfig,
    RestApiConfig, VirtualTableConfig,
};
use nl_bridge::db::{MemoryStore, Store};
use nl_bridge::llm::{CompletionProvider, CompletionRequest, GenerationParams, LlmError, LlmManager};
use nl_bridge::orchestrator::QueryOrchestrator;
use nl_bridge::translator::QueryTranslator;

pub const API_KEY: &str = "test-key";

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn users() -> Vec<Value> {
    vec![
        json!({"id": 1, "name": "Ada", "email": "ada@example.com"}),
        json!({"id": 2, "name": "Grace", "email": "grace@example.com"}),
        json!({"id": 3, "name": "Linus", "email": "linus@example.com"}),
    ]
}

async fn list_users(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let limit = params
        .get("limit")
        .and_then(|limit| limit.parse::<usize>().ok())
        .unwrap_or(usize::MAX);
    Json(json!({
        "data": users().into_iter().take(limit).collect::<Vec<_>>(),
        "total": 3
    }))
}

async fn create_post(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    (StatusCode::CREATED, Json(json!({"id": 11, "created": body})))
}

async fn secure(headers: HeaderMap) -> Result<Json<Value>, StatusCode> {
    match headers.get("X-API-Key").and_then(|value| value.to_str().ok()) {
        Some(API_KEY) => Ok(Json(json!([{"ok": true}]))),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

/// A backend that looks like a REST-exposed table store and a plain JSON API at once.
pub fn mock_backend() -> Router {
    Router::new()
        .route(
            "/openapi.json",
            get(|| async {
                Json(json!({
                    "openapi": "3.0.0",
                    "paths": {"/users": {}, "/users/{id}": {}},
                    "components": {"schemas": {"User": {
                        "required": ["id"],
                        "properties": {
                            "id": {"type": "integer"},
                            "name": {"type": "string"},
                            "email": {"type": "string"}
                        }
                    }}}
                }))
            }),
        )
        .route("/users", get(list_users))
        .route(
            "/albums",
            get(|| async { Json(json!([{"id": 1, "title": "Blue"}, {"id": 2, "title": "Kind of Blue"}])) }),
        )
        .route(
            "/posts",
            get(|| async { Json(json!({"items": [{"id": 10, "title": "Hello"}]})) })
                .post(create_post),
        )
        .route("/health", get(|| async { "ok" }))
        .route("/secure", get(secure))
        .route("/broken", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))
}

pub enum Reply {
    Text(String),
    Timeout,
}

/// Completion provider that replays canned answers in order and keeps every prompt.
pub struct ScriptedProvider {
    replies: Mutex<Vec<Reply>>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().rev().collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn text(reply: &str) -> Arc<Self> {
        Self::new(vec![Reply::Text(reply.to_string())])
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        match self.replies.lock().unwrap().pop() {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Timeout) => Err(LlmError::Timeout(
                "operation timed out after 60s".to_string(),
            )),
            None => Err(LlmError::Response("no scripted reply left".to_string())),
        }
    }
}

pub fn llm(provider: Arc<ScriptedProvider>) -> Arc<LlmManager> {
    Arc::new(LlmManager::with_provider(provider, GenerationParams::default()))
}

pub fn fast_settings() -> AdapterSettings {
    AdapterSettings {
        connect_timeout: std::time::Duration::from_secs(2),
        query_timeout: std::time::Duration::from_secs(5),
        http_timeout: std::time::Duration::from_secs(5),
        default_row_limit: 100,
    }
}

pub fn orchestrator(provider: Arc<ScriptedProvider>) -> (QueryOrchestrator, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let registry = AdapterRegistry::new(fast_settings()).unwrap();
    let translator = QueryTranslator::new(llm(provider), 100);
    let shared: Arc<dyn Store> = store.clone();
    (QueryOrchestrator::new(shared, registry, translator), store)
}

pub fn endpoint(method: &str, path: &str, description: &str) -> ApiEndpoint {
    ApiEndpoint {
        method: method.to_string(),
        path: path.to_string(),
        description: description.to_string(),
    }
}

pub fn rest_definition(base_url: &str, endpoints: Vec<ApiEndpoint>) -> NewConnection {
    NewConnection {
        name: "jsonplaceholder".to_string(),
        backend_type: BackendType::RestApi,
        config: BackendConfig::RestApi(RestApiConfig {
            base_url: base_url.to_string(),
            endpoints,
            health_path: Some("/health".to_string()),
            allow_writes: false,
            auth: HttpAuth {
                api_key: Some(API_KEY.to_string()),
                ..HttpAuth::default()
            },
        }),
        is_default: false,
    }
}

pub fn virtual_table_definition(base_url: &str) -> NewConnection {
    NewConnection {
        name: "warehouse".to_string(),
        backend_type: BackendType::VirtualTable,
        config: BackendConfig::VirtualTable(VirtualTableConfig {
            base_url: base_url.to_string(),
            database: Some("crm".to_string()),
            schema_path: None,
            auth: HttpAuth::default(),
        }),
        is_default: false,
    }
}

/// A MySQL definition pointing at a port nothing listens on.
pub fn unreachable_mysql_definition() -> NewConnection {
    NewConnection {
        name: "orders".to_string(),
        backend_type: BackendType::Mysql,
        config: BackendConfig::Relational(RelationalConfig {
            host: "127.0.0.1".to_string(),
            port: Some(1),
            database: "shop".to_string(),
            username: "reader".to_string(),
            password: Some("hunter2".to_string()),
            ssl: Some(false),
        }),
        is_default: false,
    }
}
