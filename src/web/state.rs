use crate::adapters::{AdapterRegistry, AdapterSettings};
use crate::config::AppConfig;
use crate::db::Store;
use crate::error::Result;
use crate::insights::InsightGenerator;
use crate::llm::LlmManager;
use crate::orchestrator::QueryOrchestrator;
use crate::translator::QueryTranslator;
use std::sync::Arc;
use tracing::info;

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    pub orchestrator: QueryOrchestrator,
    pub insights: InsightGenerator,
    pub llm_provider: String,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Wires the engine around one store and one completion client.
    pub fn new(config: AppConfig, store: Arc<dyn Store>, llm_manager: Arc<LlmManager>) -> Result<Self> {
        let adapters = AdapterRegistry::new(AdapterSettings::from_config(&config.engine))?;
        let translator = QueryTranslator::new(llm_manager.clone(), config.engine.default_row_limit);
        let orchestrator = QueryOrchestrator::new(store, adapters, translator);
        let insights = InsightGenerator::new(llm_manager.clone(), config.insights.clone());

        info!(
            "Application state ready with LLM provider {}",
            llm_manager.provider_name()
        );

        Ok(Self {
            llm_provider: llm_manager.provider_name().to_string(),
            config,
            orchestrator,
            insights,
            startup_time: chrono::Utc::now(),
        })
    }
}
