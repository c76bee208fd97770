use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use nl_bridge::config::{AppConfig, CliArgs};
use nl_bridge::db::open_store;
use nl_bridge::llm::LlmManager;
use nl_bridge::util::logging::init_tracing;
use nl_bridge::web::{self, state::AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Initialize logging
    init_tracing(args.log_json);

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let store = open_store(&config.database)?;

    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm_manager = Arc::new(LlmManager::new(&config.llm)?);

    let app_state = Arc::new(AppState::new(config.clone(), store, llm_manager)?);

    info!(
        "Starting NL-Bridge server on {}:{}",
        config.web.host, config.web.port
    );
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
