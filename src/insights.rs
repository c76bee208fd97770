//! Plain-language summaries of successful query results.
//!
//! Unlike translation, this path retries the completion call on rate limiting and
//! temporary unavailability, with exponential backoff and jitter.

use std::sync::Arc;
use std::time::Duration;
use tokio_retry2::strategy::{ExponentialBackoff, jitter};
use tokio_retry2::{Retry, RetryError};
use tracing::{info, warn};

use crate::config::InsightsConfig;
use crate::llm::prompts::render_insight_prompt;
use crate::llm::{LlmError, LlmManager};
use crate::orchestrator::QueryHistoryRecord;

const SAMPLE_ROWS: usize = 10;

pub struct InsightGenerator {
    llm: Arc<LlmManager>,
    settings: InsightsConfig,
}

impl InsightGenerator {
    pub fn new(llm: Arc<LlmManager>, settings: InsightsConfig) -> Self {
        Self { llm, settings }
    }

    pub async fn generate(&self, record: &QueryHistoryRecord) -> Result<String, LlmError> {
        let sample: Vec<&serde_json::Value> = record
            .results
            .iter()
            .take(SAMPLE_ROWS)
            .map(|row| &row.data)
            .collect();
        let sample = serde_json::to_string_pretty(&sample).unwrap_or_default();

        let prompt = render_insight_prompt(
            &record.natural_language,
            &record.generated_query,
            record.results.len(),
            &sample,
        )
        .map_err(|e| LlmError::Config(format!("failed to build insight prompt: {}", e)))?;

        let retry_strategy = ExponentialBackoff::from_millis(self.settings.initial_backoff_ms)
            .factor(2)
            .max_delay(Duration::from_secs(self.settings.max_delay_secs))
            .map(jitter)
            .take(self.settings.max_retries);

        let summary = Retry::spawn(retry_strategy, || async {
            match self.llm.complete(&prompt).await {
                Ok(text) => Ok(text),
                Err(e) if e.is_retryable() => {
                    warn!("Transient completion error, will retry: {}", e);
                    Err(RetryError::Transient {
                        err: e,
                        retry_after: None,
                    })
                }
                Err(e) => {
                    warn!("Permanent completion error, failing immediately: {}", e);
                    Err(RetryError::Permanent(e))
                }
            }
        })
        .await?;

        info!("Generated insights for history record {}", record.id);
        Ok(summary.trim().to_string())
    }
}
