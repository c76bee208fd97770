use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{build_client, check_status, send_error};
use crate::config::LlmConfig;
use crate::llm::models::CompletionRequest;
use crate::llm::{CompletionProvider, LlmError};

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Self-hosted model served through Ollama's generate API.
pub struct OllamaProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: SamplingOptions,
}

#[derive(Serialize)]
struct SamplingOptions {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateReply {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
}

/// Accepts either the server root or the full generate path.
fn generate_endpoint(api_url: Option<&str>) -> String {
    let base = api_url.unwrap_or(DEFAULT_OLLAMA_URL).trim_end_matches('/');
    if base.ends_with("/api/generate") {
        base.to_string()
    } else {
        format!("{}/api/generate", base)
    }
}

fn generate_body<'a>(model: &'a str, request: &'a CompletionRequest) -> GenerateBody<'a> {
    GenerateBody {
        model,
        prompt: &request.prompt,
        stream: false,
        options: SamplingOptions {
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: request.top_k,
            num_predict: request.max_tokens,
        },
    }
}

fn completion_text(reply: GenerateReply) -> Result<String, LlmError> {
    if !reply.done {
        warn!(
            "Ollama stopped early ({})",
            reply.done_reason.as_deref().unwrap_or("no reason given")
        );
    }
    let text = reply.response.trim();
    if text.is_empty() {
        return Err(LlmError::Response("Ollama returned an empty completion".to_string()));
    }
    Ok(text.to_string())
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_client(config)?,
            endpoint: generate_endpoint(config.api_url.as_deref()),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        debug!("Ollama {} via {}", self.model, self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&generate_body(&self.model, request))
            .send()
            .await
            .map_err(send_error)?;

        let reply: GenerateReply = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| LlmError::Response(format!("unreadable Ollama reply: {}", e)))?;

        completion_text(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::GenerationParams;

    #[test]
    fn test_endpoint_accepts_root_or_full_path() {
        assert_eq!(generate_endpoint(None), "http://localhost:11434/api/generate");
        assert_eq!(
            generate_endpoint(Some("http://gpu-box:11434/")),
            "http://gpu-box:11434/api/generate"
        );
        assert_eq!(
            generate_endpoint(Some("http://gpu-box:11434/api/generate")),
            "http://gpu-box:11434/api/generate"
        );
    }

    #[test]
    fn test_body_maps_sampling_options() {
        let request = GenerationParams::default().request("count users");
        let body = serde_json::to_value(generate_body("sqlcoder", &request)).unwrap();

        assert_eq!(body["model"], "sqlcoder");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], request.max_tokens);
        assert_eq!(body["options"]["top_k"], request.top_k);
    }

    #[test]
    fn test_blank_completion_is_an_error() {
        let reply: GenerateReply =
            serde_json::from_str(r#"{"response": "  ", "done": true}"#).unwrap();
        assert!(matches!(completion_text(reply), Err(LlmError::Response(_))));

        let reply: GenerateReply =
            serde_json::from_str(r#"{"response": " SELECT 1 ", "done": false, "done_reason": "length"}"#)
                .unwrap();
        assert_eq!(completion_text(reply).unwrap(), "SELECT 1");
    }
}
