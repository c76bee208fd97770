use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{build_client, check_status, send_error};
use crate::config::LlmConfig;
use crate::llm::models::CompletionRequest;
use crate::llm::{CompletionProvider, LlmError};

/// OpenAI-compatible chat completions endpoint.
pub struct RemoteLlmProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: [ChatTurn<'a>; 1],
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatTurn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

fn required(value: &Option<String>, what: &str) -> Result<String, LlmError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| LlmError::Config(format!("{} is required for the remote backend", what)))
}

fn chat_body<'a>(model: &'a str, request: &'a CompletionRequest) -> ChatBody<'a> {
    ChatBody {
        model,
        messages: [ChatTurn {
            role: "user",
            content: &request.prompt,
        }],
        temperature: request.temperature,
        top_p: request.top_p,
        max_tokens: request.max_tokens,
    }
}

fn first_choice_text(reply: ChatReply) -> Result<String, LlmError> {
    let choice = reply
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Response("reply contained no choices".to_string()))?;

    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(LlmError::Response("completion was filtered".to_string()));
    }

    choice
        .message
        .content
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| LlmError::Response("first choice has no content".to_string()))
}

impl RemoteLlmProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_client(config)?,
            endpoint: required(&config.api_url, "api_url")?,
            api_key: required(&config.api_key, "api_key")?,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl CompletionProvider for RemoteLlmProvider {
    fn name(&self) -> &str {
        "remote"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        debug!("Chat completion {} via {}", self.model, self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&chat_body(&self.model, request))
            .send()
            .await
            .map_err(send_error)?;

        let reply: ChatReply = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| LlmError::Response(format!("unreadable chat reply: {}", e)))?;

        first_choice_text(reply)
    }
}
