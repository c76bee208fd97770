//! Natural language to backend query translation.
//!
//! The completion service is called exactly once per translation. Its reply is stripped
//! of markdown fences and scored with a keyword heuristic; the score is an estimate for
//! the caller, never a gate. Completion failures come back as
//! [`TranslationKind::TranslationError`] results instead of errors.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

use crate::adapters::TranslationTarget;
use crate::connection::ApiEndpoint;
use crate::llm::LlmManager;
use crate::llm::prompts::{self, SqlPrompt};
use crate::sanitizer::find_destructive_keyword;
use crate::schema::SchemaInfo;

pub const BASE_CONFIDENCE: f64 = 0.5;
pub const KEYWORD_WEIGHT: f64 = 0.3;
pub const DESTRUCTIVE_PENALTY: f64 = 0.5;
pub const CONFIDENCE_FLOOR: f64 = 0.1;
pub const API_FIELDS_BONUS: f64 = 0.3;
pub const API_VERB_BONUS: f64 = 0.2;
pub const REVIEW_THRESHOLD: f64 = 0.7;

const HTTP_VERBS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

static EXPECTED_KEYWORDS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\bselect\b",
        r"\bfrom\b",
        r"\bwhere\b",
        r"\bjoin\b",
        r"\bgroup\s+by\b",
        r"\border\s+by\b",
        r"\bhaving\b",
    ]
    .into_iter()
    .map(|pattern| {
        Regex::new(&format!("(?i){}", pattern)).expect("keyword pattern is valid")
    })
    .collect()
});

// a bare word such as `sql` or `json`; statement verbs are content, not tags
static LANGUAGE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_+.-]*$").expect("language tag pattern is valid")
});

const STATEMENT_VERBS: &[&str] = &["SELECT", "WITH", "SHOW", "DESCRIBE", "EXPLAIN", "GET", "HEAD"];

fn is_language_tag(line: &str) -> bool {
    let line = line.trim();
    LANGUAGE_TAG.is_match(line) && !STATEMENT_VERBS.contains(&line.to_uppercase().as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationKind {
    RelationalQuery,
    ApiCall,
    TranslationError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationResult {
    pub query: String,
    pub kind: TranslationKind,
    pub confidence: f64,
    pub explanation: Option<String>,
    pub advisory: Option<String>,
}

impl TranslationResult {
    fn scored(query: String, kind: TranslationKind, confidence: f64) -> Self {
        let confidence = confidence.clamp(0.0, 1.0);
        Self {
            query,
            kind,
            confidence,
            explanation: None,
            advisory: advisory_for(confidence),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            explanation: Some(message.into()),
            ..Self::scored(String::new(), TranslationKind::TranslationError, 0.0)
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == TranslationKind::TranslationError
    }

    /// The failure reason of an error result.
    pub fn error_message(&self) -> Option<&str> {
        if self.is_error() {
            Some(self.explanation.as_deref().unwrap_or("translation failed"))
        } else {
            None
        }
    }
}

pub fn advisory_for(confidence: f64) -> Option<String> {
    (confidence < REVIEW_THRESHOLD).then(|| {
        format!(
            "Confidence is {:.0}%: review the generated query before executing it.",
            confidence * 100.0
        )
    })
}

/// Removes a surrounding markdown code fence, with or without a language tag.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed.to_string();
    };

    let after_open = &trimmed[start + 3..];
    let body = match after_open.split_once('\n') {
        Some((tag, rest)) if is_language_tag(tag) => rest,
        _ => after_open,
    };
    let body = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim().to_string()
}

pub fn sql_confidence(sql: &str) -> f64 {
    let present = EXPECTED_KEYWORDS
        .iter()
        .filter(|keyword| keyword.is_match(sql))
        .count();
    let mut confidence =
        BASE_CONFIDENCE + KEYWORD_WEIGHT * present as f64 / EXPECTED_KEYWORDS.len() as f64;

    if find_destructive_keyword(sql).is_some() {
        // the penalty never leaves a destructive query above the floor
        confidence = (confidence - DESTRUCTIVE_PENALTY).min(CONFIDENCE_FLOOR);
        confidence = confidence.max(CONFIDENCE_FLOOR);
    }

    let lowered = sql.to_lowercase();
    if lowered.contains("error") || lowered.contains("unsupported") {
        confidence = CONFIDENCE_FLOOR;
    }

    confidence.clamp(0.0, 1.0)
}

pub fn api_confidence(method: Option<&str>, path: Option<&str>) -> f64 {
    let mut confidence = BASE_CONFIDENCE;
    if method.is_some() && path.is_some() {
        confidence += API_FIELDS_BONUS;
    }
    if method.is_some_and(|method| HTTP_VERBS.contains(&method.to_uppercase().as_str())) {
        confidence += API_VERB_BONUS;
    }
    confidence.clamp(0.0, 1.0)
}

fn json_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    match serde_json::from_str(&text[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn non_empty_str<'a>(map: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub struct QueryTranslator {
    llm: Arc<LlmManager>,
    row_limit: usize,
}

impl QueryTranslator {
    pub fn new(llm: Arc<LlmManager>, row_limit: usize) -> Self {
        Self { llm, row_limit }
    }

    pub async fn translate(&self, question: &str, target: &TranslationTarget) -> TranslationResult {
        match target {
            TranslationTarget::Database {
                dialect,
                database,
                schema,
                simple_select_only,
            } => {
                self.translate_to_query(question, dialect, database, schema, *simple_select_only)
                    .await
            }
            TranslationTarget::Api { endpoints } => {
                self.translate_to_api_call(question, endpoints).await
            }
        }
    }

    pub async fn translate_to_query(
        &self,
        question: &str,
        dialect: &str,
        database: &str,
        schema: &SchemaInfo,
        simple_select_only: bool,
    ) -> TranslationResult {
        let schema_text = schema.to_prompt();
        let prompt = match prompts::render_sql_prompt(&SqlPrompt {
            dialect,
            database,
            schema: &schema_text,
            question,
            row_limit: self.row_limit,
            simple_select_only,
        }) {
            Ok(prompt) => prompt,
            Err(e) => return TranslationResult::failed(format!("failed to build prompt: {}", e)),
        };

        let completion = match self.llm.complete(&prompt).await {
            Ok(completion) => completion,
            Err(e) => {
                warn!("Completion service failed during translation: {}", e);
                return TranslationResult::failed(e.to_string());
            }
        };

        let sql = strip_code_fences(&completion);
        if sql.is_empty() {
            return TranslationResult::failed("completion service returned no query");
        }

        let confidence = sql_confidence(&sql);
        info!(
            "Translated question to {} query with confidence {:.2}",
            dialect, confidence
        );
        debug!("Generated query: {}", sql);
        TranslationResult::scored(sql, TranslationKind::RelationalQuery, confidence)
    }

    pub async fn translate_to_api_call(
        &self,
        question: &str,
        endpoints: &[ApiEndpoint],
    ) -> TranslationResult {
        let prompt = match prompts::render_api_prompt(endpoints, question) {
            Ok(prompt) => prompt,
            Err(e) => return TranslationResult::failed(format!("failed to build prompt: {}", e)),
        };

        let completion = match self.llm.complete(&prompt).await {
            Ok(completion) => completion,
            Err(e) => {
                warn!("Completion service failed during API translation: {}", e);
                return TranslationResult::failed(e.to_string());
            }
        };

        let Some(envelope) = json_object(&strip_code_fences(&completion)) else {
            return TranslationResult::failed("completion service did not return a JSON object");
        };

        if let Some(error) = non_empty_str(&envelope, "error") {
            let reason = non_empty_str(&envelope, "reason").unwrap_or("no reason given");
            return TranslationResult::failed(format!("{}: {}", error, reason));
        }

        let method = non_empty_str(&envelope, "method");
        let Some(path) = non_empty_str(&envelope, "path") else {
            return TranslationResult::failed("completion service returned no endpoint path");
        };

        let confidence = api_confidence(method, Some(path));
        let mut call = format!("{} {}", method.unwrap_or("GET").to_uppercase(), path);
        if let Some(body @ (Value::Object(_) | Value::Array(_))) = envelope.get("body") {
            call = format!("{}\n{}", call, body);
        }
        info!("Translated question to API call {} with confidence {:.2}", call, confidence);

        let mut result = TranslationResult::scored(call, TranslationKind::ApiCall, confidence);
        result.explanation = non_empty_str(&envelope, "description").map(str::to_string);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionProvider, CompletionRequest, GenerationParams, LlmError};
    use crate::schema::{ColumnInfo, TableInfo};
    use async_trait::async_trait;
    use std::sync::Mutex;

    enum Reply {
        Text(&'static str),
        Timeout,
    }

    struct ScriptedProvider {
        reply: Reply,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            match self.reply {
                Reply::Text(text) => Ok(text.to_string()),
                Reply::Timeout => Err(LlmError::Timeout("deadline elapsed".to_string())),
            }
        }
    }

    fn translator(reply: Reply) -> (QueryTranslator, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider {
            reply,
            prompts: Mutex::new(Vec::new()),
        });
        let llm = LlmManager::with_provider(provider.clone(), GenerationParams::default());
        (QueryTranslator::new(Arc::new(llm), 100), provider)
    }

    fn users_target() -> TranslationTarget {
        TranslationTarget::Database {
            dialect: "MySQL",
            database: "shop".to_string(),
            schema: SchemaInfo::new(vec![TableInfo::new(
                "users",
                vec![
                    ColumnInfo::new("id", "int", false),
                    ColumnInfo::new("name", "text", true),
                ],
            )]),
            simple_select_only: false,
        }
    }

    fn endpoint(method: &str, path: &str) -> ApiEndpoint {
        ApiEndpoint {
            method: method.to_string(),
            path: path.to_string(),
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn test_show_all_users_yields_select_with_confidence() {
        let (translator, provider) = translator(Reply::Text("```sql\nSELECT * FROM users LIMIT 100;\n```"));
        let result = translator.translate("show all users", &users_target()).await;

        assert_eq!(result.kind, TranslationKind::RelationalQuery);
        assert_eq!(result.query, "SELECT * FROM users LIMIT 100;");
        assert!(result.confidence >= 0.5);
        assert!(result.advisory.is_some());

        let prompts = provider.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Table: users\nColumns: id (int), name (text)"));
    }

    #[tokio::test]
    async fn test_destructive_output_is_pinned_to_floor() {
        let (translator, _) = translator(Reply::Text("DELETE FROM users"));
        let result = translator.translate("delete all records", &users_target()).await;

        assert_eq!(result.kind, TranslationKind::RelationalQuery);
        assert_eq!(result.query, "DELETE FROM users");
        assert!(result.confidence <= CONFIDENCE_FLOOR);
    }

    #[tokio::test]
    async fn test_api_translation_picks_endpoint() {
        let (translator, _) = translator(Reply::Text(
            "```json\n{\"method\": \"GET\", \"path\": \"/albums\", \"description\": \"All albums\"}\n```",
        ));
        let target = TranslationTarget::Api {
            endpoints: vec![endpoint("GET", "/albums"), endpoint("GET", "/posts")],
        };

        let result = translator.translate("show albums", &target).await;
        assert_eq!(result.kind, TranslationKind::ApiCall);
        assert_eq!(result.query, "GET /albums");
        assert_eq!(result.explanation.as_deref(), Some("All albums"));
        assert!((result.confidence - 1.0).abs() < f64::EPSILON);
        assert!(result.advisory.is_none());
    }

    #[tokio::test]
    async fn test_api_translation_carries_request_body() {
        let (translator, _) = translator(Reply::Text(
            "{\"method\": \"post\", \"path\": \"/posts\", \"body\": {\"title\": \"hi\"}}",
        ));
        let result = translator
            .translate_to_api_call("create a post titled hi", &[endpoint("POST", "/posts")])
            .await;

        assert_eq!(result.kind, TranslationKind::ApiCall);
        assert_eq!(result.query, "POST /posts\n{\"title\":\"hi\"}");
    }

    #[tokio::test]
    async fn test_model_refusal_becomes_translation_error() {
        let (translator, _) = translator(Reply::Text(
            "{\"error\": \"no matching endpoint\", \"reason\": \"nothing about weather\"}",
        ));
        let result = translator
            .translate_to_api_call("weather tomorrow", &[endpoint("GET", "/albums")])
            .await;

        assert!(result.is_error());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(
            result.error_message(),
            Some("no matching endpoint: nothing about weather")
        );
    }

    #[tokio::test]
    async fn test_completion_timeout_becomes_translation_error() {
        let (translator, provider) = translator(Reply::Timeout);
        let result = translator.translate("show all users", &users_target()).await;

        assert!(result.is_error());
        assert_eq!(result.query, "");
        assert_eq!(result.confidence, 0.0);
        assert!(result.error_message().unwrap().contains("timed out"));
        // no retry on the translation path
        assert_eq!(provider.prompts.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_sql_confidence_rewards_keywords() {
        let simple = sql_confidence("SELECT name FROM users");
        let rich = sql_confidence(
            "SELECT u.name, COUNT(*) FROM users u JOIN orders o ON o.user_id = u.id WHERE o.total > 0 GROUP BY u.name HAVING COUNT(*) > 1 ORDER BY 2",
        );
        assert!((simple - (0.5 + 0.3 * 2.0 / 7.0)).abs() < 1e-9);
        assert!((rich - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_sql_confidence_sentinel_and_error_text() {
        assert_eq!(sql_confidence(prompts::UNANSWERABLE_SQL), CONFIDENCE_FLOOR);
        assert_eq!(sql_confidence("unsupported request"), CONFIDENCE_FLOOR);
    }

    #[test]
    fn test_confidence_is_bounded() {
        for text in ["", "DROP TABLE x", "SELECT FROM WHERE JOIN GROUP BY ORDER BY HAVING"] {
            let confidence = sql_confidence(text);
            assert!((0.0..=1.0).contains(&confidence));
        }
        assert!((api_confidence(None, Some("/x")) - 0.5).abs() < 1e-9);
        assert!((api_confidence(Some("FETCH"), Some("/x")) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fences("```\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fences("  SELECT 1  "), "SELECT 1");
        assert_eq!(strip_code_fences("```SELECT *\nFROM t\n```"), "SELECT *\nFROM t");
        assert_eq!(strip_code_fences("```SELECT 1```"), "SELECT 1");
        assert_eq!(strip_code_fences("```\nSELECT\n*\nFROM t\n```"), "SELECT\n*\nFROM t");
        assert_eq!(strip_code_fences("```SELECT\n*\nFROM t\n```"), "SELECT\n*\nFROM t");
        assert_eq!(
            strip_code_fences("Here you go:\n```sql\nSELECT 2\n```\nEnjoy"),
            "SELECT 2"
        );
    }

    #[test]
    fn test_advisory_threshold() {
        assert!(advisory_for(0.69).unwrap().contains("69%"));
        assert!(advisory_for(0.7).is_none());
    }
}
