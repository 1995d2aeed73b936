//! Language-model plumbing shared by the classifier and the LLM scorer
//!
//! 1. A provider-agnostic completion trait ([`LLMProvider`])
//! 2. Concrete HTTP clients (OpenAI, Anthropic, local OpenAI-compatible)
//! 3. Tolerant JSON-object extraction from model replies

use async_trait::async_trait;
use serde::de::DeserializeOwned;

#[cfg(any(feature = "openai", feature = "anthropic", feature = "local"))]
pub mod providers;

// ============================================================================
// LLM Provider Interface
// ============================================================================

/// Trait for LLM API providers
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate completion
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError>;

    /// Get model info
    fn model_info(&self) -> ModelInfo;
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    /// Ask for a JSON object reply when the provider supports it.
    pub json_mode: bool,
}

impl CompletionRequest {
    /// A system + user exchange expecting a JSON object back.
    pub fn json(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![
                Message {
                    role: Role::System,
                    content: system.into(),
                },
                Message {
                    role: Role::User,
                    content: user.into(),
                },
            ],
            max_tokens: Some(1024),
            temperature: Some(0.1),
            json_mode: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub supports_json_mode: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Parsing error: {0}")]
    ParseError(String),
    #[error("Network error: {0}")]
    Network(String),
}

impl LLMError {
    /// Worth retrying after a pause.
    pub fn is_transient(&self) -> bool {
        matches!(self, LLMError::RateLimited { .. } | LLMError::Network(_))
    }
}

// ============================================================================
// JSON extraction
// ============================================================================

/// Parse the first complete JSON object in a model reply.
///
/// Models wrap JSON in markdown fences or prose, or emit trailing content.
/// Brace balancing (outside string literals) finds the object boundary more
/// reliably than `rfind('}')`, which can land on an inner brace.
pub fn parse_llm_json_object<T: DeserializeOwned>(text: &str) -> Result<T, LLMError> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Ok(v);
    }

    let Some(start) = trimmed.find('{') else {
        return Err(LLMError::ParseError(
            "reply did not contain a JSON object (no '{' found)".to_string(),
        ));
    };

    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escape = false;
    let mut end: Option<usize> = None;

    for (idx, ch) in trimmed.char_indices().skip_while(|(i, _)| *i < start) {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(idx);
                    break;
                }
            }
            _ => {}
        }
    }

    let Some(end) = end else {
        return Err(LLMError::ParseError(
            "reply contained an unterminated JSON object".to_string(),
        ));
    };

    serde_json::from_str(&trimmed[start..=end])
        .map_err(|e| LLMError::ParseError(format!("reply contained invalid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reply {
        category: String,
        confidence: f64,
    }

    #[test]
    fn parses_bare_json() {
        let reply: Reply =
            parse_llm_json_object(r#"{"category": "none", "confidence": 0.2}"#).unwrap();
        assert_eq!(reply.category, "none");
    }

    #[test]
    fn parses_fenced_json() {
        let text = "Here you go:\n```json\n{\"category\": \"strategic_plan\", \"confidence\": 0.8}\n```\n";
        let reply: Reply = parse_llm_json_object(text).unwrap();
        assert_eq!(reply.category, "strategic_plan");
    }

    #[test]
    fn braces_inside_strings_do_not_end_the_object() {
        let text = r#"Result: {"category": "a}b{", "confidence": 0.5} trailing } junk"#;
        let reply: Reply = parse_llm_json_object(text).unwrap();
        assert_eq!(reply.category, "a}b{");
    }

    #[test]
    fn missing_object_is_a_parse_error() {
        let err = parse_llm_json_object::<Reply>("no json here").unwrap_err();
        assert!(matches!(err, LLMError::ParseError(_)));
        let err = parse_llm_json_object::<Reply>("{\"category\": \"x\"").unwrap_err();
        assert!(matches!(err, LLMError::ParseError(_)));
    }

    #[test]
    fn transient_errors() {
        assert!(LLMError::RateLimited { retry_after_ms: 10 }.is_transient());
        assert!(LLMError::Network("reset".into()).is_transient());
        assert!(!LLMError::ParseError("bad".into()).is_transient());
    }
}
