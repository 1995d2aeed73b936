//! LLM API Providers
//!
//! Concrete implementations for OpenAI, Anthropic, and local models.

use super::*;
use reqwest::Client;
use std::time::Duration;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// ============================================================================
// Configuration
// ============================================================================

/// LLM configuration loaded from environment or config file
#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Anthropic,
    Local,
}

impl LLMConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, ProviderConfigError> {
        if let Some(key) = non_empty_env("OPENAI_API_KEY") {
            return Ok(Self {
                provider: Provider::OpenAI,
                api_key: key,
                model: non_empty_env("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
                base_url: non_empty_env("OPENAI_BASE_URL"),
                timeout_secs: 60,
                max_retries: 3,
            });
        }

        if let Some(key) = non_empty_env("ANTHROPIC_API_KEY") {
            return Ok(Self {
                provider: Provider::Anthropic,
                api_key: key,
                model: non_empty_env("ANTHROPIC_MODEL")
                    .unwrap_or_else(|| "claude-3-5-sonnet-20241022".to_string()),
                base_url: None,
                timeout_secs: 60,
                max_retries: 3,
            });
        }

        if let Some(url) = non_empty_env("LOCAL_LLM_URL") {
            return Ok(Self {
                provider: Provider::Local,
                api_key: String::new(),
                model: non_empty_env("LOCAL_LLM_MODEL").unwrap_or_else(|| "default".to_string()),
                base_url: Some(url),
                timeout_secs: 120,
                max_retries: 1,
            });
        }

        Err(ProviderConfigError::NoProviderConfigured)
    }

    /// Create OpenAI config
    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::OpenAI,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
            max_retries: 3,
        }
    }

    /// Create Anthropic config
    pub fn anthropic(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::Anthropic,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
            max_retries: 3,
        }
    }

    /// Create local config
    pub fn local(url: &str, model: &str) -> Self {
        Self {
            provider: Provider::Local,
            api_key: String::new(),
            model: model.to_string(),
            base_url: Some(url.to_string()),
            timeout_secs: 120,
            max_retries: 1,
        }
    }

    fn http_client(&self) -> Result<Client, LLMError> {
        Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| LLMError::Api(format!("failed to build http client: {e}")))
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn trim_base_url(base_url: Option<&str>, default: &str) -> String {
    base_url.unwrap_or(default).trim_end_matches('/').to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderConfigError {
    #[error("No LLM provider configured. Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or LOCAL_LLM_URL")]
    NoProviderConfigured,
    #[error("Provider {0:?} is not compiled into this build")]
    Disabled(Provider),
}

fn openai_style_messages(request: &CompletionRequest) -> Vec<serde_json::Value> {
    request
        .messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": m.role.as_str(),
                "content": m.content
            })
        })
        .collect()
}

async fn error_for_status(response: reqwest::Response, label: &str) -> LLMError {
    let status = response.status();
    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(20);
        return LLMError::RateLimited {
            retry_after_ms: retry_after * 1000,
        };
    }
    let error_text = response.text().await.unwrap_or_default();
    if status.is_server_error() {
        return LLMError::Network(format!("{label} http error {status}: {error_text}"));
    }
    LLMError::Api(format!("{label} http error {status}: {error_text}"))
}

// ============================================================================
// OpenAI Provider
// ============================================================================

#[cfg(feature = "openai")]
pub struct OpenAIClient {
    client: Client,
    config: LLMConfig,
}

#[cfg(feature = "openai")]
impl OpenAIClient {
    pub fn new(config: LLMConfig) -> Result<Self, LLMError> {
        let client = config.http_client()?;
        Ok(Self { client, config })
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let url = format!(
            "{}/chat/completions",
            trim_base_url(self.config.base_url.as_deref(), DEFAULT_OPENAI_BASE_URL)
        );

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": openai_style_messages(request),
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if request.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_for_status(response, "openai").await);
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LLMError::InvalidResponse("missing choices[0].message.content".to_string()))?
            .to_string();

        let finish_reason = match data["choices"][0]["finish_reason"].as_str() {
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        };

        Ok(CompletionResponse {
            content,
            finish_reason,
            usage: Usage {
                prompt_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as usize,
                completion_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0) as usize,
            },
            model: self.config.model.clone(),
        })
    }
}

// ============================================================================
// Anthropic Provider
// ============================================================================

#[cfg(feature = "anthropic")]
pub struct AnthropicClient {
    client: Client,
    config: LLMConfig,
}

#[cfg(feature = "anthropic")]
impl AnthropicClient {
    pub fn new(config: LLMConfig) -> Result<Self, LLMError> {
        let client = config.http_client()?;
        Ok(Self { client, config })
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let url = format!(
            "{}/messages",
            trim_base_url(self.config.base_url.as_deref(), DEFAULT_ANTHROPIC_BASE_URL)
        );

        // System prompt travels outside the message list
        let system = request
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone());

        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(1024),
        });

        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_for_status(response, "anthropic").await);
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;

        let content = data["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| LLMError::InvalidResponse("no text content blocks".to_string()))?;

        let finish_reason = match data["stop_reason"].as_str() {
            Some("max_tokens") => FinishReason::Length,
            _ => FinishReason::Stop,
        };

        Ok(CompletionResponse {
            content,
            finish_reason,
            usage: Usage {
                prompt_tokens: data["usage"]["input_tokens"].as_u64().unwrap_or(0) as usize,
                completion_tokens: data["usage"]["output_tokens"].as_u64().unwrap_or(0) as usize,
            },
            model: self.config.model.clone(),
        })
    }
}

// ============================================================================
// Local Provider (Ollama, vLLM, etc.)
// ============================================================================

#[cfg(feature = "local")]
pub struct LocalClient {
    client: Client,
    config: LLMConfig,
}

#[cfg(feature = "local")]
impl LocalClient {
    pub fn new(config: LLMConfig) -> Result<Self, LLMError> {
        let client = config.http_client()?;
        Ok(Self { client, config })
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .ok_or_else(|| LLMError::Api("No base URL configured".to_string()))?;

        // OpenAI-compatible API (vLLM, Ollama in OpenAI mode)
        let url = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": openai_style_messages(request),
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_for_status(response, "local").await);
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LLMError::InvalidResponse("missing choices[0].message.content".to_string()))?
            .to_string();

        Ok(CompletionResponse {
            content,
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
            model: self.config.model.clone(),
        })
    }
}

// ============================================================================
// Unified Client
// ============================================================================

/// Unified LLM client that dispatches to the appropriate provider and retries
/// transient failures.
pub struct UnifiedClient {
    backend: Backend,
    model: String,
    max_retries: u32,
}

enum Backend {
    #[cfg(feature = "openai")]
    OpenAI(OpenAIClient),
    #[cfg(feature = "anthropic")]
    Anthropic(AnthropicClient),
    #[cfg(feature = "local")]
    Local(LocalClient),
}

impl UnifiedClient {
    /// Create from configuration
    pub fn from_config(config: LLMConfig) -> Result<Self, UnifiedClientError> {
        let model = config.model.clone();
        let max_retries = config.max_retries;
        let backend = match config.provider {
            #[cfg(feature = "openai")]
            Provider::OpenAI => Backend::OpenAI(OpenAIClient::new(config)?),
            #[cfg(feature = "anthropic")]
            Provider::Anthropic => Backend::Anthropic(AnthropicClient::new(config)?),
            #[cfg(feature = "local")]
            Provider::Local => Backend::Local(LocalClient::new(config)?),
            #[allow(unreachable_patterns)]
            other => return Err(ProviderConfigError::Disabled(other).into()),
        };
        Ok(Self {
            backend,
            model,
            max_retries,
        })
    }

    /// Create from environment
    pub fn from_env() -> Result<Self, UnifiedClientError> {
        let config = LLMConfig::from_env()?;
        Self::from_config(config)
    }

    async fn complete_once(&self, request: &CompletionRequest) -> Result<CompletionResponse, LLMError> {
        match &self.backend {
            #[cfg(feature = "openai")]
            Backend::OpenAI(c) => c.complete(request).await,
            #[cfg(feature = "anthropic")]
            Backend::Anthropic(c) => c.complete(request).await,
            #[cfg(feature = "local")]
            Backend::Local(c) => c.complete(request).await,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UnifiedClientError {
    #[error(transparent)]
    Config(#[from] ProviderConfigError),
    #[error(transparent)]
    Client(#[from] LLMError),
}

#[async_trait]
impl LLMProvider for UnifiedClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let mut attempt = 0u32;
        loop {
            match self.complete_once(&request).await {
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let pause_ms = match &err {
                        LLMError::RateLimited { retry_after_ms } => *retry_after_ms,
                        _ => 500 * 2u64.pow(attempt),
                    };
                    tracing::warn!(
                        model = %self.model,
                        attempt,
                        pause_ms,
                        error = %err,
                        "transient LLM failure, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(pause_ms)).await;
                }
                other => return other,
            }
        }
    }

    fn model_info(&self) -> ModelInfo {
        let supports_json_mode = match &self.backend {
            #[cfg(feature = "openai")]
            Backend::OpenAI(_) => true,
            #[cfg(feature = "anthropic")]
            Backend::Anthropic(_) => false,
            #[cfg(feature = "local")]
            Backend::Local(_) => false,
        };
        ModelInfo {
            name: self.model.clone(),
            supports_json_mode,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
