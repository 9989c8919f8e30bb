//! Language-model access behind a narrow completion capability.
//!
//! The pipeline only ever sees `LlmClient`; the rig-backed implementation is
//! selected at startup from configuration. Completion failures never carry
//! pipeline errors outward — every caller has a deterministic fallback.

use crate::config::LlmConfig;
use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;

/// Failure of a single completion call. Callers treat any value as a signal
/// to fall back, so the cause is carried as text.
#[derive(Debug, thiserror::Error)]
#[error("completion failed: {0}")]
pub struct CompletionError(pub String);

/// Narrow completion capability: system + user prompt in, text out.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, CompletionError>;
}

/// Rig-backed client speaking to any OpenAI-compatible endpoint.
///
/// The `provider` name picks a default endpoint ("openai", "groq", "gemini");
/// an explicit `base_url` overrides it.
pub struct RigLlmClient {
    client: openai::Client,
    model: String,
    temperature: f64,
    max_tokens: u64,
}

impl RigLlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self, CompletionError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(Self::key_env(&config.provider)).ok())
            .ok_or_else(|| {
                CompletionError(format!("no API key configured for provider '{}'", config.provider))
            })?;

        let base_url = config
            .base_url
            .clone()
            .or_else(|| Self::default_base_url(&config.provider).map(str::to_string));

        let mut builder = openai::Client::builder().api_key(&api_key);
        if let Some(url) = &base_url {
            builder = builder.base_url(url);
        }
        let client = builder
            .build()
            .map_err(|e| CompletionError(e.to_string()))?;

        Ok(Self {
            client,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn key_env(provider: &str) -> &'static str {
        match provider {
            "groq" => "GROQ_API_KEY",
            "gemini" => "GEMINI_API_KEY",
            _ => "OPENAI_API_KEY",
        }
    }

    fn default_base_url(provider: &str) -> Option<&'static str> {
        match provider {
            "groq" => Some("https://api.groq.com/openai/v1"),
            "gemini" => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
            _ => None,
        }
    }
}

#[async_trait]
impl LlmClient for RigLlmClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, CompletionError> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(system)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build();

        agent
            .prompt(user)
            .await
            .map_err(|e| CompletionError(e.to_string()))
    }
}

/// Pull a JSON object out of a raw model response.
///
/// Strips code fences and anything surrounding the outermost braces; model
/// output is untrusted and frequently wrapped in prose or markdown.
pub fn extract_json_object(raw: &str) -> Option<String> {
    let mut text = raw.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        text = stripped;
    } else if let Some(stripped) = text.strip_prefix("```") {
        text = stripped;
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped;
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start >= end {
        return None;
    }
    Some(text[start..=end].trim().to_string())
}
