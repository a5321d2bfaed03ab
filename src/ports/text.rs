//! Text-generation port.
//!
//! The pipeline treats generation as an opaque `complete(system, user) -> text`
//! call. Concrete backends talk to OpenAI or Anthropic over `reqwest`; when no
//! key is configured the [`UnavailableGenerator`] makes every caller take its
//! documented fallback path.

#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
#[cfg(test)]
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::PortError;
use crate::providers::*;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Identifier used in logs and degradation flags.
    fn name(&self) -> &str;

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, PortError>;
}

// ---------------------------------------------------------------------------
// Model tiers
// ---------------------------------------------------------------------------

/// Fast tier for routing and investigation synthesis, deep tier for
/// explanation and validation.
#[derive(Clone)]
pub struct ModelTiers {
    pub fast: Arc<dyn TextGenerator>,
    pub deep: Arc<dyn TextGenerator>,
}

impl ModelTiers {
    /// Use one generator for both tiers.
    pub fn single(generator: Arc<dyn TextGenerator>) -> Self {
        Self { fast: Arc::clone(&generator), deep: generator }
    }

    /// Build both tiers from config. Falls back to [`UnavailableGenerator`]
    /// when the provider is disabled or no API key is present.
    pub fn from_config(config: &LlmConfig) -> Self {
        let key = match (&config.api_key, config.provider) {
            (_, Provider::Disabled) | (None, _) => {
                if config.provider != Provider::Disabled {
                    warn!(provider = %config.provider, "no API key configured; generation disabled");
                }
                return Self::single(Arc::new(UnavailableGenerator::new("no text-generation backend configured")));
            }
            (Some(k), _) => k.clone(),
        };
        let fast = HttpGenerator::builder(config.provider, &config.fast_model, &key)
            .timeout(Duration::from_secs(config.timeout_secs))
            .max_tokens(config.max_tokens)
            .build();
        let deep = HttpGenerator::builder(config.provider, &config.deep_model, &key)
            .timeout(Duration::from_secs(config.timeout_secs))
            .max_tokens(config.max_tokens)
            .build();
        Self { fast: Arc::new(fast), deep: Arc::new(deep) }
    }
}

// ---------------------------------------------------------------------------
// HTTP backend
// ---------------------------------------------------------------------------

/// Non-streaming chat completion against OpenAI or Anthropic.
pub struct HttpGenerator {
    client: reqwest::Client,
    provider: Provider,
    model: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
    timeout_secs: u64,
    label: String,
}

impl HttpGenerator {
    pub fn builder(provider: Provider, model: &str, api_key: &str) -> HttpGeneratorBuilder {
        HttpGeneratorBuilder {
            provider,
            model: resolve_model(&provider, model),
            api_key: api_key.to_string(),
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
            max_tokens: 4_096,
            temperature: 0.2,
        }
    }

    fn transport_error(&self, url: &str, e: reqwest::Error) -> PortError {
        if e.is_timeout() {
            PortError::Timeout { port: "text_generation", secs: self.timeout_secs }
        } else {
            PortError::Transport { url: url.to_string(), detail: e.to_string() }
        }
    }

    async fn complete_openai(&self, url: &str, system: &str, user: &str) -> Result<String, PortError> {
        let request = OpenAIChatRequest {
            model: self.model.clone(),
            messages: vec![
                OpenAIChatMessage { role: "system".to_string(), content: system.to_string() },
                OpenAIChatMessage { role: "user".to_string(), content: user.to_string() },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(url, e))?;
        if !response.status().is_success() {
            return Err(PortError::Http { status: response.status().as_u16(), url: url.to_string() });
        }
        let body: OpenAIChatResponse = response
            .json()
            .await
            .map_err(|e| PortError::decode("choices", e.to_string()))?;
        body.into_text().ok_or_else(|| PortError::decode("choices[0].message.content", "missing"))
    }

    async fn complete_anthropic(&self, url: &str, system: &str, user: &str) -> Result<String, PortError> {
        let request = AnthropicRequest {
            model: self.model.clone(),
            messages: vec![AnthropicMessage { role: "user".to_string(), content: user.to_string() }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: (!system.is_empty()).then(|| system.to_string()),
        };
        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(url, e))?;
        if !response.status().is_success() {
            return Err(PortError::Http { status: response.status().as_u16(), url: url.to_string() });
        }
        let body: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| PortError::decode("content", e.to_string()))?;
        body.into_text().ok_or_else(|| PortError::decode("content[].text", "missing"))
    }
}

#[async_trait]
impl TextGenerator for HttpGenerator {
    fn name(&self) -> &str {
        &self.label
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, PortError> {
        let url = self
            .provider
            .endpoint()
            .ok_or_else(|| PortError::unavailable("text_generation", "provider disabled"))?;
        debug!(provider = %self.provider, model = %self.model, "text generation request");
        match self.provider {
            Provider::Openai => self.complete_openai(url, system_prompt, user_prompt).await,
            Provider::Anthropic => self.complete_anthropic(url, system_prompt, user_prompt).await,
            Provider::Disabled => Err(PortError::unavailable("text_generation", "provider disabled")),
        }
    }
}

/// Builder for [`HttpGenerator`].
pub struct HttpGeneratorBuilder {
    provider: Provider,
    model: String,
    api_key: String,
    timeout: Duration,
    connect_timeout: Duration,
    max_tokens: u32,
    temperature: f32,
}

impl HttpGeneratorBuilder {
    pub fn timeout(mut self, t: Duration) -> Self {
        self.timeout = t;
        self
    }

    pub fn connect_timeout(mut self, t: Duration) -> Self {
        self.connect_timeout = t;
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn build(self) -> HttpGenerator {
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.timeout)
            .build()
            .unwrap_or_default();
        HttpGenerator {
            client,
            label: format!("{}:{}", self.provider, self.model),
            provider: self.provider,
            model: self.model,
            api_key: self.api_key,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout_secs: self.timeout.as_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// UnavailableGenerator
// ---------------------------------------------------------------------------

/// Always fails. Stands in for a missing backend.
pub struct UnavailableGenerator {
    reason: String,
}

impl UnavailableGenerator {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl TextGenerator for UnavailableGenerator {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String, PortError> {
        Err(PortError::unavailable("text_generation", self.reason.clone()))
    }
}

// ---------------------------------------------------------------------------
// ScriptedGenerator
// ---------------------------------------------------------------------------

/// Deterministic generator for unit tests.
///
/// Rules are checked in insertion order against the concatenated system and
/// user prompt; the first rule whose marker is a substring wins. Without a
/// match the default response is returned, or an error when none is set.
/// Every call is counted, including failing ones.
#[cfg(test)]
#[derive(Default)]
pub struct ScriptedGenerator {
    rules: Vec<(String, String)>,
    default_response: Option<String>,
    fail_all: bool,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

#[cfg(test)]
impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `response` whenever the prompt contains `marker`.
    pub fn with_rule(mut self, marker: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push((marker.into(), response.into()));
        self
    }

    pub fn with_default(mut self, response: impl Into<String>) -> Self {
        self.default_response = Some(response.into());
        self
    }

    /// Fail every call, as if the backend were down.
    pub fn failing() -> Self {
        Self { fail_all: true, ..Self::default() }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// User prompts seen so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, PortError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.prompts.lock() {
            seen.push(user_prompt.to_string());
        }
        if self.fail_all {
            return Err(PortError::unavailable("text_generation", "scripted failure"));
        }
        let haystack = format!("{system_prompt}\n{user_prompt}");
        self.rules
            .iter()
            .find(|(marker, _)| haystack.contains(marker.as_str()))
            .map(|(_, response)| response.clone())
            .or_else(|| self.default_response.clone())
            .ok_or_else(|| PortError::unavailable("text_generation", "no scripted response"))
    }
}
