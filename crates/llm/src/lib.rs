use std::env;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use reqwest::{header::HeaderValue, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::runtime::Runtime;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_RETRIES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Any endpoint speaking the OpenAI chat-completions protocol.
    OpenAi,
    Anthropic,
    /// Offline stand-in that summarises the prompt; no network.
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Local => "local",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "gpt-4.1-mini",
            LlmProvider::Anthropic => "claude-3-haiku-20240307",
            LlmProvider::Local => "local",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "openai" | "openai-compatible" => Ok(LlmProvider::OpenAi),
            "anthropic" => Ok(LlmProvider::Anthropic),
            "local" => Ok(LlmProvider::Local),
            other => Err(anyhow!("unknown provider {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub model: String,
    /// Base URL or full `/chat/completions` URL of an OpenAI-compatible API.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_retries: usize,
}

impl LlmSettings {
    pub fn new(provider: LlmProvider) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
            base_url: None,
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn local() -> Self {
        Self::new(LlmProvider::Local)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
    /// Earlier assistant turns, replayed after the user message.
    pub history: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    model: String,
    max_retries: usize,
    config: ProviderConfig,
}

#[derive(Clone)]
enum ProviderConfig {
    OpenAi(OpenAiConfig),
    Anthropic(AnthropicConfig),
    Local,
}

#[derive(Clone)]
struct OpenAiConfig {
    api_key: String,
    endpoint: String,
}

#[derive(Clone)]
struct AnthropicConfig {
    api_key: String,
}

impl LlmClient {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("failed to build http client")?;
        let config = match settings.provider {
            LlmProvider::OpenAi => {
                let base = settings
                    .base_url
                    .clone()
                    .or_else(|| env::var("JURIS_API_URL").ok())
                    .or_else(|| env::var("OPENAI_BASE_URL").ok())
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
                ProviderConfig::OpenAi(OpenAiConfig {
                    api_key: resolve_api_key(settings.api_key.as_deref(), "OPENAI_API_KEY")?,
                    endpoint: chat_completions_url(&base),
                })
            }
            LlmProvider::Anthropic => ProviderConfig::Anthropic(AnthropicConfig {
                api_key: resolve_api_key(settings.api_key.as_deref(), "ANTHROPIC_API_KEY")?,
            }),
            LlmProvider::Local => ProviderConfig::Local,
        };
        Ok(Self {
            http,
            provider: settings.provider,
            model: settings.model,
            max_retries: settings.max_retries,
            config,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn chat(&self, req: &LlmRequest) -> Result<LlmResponse> {
        match &self.config {
            ProviderConfig::OpenAi(cfg) => self.chat_openai(cfg, req).await,
            ProviderConfig::Anthropic(cfg) => self.chat_anthropic(cfg, req).await,
            ProviderConfig::Local => Ok(chat_local(req)),
        }
    }

    pub fn chat_blocking(&self, req: &LlmRequest) -> Result<LlmResponse> {
        if let ProviderConfig::Local = self.config {
            return Ok(chat_local(req));
        }
        let rt = Runtime::new().context("failed to create tokio runtime")?;
        rt.block_on(self.chat(req))
    }

    async fn chat_openai(&self, cfg: &OpenAiConfig, req: &LlmRequest) -> Result<LlmResponse> {
        let payload = openai_payload(&self.model, req);
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            debug!(attempt, endpoint = %cfg.endpoint, "sending chat completion");
            let response = match self
                .http
                .post(&cfg.endpoint)
                .bearer_auth(&cfg.api_key)
                .json(&payload)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt > self.max_retries {
                        return Err(err).context("chat completion request failed");
                    }
                    warn!(attempt, error = %err, "chat completion transport error, retrying");
                    sleep(backoff_delay(attempt, None)).await;
                    continue;
                }
            };
            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt > self.max_retries {
                    return Err(anyhow!(
                        "chat endpoint rate limited after {} retries",
                        self.max_retries
                    ));
                }
                let wait = backoff_delay(attempt, response.headers().get("retry-after"));
                warn!(attempt, wait_secs = wait.as_secs(), "rate limited, backing off");
                sleep(wait).await;
                continue;
            }
            let value = decode_body(response).await?;
            let content = extract_chat_text(&value)
                .ok_or_else(|| anyhow!("missing text in chat completion response"))?;
            let usage: OpenAiUsage = value
                .get("usage")
                .and_then(|value| serde_json::from_value(value.clone()).ok())
                .unwrap_or_default();
            return Ok(LlmResponse {
                content,
                prompt_tokens: usage.prompt_tokens.unwrap_or(0),
                completion_tokens: usage.completion_tokens.unwrap_or(0),
            });
        }
    }

    async fn chat_anthropic(&self, cfg: &AnthropicConfig, req: &LlmRequest) -> Result<LlmResponse> {
        let mut messages = vec![json!({ "role": "user", "content": req.user })];
        if let Some(history) = req.history.as_deref().filter(|h| !h.trim().is_empty()) {
            messages.push(json!({ "role": "assistant", "content": history }));
        }
        let mut payload = json!({
            "model": self.model,
            "max_tokens": req.max_tokens.unwrap_or(1024),
            "messages": messages,
        });
        if let Some(system) = &req.system {
            payload["system"] = json!(system);
        }
        if let Some(temperature) = req.temperature {
            payload["temperature"] = json!(temperature);
        }
        let response = self
            .http
            .post(ANTHROPIC_URL)
            .header("x-api-key", &cfg.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()
            .await
            .context("anthropic request failed")?
            .error_for_status()
            .context("anthropic returned an error")?
            .json::<AnthropicResponse>()
            .await
            .context("failed to decode anthropic response")?;
        let text = response
            .content
            .into_iter()
            .find_map(|part| part.text)
            .ok_or_else(|| anyhow!("missing text in Anthropic response"))?;
        let usage = response.usage.unwrap_or_default();
        Ok(LlmResponse {
            content: text,
            prompt_tokens: usage.input_tokens.unwrap_or(0),
            completion_tokens: usage.output_tokens.unwrap_or(0),
        })
    }
}

fn openai_payload(model: &str, req: &LlmRequest) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = &req.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": req.user }));
    if let Some(history) = req.history.as_deref().filter(|h| !h.trim().is_empty()) {
        messages.push(json!({ "role": "assistant", "content": history }));
    }
    let mut payload = json!({
        "model": model,
        "messages": messages,
    });
    if let Some(temperature) = req.temperature {
        payload["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = req.max_tokens {
        payload["max_tokens"] = json!(max_tokens);
    }
    payload
}

/// Accepts either an API root (`https://host/v1`) or the full completions URL.
pub fn chat_completions_url(base: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with("/chat/completions") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/chat/completions")
    }
}

fn backoff_delay(attempt: usize, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(value) = retry_after {
        if let Ok(text) = value.to_str() {
            if let Ok(secs) = text.parse::<u64>() {
                return Duration::from_secs(secs.max(1));
            }
        }
    }
    let capped = attempt.min(6) as u32;
    Duration::from_secs(1u64 << capped)
}

fn chat_local(req: &LlmRequest) -> LlmResponse {
    LlmResponse {
        content: summarize_text(&req.user, 40),
        prompt_tokens: 0,
        completion_tokens: 0,
    }
}

fn summarize_text(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<&str>>()
        .join(" ")
}

async fn decode_body(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(anyhow!(
            "chat endpoint returned error (status {}): {}",
            status,
            body
        ));
    }
    serde_json::from_str(&body).context("failed to decode chat completion response")
}

fn resolve_api_key(explicit: Option<&str>, provider_var: &str) -> Result<String> {
    let value = explicit
        .map(str::to_string)
        .or_else(|| env::var("JURIS_API_KEY").ok())
        .or_else(|| env::var(provider_var).ok())
        .ok_or_else(|| anyhow!("set JURIS_API_KEY or {provider_var}"))?;
    if value.trim().is_empty() {
        return Err(anyhow!("API key for {provider_var} is empty"));
    }
    Ok(value)
}

fn extract_chat_text(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.as_array()?.first()?;
    if let Some(text) = choice.get("text").and_then(|t| t.as_str()) {
        return Some(text.to_string());
    }
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(|t| t.as_str()))
        .map(str::to_string)
}

#[derive(Default, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}
