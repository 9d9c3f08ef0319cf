//! HTTP-backed providers: Anthropic and OpenAI-compatible chat APIs.
//!
//! BYOK model: the API key comes from the backend's environment variable and
//! never appears in configuration files.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use super::prompt;
use super::{AnalysisProvider, ProviderError, ProviderRequest, ProviderResponse, RawIssue};
use async_trait::async_trait;

/// Hard ceiling on completion size; review responses are small.
const MAX_TOKENS_PER_CALL: u32 = 4096;
/// Low temperature keeps repeated reviews of identical content close.
const TEMPERATURE: f32 = 0.1;

/// Supported API backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Anthropic,
    OpenAi,
    /// Local OpenAI-compatible server, no key required.
    Ollama,
}

impl Backend {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "anthropic" => Some(Backend::Anthropic),
            "openai" => Some(Backend::OpenAi),
            "ollama" => Some(Backend::Ollama),
            _ => None,
        }
    }

    pub fn env_key(&self) -> &'static str {
        match self {
            Backend::Anthropic => "ANTHROPIC_API_KEY",
            Backend::OpenAi => "OPENAI_API_KEY",
            Backend::Ollama => "OLLAMA_HOST",
        }
    }

    pub fn api_url(&self) -> &'static str {
        match self {
            Backend::Anthropic => "https://api.anthropic.com/v1/messages",
            Backend::OpenAi => "https://api.openai.com/v1/chat/completions",
            Backend::Ollama => "http://localhost:11434/v1/chat/completions",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Backend::Ollama)
    }
}

/// Provider speaking to a hosted LLM over HTTP.
pub struct HttpProvider {
    id: String,
    backend: Backend,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpProvider {
    /// Build from a "provider/model" string, reading the API key from the
    /// backend's environment variable.
    pub fn from_model(model: &str, timeout: Duration) -> anyhow::Result<Self> {
        let (backend_name, model_name) = model
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("model must be \"provider/model\", got {:?}", model))?;
        let backend = Backend::parse(backend_name).ok_or_else(|| {
            anyhow::anyhow!(
                "unknown provider {:?} (supported: anthropic, openai, ollama)",
                backend_name
            )
        })?;

        let api_key = if backend.requires_api_key() {
            env::var(backend.env_key()).map_err(|_| {
                anyhow::anyhow!("{} is not set; export it to use {}", backend.env_key(), model)
            })?
        } else {
            String::new()
        };

        let client = reqwest::Client::builder()
            .user_agent(concat!("redline/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("building HTTP client: {}", e))?;

        Ok(Self {
            id: model.to_string(),
            backend,
            model: model_name.to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl AnalysisProvider for HttpProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn analyze(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let system = prompt::system_prompt();
        let user = prompt::user_prompt(request);

        let (text, prompt_tokens, completion_tokens) = match self.backend {
            Backend::Anthropic => self.call_anthropic(&system, &user).await?,
            Backend::OpenAi | Backend::Ollama => self.call_openai(&system, &user).await?,
        };

        let issues = parse_issues(&text)?;
        Ok(ProviderResponse {
            issues,
            prompt_tokens,
            completion_tokens,
        })
    }
}

impl HttpProvider {
    async fn call_anthropic(
        &self,
        system: &str,
        user: &str,
    ) -> Result<(String, usize, usize), ProviderError> {
        let body = AnthropicRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS_PER_CALL,
            temperature: TEMPERATURE,
            system,
            messages: vec![ChatMessage {
                role: "user",
                content: user,
            }],
        };

        let response = self
            .client
            .post(self.backend.api_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Invalid(format!("decoding response body: {}", e)))?;

        let text = parsed
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        Ok((
            text,
            parsed.usage.input_tokens,
            parsed.usage.output_tokens,
        ))
    }

    async fn call_openai(
        &self,
        system: &str,
        user: &str,
    ) -> Result<(String, usize, usize), ProviderError> {
        let body = OpenAiRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS_PER_CALL,
            temperature: TEMPERATURE,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let mut builder = self.client.post(self.backend.api_url()).json(&body);
        if self.backend.requires_api_key() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Invalid(format!("decoding response body: {}", e)))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::Invalid("response has no choices".to_string()))?;
        let usage = parsed.usage.unwrap_or_default();
        Ok((text, usage.prompt_tokens, usage.completion_tokens))
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transient(e.to_string())
    }
}

fn classify_status(status: u16, detail: &str) -> ProviderError {
    let detail = detail.chars().take(200).collect::<String>();
    match status {
        429 => ProviderError::RateLimited(format!("HTTP 429: {}", detail)),
        500..=599 => ProviderError::Transient(format!("HTTP {}: {}", status, detail)),
        _ => ProviderError::Invalid(format!("HTTP {}: {}", status, detail)),
    }
}

/// Extract the JSON issue list from the model's text output.
///
/// Models occasionally wrap JSON in markdown fences despite instructions;
/// tolerate that, but nothing looser.
fn parse_issues(text: &str) -> Result<Vec<RawIssue>, ProviderError> {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.strip_suffix("```").unwrap_or(s))
        .unwrap_or(trimmed)
        .trim();

    let parsed: IssueEnvelope = serde_json::from_str(trimmed)
        .map_err(|e| ProviderError::Invalid(format!("unparseable issue list: {}", e)))?;
    Ok(parsed.issues)
}

#[derive(Deserialize)]
struct IssueEnvelope {
    issues: Vec<RawIssue>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: usize,
    #[serde(default)]
    output_tokens: usize,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}
