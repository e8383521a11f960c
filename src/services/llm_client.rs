use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// LLM client errors, shaped so the agent framework can classify them
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// No API key configured; enrichment and synthesis degrade
    #[error("LLM API key not configured")]
    MissingApiKey,

    /// 401/403 from the provider
    #[error("LLM authentication failed")]
    Auth,

    /// 429 from the provider
    #[error("LLM rate limited")]
    RateLimited,

    /// Network failure or 5xx
    #[error("LLM transport error: {0}")]
    Transport(String),

    /// Response was not the JSON we asked for
    #[error("LLM returned an invalid response: {0}")]
    InvalidResponse(String),

    /// Request exceeded the caller's deadline
    #[error("LLM request timed out")]
    Timeout,
}

/// Chat-completion client that always requests a JSON-object response.
///
/// The provider contract is OpenAI-style: `POST {base}/chat/completions` with
/// `response_format: {"type": "json_object"}`, answer in
/// `choices[0].message.content`.
#[derive(Debug, Clone)]
pub struct LlmClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

impl LlmClient {
    /// Build a client from an API key; returns None when the key is absent so
    /// callers can degrade up front
    pub fn from_api_key(api_key: Option<String>) -> Option<Self> {
        let api_key = api_key.filter(|k| !k.trim().is_empty())?;
        Some(Self::new(api_key, DEFAULT_BASE_URL.to_string(), DEFAULT_MODEL.to_string()))
    }

    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: Client::builder()
                .user_agent(format!("depsentry/{}", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
            base_url,
            api_key,
            model,
        }
    }

    /// Send a system+user prompt and parse the reply as a JSON object
    pub async fn chat_json(
        &self,
        system: &str,
        user: &str,
        timeout: Duration,
    ) -> Result<serde_json::Value, LlmError> {
        let request = ChatRequest {
            model: &self.model,
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
            response_format: ResponseFormat {
                format_type: "json_object",
            },
            temperature: 0.2,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let send = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send();

        let response = match tokio::time::timeout(timeout, send).await {
            Err(_) => return Err(LlmError::Timeout),
            Ok(Err(err)) => return Err(LlmError::Transport(err.to_string())),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(LlmError::Auth);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            return Err(LlmError::Transport(format!("status {}", status)));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| LlmError::InvalidResponse("missing message content".to_string()))?;

        debug!("LLM returned {} bytes of content", content.len());
        serde_json::from_str(content)
            .map_err(|e| LlmError::InvalidResponse(format!("content is not JSON: {}", e)))
    }
}
