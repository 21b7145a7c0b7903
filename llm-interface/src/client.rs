use agent_core::{CoreError, LlmError};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};

pub const PROVIDER: &str = "openrouter";

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Minimal OpenAI-compatible chat completions client for OpenRouter.
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenRouterClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, CoreError> {
        if api_key.trim().is_empty() {
            return Err(LlmError::InvalidApiKey {
                provider: PROVIDER.to_string(),
            }
            .into());
        }

        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one chat completion and return the assistant's text.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, CoreError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature,
        };

        debug!("Requesting completion from {} ({})", PROVIDER, self.model);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "Moltbook Agent")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Completion request failed: {}", e);
                if e.is_timeout() {
                    CoreError::Llm(LlmError::RequestTimeout {
                        provider: PROVIDER.to_string(),
                    })
                } else {
                    CoreError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok());
            error!("Completion request returned {}", status);
            return Err(map_status(status, &self.model, retry_after).into());
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            error!("Malformed completion response: {}", e);
            LlmError::InvalidResponseFormat {
                provider: PROVIDER.to_string(),
            }
        })?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponseFormat {
                provider: PROVIDER.to_string(),
            })?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            warn!("Completion was filtered by the provider");
            return Err(LlmError::ContentFiltered {
                reason: "content_filter".to_string(),
            }
            .into());
        }

        match choice.message.content {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => Err(LlmError::InvalidResponseFormat {
                provider: PROVIDER.to_string(),
            }
            .into()),
        }
    }
}

fn map_status(status: StatusCode, model: &str, retry_after: Option<u64>) -> LlmError {
    let provider = PROVIDER.to_string();
    match status.as_u16() {
        401 => LlmError::AuthenticationFailed { provider },
        402 => LlmError::InsufficientCredits { provider },
        403 => LlmError::InvalidApiKey { provider },
        404 => LlmError::ModelNotAvailable {
            model: model.to_string(),
        },
        429 => LlmError::RateLimitExceeded {
            provider,
            retry_after: retry_after.unwrap_or(60),
        },
        408 => LlmError::RequestTimeout { provider },
        _ if status.is_server_error() => LlmError::ServiceUnavailable { provider },
        _ => LlmError::InvalidResponseFormat { provider },
    }
}
