use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// Failure modes of a completion call. The reasoning loop records these in
/// the trace and retries within its turn budget instead of crashing the run.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("rate limited by model endpoint")]
    RateLimited,
    #[error("connection to model endpoint failed: {0}")]
    Connection(String),
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
}

/// Single synchronous completion call abstraction. Implemented by the HTTP
/// client in production and by scripted stubs in tests.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        system: Option<&str>,
    ) -> Result<String, LlmError>;
}

/// OpenAI-compatible chat-completions client.
pub struct HttpLlm {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpLlm {
    pub fn from_env() -> Result<Self> {
        let base_url =
            dotenv::var("LLM_BASE_URL").unwrap_or_else(|_| "http://localhost:1234/v1".to_string());
        let model = dotenv::var("LLM_MODEL").unwrap_or_else(|_| "qwen/qwen3-8b".to_string());
        let api_key = dotenv::var("LLM_API_KEY").ok().filter(|k| !k.is_empty());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_url, model, api_key })
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }
}

#[async_trait]
impl LanguageModel for HttpLlm {
    async fn complete(
        &self,
        messages: &[Message],
        system: Option<&str>,
    ) -> Result<String, LlmError> {
        let mut payload: Vec<Message> = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = system {
            payload.push(Message::system(system));
        }
        payload.extend_from_slice(messages);

        let body = serde_json::json!({
            "model": self.model,
            "messages": payload,
            "temperature": 0.3,
            "max_tokens": 2048,
        });

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        if resp.status().as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }

        let text = resp
            .text()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;
        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

        // Extract content from choices[0].message.content (reject null)
        let content = json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .ok_or_else(|| {
                LlmError::MalformedResponse("response carried no message content".to_string())
            })?;

        Ok(content.to_string())
    }
}
