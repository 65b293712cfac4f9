//! OpenAI-compatible chat client for the generation backend, with retry and
//! exponential backoff on rate limits.

use crate::config::Config;
use crate::util::truncate;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://foundation-models.api.cloud.ru/v1";
const DEFAULT_MODEL: &str = "Qwen/Qwen3-Next-80B-A3B-Instruct";
const REQUEST_TIMEOUT_SECS: u64 = 90;

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;
const BACKOFF_MULTIPLIER: u64 = 2;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    presence_penalty: f32,
    frequency_penalty: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: Option<String>,
}

pub struct ModelClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl ModelClient {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let api_key = config.model_api_key().ok_or_else(|| {
            anyhow::anyhow!(
                "No API key configured. Set TESTFORGE_API_KEY or run `testforge config --api-key <KEY>` (stored at {}).",
                Config::config_location()
            )
        })?;

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            base_url: config
                .model_base_url()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: config.model_name().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key,
        })
    }

    /// Call the chat completions endpoint. Retries on rate limits; falls back
    /// to the default model once when a non-default model is rejected.
    pub async fn complete(
        &self,
        messages: &[Message],
        temperature: f32,
        max_tokens: u32,
    ) -> anyhow::Result<String> {
        match self
            .complete_with_model(&self.model, messages, temperature, max_tokens)
            .await
        {
            Ok(content) => Ok(content),
            Err(err) if self.model != DEFAULT_MODEL && err.to_string().contains("model") => {
                tracing::warn!(model = %self.model, "model rejected, falling back to default");
                self.complete_with_model(DEFAULT_MODEL, messages, temperature, max_tokens)
                    .await
            }
            Err(err) => Err(err),
        }
    }

    async fn complete_with_model(
        &self,
        model: &str,
        messages: &[Message],
        temperature: f32,
        max_tokens: u32,
    ) -> anyhow::Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model,
            messages,
            temperature,
            max_tokens,
            top_p: 0.95,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            stream: false,
        };

        let mut retry_count = 0;

        loop {
            let response = self
                .http
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            let text = response.text().await?;

            if status.is_success() {
                let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                    anyhow::anyhow!("Failed to parse model response: {}\n{}", e, truncate(&text, 400))
                })?;

                let content = parsed
                    .choices
                    .first()
                    .and_then(|c| c.message.content.clone())
                    .unwrap_or_default();

                if content.trim().is_empty() {
                    anyhow::bail!("model returned an empty completion");
                }
                return Ok(content.trim().to_string());
            }

            if status.as_u16() == 429 && retry_count < MAX_RETRIES {
                retry_count += 1;
                let retry_after = parse_retry_after(&text).unwrap_or_else(|| {
                    (INITIAL_BACKOFF_MS * BACKOFF_MULTIPLIER.pow(retry_count - 1)) / 1000
                });
                tracing::warn!(retry_after, retry_count, "rate limited, retrying");
                tokio::time::sleep(tokio::time::Duration::from_secs(retry_after)).await;
                continue;
            }

            let error_msg = match status.as_u16() {
                401 => "Invalid API key for the model endpoint.".to_string(),
                429 => format!(
                    "Rate limited after {} retries. Try again in a few minutes.",
                    retry_count
                ),
                500..=599 => format!(
                    "Model endpoint server error ({}). The service may be temporarily unavailable.",
                    status
                ),
                _ => format!("API error {}: {}", status, truncate(&text, 200)),
            };
            anyhow::bail!("{}", error_msg);
        }
    }
}

/// Extract a retry-after hint from a rate-limit response body, if present.
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    for word in text_lower[pos..].split_whitespace().skip(1).take(5) {
        if let Ok(secs) = word.trim_matches(|c: char| !c.is_numeric()).parse::<u64>() {
            if secs > 0 && secs < 300 {
                return Some(secs);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("please retry after 30 seconds"), Some(30));
        assert_eq!(parse_retry_after("retry in 5s"), Some(5));
        assert_eq!(parse_retry_after("rate limit exceeded"), None);
        assert_eq!(parse_retry_after("retry after 9000 seconds"), None);
    }

    #[test]
    fn test_chat_request_serialization() {
        let messages = vec![Message::user("hello")];
        let request = ChatRequest {
            model: "test/model",
            messages: &messages,
            temperature: 0.0,
            max_tokens: 100,
            top_p: 0.95,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            stream: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "test/model");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["stream"], false);
    }
}
