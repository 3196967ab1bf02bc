//! OpenAI chat-completions client.
//!
//! Behind the `openai` feature; tests and the default build use mock clients
//! instead. The API key is stored via [`ApiCredential`] and only exposed at
//! the point the request header is set.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

use super::secrets::{ApiCredential, CredentialSource};
use super::{CompletionConfig, LlmClient, ProviderError};

/// Environment variable name for the OpenAI API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiClient {
    credential: ApiCredential,
    base_url: String,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            credential: ApiCredential::new(
                api_key,
                CredentialSource::Programmatic,
                "OpenAI API key",
            ),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Read the key from `OPENAI_API_KEY`. The value is never logged.
    pub fn from_env() -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_env(OPENAI_API_KEY_ENV, "OpenAI API key")?;
        Ok(Self {
            credential,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point at a compatible endpoint (Azure, local proxy).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn http(&self) -> Result<&reqwest::Client, ProviderError> {
        static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
        if let Some(client) = CLIENT.get() {
            return Ok(client);
        }
        let built = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(CLIENT.get_or_init(|| built))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        prompt: &str,
        config: &CompletionConfig,
    ) -> Result<String, ProviderError> {
        let client = self.http()?;

        let request = ChatRequest {
            model: config.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt.to_string(),
            }],
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        };

        // Credential exposed only here, at the point of use
        let response = client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.credential.expose())
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(config.timeout)
                } else {
                    ProviderError::Transport(e.to_string())
                }
            })?;

        let status = response.status();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let message = response
                .json::<ApiErrorBody>()
                .await
                .map(|b| b.error.message)
                .unwrap_or_else(|_| "unreadable error body".to_string());
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Parse("response contained no choices".to_string()))
    }

    fn name(&self) -> &str {
        "openai"
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_not_in_debug_output() {
        let secret_key = "sk-super-secret-key-12345";
        let client = OpenAiClient::new(secret_key);

        let debug_output = format!("{:?}", client);
        assert!(
            !debug_output.contains(secret_key),
            "API key was exposed in Debug output!"
        );
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_empty_key_fails_health_check() {
        assert!(!OpenAiClient::new("").health_check().await);
        assert!(OpenAiClient::new("sk-test").health_check().await);
    }

    #[test]
    fn test_custom_base_url() {
        let client = OpenAiClient::new("sk-test").with_base_url("https://proxy.local/v1");
        assert_eq!(client.base_url, "https://proxy.local/v1");
    }
}
