//! OpenAI-compatible chat-completions client.
//!
//! Defaults to Groq. The API key is read from the environment variable named
//! in the config (`.env` is loaded at startup).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GenerationRequest, Generator, TransportError};

/// Chat backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

/// Response body of `/chat/completions`
#[derive(Debug, Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

/// Error body returned with non-2xx statuses
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Chat-completions client
pub struct ChatGenerator {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl ChatGenerator {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Create from config, reading the API key from the environment
    pub fn from_config(config: ChatConfig) -> Result<Self, TransportError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| TransportError::MissingApiKey {
                var: config.api_key_env.clone(),
            })?;
        Ok(Self::new(config.base_url, config.model, api_key))
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn body(&self, request: &GenerationRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "temperature": request.temperature,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
        })
    }
}

fn parse_completion(body: &str) -> Result<String, TransportError> {
    let completion: Completion =
        serde_json::from_str(body).map_err(|e| TransportError::Decode(e.to_string()))?;
    completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| TransportError::Decode("response has no message content".to_string()))
}

fn parse_error(status: u16, body: &str) -> TransportError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    TransportError::Api { status, message }
}

#[async_trait]
impl Generator for ChatGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&self.body(request))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(parse_error(status.as_u16(), &body));
        }
        parse_completion(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body() {
        let generator = ChatGenerator::new("https://example.test/v1/", "m", "k");
        let request = GenerationRequest::new("idea", "sys", "usr").with_temperature(0.75);
        let body = generator.body(&request);

        assert_eq!(generator.endpoint(), "https://example.test/v1/chat/completions");
        assert_eq!(body["model"], "m");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "usr");
        assert!((body["temperature"].as_f64().unwrap() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_parse_completion() {
        let body = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"idea: x"}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "idea: x");

        let empty = r#"{"choices":[]}"#;
        assert!(matches!(parse_completion(empty), Err(TransportError::Decode(_))));
        assert!(matches!(parse_completion("<html>"), Err(TransportError::Decode(_))));
    }

    #[test]
    fn test_parse_error() {
        let err = parse_error(429, r#"{"error":{"message":"Rate limit reached"}}"#);
        assert!(matches!(err, TransportError::Api { status: 429, ref message } if message == "Rate limit reached"));

        let raw = parse_error(502, "bad gateway\n");
        assert!(matches!(raw, TransportError::Api { status: 502, ref message } if message == "bad gateway"));
    }

    #[test]
    fn test_missing_api_key() {
        let config = ChatConfig {
            api_key_env: "ALPHAFORGE_TEST_UNSET_KEY".to_string(),
            ..ChatConfig::default()
        };
        let err = ChatGenerator::from_config(config).err().unwrap();
        assert!(matches!(err, TransportError::MissingApiKey { .. }));
    }
}
