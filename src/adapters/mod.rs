//! Generator interfaces for external text-generation services.
//!
//! Stages only see the narrow [`Generator`] trait. Two backends ship with
//! the crate: a subprocess backend for any CLI that reads a prompt on stdin
//! (e.g. `fabric`) and an OpenAI-compatible chat-completions client.

pub mod chat;
pub mod command;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use chat::{ChatConfig, ChatGenerator};
pub use command::{CommandConfig, CommandGenerator};

/// One request to the generative service
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Stage issuing the request (for logs and argument templates)
    pub stage: String,

    /// Instructions
    pub system: String,

    /// Task content
    pub user: String,

    pub temperature: f32,
}

impl GenerationRequest {
    pub fn new(stage: impl Into<String>, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            system: system.into(),
            user: user.into(),
            temperature: 0.2,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Single-text rendering for backends without message roles
    pub fn render(&self) -> String {
        format!("{}\n\n{}", self.system.trim_end(), self.user)
    }
}

/// Failures talking to the generative service. Never retried.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' failed with exit code {code}: {stderr}")]
    Exit {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("API key not set (expected env var {var})")]
    MissingApiKey { var: String },
}

/// Text generation backend
#[async_trait]
pub trait Generator: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError>;
}

/// Backend selection (the `generator:` config section)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum GeneratorConfig {
    Command(CommandConfig),
    Chat(ChatConfig),
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self::Chat(ChatConfig::default())
    }
}

/// Build the configured backend
pub fn build_generator(config: &GeneratorConfig) -> Result<Arc<dyn Generator>, TransportError> {
    Ok(match config {
        GeneratorConfig::Command(cfg) => Arc::new(CommandGenerator::from_config(cfg.clone())),
        GeneratorConfig::Chat(cfg) => Arc::new(ChatGenerator::from_config(cfg.clone())?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_render() {
        let request = GenerationRequest::new("code", "Be terse.\n", "Implement x.").with_temperature(0.35);
        assert_eq!(request.render(), "Be terse.\n\nImplement x.");
        assert_eq!(request.temperature, 0.35);
    }

    #[test]
    fn test_generator_config_from_yaml() {
        let yaml = "backend: command\nprogram: fabric\nargs: [\"-p\", \"{stage}\"]\n";
        let config: GeneratorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config,
            GeneratorConfig::Command(CommandConfig {
                program: "fabric".to_string(),
                args: vec!["-p".to_string(), "{stage}".to_string()],
            })
        );

        let chat: GeneratorConfig = serde_yaml::from_str("backend: chat\nmodel: llama-3.1-8b-instant\n").unwrap();
        let GeneratorConfig::Chat(chat) = chat else {
            panic!("expected chat backend");
        };
        assert_eq!(chat.model, "llama-3.1-8b-instant");
        assert_eq!(chat.api_key_env, "GROQ_API_KEY");
    }
}
