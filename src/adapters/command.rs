//! Subprocess generator.
//!
//! Spawns a configured program, pipes the rendered request to stdin and
//! returns stdout. Arguments may contain `{stage}` and `{temperature}`
//! placeholders, e.g. `fabric -p {stage}`.

use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{GenerationRequest, Generator, TransportError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Generator backed by a CLI process
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: CommandConfig) -> Self {
        Self::new(config.program, config.args)
    }

    fn expand_args(&self, request: &GenerationRequest) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{stage}", &request.stage)
                    .replace("{temperature}", &request.temperature.to_string())
            })
            .collect()
    }
}

#[async_trait]
impl Generator for CommandGenerator {
    fn name(&self) -> &str {
        &self.program
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError> {
        let spawn_error = |source: std::io::Error| TransportError::Spawn {
            program: self.program.clone(),
            source,
        };

        let mut child = Command::new(&self.program)
            .args(self.expand_args(request))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        // A process that exits early closes its stdin; report the exit status then
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(request.render().as_bytes()).await,
            None => Ok(()),
        };

        let output = child.wait_with_output().await.map_err(spawn_error)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransportError::Exit {
                program: self.program.clone(),
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }
        written.map_err(spawn_error)?;

        String::from_utf8(output.stdout)
            .map_err(|e| TransportError::Decode(format!("output is not valid UTF-8: {}", e)))
    }
}
