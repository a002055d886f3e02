use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{Operation, Role, RoleInput, RoleName, RoleOutput, prompts};
use crate::errors::RoleError;

/// How many trailing stderr characters to keep in a failure message.
const STDERR_TAIL: usize = 600;

/// A role backed by an external text-generation CLI.
///
/// The rendered prompt is written to the command's stdin and its stdout is
/// taken as the reply. The child is killed if the call is dropped, so a
/// pipeline timeout never leaves a stray process behind.
pub struct CommandRole {
    name: RoleName,
    command: String,
    args: Vec<String>,
    working_dir: PathBuf,
    transcript_dir: Option<PathBuf>,
}

impl CommandRole {
    pub fn new(name: RoleName, command: &str, args: &[String], working_dir: &Path) -> Self {
        Self {
            name,
            command: command.to_string(),
            args: args.to_vec(),
            working_dir: working_dir.to_path_buf(),
            transcript_dir: None,
        }
    }

    /// Write each prompt and reply to this directory.
    pub fn with_transcripts(mut self, dir: &Path) -> Self {
        self.transcript_dir = Some(dir.to_path_buf());
        self
    }

    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }

    fn failure(&self, operation: Operation, message: impl Into<String>) -> RoleError {
        RoleError::Failed {
            role: self.name.to_string(),
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    fn write_transcript(&self, operation: Operation, prompt: &str, reply: &str) {
        let Some(dir) = &self.transcript_dir else {
            return;
        };
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f");
        let path = dir.join(format!("{}-{}-{}.md", stamp, self.name, operation));
        let body = format!("# Prompt\n\n{}\n\n# Reply\n\n{}\n", prompt, reply);
        if let Err(e) = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, body)) {
            warn!(path = %path.display(), error = %e, "failed to write role transcript");
        }
    }
}

#[async_trait]
impl Role for CommandRole {
    fn name(&self) -> RoleName {
        self.name
    }

    async fn perform(
        &self,
        operation: Operation,
        input: &RoleInput,
    ) -> Result<RoleOutput, RoleError> {
        let prompt = prompts::render(operation, input);
        let start = Instant::now();

        debug!(
            role = %self.name,
            operation = %operation,
            command = %self.command_line(),
            prompt_chars = prompt.len(),
            "spawning role command"
        );

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(&self.working_dir)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                self.failure(
                    operation,
                    format!("failed to spawn '{}': {}", self.command, e),
                )
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.failure(operation, "child stdin unavailable"))?;
        let prompt_bytes = prompt.as_bytes();
        // Moving stdin in closes the pipe once the prompt is written.
        let feed = async move {
            stdin.write_all(prompt_bytes).await?;
            stdin.shutdown().await
        };
        // Feed stdin while draining stdout so a chatty child cannot fill the pipe.
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| self.failure(operation, format!("wait failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = {
                let chars: Vec<char> = stderr.trim().chars().collect();
                chars[chars.len().saturating_sub(STDERR_TAIL)..]
                    .iter()
                    .collect()
            };
            return Err(self.failure(
                operation,
                format!(
                    "exited with code {}: {}",
                    output.status.code().unwrap_or(-1),
                    tail
                ),
            ));
        }

        // A child may exit cleanly without reading all of stdin.
        if let Err(e) = fed
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(self.failure(operation, format!("failed to write prompt: {}", e)));
        }

        let reply = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if reply.is_empty() {
            return Err(self.failure(operation, "command produced no output"));
        }

        debug!(
            role = %self.name,
            operation = %operation,
            elapsed_ms = start.elapsed().as_millis() as u64,
            reply_chars = reply.len(),
            "role command finished"
        );
        self.write_transcript(operation, &prompt, &reply);

        Ok(RoleOutput::from([(
            operation.output_key().to_string(),
            serde_json::Value::String(reply),
        )]))
    }
}
