//! Backend abstraction for the language model collaborator.
//!
//! The [`Backend`] trait is the only thing the driver and the agent runner
//! know about the model: send a message, get the full reply text back, and
//! append to the history the backend owns. [`CommandBackend`] talks to any
//! executable that reads a chat request on stdin and streams the reply on
//! stdout. Tests use scripted backends that return queued replies.

use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{Message, Role};
use crate::io::config::BackendConfig;
use crate::io::process::run_command_tee;

/// Conversation backend.
pub trait Backend {
    /// Send `input` as the next user message and return the complete reply.
    fn send_message(&mut self, input: &str) -> Result<String>;

    /// Append an entry to the history without sending anything.
    fn append_history(&mut self, role: Role, content: &str);

    /// History in send order, system prompt first.
    fn history(&self) -> &[Message];
}

/// Request document written to the backend command's stdin.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
}

/// Backend that spawns `backend.command` once per message.
pub struct CommandBackend {
    model: String,
    config: BackendConfig,
    workdir: PathBuf,
    history: Vec<Message>,
    mirror: Option<Box<dyn Write>>,
}

impl CommandBackend {
    pub fn new(
        model: impl Into<String>,
        config: BackendConfig,
        workdir: impl Into<PathBuf>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            config,
            workdir: workdir.into(),
            history: vec![Message::new(Role::System, system_prompt)],
            mirror: None,
        }
    }

    /// Stream replies to `mirror` while they arrive.
    pub fn with_mirror(mut self, mirror: Box<dyn Write>) -> Self {
        self.mirror = Some(mirror);
        self
    }
}

impl Backend for CommandBackend {
    #[instrument(skip_all, fields(model = %self.model, history_len = self.history.len()))]
    fn send_message(&mut self, input: &str) -> Result<String> {
        let mut messages = self.history.clone();
        messages.push(Message::new(Role::User, input));
        let request = serde_json::to_vec(&ChatRequest {
            model: &self.model,
            messages: &messages,
        })
        .context("serialize chat request")?;

        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("backend.command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("ARISU_MODEL", &self.model);

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let mirror = self.mirror.as_mut().map(|m| m.as_mut() as &mut dyn Write);
        let output = run_command_tee(
            cmd,
            Some(&request),
            timeout,
            self.config.output_limit_bytes,
            mirror,
        )
        .with_context(|| format!("run backend command {program}"))?;

        if output.timed_out {
            warn!(timeout_secs = self.config.timeout_secs, "backend timed out");
            return Err(anyhow!(
                "backend command timed out after {}s",
                self.config.timeout_secs
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "backend command failed");
            return Err(anyhow!(
                "backend command failed with {}: {}",
                output.status,
                output.combined_lossy().trim()
            ));
        }
        if output.stdout_truncated > 0 {
            warn!(truncated = output.stdout_truncated, "backend reply truncated");
            return Err(anyhow!(
                "backend reply exceeded {} bytes ({} bytes dropped)",
                self.config.output_limit_bytes,
                output.stdout_truncated
            ));
        }

        let mut reply =
            String::from_utf8(output.stdout).context("decode backend reply as UTF-8")?;
        if reply.trim().is_empty() {
            return Err(anyhow!("backend returned an empty reply"));
        }
        if !reply.ends_with('\n') {
            reply.push('\n');
            if let Some(mirror) = self.mirror.as_mut() {
                if let Err(e) = mirror.write_all(b"\n").and_then(|()| mirror.flush()) {
                    warn!(err = %e, "failed to mirror backend reply");
                }
            }
        }

        info!(reply_bytes = reply.len(), "backend replied");
        self.history.push(Message::new(Role::User, input));
        self.history.push(Message::new(Role::Assistant, reply.clone()));
        Ok(reply)
    }

    fn append_history(&mut self, role: Role, content: &str) {
        debug!(%role, bytes = content.len(), "append history");
        self.history.push(Message::new(role, content));
    }

    fn history(&self) -> &[Message] {
        &self.history
    }
}
