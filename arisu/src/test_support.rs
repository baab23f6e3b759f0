//! Test-only doubles for the backend, confirmation prompts and the terminal.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::io::{self, Write};
use std::rc::Rc;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{Message, Role};
use crate::io::backend::Backend;
use crate::io::config::ShellConfig;
use crate::io::confirm::Confirm;

/// Backend that returns queued replies in order and records what was sent.
///
/// History starts empty (no system prompt). Sending with an empty queue is an
/// error, which makes it easy to simulate a failing backend.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: VecDeque<String>,
    sent: Vec<String>,
    history: Vec<Message>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: replies.into(),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> &[String] {
        &self.sent
    }
}

impl Backend for ScriptedBackend {
    fn send_message(&mut self, input: &str) -> Result<String> {
        self.sent.push(input.to_string());
        let reply = self
            .replies
            .pop_front()
            .ok_or_else(|| anyhow!("scripted backend exhausted"))?;
        self.history.push(Message::new(Role::User, input));
        self.history.push(Message::new(Role::Assistant, reply.clone()));
        Ok(reply)
    }

    fn append_history(&mut self, role: Role, content: &str) {
        self.history.push(Message::new(role, content));
    }

    fn history(&self) -> &[Message] {
        &self.history
    }
}

/// Confirmation double answering from a queue; answers `false` once empty.
#[derive(Debug, Default)]
pub struct ScriptedConfirm {
    answers: VecDeque<bool>,
    prompts: Vec<String>,
}

impl ScriptedConfirm {
    pub fn new(answers: Vec<bool>) -> Self {
        Self {
            answers: answers.into(),
            prompts: Vec::new(),
        }
    }

    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }
}

impl Confirm for ScriptedConfirm {
    fn confirm(&mut self, prompt: &str) -> bool {
        self.prompts.push(prompt.to_string());
        self.answers.pop_front().unwrap_or(false)
    }
}

/// Cloneable in-memory writer, for inspecting output after it was boxed away.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// `sh`-based shell settings with short limits.
pub fn test_shell() -> ShellConfig {
    ShellConfig {
        program: "sh".to_string(),
        timeout_secs: 10,
        output_limit_bytes: 10_000,
    }
}

/// Temp directory pre-populated with `files` (relative name, contents).
pub fn workspace_with(files: &[(&str, &str)]) -> Result<TempDir> {
    let dir = tempfile::tempdir().context("create temp workspace")?;
    for (name, contents) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    }
    Ok(dir)
}
