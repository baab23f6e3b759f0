//! Plain-text conversation and agent logs under the config `log/` directory.
//!
//! These are product artifacts, written regardless of `RUST_LOG`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;

use crate::core::types::{Message, Role};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FILE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Log file locations for one process run.
#[derive(Debug, Clone)]
pub struct TranscriptPaths {
    pub conversation_log: PathBuf,
    pub agent_log: PathBuf,
}

impl TranscriptPaths {
    /// Timestamped files under `log_dir`, e.g. `conversation_20250101_120000.log`.
    pub fn new(log_dir: &Path) -> Self {
        let stamp = Local::now().format(FILE_STAMP_FORMAT).to_string();
        Self {
            conversation_log: log_dir.join(format!("conversation_{stamp}.log")),
            agent_log: log_dir.join(format!("agent_{stamp}.log")),
        }
    }
}

/// Append `messages` as `[timestamp] role: content` entries.
pub fn append_messages(path: &Path, messages: &[Message]) -> Result<()> {
    if messages.is_empty() {
        return Ok(());
    }
    let mut buf = String::new();
    let now = Local::now().format(TIMESTAMP_FORMAT).to_string();
    for message in messages {
        buf.push_str(&format!("[{now}] {}: {}\n", message.role, message.content));
    }
    append_text(path, &buf)
}

/// Append a single entry with an arbitrary label instead of a role.
pub fn append_entry(path: &Path, label: &str, content: &str) -> Result<()> {
    let now = Local::now().format(TIMESTAMP_FORMAT).to_string();
    append_text(path, &format!("[{now}] {label}: {content}\n"))
}

/// Tracks which history entries already reached the conversation log.
#[derive(Debug, Clone)]
pub struct ConversationLog {
    path: PathBuf,
    logged: usize,
}

impl ConversationLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path, logged: 0 }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append history entries added since the last call. System messages are skipped.
    pub fn sync(&mut self, history: &[Message]) -> Result<()> {
        let start = self.logged.min(history.len());
        let fresh: Vec<Message> = history[start..]
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect();
        append_messages(&self.path, &fresh)?;
        self.logged = history.len();
        Ok(())
    }
}

fn append_text(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("append {}", path.display()))
}
