//! Shared types passed between the scanner, the action model and the loops.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Author of a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Auto-approval policy for actions with side effects.
///
/// When a flag is `false`, the matching actions ask for interactive
/// confirmation before touching anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatingConfig {
    /// Apply `EDIT` and `PATCH` directives without asking.
    pub auto_edit: bool,
    /// Run `RUN` directives without asking.
    pub auto_run: bool,
}

impl GatingConfig {
    /// Approve everything. Used by tests and unattended runs.
    pub fn permissive() -> Self {
        Self {
            auto_edit: true,
            auto_run: true,
        }
    }
}
