//! Response handling and the automatic tool-call loop.
//!
//! [`handle`] executes every directive in one reply. Results of immediate
//! (`[TOOL_CALL]`) directives are collected as feedback for the backend;
//! everything else lands in the history as `user` entries and is seen on the
//! next human turn. [`run_tool_loop`] keeps sending feedback back until a
//! reply carries no immediate directive.

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::directive::extract;
use crate::core::types::{GatingConfig, Role};
use crate::io::actions::{ExecEnv, execute};
use crate::io::backend::Backend;

/// What a single reply produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feedback {
    /// Newline-joined results of immediate directives.
    pub text: String,
    /// At least one immediate directive ran.
    pub immediate: bool,
    /// Number of directives executed.
    pub executed: usize,
    /// Number of directives whose action failed.
    pub failed: usize,
}

/// Extract and execute every directive in `reply`, in reply order.
#[instrument(skip_all, fields(reply_bytes = reply.len()))]
pub fn handle<B: Backend + ?Sized>(
    reply: &str,
    backend: &mut B,
    gating: GatingConfig,
    env: &mut ExecEnv<'_>,
) -> Feedback {
    let directives = extract(reply);
    debug!(count = directives.len(), "directives extracted");

    let mut immediate_results = Vec::new();
    let mut feedback = Feedback::default();
    for directive in &directives {
        let result = execute(&directive.action, gating, env);
        feedback.executed += 1;
        if !result.is_ok() {
            feedback.failed += 1;
        }
        if directive.immediate {
            immediate_results.push(result.text);
        } else {
            backend.append_history(Role::User, &result.text);
        }
    }

    feedback.immediate = !immediate_results.is_empty();
    feedback.text = immediate_results.join("\n");
    feedback
}

/// Reason why `run_tool_loop` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolLoopStop {
    /// The last reply had no immediate directive.
    Settled,
    /// The configured round limit was reached with feedback still pending.
    RoundLimit { max_rounds: u32 },
}

/// Summary of a tool loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolLoopOutcome {
    /// Feedback messages sent back to the backend.
    pub rounds: u32,
    pub stop: ToolLoopStop,
    /// The last reply handled.
    pub last_reply: String,
}

/// Handle `reply`, then keep sending immediate feedback back until a reply
/// settles. `on_handled` runs after every `handle`, before the next send.
///
/// `max_rounds` of `None` means no limit. When the limit is hit, the unsent
/// feedback is appended to the history instead. A send failure stops the loop
/// and is returned as the error.
#[instrument(skip_all, fields(max_rounds = ?max_rounds))]
pub fn run_tool_loop<B, F>(
    backend: &mut B,
    reply: String,
    gating: GatingConfig,
    env: &mut ExecEnv<'_>,
    max_rounds: Option<u32>,
    mut on_handled: F,
) -> Result<ToolLoopOutcome>
where
    B: Backend + ?Sized,
    F: FnMut(&B, &Feedback),
{
    let mut reply = reply;
    let mut rounds = 0u32;
    loop {
        let feedback = handle(&reply, backend, gating, env);
        on_handled(&*backend, &feedback);

        if !feedback.immediate {
            return Ok(ToolLoopOutcome {
                rounds,
                stop: ToolLoopStop::Settled,
                last_reply: reply,
            });
        }
        if let Some(limit) = max_rounds {
            if rounds >= limit {
                info!(rounds, "tool loop round limit reached");
                // These actions already ran; keep their results for the next turn.
                backend.append_history(Role::User, &feedback.text);
                return Ok(ToolLoopOutcome {
                    rounds,
                    stop: ToolLoopStop::RoundLimit { max_rounds: limit },
                    last_reply: reply,
                });
            }
        }

        rounds += 1;
        debug!(round = rounds, bytes = feedback.text.len(), "sending tool feedback");
        reply = backend
            .send_message(&feedback.text)
            .context("send tool output")?;
    }
}
