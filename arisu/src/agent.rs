//! Step-file agent runner.
//!
//! When the sentinel file exists after a turn, its `Steps:` section is run
//! one instruction at a time: send the step, handle the reply, send
//! `Proceed.`, handle that reply. The run ends at `<END>`, after the last
//! step, or at the step cap, and the sentinel file is removed in every case
//! (including errors) so a broken automation is never relaunched.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{GatingConfig, Role};
use crate::driver::{Feedback, handle};
use crate::io::actions::ExecEnv;
use crate::io::backend::Backend;
use crate::io::transcript::append_entry;

/// File whose presence after a turn triggers the runner.
pub const SENTINEL_FILE: &str = "AGENTSTEPS.arisu";
/// Marker introducing the step list.
pub const STEPS_MARKER: &str = "Steps:";
/// Marker a reply uses to finish the run.
pub const END_MARKER: &str = "<END>";
/// Message sent automatically after every step.
pub const PROCEED_MESSAGE: &str = "Proceed.";
/// Hard cap on executed steps.
pub const MAX_STEPS: usize = 10;

/// Reason why `run_agent` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentStop {
    /// Every step ran without an end marker.
    Completed,
    /// A reply to step `step` (1-indexed) contained [`END_MARKER`].
    EndMarker { step: usize },
    /// More than [`MAX_STEPS`] steps were declared; the rest were dropped.
    StepCap { declared: usize },
}

/// Summary of an agent run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutcome {
    pub steps_executed: usize,
    pub stop: AgentStop,
}

/// Where the runner reads its steps and writes its transcript.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub sentinel_path: PathBuf,
    pub log_path: PathBuf,
}

impl AgentRequest {
    /// Sentinel in `workdir`, transcript at `log_path`.
    pub fn new(workdir: &Path, log_path: PathBuf) -> Self {
        Self {
            sentinel_path: workdir.join(SENTINEL_FILE),
            log_path,
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.sentinel_path.is_file()
    }
}

/// Parse the step list: every non-blank line after the first `Steps:` marker.
pub fn parse_steps(text: &str) -> Result<Vec<String>> {
    let (_, rest) = text
        .split_once(STEPS_MARKER)
        .ok_or_else(|| anyhow!("missing '{STEPS_MARKER}' section"))?;
    let steps: Vec<String> = rest
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if steps.is_empty() {
        return Err(anyhow!("no steps after '{STEPS_MARKER}'"));
    }
    Ok(steps)
}

/// Run the step file at `request.sentinel_path`, then delete it.
#[instrument(skip_all, fields(sentinel = %request.sentinel_path.display()))]
pub fn run_agent<B: Backend + ?Sized>(
    request: &AgentRequest,
    backend: &mut B,
    gating: GatingConfig,
    env: &mut ExecEnv<'_>,
) -> Result<AgentOutcome> {
    let outcome = run_steps(request, backend, gating, env);
    if let Err(err) = remove_sentinel(&request.sentinel_path) {
        warn!(err = %format!("{err:#}"), "failed to remove sentinel file");
        if outcome.is_ok() {
            return Err(err);
        }
    }
    match &outcome {
        Ok(done) => info!(steps = done.steps_executed, stop = ?done.stop, "agent run finished"),
        Err(err) => warn!(err = %format!("{err:#}"), "agent run aborted"),
    }
    outcome
}

fn run_steps<B: Backend + ?Sized>(
    request: &AgentRequest,
    backend: &mut B,
    gating: GatingConfig,
    env: &mut ExecEnv<'_>,
) -> Result<AgentOutcome> {
    let path = &request.sentinel_path;
    let contents =
        fs::read_to_string(path).with_context(|| format!("read step file {}", path.display()))?;
    let steps =
        parse_steps(&contents).with_context(|| format!("parse step file {}", path.display()))?;
    info!(declared = steps.len(), "agent run starting");

    for (idx, step) in steps.iter().enumerate() {
        let number = idx + 1;
        if number > MAX_STEPS {
            warn!(declared = steps.len(), "step cap reached");
            log_entry(request, "agent", "step limit reached, aborting");
            return Ok(AgentOutcome {
                steps_executed: MAX_STEPS,
                stop: AgentStop::StepCap {
                    declared: steps.len(),
                },
            });
        }

        debug!(step = number, "sending step");
        if exchange(request, backend, gating, env, &format!("step {number}"), step)? {
            return Ok(AgentOutcome {
                steps_executed: number,
                stop: AgentStop::EndMarker { step: number },
            });
        }
        if exchange(request, backend, gating, env, "proceed", PROCEED_MESSAGE)? {
            return Ok(AgentOutcome {
                steps_executed: number,
                stop: AgentStop::EndMarker { step: number },
            });
        }
    }

    Ok(AgentOutcome {
        steps_executed: steps.len(),
        stop: AgentStop::Completed,
    })
}

/// Send one message, handle the reply once, log both. Returns `true` on `<END>`.
fn exchange<B: Backend + ?Sized>(
    request: &AgentRequest,
    backend: &mut B,
    gating: GatingConfig,
    env: &mut ExecEnv<'_>,
    label: &str,
    message: &str,
) -> Result<bool> {
    let reply = backend
        .send_message(message)
        .with_context(|| format!("send {label}"))?;
    let feedback = handle(&reply, backend, gating, env);
    keep_immediate_feedback(backend, &feedback);

    log_entry(request, label, message);
    log_entry(request, "reply", reply.trim_end());
    Ok(reply.contains(END_MARKER))
}

/// Transcript failures are reported but never stop the run.
fn log_entry(request: &AgentRequest, label: &str, content: &str) {
    if let Err(err) = append_entry(&request.log_path, label, content) {
        warn!(err = %format!("{err:#}"), "failed to append agent log");
    }
}

/// The runner never loops on tool calls; immediate results are kept in the
/// history so the next message still carries them.
fn keep_immediate_feedback<B: Backend + ?Sized>(backend: &mut B, feedback: &Feedback) {
    if feedback.immediate {
        backend.append_history(Role::User, &feedback.text);
    }
}

fn remove_sentinel(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
    }
}

/// Delete the sentinel file if present. Used when an enclosing loop fails.
pub fn discard_sentinel(workdir: &Path) -> Result<()> {
    remove_sentinel(&workdir.join(SENTINEL_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedBackend, ScriptedConfirm, test_shell};

    #[test]
    fn parses_steps_after_marker() {
        let text = "Instructions:\nBe brief.\nSteps:\n- Say hello\n\n   \n- Say bye\n";
        assert_eq!(parse_steps(text).expect("steps"), ["- Say hello", "- Say bye"]);
    }

    #[test]
    fn text_on_marker_line_is_a_step() {
        assert_eq!(
            parse_steps("Steps:- only one").expect("steps"),
            ["- only one"]
        );
    }

    #[test]
    fn missing_marker_is_malformed() {
        let err = parse_steps("Instructions only\n- a\n").unwrap_err();
        assert!(err.to_string().contains("Steps:"));
    }

    #[test]
    fn empty_step_list_is_malformed() {
        assert!(parse_steps("Steps:\n\n  \n").is_err());
    }

    #[test]
    fn request_points_into_workdir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let request = AgentRequest::new(temp.path(), temp.path().join("agent.log"));
        assert!(request.sentinel_path.ends_with(SENTINEL_FILE));
        assert!(!request.is_triggered());
        fs::write(&request.sentinel_path, "Steps:\n- a\n").expect("write");
        assert!(request.is_triggered());
        discard_sentinel(temp.path()).expect("discard");
        assert!(!request.is_triggered());
        discard_sentinel(temp.path()).expect("discard missing");
    }

    struct Run {
        temp: tempfile::TempDir,
        request: AgentRequest,
    }

    fn with_steps(contents: &str) -> Run {
        let temp = tempfile::tempdir().expect("tempdir");
        let request = AgentRequest::new(temp.path(), temp.path().join("log").join("agent.log"));
        fs::write(&request.sentinel_path, contents).expect("write sentinel");
        Run { temp, request }
    }

    fn run(run: &Run, backend: &mut ScriptedBackend) -> Result<AgentOutcome> {
        let shell = test_shell();
        let mut confirm = ScriptedConfirm::new(Vec::new());
        let mut terminal = Vec::new();
        let mut env = ExecEnv {
            workdir: run.temp.path(),
            shell: &shell,
            confirm: &mut confirm,
            terminal: &mut terminal,
        };
        run_agent(&run.request, backend, GatingConfig::permissive(), &mut env)
    }

    #[test]
    fn eleven_steps_stop_after_ten() {
        let steps: Vec<String> = (1..=11).map(|n| format!("- step {n}")).collect();
        let run_state = with_steps(&format!("Steps:\n{}\n", steps.join("\n")));
        let mut backend = ScriptedBackend::new(vec!["ok".to_string(); 40]);

        let outcome = run(&run_state, &mut backend).expect("agent");

        assert_eq!(outcome.steps_executed, MAX_STEPS);
        assert_eq!(outcome.stop, AgentStop::StepCap { declared: 11 });
        assert_eq!(backend.sent().len(), 2 * MAX_STEPS);
        assert_eq!(backend.sent()[0], "- step 1");
        assert_eq!(backend.sent()[1], PROCEED_MESSAGE);
        assert_eq!(backend.sent()[18], "- step 10");
        assert!(!run_state.request.sentinel_path.exists());
        let log = fs::read_to_string(&run_state.request.log_path).expect("log");
        assert!(log.contains("step limit reached"));
    }

    #[test]
    fn end_marker_in_step_reply_stops_early() {
        let run_state = with_steps("Steps:\n- one\n- two\n- three\n");
        let mut backend = ScriptedBackend::new(vec![
            "done with one".to_string(),
            "ok".to_string(),
            "all finished <END>".to_string(),
        ]);

        let outcome = run(&run_state, &mut backend).expect("agent");

        assert_eq!(outcome.stop, AgentStop::EndMarker { step: 2 });
        assert_eq!(outcome.steps_executed, 2);
        assert_eq!(backend.sent(), ["- one", PROCEED_MESSAGE, "- two"]);
        assert!(!run_state.request.sentinel_path.exists());
    }

    #[test]
    fn end_marker_in_proceed_reply_stops_early() {
        let run_state = with_steps("Steps:\n- one\n- two\n");
        let mut backend =
            ScriptedBackend::new(vec!["working".to_string(), "<END>".to_string()]);

        let outcome = run(&run_state, &mut backend).expect("agent");

        assert_eq!(outcome.stop, AgentStop::EndMarker { step: 1 });
        assert_eq!(backend.sent().len(), 2);
    }

    #[test]
    fn all_steps_complete() {
        let run_state = with_steps("Do things.\nSteps:\n- one\n- two\n");
        let mut backend = ScriptedBackend::new(vec!["ok".to_string(); 4]);

        let outcome = run(&run_state, &mut backend).expect("agent");

        assert_eq!(outcome.stop, AgentStop::Completed);
        assert_eq!(outcome.steps_executed, 2);
        let log = fs::read_to_string(&run_state.request.log_path).expect("log");
        assert!(log.contains("] step 1: - one\n"));
        assert!(log.contains("] proceed: Proceed.\n"));
        assert!(log.contains("] reply: ok\n"));
    }

    #[test]
    fn step_directives_execute_and_immediate_results_stay_in_history() {
        let run_state = with_steps("Steps:\n- write it\n");
        let mut backend = ScriptedBackend::new(vec![
            "<EDIT>\nout.txt\nhello\n</EDIT>\n[TOOL_CALL] <RUN>cat out.txt</RUN>".to_string(),
            "ok".to_string(),
        ]);

        run(&run_state, &mut backend).expect("agent");

        let written = fs::read_to_string(run_state.temp.path().join("out.txt")).expect("out");
        assert_eq!(written, "hello");
        let history = backend.history();
        assert!(
            history
                .iter()
                .any(|m| m.role == Role::User && m.content == "Command output:\nhello")
        );
        assert!(
            history
                .iter()
                .any(|m| m.content == "File out.txt written successfully.")
        );
        assert_eq!(backend.sent().len(), 2);
    }

    #[test]
    fn malformed_file_errors_and_removes_sentinel() {
        let run_state = with_steps("Instructions without a step list\n");
        let mut backend = ScriptedBackend::new(Vec::new());

        let err = run(&run_state, &mut backend).unwrap_err();

        assert!(format!("{err:#}").contains("missing 'Steps:' section"));
        assert!(backend.sent().is_empty());
        assert!(!run_state.request.sentinel_path.exists());
    }

    #[test]
    fn backend_failure_removes_sentinel() {
        let run_state = with_steps("Steps:\n- one\n");
        let mut backend = ScriptedBackend::new(Vec::new());

        let err = run(&run_state, &mut backend).unwrap_err();

        assert!(err.to_string().contains("send step 1"));
        assert!(!run_state.request.sentinel_path.exists());
    }

    #[test]
    fn unwritable_agent_log_does_not_abort_run() {
        let temp = tempfile::tempdir().expect("tempdir");
        // A regular file where the log directory should be.
        let blocker = temp.path().join("log");
        fs::write(&blocker, "not a directory").expect("write blocker");
        let run_state = Run {
            request: AgentRequest::new(temp.path(), blocker.join("agent.log")),
            temp,
        };
        fs::write(&run_state.request.sentinel_path, "Steps:\n- one\n").expect("write");
        let mut backend = ScriptedBackend::new(vec!["ok".to_string(), "ok".to_string()]);

        let outcome = run(&run_state, &mut backend).expect("agent");

        assert_eq!(outcome.stop, AgentStop::Completed);
        assert_eq!(backend.sent().len(), 2);
        assert!(!run_state.request.sentinel_path.exists());
    }
}
