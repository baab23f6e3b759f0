//! Execution of decoded directives against the local machine.
//!
//! Every action re-reads its target at execute time, so actions later in a
//! batch see the effects of earlier ones. Failures never abort a batch: they
//! become the action's result text and are reported to the backend like any
//! other result.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::blocks::{format_listing, segment, serialize};
use crate::core::directive::Action;
use crate::core::types::GatingConfig;
use crate::io::config::ShellConfig;
use crate::io::confirm::Confirm;
use crate::io::process::run_command_tee;

/// Everything an action needs besides its gating flags.
pub struct ExecEnv<'a> {
    /// Relative filenames resolve against this directory; commands run in it.
    pub workdir: &'a Path,
    pub shell: &'a ShellConfig,
    pub confirm: &'a mut dyn Confirm,
    /// Status lines and live command output go here.
    pub terminal: &'a mut dyn Write,
}

impl ExecEnv<'_> {
    fn resolve(&self, filename: &str) -> PathBuf {
        self.workdir.join(filename)
    }

    fn status(&mut self, line: &str) {
        if let Err(e) = writeln!(self.terminal, "{line}") {
            warn!(err = %e, "failed to write status line");
        }
    }
}

/// Outcome of one action: the text reported back, plus the failure if any.
pub struct ActionResult {
    pub text: String,
    pub error: Option<anyhow::Error>,
}

impl ActionResult {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            error: None,
        }
    }

    fn failed(text: impl Into<String>, error: anyhow::Error) -> Self {
        Self {
            text: text.into(),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Debug for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionResult")
            .field("text", &self.text)
            .field("error", &self.error.as_ref().map(|e| format!("{e:#}")))
            .finish()
    }
}

/// Execute one action under `gating`.
pub fn execute(action: &Action, gating: GatingConfig, env: &mut ExecEnv<'_>) -> ActionResult {
    match action {
        Action::Edit { filename, content } => execute_edit(filename, content, gating, env),
        Action::Run { command } => execute_run(command, gating, env),
        Action::Read { filename } => execute_read(filename, env),
        Action::Patch {
            filename,
            block_id,
            content,
        } => execute_patch(filename, *block_id, content, gating, env),
    }
}

#[instrument(skip_all, fields(filename = %filename))]
fn execute_edit(
    filename: &str,
    content: &str,
    gating: GatingConfig,
    env: &mut ExecEnv<'_>,
) -> ActionResult {
    if !gating.auto_edit && !env.confirm.confirm(&format!("Overwrite/Create {filename}?")) {
        let text = format!("Write on {filename} skipped.");
        env.status(&text);
        return ActionResult::ok(text);
    }

    let path = env.resolve(filename);
    match write_file(&path, content) {
        Ok(()) => {
            info!(bytes = content.len(), "file written");
            let text = format!("File {filename} written successfully.");
            env.status(&text);
            ActionResult::ok(text)
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), "edit failed");
            let text = format!("Error writing {filename}: {err:#}");
            env.status(&text);
            ActionResult::failed(text, err)
        }
    }
}

#[instrument(skip_all, fields(command = %command))]
fn execute_run(command: &str, gating: GatingConfig, env: &mut ExecEnv<'_>) -> ActionResult {
    if !gating.auto_run && !env.confirm.confirm(&format!("Execute command: {command}?")) {
        let text = format!("Command skipped: {command}");
        env.status(&text);
        return ActionResult::ok(text);
    }

    let mut cmd = Command::new(&env.shell.program);
    cmd.arg("-c").arg(command).current_dir(env.workdir);
    let timeout = Duration::from_secs(env.shell.timeout_secs);
    let output = run_command_tee(
        cmd,
        None,
        timeout,
        env.shell.output_limit_bytes,
        Some(&mut *env.terminal),
    );

    let output = match output {
        Ok(output) => output,
        Err(err) => {
            let text = format!("Command failed: {command}\nError: {err:#}");
            env.status(&format!("Command failed with error: {err:#}"));
            return ActionResult::failed(text, err);
        }
    };

    let mut captured = output.combined_lossy();
    captured.push_str(&output.truncated_notice("command"));

    let failure = if output.timed_out {
        Some(anyhow!("timed out after {}s", env.shell.timeout_secs))
    } else if !output.status.success() {
        Some(anyhow!("{}", output.status))
    } else {
        None
    };

    match failure {
        Some(err) => {
            info!(exit_code = ?output.status.code(), timed_out = output.timed_out, "command failed");
            env.status(&format!("Command failed with error: {err}"));
            let mut text = format!("Command failed: {command}\nError: {err}");
            if !captured.is_empty() {
                text.push_str("\nOutput:\n");
                text.push_str(&captured);
            }
            ActionResult::failed(text, err)
        }
        None if captured.is_empty() => {
            ActionResult::ok("Command executed successfully (no output).")
        }
        None => ActionResult::ok(format!("Command output:\n{captured}")),
    }
}

#[instrument(skip_all, fields(filename = %filename))]
fn execute_read(filename: &str, env: &mut ExecEnv<'_>) -> ActionResult {
    let path = env.resolve(filename);
    match read_file(&path) {
        Ok(contents) => {
            let blocks = segment(&contents);
            info!(blocks = blocks.len(), "file listed");
            env.status(&format!("Content of {filename} displayed in blocks."));
            ActionResult::ok(format_listing(filename, &blocks))
        }
        Err(err) => {
            let text = format!("Error reading {filename}: {err:#}");
            env.status(&text);
            ActionResult::failed(text, err)
        }
    }
}

#[instrument(skip_all, fields(filename = %filename, block_id = block_id))]
fn execute_patch(
    filename: &str,
    block_id: i64,
    content: &str,
    gating: GatingConfig,
    env: &mut ExecEnv<'_>,
) -> ActionResult {
    let prompt = format!("Apply patch to block {block_id} in {filename}?");
    if !gating.auto_edit && !env.confirm.confirm(&prompt) {
        let text = format!("Patch on {filename} skipped.");
        env.status(&text);
        return ActionResult::ok(text);
    }

    let path = env.resolve(filename);
    let current = match read_file(&path) {
        Ok(contents) => contents,
        Err(err) => {
            let text = format!("Error reading {filename}: {err:#}");
            env.status(&text);
            return ActionResult::failed(text, err);
        }
    };

    let mut blocks = segment(&current);
    let index = match usize::try_from(block_id) {
        Ok(idx) if idx < blocks.len() => idx,
        _ => {
            let text = format!("Error: Block ID {block_id} not found in {filename}");
            env.status(&text);
            return ActionResult::failed(text, anyhow!("block id not found"));
        }
    };

    if content.trim().is_empty() {
        blocks.remove(index);
    } else {
        blocks[index].lines = replacement_lines(content);
    }

    if let Err(err) = write_file(&path, &serialize(&blocks)) {
        let text = format!("Error writing {filename}: {err:#}");
        env.status(&text);
        return ActionResult::failed(text, err);
    }
    info!("block patched");
    let text = format!("File {filename} patched successfully.");
    env.status(&text);
    ActionResult::ok(text)
}

/// Lines stored into the patched block. Blank lines are kept as-is and only
/// split the block the next time the file is segmented.
fn replacement_lines(content: &str) -> Vec<String> {
    let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
    if lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    lines
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}
