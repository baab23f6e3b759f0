//! Helpers for running child processes with timeouts, bounded capture and a
//! live mirror of their output.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    /// Stdout only, in arrival order.
    pub stdout: Vec<u8>,
    /// Bytes dropped from `stdout` once the limit was reached.
    pub stdout_truncated: usize,
    /// Stdout and stderr interleaved in arrival order.
    pub combined: Vec<u8>,
    /// Bytes dropped from `combined` once the limit was reached.
    pub truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn combined_lossy(&self) -> String {
        String::from_utf8_lossy(&self.combined).into_owned()
    }

    pub fn truncated_notice(&self, label: &str) -> String {
        if self.truncated > 0 {
            format!("\n[{label} output truncated {} bytes]\n", self.truncated)
        } else {
            String::new()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Run a command, mirroring stdout/stderr to `mirror` as it arrives.
///
/// Pipes are drained by reader threads that forward chunks to the calling
/// thread, so the mirror never needs to be `Send`. At most
/// `output_limit_bytes` are kept in each capture buffer; everything is still
/// mirrored. On timeout the child is killed and `timed_out` is set.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes = output_limit_bytes))]
pub fn run_command_tee(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    mut mirror: Option<&mut dyn Write>,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };
    let deadline = Instant::now() + timeout;

    let stdin_handle = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            // Written off-thread so a child that talks before reading cannot deadlock us.
            Some(thread::spawn(move || child_stdin.write_all(&input)))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (tx, rx) = mpsc::channel();
    let stdout_handle = spawn_pump(stdout, Stream::Stdout, tx.clone());
    let stderr_handle = spawn_pump(stderr, Stream::Stderr, tx);

    let mut captured_stdout = Vec::new();
    let mut stdout_truncated = 0usize;
    let mut combined = Vec::new();
    let mut truncated = 0usize;
    let mut timed_out = false;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((stream, chunk)) => {
                if let Some(out) = mirror.as_deref_mut() {
                    if let Err(e) = out.write_all(&chunk).and_then(|()| out.flush()) {
                        warn!(err = %e, "failed to mirror child output");
                    }
                }
                if stream == Stream::Stdout {
                    stdout_truncated +=
                        append_limited(&mut captured_stdout, &chunk, output_limit_bytes);
                }
                truncated += append_limited(&mut combined, &chunk, output_limit_bytes);
            }
            Err(RecvTimeoutError::Timeout) => {
                timed_out = true;
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let status = if timed_out {
        warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
        kill_and_wait(&mut child)?
    } else {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match child.wait_timeout(remaining).context("wait for command")? {
            Some(status) => status,
            None => {
                warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
                timed_out = true;
                kill_and_wait(&mut child)?
            }
        }
    };

    // Pumps exit once the pipes close; after a kill that is immediate unless a
    // grandchild still holds them, in which case we leave the thread behind.
    if !timed_out {
        join_pump(stdout_handle)?;
        join_pump(stderr_handle)?;
    }
    if let Some(handle) = stdin_handle {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(err = %e, "child closed stdin early"),
            Err(_) => return Err(anyhow!("stdin writer thread panicked")),
        }
    }

    if truncated > 0 {
        warn!(truncated, "output truncated");
    }
    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout: captured_stdout,
        stdout_truncated,
        combined,
        truncated,
        timed_out,
    })
}

fn kill_and_wait(child: &mut std::process::Child) -> Result<ExitStatus> {
    child.kill().context("kill command")?;
    child.wait().context("wait command after kill")
}

fn spawn_pump<R: Read + Send + 'static>(
    mut reader: R,
    stream: Stream,
    tx: Sender<(Stream, Vec<u8>)>,
) -> thread::JoinHandle<Result<()>> {
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            let n = reader.read(&mut chunk).context("read output")?;
            if n == 0 {
                return Ok(());
            }
            // Receiver is gone after a timeout; keep draining so the child never blocks.
            let _ = tx.send((stream, chunk[..n].to_vec()));
        }
    })
}

fn join_pump(handle: thread::JoinHandle<Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Append `chunk` to `buf` without growing past `limit`. Returns bytes dropped.
fn append_limited(buf: &mut Vec<u8>, chunk: &[u8], limit: usize) -> usize {
    let remaining = limit.saturating_sub(buf.len());
    let keep = chunk.len().min(remaining);
    buf.extend_from_slice(&chunk[..keep]);
    chunk.len() - keep
}
