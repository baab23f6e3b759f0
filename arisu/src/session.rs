//! Interactive session: one human turn, the automatic tool loop, and the
//! step-file runner, wired to the configured backend and the terminal.

use std::borrow::Cow;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use tracing::{debug, info, instrument, warn};

use crate::agent::{AgentOutcome, AgentRequest, discard_sentinel, run_agent};
use crate::driver::{ToolLoopOutcome, ToolLoopStop, run_tool_loop};
use crate::io::actions::ExecEnv;
use crate::io::backend::Backend;
use crate::io::config::AppConfig;
use crate::io::confirm::Confirm;
use crate::io::transcript::{ConversationLog, TranscriptPaths};

const PROMPT: &str = "> ";
const CONTINUATION_PROMPT: &str = "... ";
const EXIT_COMMAND: &str = "exit";

/// A whitespace-delimited word starting with `@`; group 1 keeps the separator.
static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(^|\s)@(\S+)").unwrap());

/// What one human turn led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub tool_loop: ToolLoopOutcome,
    /// Set when the turn left a step file behind and the runner ran.
    pub agent: Option<AgentOutcome>,
}

/// A conversation bound to one backend, working directory and terminal.
pub struct Session<B: Backend> {
    backend: B,
    config: AppConfig,
    workdir: PathBuf,
    confirm: Box<dyn Confirm>,
    terminal: Box<dyn Write>,
    conversation: ConversationLog,
    agent_log: PathBuf,
}

impl<B: Backend> Session<B> {
    pub fn new(
        backend: B,
        config: AppConfig,
        workdir: PathBuf,
        confirm: Box<dyn Confirm>,
        terminal: Box<dyn Write>,
        logs: TranscriptPaths,
    ) -> Self {
        Self {
            backend,
            config,
            workdir,
            confirm,
            terminal,
            conversation: ConversationLog::new(logs.conversation_log),
            agent_log: logs.agent_log,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Send `input`, drive the tool loop to rest, then run a pending step file.
    ///
    /// A backend failure anywhere in the turn removes the step file so a
    /// half-finished automation is not picked up by the next turn.
    #[instrument(skip_all, fields(input_bytes = input.len()))]
    pub fn turn(&mut self, input: &str) -> Result<TurnReport> {
        let message = expand_mentions(input, &self.workdir);
        let tool_loop = match self.converse(&message) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.sync_log();
                if let Err(cleanup) = discard_sentinel(&self.workdir) {
                    warn!(err = %format!("{cleanup:#}"), "failed to remove sentinel file");
                }
                return Err(err);
            }
        };
        if let ToolLoopStop::RoundLimit { max_rounds } = tool_loop.stop {
            self.sync_log();
            self.say(&format!(
                "Stopped automatic tool calls after {max_rounds} rounds."
            ));
        }

        let request = self.agent_request();
        let agent = if request.is_triggered() {
            info!("step file found, starting agent run");
            Some(self.run_agent_request(&request)?)
        } else {
            None
        };
        Ok(TurnReport { tool_loop, agent })
    }

    /// Run the step file in the working directory without a preceding turn.
    pub fn run_agent_file(&mut self) -> Result<AgentOutcome> {
        let request = self.agent_request();
        self.run_agent_request(&request)
    }

    /// Read submissions from `input` until `exit` or EOF. Turn errors are
    /// reported on the terminal and the loop continues.
    pub fn run_interactive<L: LineSource>(&mut self, input: &mut L) -> Result<()> {
        loop {
            let Some(submission) = read_submission(input, &mut self.terminal)? else {
                debug!("input closed");
                break;
            };
            let trimmed = submission.trim();
            if trimmed == EXIT_COMMAND {
                break;
            }
            if trimmed.is_empty() {
                continue;
            }
            match self.turn(&submission) {
                Ok(report) => {
                    if let Some(agent) = report.agent {
                        self.say(&format!(
                            "Agent run finished after {} step(s): {:?}",
                            agent.steps_executed, agent.stop
                        ));
                    }
                }
                Err(err) => self.say(&format!("Error: {err:#}")),
            }
        }
        Ok(())
    }

    fn converse(&mut self, message: &str) -> Result<ToolLoopOutcome> {
        let reply = self.backend.send_message(message).context("send message")?;
        let gating = self.config.gating();
        let max_rounds = self.config.tool_round_limit();
        let conversation = &mut self.conversation;
        let mut env = ExecEnv {
            workdir: &self.workdir,
            shell: &self.config.shell,
            confirm: self.confirm.as_mut(),
            terminal: self.terminal.as_mut(),
        };
        run_tool_loop(
            &mut self.backend,
            reply,
            gating,
            &mut env,
            max_rounds,
            |backend, _| {
                if let Err(err) = conversation.sync(backend.history()) {
                    warn!(err = %format!("{err:#}"), "failed to append conversation log");
                }
            },
        )
    }

    fn run_agent_request(&mut self, request: &AgentRequest) -> Result<AgentOutcome> {
        let gating = self.config.gating();
        let mut env = ExecEnv {
            workdir: &self.workdir,
            shell: &self.config.shell,
            confirm: self.confirm.as_mut(),
            terminal: self.terminal.as_mut(),
        };
        let outcome = run_agent(request, &mut self.backend, gating, &mut env);
        self.sync_log();
        outcome
    }

    fn agent_request(&self) -> AgentRequest {
        AgentRequest::new(&self.workdir, self.agent_log.clone())
    }

    fn sync_log(&mut self) {
        if let Err(err) = self.conversation.sync(self.backend.history()) {
            warn!(err = %format!("{err:#}"), "failed to append conversation log");
        }
    }

    fn say(&mut self, line: &str) {
        if let Err(e) = writeln!(self.terminal, "{line}") {
            warn!(err = %e, "failed to write to terminal");
        }
    }
}

/// Line-oriented input for the interactive loop.
pub trait LineSource {
    /// Append the next line (with its newline) to `buf`; `Ok(0)` on EOF.
    fn read_line(&mut self, buf: &mut String) -> io::Result<usize>;
}

impl<R: BufRead> LineSource for R {
    fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        BufRead::read_line(self, buf)
    }
}

/// Process stdin, locked per line so confirmation prompts can read it too.
pub struct StdinLines;

impl LineSource for StdinLines {
    fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        io::stdin().read_line(buf)
    }
}

/// Read one submission. A line ending in `\` continues onto the next line.
/// Returns `None` on EOF with nothing pending.
pub fn read_submission<L: LineSource + ?Sized>(
    input: &mut L,
    terminal: &mut dyn Write,
) -> Result<Option<String>> {
    let mut submission = String::new();
    let mut prompt = PROMPT;
    loop {
        write!(terminal, "{prompt}").context("write prompt")?;
        terminal.flush().context("flush prompt")?;

        let mut line = String::new();
        if input.read_line(&mut line).context("read input")? == 0 {
            return Ok((!submission.is_empty()).then_some(submission));
        }
        let line = line.trim_end_matches(['\n', '\r']);
        match line.strip_suffix('\\') {
            Some(head) => {
                submission.push_str(head);
                submission.push('\n');
                prompt = CONTINUATION_PROMPT;
            }
            None => {
                submission.push_str(line);
                return Ok(Some(submission));
            }
        }
    }
}

/// Replace readable `@path` mentions with `<FILE name="path">` blocks.
/// Unreadable mentions are left as typed.
pub fn expand_mentions<'a>(input: &'a str, workdir: &Path) -> Cow<'a, str> {
    MENTION_RE.replace_all(input, |caps: &Captures<'_>| {
        let (lead, name) = (&caps[1], &caps[2]);
        match fs::read_to_string(workdir.join(name)) {
            Ok(content) => format!("{lead}<FILE name=\"{name}\">\n{content}\n</FILE>"),
            Err(e) => {
                debug!(mention = name, err = %e, "mention left unexpanded");
                caps[0].to_string()
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentStop, SENTINEL_FILE};
    use crate::test_support::{ScriptedBackend, ScriptedConfirm, SharedBuffer, test_shell};
    use std::io::Cursor;

    fn session(
        temp: &tempfile::TempDir,
        replies: Vec<&str>,
    ) -> (Session<ScriptedBackend>, SharedBuffer) {
        let terminal = SharedBuffer::new();
        let config = AppConfig {
            auto_edit: true,
            auto_run: true,
            shell: test_shell(),
            ..AppConfig::default()
        };
        let backend = ScriptedBackend::new(replies.into_iter().map(str::to_string).collect());
        let session = Session::new(
            backend,
            config,
            temp.path().to_path_buf(),
            Box::new(ScriptedConfirm::new(Vec::new())),
            Box::new(terminal.clone()),
            TranscriptPaths::new(&temp.path().join("log")),
        );
        (session, terminal)
    }

    #[test]
    fn mentions_expand_readable_files_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("notes.md"), "remember").expect("write");

        let expanded = expand_mentions("look at @notes.md and @missing.md", temp.path());

        assert_eq!(
            expanded,
            "look at <FILE name=\"notes.md\">\nremember\n</FILE> and @missing.md"
        );
    }

    #[test]
    fn only_word_initial_at_signs_are_mentions() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("example.com"), "private").expect("write");
        fs::write(temp.path().join("a.txt"), "A").expect("write");

        let expanded =
            expand_mentions("mail user@example.com\n@a.txt\t@example.com", temp.path());

        assert_eq!(
            expanded,
            "mail user@example.com\n<FILE name=\"a.txt\">\nA\n</FILE>\t\
             <FILE name=\"example.com\">\nprivate\n</FILE>"
        );
    }

    #[test]
    fn input_without_mentions_is_borrowed() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            expand_mentions("plain text", temp.path()),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn backslash_continues_submission() {
        let mut input = Cursor::new("first \\\nsecond\nthird\n");
        let mut terminal = Vec::new();

        let one = read_submission(&mut input, &mut terminal).expect("read");
        let two = read_submission(&mut input, &mut terminal).expect("read");
        let three = read_submission(&mut input, &mut terminal).expect("read");

        assert_eq!(one.as_deref(), Some("first \nsecond"));
        assert_eq!(two.as_deref(), Some("third"));
        assert_eq!(three, None);
        assert_eq!(String::from_utf8(terminal).expect("utf8"), "> ... > > ");
    }

    #[test]
    fn pending_continuation_is_returned_at_eof() {
        let mut input = Cursor::new("dangling \\\n");
        let mut terminal = Vec::new();
        let got = read_submission(&mut input, &mut terminal).expect("read");
        assert_eq!(got.as_deref(), Some("dangling \n"));
    }

    #[test]
    fn turn_runs_tool_loop_and_logs_conversation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut session, _terminal) =
            session(&temp, vec!["[TOOL_CALL] <RUN>echo hi</RUN>", "Done."]);

        let report = session.turn("say hi").expect("turn");

        assert_eq!(report.tool_loop.rounds, 1);
        assert!(report.agent.is_none());
        assert_eq!(session.backend().sent(), ["say hi", "Command output:\nhi\n"]);

        let log_dir = temp.path().join("log");
        let entry = fs::read_dir(&log_dir)
            .expect("log dir")
            .filter_map(Result::ok)
            .find(|e| e.file_name().to_string_lossy().starts_with("conversation_"))
            .expect("conversation log");
        let contents = fs::read_to_string(entry.path()).expect("read log");
        assert!(contents.contains("] user: say hi\n"));
        assert!(contents.contains("] assistant: Done.\n"));
    }

    #[test]
    fn step_file_written_during_turn_starts_agent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut session, _terminal) = session(
            &temp,
            vec![
                "<EDIT>\nAGENTSTEPS.arisu\nSteps:\n- one\n</EDIT>",
                "did one <END>",
            ],
        );

        let report = session.turn("automate").expect("turn");

        let agent = report.agent.expect("agent ran");
        assert_eq!(agent.stop, AgentStop::EndMarker { step: 1 });
        assert!(!temp.path().join(SENTINEL_FILE).exists());
    }

    #[test]
    fn backend_failure_in_tool_loop_removes_sentinel() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join(SENTINEL_FILE), "Steps:\n- one\n").expect("write");
        let (mut session, _terminal) = session(&temp, vec!["[TOOL_CALL] <RUN>echo hi</RUN>"]);

        let err = session.turn("go").unwrap_err();

        assert!(err.to_string().contains("send tool output"));
        assert!(!temp.path().join(SENTINEL_FILE).exists());
    }

    #[test]
    fn interactive_loop_reports_errors_and_stops_at_exit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut session, terminal) = session(&temp, vec!["Hello."]);
        let mut input = Cursor::new("hi\n\nagain\nexit\nnever sent\n");

        session.run_interactive(&mut input).expect("repl");

        assert_eq!(session.backend().sent(), ["hi", "again"]);
        assert!(terminal.contents().contains("Error: send message: scripted backend exhausted"));
    }
}
