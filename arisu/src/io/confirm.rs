//! Interactive confirmation for gated actions.

use std::io::{self, BufRead, Write};

use tracing::{debug, warn};

/// Yes/no gate consulted before an action with side effects runs.
pub trait Confirm {
    /// Ask `prompt`; `true` approves the action.
    fn confirm(&mut self, prompt: &str) -> bool;
}

/// Prompts on stdout and reads one answer line from stdin.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, prompt: &str) -> bool {
        let mut stdout = io::stdout();
        if let Err(e) = write!(stdout, "{prompt} (y/n): ").and_then(|()| stdout.flush()) {
            warn!(err = %e, "failed to write confirmation prompt");
        }
        // `Stdin::read_line` takes the lock per call, so the REPL can read stdin too.
        let mut line = String::new();
        let read = io::stdin().read_line(&mut line);
        interpret(read, &line)
    }
}

/// Read one line from `reader` and interpret it as an answer.
///
/// Only `y` (trimmed, case-insensitive) approves. EOF and read errors decline.
pub fn ask_line<R: BufRead>(reader: &mut R) -> bool {
    let mut line = String::new();
    let read = reader.read_line(&mut line);
    interpret(read, &line)
}

fn interpret(read: io::Result<usize>, answer: &str) -> bool {
    match read {
        Ok(0) => false,
        Ok(_) => answer.trim().eq_ignore_ascii_case("y"),
        Err(e) => {
            debug!(err = %e, "failed to read confirmation");
            false
        }
    }
}
