//! `arisu` command line.
//!
//! Without a subcommand, starts an interactive session in the working
//! directory. Subcommands run a single turn, run the step-file agent, or
//! update the config file.

use std::env;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;

use arisu::exit_codes;
use arisu::io::backend::CommandBackend;
use arisu::io::config::{AppConfig, AppPaths, load_config, update_config};
use arisu::io::confirm::StdinConfirm;
use arisu::io::prompt::default_system_prompt;
use arisu::io::transcript::TranscriptPaths;
use arisu::logging;
use arisu::session::{Session, StdinLines};

#[derive(Parser)]
#[command(
    name = "arisu",
    version,
    about = "Terminal coding assistant driven by model directives"
)]
struct Cli {
    /// Config file to use instead of `<config dir>/arisu/config.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory files and commands resolve against (default: current dir).
    #[arg(long, global = true)]
    workdir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Send one prompt, run the tool loop and any step file, then exit.
    Ask {
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },
    /// Run the step file (`AGENTSTEPS.arisu`) in the working directory.
    Agent,
    /// Set the model name passed to the backend.
    SetModel { model: String },
    /// Apply EDIT and PATCH directives without asking.
    AutoEdit {
        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },
    /// Run RUN directives without asking.
    AutoRun {
        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(exit_codes::FAILURE);
    }
}

fn run() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let paths = AppPaths::with_config_override(cli.config.as_deref())?;
    debug!(config = %paths.config_path.display(), "resolved config path");

    match cli.command {
        None => {
            let mut session = open_session(&paths, cli.workdir)?;
            println!(
                "arisu in {}. Type 'exit' to quit; end a line with \\ to continue it.",
                session.workdir().display()
            );
            session.run_interactive(&mut StdinLines)
        }
        Some(Command::Ask { prompt }) => {
            let mut session = open_session(&paths, cli.workdir)?;
            let report = session.turn(&prompt.join(" "))?;
            if let Some(agent) = report.agent {
                println!(
                    "Agent run finished after {} step(s): {:?}",
                    agent.steps_executed, agent.stop
                );
            }
            Ok(())
        }
        Some(Command::Agent) => {
            let mut session = open_session(&paths, cli.workdir)?;
            let outcome = session.run_agent_file()?;
            println!(
                "Agent run finished after {} step(s): {:?}",
                outcome.steps_executed, outcome.stop
            );
            Ok(())
        }
        Some(Command::SetModel { model }) => {
            let cfg = update_config(&paths.config_path, |cfg| cfg.model = model)?;
            println!("Model set to {}.", cfg.model);
            Ok(())
        }
        Some(Command::AutoEdit { enabled }) => {
            let cfg = update_config(&paths.config_path, |cfg| cfg.auto_edit = enabled)?;
            println!("auto_edit = {}", cfg.auto_edit);
            Ok(())
        }
        Some(Command::AutoRun { enabled }) => {
            let cfg = update_config(&paths.config_path, |cfg| cfg.auto_run = enabled)?;
            println!("auto_run = {}", cfg.auto_run);
            Ok(())
        }
    }
}

fn open_session(paths: &AppPaths, workdir: Option<PathBuf>) -> Result<Session<CommandBackend>> {
    let config = load_config(&paths.config_path)?;
    let workdir = resolve_workdir(workdir)?;
    let backend = build_backend(&config, &workdir)?;
    Ok(Session::new(
        backend,
        config,
        workdir,
        Box::new(StdinConfirm),
        Box::new(io::stdout()),
        TranscriptPaths::new(&paths.log_dir),
    ))
}

fn build_backend(config: &AppConfig, workdir: &Path) -> Result<CommandBackend> {
    let system_prompt = default_system_prompt().context("render system prompt")?;
    Ok(CommandBackend::new(
        config.model.clone(),
        config.backend.clone(),
        workdir,
        system_prompt,
    )
    .with_mirror(Box::new(io::stdout())))
}

fn resolve_workdir(workdir: Option<PathBuf>) -> Result<PathBuf> {
    let dir = match workdir {
        Some(dir) => dir,
        None => env::current_dir().context("resolve current directory")?,
    };
    if !dir.is_dir() {
        bail!("working directory {} does not exist", dir.display());
    }
    Ok(dir)
}
