//! Assistant configuration stored as TOML under the user config directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::GatingConfig;

/// Directory name under the platform config dir (`~/.config/arisu` on Linux).
pub const APP_DIR: &str = "arisu";

/// Assistant configuration (TOML).
///
/// Missing fields default to the values in [`AppConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Model name forwarded to the backend command.
    pub model: String,

    /// Apply `EDIT`/`PATCH` directives without confirmation.
    pub auto_edit: bool,

    /// Run `RUN` directives without confirmation.
    pub auto_run: bool,

    /// Stop the tool-call loop after this many automatic rounds. 0 = unlimited.
    pub max_tool_rounds: u32,

    pub backend: BackendConfig,

    pub shell: ShellConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    /// Program and arguments that answer one chat request on stdin.
    pub command: Vec<String>,
    /// Wall-clock budget for a single reply, in seconds.
    pub timeout_secs: u64,
    /// Truncate replies beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShellConfig {
    /// Shell used for `RUN` directives, invoked as `<program> -c <command>`.
    pub program: String,
    /// Wall-clock budget for a single command, in seconds.
    pub timeout_secs: u64,
    /// Keep at most this many bytes of command output in the result.
    pub output_limit_bytes: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: vec!["arisu-backend".to_string()],
            timeout_secs: 10 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "bash".to_string(),
            timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            auto_edit: false,
            auto_run: false,
            max_tool_rounds: 0,
            backend: BackendConfig::default(),
            shell: ShellConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must not be empty"));
        }
        if self.backend.command.is_empty() || self.backend.command[0].trim().is_empty() {
            return Err(anyhow!("backend.command must be a non-empty array"));
        }
        if self.backend.timeout_secs == 0 {
            return Err(anyhow!("backend.timeout_secs must be > 0"));
        }
        if self.backend.output_limit_bytes == 0 {
            return Err(anyhow!("backend.output_limit_bytes must be > 0"));
        }
        if self.shell.program.trim().is_empty() {
            return Err(anyhow!("shell.program must not be empty"));
        }
        if self.shell.timeout_secs == 0 {
            return Err(anyhow!("shell.timeout_secs must be > 0"));
        }
        if self.shell.output_limit_bytes == 0 {
            return Err(anyhow!("shell.output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    pub fn gating(&self) -> GatingConfig {
        GatingConfig {
            auto_edit: self.auto_edit,
            auto_run: self.auto_run,
        }
    }

    /// Tool-loop round cap, `None` when unlimited.
    pub fn tool_round_limit(&self) -> Option<u32> {
        (self.max_tool_rounds > 0).then_some(self.max_tool_rounds)
    }
}

/// Well-known locations under the assistant's config directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_path: PathBuf,
    pub log_dir: PathBuf,
}

impl AppPaths {
    /// Paths rooted at `dir` (`<dir>/config.toml`, `<dir>/log/`).
    pub fn new(dir: &Path) -> Self {
        Self {
            config_path: dir.join("config.toml"),
            log_dir: dir.join("log"),
        }
    }

    /// Paths under the platform config dir.
    pub fn discover() -> Result<Self> {
        let base = dirs::config_dir().context("locate user config directory")?;
        Ok(Self::new(&base.join(APP_DIR)))
    }

    /// Like [`AppPaths::discover`], but honours an explicit config file.
    /// Logs then live next to the given file.
    pub fn with_config_override(config: Option<&Path>) -> Result<Self> {
        let Some(path) = config else {
            return Self::discover();
        };
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Ok(Self {
            config_path: path.to_path_buf(),
            log_dir: dir.join("log"),
        })
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AppConfig::default()`.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        let cfg = AppConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AppConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AppConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Load, modify and write back the config file in one step.
pub fn update_config<F: FnOnce(&mut AppConfig)>(path: &Path, update: F) -> Result<AppConfig> {
    let mut cfg = load_config(path)?;
    update(&mut cfg);
    write_config(path, &cfg)?;
    Ok(cfg)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
