//! CLI tests for the config subcommands.
//!
//! Spawns the `arisu` binary against a temp config file and checks the file
//! and exit code.

use std::fs;
use std::process::Command;

use arisu::exit_codes;
use arisu::io::config::{AppConfig, load_config};

#[test]
fn set_model_and_toggles_update_config_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = temp.path().join("config.toml");

    for args in [
        vec!["set-model", "test-model"],
        vec!["auto-edit", "true"],
        vec!["auto-run", "true"],
    ] {
        let status = Command::new(env!("CARGO_BIN_EXE_arisu"))
            .arg("--config")
            .arg(&config)
            .args(&args)
            .status()
            .expect("run arisu");
        assert_eq!(status.code(), Some(exit_codes::OK), "args: {args:?}");
    }

    let loaded = load_config(&config).expect("load");
    assert_eq!(
        loaded,
        AppConfig {
            model: "test-model".to_string(),
            auto_edit: true,
            auto_run: true,
            ..AppConfig::default()
        }
    );
}

#[test]
fn invalid_config_exits_with_failure() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = temp.path().join("config.toml");
    fs::write(&config, "[shell]\ntimeout_secs = 0\n").expect("write");

    let output = Command::new(env!("CARGO_BIN_EXE_arisu"))
        .arg("--config")
        .arg(&config)
        .args(["auto-run", "false"])
        .output()
        .expect("run arisu");

    assert_eq!(output.status.code(), Some(exit_codes::FAILURE));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("shell.timeout_secs"), "stderr: {stderr}");
}

#[test]
fn ask_uses_backend_command_from_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = temp.path().join("config.toml");
    fs::write(
        &config,
        "auto_edit = true\n\n[backend]\ncommand = [\"sh\", \"-c\", \"cat > /dev/null; printf '<EDIT>\\\\nout.txt\\\\nfrom backend\\\\n</EDIT>'\"]\n",
    )
    .expect("write");
    let workdir = temp.path().join("work");
    fs::create_dir(&workdir).expect("workdir");

    let status = Command::new(env!("CARGO_BIN_EXE_arisu"))
        .arg("--config")
        .arg(&config)
        .arg("--workdir")
        .arg(&workdir)
        .args(["ask", "write", "a", "file"])
        .status()
        .expect("run arisu");

    assert_eq!(status.code(), Some(exit_codes::OK));
    assert_eq!(
        fs::read_to_string(workdir.join("out.txt")).expect("out"),
        "from backend"
    );
    assert!(temp.path().join("log").is_dir());
}
