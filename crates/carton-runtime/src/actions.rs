//! Synchronous shell hooks: pre-install, pre-extraction, post-extraction.

use std::path::Path;
use std::process::Command;

use thiserror::Error;

/// Token replaced in action commands with the running executable's path.
pub const HOST_BINARY_TOKEN: &str = "$HOST_BINARY";

#[derive(Error, Debug)]
#[error("action '{command}' failed with status {exit_code:?}: {output}")]
pub struct ActionError {
    pub command: String,
    pub exit_code: Option<i32>,
    pub output: String,
}

/// Run one shell command from the given working directory.
pub fn run_action(command: &str, host_binary: &Path, work_dir: &Path) -> Result<(), ActionError> {
    let expanded = command.replace(HOST_BINARY_TOKEN, &host_binary.display().to_string());

    let output = shell_command(&expanded)
        .current_dir(work_dir)
        .output()
        .map_err(|e| ActionError {
            command: expanded.clone(),
            exit_code: None,
            output: e.to_string(),
        })?;

    if !output.status.success() {
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(ActionError {
            command: expanded,
            exit_code: output.status.code(),
            output: combined,
        });
    }
    Ok(())
}

/// Run every command in order. All commands run even after a failure; the
/// first error is returned.
pub fn run_actions(
    commands: &[String],
    host_binary: &Path,
    work_dir: &Path,
) -> Result<(), ActionError> {
    let mut first_error = None;
    for command in commands {
        if let Err(err) = run_action(command, host_binary, work_dir) {
            first_error.get_or_insert(err);
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(windows)]
fn shell_command(expanded: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(expanded);
    cmd
}

#[cfg(not(windows))]
fn shell_command(expanded: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(expanded);
    cmd
}
