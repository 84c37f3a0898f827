//! Version-resource stamping and code signing via external platform tools.
//!
//! Both operations shell out (`verpatch` and `signtool` on Windows); the
//! tools themselves are outside this crate, so callers treat
//! [`ToolError::ToolMissing`] as a warning rather than a failure.

use std::path::Path;
use std::process::Command;

use thiserror::Error;

use crate::descriptor::ProjectDescriptor;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("'{0}' is not available on this system")]
    ToolMissing(String),

    #[error("'{tool}' failed with status {code:?}: {output}")]
    Failed {
        tool: String,
        code: Option<i32>,
        output: String,
    },

    #[error("tool io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Seam for running external tools, so tests can substitute a fake.
pub trait ToolRunner {
    fn run(&self, tool: &str, args: &[String]) -> Result<(), ToolError>;
}

/// Runs tools through `std::process::Command`.
pub struct SystemToolRunner;

impl ToolRunner for SystemToolRunner {
    fn run(&self, tool: &str, args: &[String]) -> Result<(), ToolError> {
        let output = Command::new(tool).args(args).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::ToolMissing(tool.to_string())
            } else {
                ToolError::Io(e)
            }
        })?;
        if !output.status.success() {
            return Err(ToolError::Failed {
                tool: tool.to_string(),
                code: output.status.code(),
                output: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

/// Stamp Windows version resources onto a produced executable.
pub fn apply_version_resources(
    runner: &dyn ToolRunner,
    target: &Path,
    descriptor: &ProjectDescriptor,
) -> Result<(), ToolError> {
    let target = target.display().to_string();
    let mut args = vec![
        target,
        format!("/va {}", descriptor.version),
        "/s".into(),
        "description".into(),
        descriptor.description.clone(),
        "/s".into(),
        "company".into(),
        descriptor.company.clone(),
        "/s".into(),
        "copyright".into(),
        descriptor.copyright.clone(),
    ];
    if let Some(website) = &descriptor.website {
        args.push("/s".into());
        args.push("product".into());
        args.push(website.clone());
    }
    runner.run("verpatch", &args)
}

/// Sign a produced executable with the descriptor's signing identity.
pub fn sign_package(
    runner: &dyn ToolRunner,
    target: &Path,
    identity: &str,
) -> Result<(), ToolError> {
    let args = vec![
        "sign".to_string(),
        "/n".into(),
        identity.to_string(),
        "/t".into(),
        "http://timestamp.digicert.com".into(),
        target.display().to_string(),
    ];
    runner.run("signtool", &args)
}
