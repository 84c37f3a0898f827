//! `carton run` — boot a packed application.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use clap::Args;

use carton_runtime::{BootOptions, BootStatus, Loader, ResolvedStartup, ScriptEngine};

use crate::output::StyledOutput;

#[derive(Args)]
pub struct RunArgs {
    /// Native package or .ctn archive
    pub package: PathBuf,

    /// Print the embedded readme and exit
    #[arg(long)]
    pub readme: bool,

    /// Print the embedded license and exit
    #[arg(long)]
    pub license: bool,

    /// Script engine used to execute the startup script
    #[arg(long, default_value = "node")]
    pub engine: String,

    /// Arguments passed through to the application
    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,
}

/// Executes the startup script through an external interpreter.
///
/// When extraction already put the script on disk it runs in place;
/// otherwise the embedded source is materialized into a temporary file.
struct CommandEngine {
    interpreter: String,
    args: Vec<String>,
}

impl ScriptEngine for CommandEngine {
    fn execute(&self, startup: &ResolvedStartup) -> Result<i32, String> {
        let (script, temp): (PathBuf, Option<PathBuf>) = match &startup.disk_path {
            Some(path) => (path.clone(), None),
            None => {
                let temp = std::env::temp_dir().join(format!(
                    "carton-{}-{}",
                    std::process::id(),
                    startup.virtual_path.replace('/', "_")
                ));
                fs::write(&temp, &startup.source).map_err(|e| e.to_string())?;
                (temp.clone(), Some(temp))
            }
        };

        let status = Command::new(&self.interpreter)
            .arg(&script)
            .args(&self.args)
            .status()
            .map_err(|e| format!("failed to start '{}': {}", self.interpreter, e));

        if let Some(temp) = temp {
            let _ = fs::remove_file(temp);
        }
        Ok(status?.code().unwrap_or(1))
    }
}

pub fn run(args: RunArgs, out: &mut StyledOutput) -> anyhow::Result<i32> {
    let loader = Loader::from_file(&args.package)?;
    let options = BootOptions {
        show_readme: args.readme,
        show_license: args.license,
    };
    let engine = CommandEngine {
        interpreter: args.engine.clone(),
        args: args.args,
    };

    let outcome = loader.boot(&options, &engine)?;
    for warning in &outcome.warnings {
        out.warning(&format!("warning: {}", warning));
    }

    // The packed application's exit code becomes ours.
    Ok(match outcome.status {
        BootStatus::Introspected => 0,
        BootStatus::Relaunched(code) | BootStatus::Executed(code) => code,
    })
}
