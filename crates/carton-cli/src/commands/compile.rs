//! `carton compile` — pack a project from its descriptor.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;

use carton_pack::collect::FileFilter;
use carton_pack::descriptor::ProjectDescriptor;
use carton_pack::packer::{self, PackOutput};
use carton_pack::signing::{self, SystemToolRunner, ToolError};

use crate::output::StyledOutput;

#[derive(Args)]
pub struct CompileArgs {
    /// Path to the project descriptor
    pub descriptor: PathBuf,

    /// Force a native package even if the descriptor says otherwise
    #[arg(long)]
    pub native: bool,

    /// Host runtime binary for native output (defaults to this binary)
    #[arg(long)]
    pub host: Option<PathBuf>,

    /// Directory the outputs are written to (defaults to the project root)
    #[arg(short, long)]
    pub out_dir: Option<PathBuf>,
}

pub fn run(args: CompileArgs, out: &mut StyledOutput) -> anyhow::Result<i32> {
    let project_root = args
        .descriptor
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut descriptor = ProjectDescriptor::from_file(&args.descriptor)
        .with_context(|| format!("loading {}", args.descriptor.display()))?;
    if args.native {
        descriptor.native = true;
    }

    let output = packer::pack(project_root, descriptor, &FileFilter::empty())?;
    let target_dir = args.out_dir.as_deref().unwrap_or(project_root);
    write_outputs(output, target_dir, args.host.as_deref(), out)
}

/// Write the pack result as an archive or native package and report.
pub fn write_outputs(
    output: PackOutput,
    dir: &Path,
    host: Option<&Path>,
    out: &mut StyledOutput,
) -> anyhow::Result<i32> {
    for warning in &output.warnings {
        out.warning(&format!("warning: {}", warning));
    }

    if output.archive.manifest.native {
        let host = match host {
            Some(host) => host.to_path_buf(),
            None => std::env::current_exe().context("locating the host binary")?,
        };
        let target = packer::write_native(&output, dir, &host)?;
        finish_native(&output, &target, out);
        out.success(&format!("created native package {}", target.display()));
    } else {
        let path = packer::write_archive(&output, dir)?;
        out.success(&format!("created archive {}", path.display()));
    }
    Ok(0)
}

/// Version resources and signing are platform-tool concerns; a missing tool
/// is only a warning.
fn finish_native(output: &PackOutput, target: &Path, out: &mut StyledOutput) {
    if !cfg!(windows) {
        return;
    }
    let runner = SystemToolRunner;
    if let Err(err) = signing::apply_version_resources(&runner, target, &output.archive.manifest)
    {
        report_tool(err, out);
    }
    if let Some(identity) = &output.archive.manifest.sign {
        if let Err(err) = signing::sign_package(&runner, target, identity) {
            report_tool(err, out);
        }
    }
}

fn report_tool(err: ToolError, out: &mut StyledOutput) {
    match err {
        ToolError::ToolMissing(tool) => {
            out.warning(&format!("warning: {} not found, step skipped", tool));
        }
        other => out.warning(&format!("warning: {}", other)),
    }
}
