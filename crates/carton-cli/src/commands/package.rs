//! `carton package` — generate a descriptor and pack in one step.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Args;

use carton_pack::collect::FileFilter;
use carton_pack::descriptor::{ExtractPolicy, ProjectDescriptor, DESCRIPTOR_EXTENSION};
use carton_pack::packer;
use carton_pack::paths;

use crate::commands::compile;
use crate::output::StyledOutput;

#[derive(Args)]
pub struct PackageArgs {
    /// Startup script of the project
    pub startup: PathBuf,

    /// Package name (defaults to the startup file's stem)
    pub name: Option<String>,

    /// Package version
    #[arg(long, default_value = "1.0.0")]
    pub pkg_version: String,

    #[arg(long)]
    pub author: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    #[arg(long)]
    pub company: Option<String>,

    #[arg(long)]
    pub website: Option<String>,

    /// Signing identity for the native output
    #[arg(long)]
    pub sign: Option<String>,

    /// Exclude patterns applied while collecting files
    #[arg(long = "slim")]
    pub slim: Vec<String>,

    /// Produce a self-running executable instead of an archive
    #[arg(long)]
    pub native: bool,

    /// Enable extraction at startup
    #[arg(long)]
    pub extract: bool,

    /// Extract only content matching these patterns
    #[arg(long = "extract-what")]
    pub extract_what: Vec<String>,

    /// Extraction target directory ("./" extracts in place)
    #[arg(long = "extract-where")]
    pub extract_where: Option<String>,

    /// Message printed before extraction
    #[arg(long = "extract-message")]
    pub extract_message: Option<String>,

    /// Print each extracted path
    #[arg(long = "extract-verbose")]
    pub extract_verbose: bool,

    /// Replace files that already exist on disk
    #[arg(long = "extract-overwrite")]
    pub extract_overwrite: bool,

    /// Shell commands run once on the package's first start
    #[arg(long = "pre-install")]
    pub pre_install: Vec<String>,
}

impl PackageArgs {
    fn extract_policy(&self) -> ExtractPolicy {
        let partial = !self.extract_what.is_empty();
        ExtractPolicy {
            enabled: self.extract || partial || self.extract_where.is_some(),
            what: partial.then(|| self.extract_what.clone()),
            destination: self.extract_where.clone(),
            message: self.extract_message.clone(),
            verbose: self.extract_verbose,
            overwrite: self.extract_overwrite,
            pre_actions: Vec::new(),
            post_actions: Vec::new(),
        }
    }
}

pub fn run(args: PackageArgs, out: &mut StyledOutput) -> anyhow::Result<i32> {
    if !args.startup.is_file() {
        bail!("startup script '{}' does not exist", args.startup.display());
    }
    let project_root = args
        .startup
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let startup_name = args
        .startup
        .file_name()
        .context("startup path has no file name")?
        .to_string_lossy()
        .into_owned();

    let name = match &args.name {
        Some(name) => name.clone(),
        None => match paths::basename(&startup_name).strip_suffix(".js") {
            Some(stem) => stem.to_string(),
            None => bail!("startup script must be a .js file"),
        },
    };

    let mut descriptor = ProjectDescriptor {
        name: name.clone(),
        version: args.pkg_version.clone(),
        author: args.author.clone().unwrap_or_default(),
        description: args.description.clone().unwrap_or_default(),
        company: args.company.clone().unwrap_or_default(),
        website: args.website.clone(),
        startup: startup_name,
        native: args.native,
        sign: args.sign.clone(),
        pre_install: args.pre_install.clone(),
        extract: args.extract_policy(),
        ..ProjectDescriptor::default()
    };
    descriptor
        .merge_package_json(project_root)
        .context("reading package.json")?;
    descriptor.validate()?;

    let descriptor_path = project_root.join(format!("{}.{}", name, DESCRIPTOR_EXTENSION));
    fs::write(
        &descriptor_path,
        serde_json::to_string_pretty(&descriptor)?,
    )
    .with_context(|| format!("writing {}", descriptor_path.display()))?;
    out.info(&format!("wrote {}", descriptor_path.display()));

    let exclude = FileFilter::new(&args.slim).context("invalid --slim pattern")?;
    let output = packer::pack(project_root, descriptor, &exclude)?;
    compile::write_outputs(output, project_root, None, out)
}
