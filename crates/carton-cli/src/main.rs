//! Carton unified CLI tool
//!
//! Single command-line interface for packaging script applications:
//! descriptor generation, archive/native compilation, and execution of
//! packed applications.

use clap::{Parser, Subcommand};

mod commands;
mod output;

use output::{resolve_color_choice, StyledOutput};

#[derive(Parser)]
#[command(name = "carton")]
#[command(about = "Single-executable packager for script applications", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a project descriptor and pack the project
    Package(commands::package::PackageArgs),

    /// Pack a project from an existing descriptor (.ctp)
    Compile(commands::compile::CompileArgs),

    /// Run a packed application
    Run(commands::run::RunArgs),
}

fn main() {
    let cli = Cli::parse();
    let mut out = StyledOutput::new(resolve_color_choice());

    let result = match cli.command {
        Commands::Package(args) => commands::package::run(args, &mut out),
        Commands::Compile(args) => commands::compile::run(args, &mut out),
        Commands::Run(args) => commands::run::run(args, &mut out),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            out.error(&format!("error: {:#}", err));
            std::process::exit(1);
        }
    }
}
