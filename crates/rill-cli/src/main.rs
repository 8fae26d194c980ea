//! rill CLI - compile, run, and export node-patch animations.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rill")]
#[command(author, version, about = "Deterministic node-patch animation engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a patch and report its schedule or diagnostics
    Check(commands::check::CheckArgs),

    /// Run a patch frame by frame and print its outputs
    Run(commands::run::RunArgs),

    /// Export a fixed-step run to JSON
    Export(commands::export::ExportArgs),

    /// List available blocks and their ports
    Blocks(commands::blocks::BlocksArgs),
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check(args) => commands::check::run(args),
        Commands::Run(args) => commands::run::run(args),
        Commands::Export(args) => commands::export::run(args),
        Commands::Blocks(args) => commands::blocks::run(args),
    }
}
