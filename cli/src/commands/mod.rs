//! CLI command definitions and dispatch.

mod build;
mod history;
mod version;

use std::path::PathBuf;

use a3s_build_core::BuilderConfig;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "a3s-build", version, about)]
pub struct Cli {
    /// Builder config file (default: ~/.a3s/build.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build an OCI image layout from a Dockerfile
    Build(build::BuildArgs),
    /// Show the history of a built image layout
    History(history::HistoryArgs),
    /// Show version information
    Version(version::VersionArgs),
}

pub async fn dispatch(cli: Cli, config: BuilderConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Build(args) => build::execute(args, &config).await,
        Command::History(args) => history::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}
