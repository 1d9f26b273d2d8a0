pub mod build;
pub mod completions;
pub mod init;
pub mod validate;

use clap::{Parser, Subcommand};

/// bundlekit - pack an asset library into deployable bundles
#[derive(Parser, Debug)]
#[command(name = "bundlekit")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Show debug logs (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build every bundle of the project
    Build(build::BuildArgs),

    /// Initialize a project (generates bundlekit.yaml)
    Init(init::InitArgs),

    /// Check the project and library without building
    Validate(validate::ValidateArgs),

    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}
