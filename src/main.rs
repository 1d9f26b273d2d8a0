use clap::Parser;
use miette::Result;
use tracing_subscriber::EnvFilter;

use bundlekit::cli::{Cli, Commands};
use bundlekit::output::Printer;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let printer = Printer::new();
    match cli.command {
        Commands::Build(args) => {
            bundlekit::cli::build::run(args, &printer)?;
        }
        Commands::Init(args) => bundlekit::cli::init::run(args, &printer)?,
        Commands::Validate(args) => bundlekit::cli::validate::run(args, &printer)?,
        Commands::Completions(args) => bundlekit::cli::completions::run(args)?,
    }

    Ok(())
}
