//! Validate command implementation.

use std::path::PathBuf;

use clap::Args;

use crate::error::{BundleError, Result};
use crate::output::{display_path, Printer};
use crate::pipeline::open_project;
use crate::validation::{print_diagnostics, validate_project};

/// Check the project and library without building
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Project directory (holds bundlekit.yaml)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Print diagnostics as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: ValidateArgs, printer: &Printer) -> Result<()> {
    printer.status("Checking", &display_path(&args.path));
    let (config, library) = open_project(&args.path)?;
    let result = validate_project(&config, &library);

    if args.json {
        let json = serde_json::to_string_pretty(&result).map_err(|e| BundleError::Build {
            message: format!("Failed to serialize diagnostics: {}", e),
            help: None,
        })?;
        println!("{}", json);
    } else {
        print_diagnostics(&result, printer);
    }

    if result.has_errors() {
        return Err(BundleError::Build {
            message: format!("{} validation error(s)", result.error_count()),
            help: Some("Fix the errors above and run `bundlekit validate` again".to_string()),
        });
    }
    Ok(())
}
