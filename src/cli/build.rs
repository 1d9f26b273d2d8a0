//! Build command implementation.
//!
//! Loads the project, validates it and runs the pipeline over every bundle.

use std::path::PathBuf;

use clap::Args;

use crate::error::{BundleError, Result};
use crate::output::{display_path, plural, Printer};
use crate::pipeline::{open_project, BuildReport, Pipeline};
use crate::project::ProjectConfig;
use crate::validation::{print_diagnostics, validate_project};

/// Build every bundle of the project
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Project directory (holds bundlekit.yaml)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Target platform (selects texture preset entries)
    #[arg(long)]
    pub platform: Option<String>,

    /// Pretty-print manifests
    #[arg(long)]
    pub debug: bool,

    /// Recompress every texture
    #[arg(long)]
    pub no_cache: bool,

    /// Content-hash output file names
    #[arg(long)]
    pub md5: bool,

    /// Output directory (overrides bundlekit.yaml)
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Skip the pre-build checks
    #[arg(long)]
    pub no_validate: bool,

    /// Print the build report as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

impl BuildArgs {
    fn apply(&self, config: &mut ProjectConfig) {
        if let Some(platform) = &self.platform {
            config.platform = platform.clone();
        }
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        config.debug |= self.debug;
        config.md5_cache |= self.md5;
        if self.no_cache {
            config.use_texture_cache = false;
        }
    }
}

pub fn run(args: BuildArgs, printer: &Printer) -> Result<BuildReport> {
    let (mut config, library) = open_project(&args.path)?;
    args.apply(&mut config);

    if !args.no_validate {
        let result = validate_project(&config, &library);
        if result.has_errors() || result.has_warnings() {
            print_diagnostics(&result, printer);
        }
        if result.has_errors() {
            return Err(BundleError::Build {
                message: format!("{} validation error(s)", result.error_count()),
                help: Some("Run `bundlekit validate` for details, or pass --no-validate".to_string()),
            });
        }
    }

    printer.status(
        "Building",
        &format!(
            "{} for {} ({})",
            plural(config.bundles.len(), "bundle", "bundles"),
            config.platform,
            plural(library.len(), "asset", "assets")
        ),
    );

    let output = config.output.clone();
    let report = Pipeline::new(config, library)?.run()?;

    if args.json {
        let json = serde_json::to_string_pretty(&report).map_err(|e| BundleError::Build {
            message: format!("Failed to serialize build report: {}", e),
            help: None,
        })?;
        println!("{}", json);
    } else {
        printer.report(&report);
    }

    printer.status("Finished", &display_path(&output));
    Ok(report)
}
