//! Init command implementation.
//!
//! Generates a `bundlekit.yaml` with one bundle per top-level folder of the
//! library's urls.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use clap::Args;

use crate::error::{BundleError, Result};
use crate::library::{Library, INDEX_FILENAME};
use crate::output::{display_path, plural, Printer};
use crate::project::CONFIG_FILENAME;

/// Initialize a project by generating a bundlekit.yaml
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Project directory (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Library directory, relative to the project
    #[arg(long, default_value = "library")]
    pub library: PathBuf,

    /// Overwrite an existing bundlekit.yaml
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: InitArgs, printer: &Printer) -> Result<()> {
    let config_path = args.path.join(CONFIG_FILENAME);

    if config_path.exists() && !args.force {
        return Err(BundleError::Build {
            message: format!("{} already exists", CONFIG_FILENAME),
            help: Some("Use --force to overwrite".to_string()),
        });
    }

    let library_dir = args.path.join(&args.library);
    let roots = if library_dir.join(INDEX_FILENAME).exists() {
        printer.status("Scanning", &display_path(&library_dir));
        let library = Library::load(&library_dir)?;
        bundle_roots(library.root_assets().map(|a| a.url.as_str()))
    } else {
        printer.warning("Missing", &format!("{} in {}", INDEX_FILENAME, display_path(&library_dir)));
        BTreeSet::new()
    };

    let mut yaml = String::new();
    yaml.push_str(&format!("library: {}\n", args.library.display()));
    yaml.push_str("output: build\n");
    yaml.push_str("platform: web-mobile\n");

    if roots.is_empty() {
        yaml.push_str("bundles: []\n");
    } else {
        yaml.push_str("bundles:\n");
        for (name, root) in &roots {
            yaml.push_str(&format!("  - name: {}\n", name));
            yaml.push_str(&format!("    root: \"{}\"\n", root));
            yaml.push_str("    compression: merge_dep\n");
        }
    }

    fs::write(&config_path, &yaml).map_err(|e| BundleError::Io {
        path: config_path.clone(),
        message: format!("Failed to write project config: {}", e),
    })?;

    if !roots.is_empty() {
        let names: Vec<&str> = roots.iter().map(|(name, _)| name.as_str()).collect();
        printer.info("Discovered", &names.join(", "));
    }
    printer.status(
        "Created",
        &format!("{} ({})", CONFIG_FILENAME, plural(roots.len(), "bundle", "bundles")),
    );

    Ok(())
}

/// `db://assets/main/hero.prefab` → (`main`, `db://assets/main`).
///
/// Assets sitting directly in a mount have no folder and are skipped.
fn bundle_roots<'a>(urls: impl Iterator<Item = &'a str>) -> BTreeSet<(String, String)> {
    let mut roots = BTreeSet::new();
    for url in urls {
        let Some(path) = url.strip_prefix("db://") else {
            continue;
        };
        let mut parts = path.split('/');
        let (Some(mount), Some(folder), Some(_)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        if folder.is_empty() {
            continue;
        }
        roots.insert((folder.to_string(), format!("db://{}/{}", mount, folder)));
    }
    roots
}
