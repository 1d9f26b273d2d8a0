//! Pre-build checks over a project and its asset library.
//!
//! Used by `bundlekit validate` and by `bundlekit build` before anything is
//! written. Errors stop a build; warnings are printed and ignored.

mod checks;
mod warning;

pub use warning::{Diagnostic, Severity, ValidationResult};

use crate::library::Library;
use crate::output::Printer;
use crate::project::ProjectConfig;

/// Run all checks.
pub fn validate_project(config: &ProjectConfig, library: &Library) -> ValidationResult {
    let mut result = ValidationResult::new();

    result.merge(checks::check_duplicate_bundles(config));
    result.merge(checks::check_overlapping_roots(config));
    result.merge(checks::check_empty_bundles(config, library));
    result.merge(checks::check_texture_presets(config, library));
    result.merge(checks::check_custom_codecs(config, library));
    result.merge(checks::check_missing_dependencies(library));
    result.merge(checks::check_duplicate_urls(library));

    result
}

/// Print diagnostics and a summary line to stderr.
pub fn print_diagnostics(result: &ValidationResult, printer: &Printer) {
    printer.diagnostics(result);
}
