//! Build progress and report rendering.
//!
//! Every line is a right-aligned verb column followed by a message, written
//! to stderr and coloured when stderr is a terminal. stdout carries only the
//! `--json` reports. Rendering (`line`, `bundle_summary`, `diagnostic`, ...)
//! is separate from printing so the text can be checked without a terminal.

use std::io::{self, IsTerminal, Write};
use std::path::Path;

use crate::pipeline::{BuildReport, BundleReport, TextureReport};
use crate::validation::{Diagnostic, Severity, ValidationResult};

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

/// Width of the verb column.
const VERB_WIDTH: usize = 12;

/// How a line is coloured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// Work done or under way (green).
    Progress,
    /// Extra detail (cyan).
    Note,
    /// Something was skipped or degraded (yellow).
    Warn,
    /// The command failed (red).
    Fail,
}

impl Tone {
    fn ansi(self) -> &'static str {
        match self {
            Tone::Progress => "\x1b[1;32m",
            Tone::Note => "\x1b[1;36m",
            Tone::Warn => "\x1b[1;33m",
            Tone::Fail => "\x1b[1;31m",
        }
    }
}

impl From<Severity> for Tone {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Warning => Tone::Warn,
            Severity::Error => Tone::Fail,
        }
    }
}

/// A rendered line: tone, verb, message.
pub type Line = (Tone, &'static str, String);

pub struct Printer {
    color: bool,
}

impl Default for Printer {
    fn default() -> Self {
        Self::new()
    }
}

impl Printer {
    /// Colour follows whether stderr is a terminal.
    pub fn new() -> Self {
        Self {
            color: io::stderr().is_terminal(),
        }
    }

    /// Never emits escape codes.
    pub fn plain() -> Self {
        Self { color: false }
    }

    pub fn status(&self, verb: &str, message: &str) {
        self.emit(Tone::Progress, verb, message);
    }

    pub fn info(&self, verb: &str, message: &str) {
        self.emit(Tone::Note, verb, message);
    }

    pub fn warning(&self, verb: &str, message: &str) {
        self.emit(Tone::Warn, verb, message);
    }

    pub fn error(&self, verb: &str, message: &str) {
        self.emit(Tone::Fail, verb, message);
    }

    pub fn emit(&self, tone: Tone, verb: &str, message: &str) {
        self.write_raw(&self.line(tone, verb, message));
    }

    pub fn line(&self, tone: Tone, verb: &str, message: &str) -> String {
        if self.color {
            format!("{}{:>w$}{} {}", tone.ansi(), verb, RESET, message, w = VERB_WIDTH)
        } else {
            format!("{:>w$} {}", verb, message, w = VERB_WIDTH)
        }
    }

    pub fn dim(&self, text: &str) -> String {
        if self.color {
            format!("{DIM}{text}{RESET}")
        } else {
            text.to_string()
        }
    }

    /// `warning[code]: message`, plus an indented help line when present.
    pub fn diagnostic(&self, d: &Diagnostic) -> String {
        let label = d.severity.to_string();
        let label = if self.color {
            format!("{}{}{}", Tone::from(d.severity).ansi(), label, RESET)
        } else {
            label
        };
        let mut out = format!("{}[{}]: {}", label, d.code, d.message);
        if let Some(help) = &d.help {
            out.push_str(&format!("\n  {} {}", self.dim("help:"), help));
        }
        out
    }

    /// Every diagnostic, then one summary line.
    pub fn diagnostics(&self, result: &ValidationResult) {
        for d in result.iter() {
            self.write_raw(&self.diagnostic(d));
        }
        let (tone, verb, message) = validation_summary(result);
        self.emit(tone, verb, &message);
    }

    pub fn bundle_summary(&self, bundle: &BundleReport) -> String {
        let mut detail = format!(
            "{} ({}, {}",
            bundle.name,
            plural(bundle.assets, "asset", "assets"),
            plural(bundle.packs, "pack", "packs")
        );
        if bundle.redirects > 0 {
            detail.push_str(&format!(", {} redirected", bundle.redirects));
        }
        detail.push(')');
        if let Some(version) = &bundle.version {
            detail.push_str(&format!(" {}", self.dim(version)));
        }
        detail
    }

    pub fn texture_summary(&self, textures: &TextureReport) -> String {
        format!(
            "{} compressed, {} cached {}",
            plural(textures.compressed, "asset", "assets"),
            textures.cached,
            self.dim(&format!("({} codec runs)", textures.codec_invocations))
        )
    }

    /// Lines for a finished build: the texture pass, then one block per bundle.
    pub fn report_lines(&self, report: &BuildReport) -> Vec<Line> {
        let mut lines = Vec::new();
        let textures = &report.textures;
        if textures.tasks > 0 {
            lines.push((Tone::Note, "Textures", self.texture_summary(textures)));
            for failed in &textures.failed {
                lines.push((Tone::Warn, "Failed", failed.clone()));
            }
        }

        for bundle in &report.bundles {
            lines.push((Tone::Progress, "Bundled", self.bundle_summary(bundle)));
            if !bundle.skipped.is_empty() {
                lines.push((
                    Tone::Warn,
                    "Skipped",
                    format!("{} without serialized JSON", plural(bundle.skipped.len(), "asset", "assets")),
                ));
            }
            if bundle.path_collisions > 0 {
                lines.push((
                    Tone::Warn,
                    "Ambiguous",
                    format!(
                        "{} in {}",
                        plural(bundle.path_collisions, "load path", "load paths"),
                        bundle.name
                    ),
                ));
            }
            if let Some(zip) = &bundle.zip {
                lines.push((Tone::Note, "Zipped", display_path(zip)));
            }
        }
        lines
    }

    pub fn report(&self, report: &BuildReport) {
        for (tone, verb, message) in self.report_lines(report) {
            self.emit(tone, verb, &message);
        }
    }

    fn write_raw(&self, text: &str) {
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "{}", text);
    }
}

fn validation_summary(result: &ValidationResult) -> Line {
    let errors = plural(result.error_count(), "error", "errors");
    let warnings = plural(result.warning_count(), "warning", "warnings");
    if result.has_errors() {
        (Tone::Fail, "Failed", format!("validation: {}, {}", errors, warnings))
    } else if result.has_warnings() {
        (Tone::Warn, "Validated", format!("project ({})", warnings))
    } else {
        (Tone::Progress, "Validated", "project".to_string())
    }
}

/// `plural(1, "bundle", "bundles")` → "1 bundle".
pub fn plural(n: usize, singular: &str, pluralized: &str) -> String {
    format!("{} {}", n, if n == 1 { singular } else { pluralized })
}

/// Path relative to the working directory when it lies below it.
pub fn display_path(path: &Path) -> String {
    match std::env::current_dir() {
        Ok(cwd) => relative_to(path, &cwd),
        Err(_) => path.display().to_string(),
    }
}

fn relative_to(path: &Path, base: &Path) -> String {
    match path.strip_prefix(base) {
        Ok(relative) if relative.as_os_str().is_empty() => ".".to_string(),
        Ok(relative) => relative.display().to_string(),
        Err(_) => path.display().to_string(),
    }
}
