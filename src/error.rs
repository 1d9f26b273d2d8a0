use miette::Diagnostic;
use thiserror::Error;

/// Main error type for bundlekit operations
#[derive(Error, Diagnostic, Debug)]
pub enum BundleError {
    #[error("IO error: {0}")]
    #[diagnostic(code(bundlekit::io))]
    IoError(#[from] std::io::Error),

    #[error("IO error with {path}: {message}")]
    #[diagnostic(code(bundlekit::io))]
    Io {
        path: std::path::PathBuf,
        message: String,
    },

    #[error("Parse error: {message}")]
    #[diagnostic(code(bundlekit::parse))]
    Parse {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(bundlekit::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("Build error: {message}")]
    #[diagnostic(code(bundlekit::build))]
    Build {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// A bundle phase was invoked out of order (e.g. compacting twice).
    #[error("Phase error: {message}")]
    #[diagnostic(
        code(bundlekit::phase),
        help("Bundle::build runs each phase exactly once; do not call phases by hand after it")
    )]
    Phase { message: String },

    #[error("Codec error ({format}): {message}")]
    #[diagnostic(code(bundlekit::codec))]
    Codec { format: String, message: String },
}

impl BundleError {
    /// Shorthand for an IO error tied to a path.
    pub fn io(path: impl Into<std::path::PathBuf>, message: impl std::fmt::Display) -> Self {
        BundleError::Io {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BundleError>;
