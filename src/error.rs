//! Unified error type hierarchy for the provisioning pipeline
//!
//! Every stage either succeeds, is skipped, or fails with exactly one
//! `PipelineError`. The variant decides the error classification reported to
//! the operator; the optional diagnostic carries the tail of the failing
//! tool's output.

use std::fmt;
use std::io;
use thiserror::Error;

/// Error classification surfaced on abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Environment,
    DependencyInstall,
    SourceSync,
    Configure,
    Build,
    Verification,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Environment => "EnvironmentError",
            ErrorKind::DependencyInstall => "DependencyInstallError",
            ErrorKind::SourceSync => "SourceSyncError",
            ErrorKind::Configure => "ConfigureError",
            ErrorKind::Build => "BuildError",
            ErrorKind::Verification => "VerificationError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline failure, one variant per error classification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Bad or unknown invocation option
    #[error("invalid argument '{token}': {reason}")]
    Validation { token: String, reason: String },

    /// Host inspection failed (e.g. filesystem not accessible)
    #[error("environment inspection failed: {0}")]
    Environment(String),

    /// Package manager or toolchain acquisition failed
    #[error("dependency installation failed: {message}")]
    DependencyInstall {
        message: String,
        diagnostic: Option<String>,
    },

    /// Clone, fetch, checkout or reset failed
    #[error("source synchronization failed: {message}")]
    SourceSync {
        message: String,
        diagnostic: Option<String>,
    },

    /// The project's configure step failed
    #[error("configure step failed: {message}")]
    Configure {
        message: String,
        diagnostic: Option<String>,
    },

    /// The native build (or install) step failed
    #[error("build step failed: {message}")]
    Build {
        message: String,
        diagnostic: Option<String>,
    },

    /// Artifact missing or smoke test failed
    #[error("artifact verification failed: {message}")]
    Verification {
        message: String,
        diagnostic: Option<String>,
    },
}

impl PipelineError {
    pub fn validation(token: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::Validation {
            token: token.into(),
            reason: reason.into(),
        }
    }

    pub fn dependency(message: impl Into<String>, diagnostic: Option<String>) -> Self {
        PipelineError::DependencyInstall {
            message: message.into(),
            diagnostic,
        }
    }

    pub fn source_sync(message: impl Into<String>, diagnostic: Option<String>) -> Self {
        PipelineError::SourceSync {
            message: message.into(),
            diagnostic,
        }
    }

    pub fn configure(message: impl Into<String>, diagnostic: Option<String>) -> Self {
        PipelineError::Configure {
            message: message.into(),
            diagnostic,
        }
    }

    pub fn build(message: impl Into<String>, diagnostic: Option<String>) -> Self {
        PipelineError::Build {
            message: message.into(),
            diagnostic,
        }
    }

    pub fn verification(message: impl Into<String>, diagnostic: Option<String>) -> Self {
        PipelineError::Verification {
            message: message.into(),
            diagnostic,
        }
    }

    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation { .. } => ErrorKind::Validation,
            PipelineError::Environment(_) => ErrorKind::Environment,
            PipelineError::DependencyInstall { .. } => ErrorKind::DependencyInstall,
            PipelineError::SourceSync { .. } => ErrorKind::SourceSync,
            PipelineError::Configure { .. } => ErrorKind::Configure,
            PipelineError::Build { .. } => ErrorKind::Build,
            PipelineError::Verification { .. } => ErrorKind::Verification,
        }
    }

    /// Final diagnostic lines of the underlying tool, if any were captured
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            PipelineError::Validation { .. } | PipelineError::Environment(_) => None,
            PipelineError::DependencyInstall { diagnostic, .. }
            | PipelineError::SourceSync { diagnostic, .. }
            | PipelineError::Configure { diagnostic, .. }
            | PipelineError::Build { diagnostic, .. }
            | PipelineError::Verification { diagnostic, .. } => diagnostic.as_deref(),
        }
    }
}

impl From<io::Error> for PipelineError {
    fn from(e: io::Error) -> Self {
        PipelineError::Environment(e.to_string())
    }
}

/// Settings file errors. Surfaced to the operator as validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid JSON in settings file {path}: {source}")]
    InvalidJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cannot determine home directory")]
    NoHomeDirectory,

    #[error("IO error reading settings: {0}")]
    IoError(#[from] io::Error),
}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        match &e {
            ConfigError::InvalidJson { path, .. } => {
                PipelineError::validation(path.clone(), e.to_string())
            }
            ConfigError::NoHomeDirectory | ConfigError::IoError(_) => {
                PipelineError::Environment(e.to_string())
            }
        }
    }
}

/// Top-level result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
