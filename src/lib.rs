//! Provision: local build-provisioning pipeline
//!
//! Brings a Debian-family host from "nothing installed" to "verified binary"
//! in one invocation: install build dependencies (optionally a Rust toolchain),
//! synchronize a repository branch, configure and compile it out of tree,
//! optionally install it, then smoke-test the produced executable.
//!
//! The system is organized into functional modules:
//! - **config**: command line and settings resolution into a `Configuration`
//! - **error**: unified error classification
//! - **models**: configuration, snapshot and stage result types
//! - **system**: subprocess execution, environment probing, dependency
//!   installation and artifact verification
//! - **source**: clone / update-in-place of the working copy
//! - **orchestrator**: stage sequencing, state machine and build invocation
//! - **log_collector**: leveled log sink with a per-run session file

pub mod config;
pub mod error;
pub mod log_collector;
pub mod models;
pub mod orchestrator;
pub mod source;
pub mod system;

pub use log;

pub use config::{resolve, resolve_from_env, Resolution};
pub use error::{ConfigError, ErrorKind, PipelineError, Result};
pub use log_collector::{LogCollector, LogLine};
pub use models::{
    Artifact, Configuration, EnvironmentSnapshot, OsFamily, OsInfo, PackageProbe, StageName,
    StageOutcome, StageResult, StageStatus, ToolchainInfo, WorkingCopyState,
};
pub use orchestrator::{derive_configure_args, Orchestrator, PipelineRun, PipelineState, RunStatus};
pub use system::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_stage_order_is_fixed() {
        assert_eq!(
            StageName::ORDER,
            [
                StageName::Probe,
                StageName::Dependencies,
                StageName::Source,
                StageName::Build,
                StageName::Install,
                StageName::Verify,
            ]
        );
    }
}
