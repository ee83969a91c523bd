//! Core data types for the provisioning pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ErrorKind;

/// Immutable, fully resolved configuration for one invocation.
///
/// Built once by the resolver and then only ever borrowed by the stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    /// Repository to synchronize from
    pub repo_url: String,

    /// Branch to track
    pub branch: String,

    /// Acquire a Rust toolchain and enable the project's Rust support
    pub install_rust_toolchain: bool,

    /// Link the artifact statically
    pub static_build: bool,

    /// Remove source and build directories before synchronizing
    pub clean_build: bool,

    /// Run the install stage after a successful build
    pub install_after_build: bool,

    /// Parallelism degree handed to the compile step (always >= 1)
    pub jobs: u32,

    /// Working copy location
    pub source_dir: PathBuf,

    /// Out-of-tree build location
    pub build_dir: PathBuf,

    /// Session log location
    pub log_dir: PathBuf,

    /// Debian package names the build needs
    pub required_packages: Vec<String>,

    /// Installation prefix handed to configure
    pub install_prefix: PathBuf,

    /// Artifact location relative to `build_dir`
    pub artifact: PathBuf,

    /// Arguments for the smoke run of the artifact
    pub smoke_args: Vec<String>,
}

impl Configuration {
    /// Absolute path where the build is expected to leave the artifact.
    pub fn artifact_path(&self) -> PathBuf {
        self.build_dir.join(&self.artifact)
    }
}

/// Operating system family, used to pick package-manager semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Debian,
    Other,
    Unknown,
}

impl OsFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Debian => "debian",
            OsFamily::Other => "other",
            OsFamily::Unknown => "unknown",
        }
    }
}

/// Parsed `/etc/os-release` essentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsInfo {
    pub family: OsFamily,
    pub id: String,
    pub version: Option<String>,
    pub pretty_name: Option<String>,
}

impl OsInfo {
    pub fn unknown() -> Self {
        OsInfo {
            family: OsFamily::Unknown,
            id: "unknown".to_string(),
            version: None,
            pretty_name: None,
        }
    }

    pub fn describe(&self) -> String {
        match (&self.pretty_name, &self.version) {
            (Some(name), _) => name.clone(),
            (None, Some(version)) => format!("{} {}", self.id, version),
            (None, None) => self.id.clone(),
        }
    }
}

/// Whether the host's package database could be queried at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageProbe {
    Supported,
    Unsupported,
}

/// Detected Rust toolchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainInfo {
    /// e.g. "1.79.0"
    pub version: String,
    /// rustc binary that answered the probe
    pub rustc: PathBuf,
}

impl ToolchainInfo {
    /// Directory holding `rustc` when it was found outside `PATH`.
    pub fn bin_dir(&self) -> Option<&Path> {
        self.rustc.parent().filter(|dir| !dir.as_os_str().is_empty())
    }
}

/// State of the configured source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkingCopyState {
    /// Nothing at the path
    Absent,
    /// Something at the path that is not a git checkout
    Foreign,
    /// Checkout with no local modifications
    Clean { branch: Option<String>, head: String },
    /// Checkout whose modifications the update will discard
    Dirty {
        branch: Option<String>,
        head: String,
        changes: usize,
    },
}

impl WorkingCopyState {
    pub fn is_checkout(&self) -> bool {
        matches!(self, WorkingCopyState::Clean { .. } | WorkingCopyState::Dirty { .. })
    }
}

impl fmt::Display for WorkingCopyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkingCopyState::Absent => write!(f, "absent"),
            WorkingCopyState::Foreign => write!(f, "present but not a git checkout"),
            WorkingCopyState::Clean { branch, head } => write!(
                f,
                "clean checkout of {} at {}",
                branch.as_deref().unwrap_or("detached HEAD"),
                short_id(head)
            ),
            WorkingCopyState::Dirty {
                branch,
                head,
                changes,
            } => write!(
                f,
                "checkout of {} at {} with {} local change(s) (will be reset)",
                branch.as_deref().unwrap_or("detached HEAD"),
                short_id(head),
                changes
            ),
        }
    }
}

/// What the prober found. Rebuilt fresh on every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSnapshot {
    pub os: OsInfo,
    pub package_probe: PackageProbe,
    /// package name -> installed
    pub packages: BTreeMap<String, bool>,
    pub toolchain: Option<ToolchainInfo>,
    pub working_copy: WorkingCopyState,
    pub is_root: bool,
}

impl EnvironmentSnapshot {
    /// Packages known to be absent, in name order.
    pub fn missing_packages(&self) -> Vec<String> {
        self.packages
            .iter()
            .filter(|(_, installed)| !**installed)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// One-line summary for the stage detail.
    pub fn summary(&self) -> String {
        let packages = match self.package_probe {
            PackageProbe::Supported => format!(
                "{}/{} packages present",
                self.packages.values().filter(|p| **p).count(),
                self.packages.len()
            ),
            PackageProbe::Unsupported => "package state unknown".to_string(),
        };
        let toolchain = match &self.toolchain {
            Some(tc) => format!("rustc {}", tc.version),
            None => "no rust toolchain".to_string(),
        };
        format!(
            "{}; {}; {}; source {}",
            self.os.describe(),
            packages,
            toolchain,
            self.working_copy
        )
    }
}

/// Pipeline stages in their fixed execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageName {
    Probe,
    Dependencies,
    Source,
    Build,
    Install,
    Verify,
}

impl StageName {
    pub const ORDER: [StageName; 6] = [
        StageName::Probe,
        StageName::Dependencies,
        StageName::Source,
        StageName::Build,
        StageName::Install,
        StageName::Verify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Probe => "probe",
            StageName::Dependencies => "dependencies",
            StageName::Source => "source",
            StageName::Build => "build",
            StageName::Install => "install",
            StageName::Verify => "verify",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Skipped,
    Succeeded,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Skipped => "skipped",
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed => "failed",
        }
    }
}

/// Non-failing outcome of a stage action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub status: StageStatus,
    pub detail: String,
}

impl StageOutcome {
    pub fn succeeded(detail: impl Into<String>) -> Self {
        StageOutcome {
            status: StageStatus::Succeeded,
            detail: detail.into(),
        }
    }

    pub fn skipped(detail: impl Into<String>) -> Self {
        StageOutcome {
            status: StageStatus::Skipped,
            detail: detail.into(),
        }
    }
}

/// Recorded outcome of one stage. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    pub stage: StageName,
    pub status: StageStatus,
    pub detail: String,
    pub error: Option<ErrorKind>,
    pub diagnostic: Option<String>,
}

/// The verified build output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub version: String,
    pub size: u64,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// First 10 characters of a commit id.
pub fn short_id(id: &str) -> &str {
    id.get(..10).unwrap_or(id)
}
