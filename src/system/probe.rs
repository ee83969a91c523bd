//! Environment Prober
//!
//! Read-only inspection of the host: OS family, required packages, Rust
//! toolchain and the state of the source directory. Absence of anything is a
//! finding, never an error; only an inaccessible filesystem fails the probe.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use git2::{Repository, StatusOptions};
use once_cell::sync::Lazy;
use regex::Regex;

use super::{is_root, CommandRunner, CommandSpec};
use crate::error::{PipelineError, Result};
use crate::models::{
    Configuration, EnvironmentSnapshot, OsFamily, OsInfo, PackageProbe, ToolchainInfo,
    WorkingCopyState,
};

const OS_RELEASE: &str = "/etc/os-release";

// "rustc 1.79.0 (129f3b996 2024-06-10)"
static RUSTC_VERSION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^rustc\s+(\d+\.\d+\.\d+\S*)").expect("Invalid rustc version regex")
});

/// Inspects the host and produces an [`EnvironmentSnapshot`].
pub struct EnvironmentProber<'a, R: CommandRunner> {
    runner: &'a R,
    os_release: PathBuf,
    cargo_bin: Option<PathBuf>,
    is_root: bool,
}

impl<'a, R: CommandRunner> EnvironmentProber<'a, R> {
    pub fn new(runner: &'a R) -> Self {
        EnvironmentProber {
            runner,
            os_release: PathBuf::from(OS_RELEASE),
            cargo_bin: cargo_bin_dir(),
            is_root: is_root(),
        }
    }

    /// Read OS identification from a different file.
    pub fn with_os_release(mut self, path: impl Into<PathBuf>) -> Self {
        self.os_release = path.into();
        self
    }

    /// Look for a rustup-installed `rustc` in a different directory.
    pub fn with_cargo_bin(mut self, dir: Option<PathBuf>) -> Self {
        self.cargo_bin = dir;
        self
    }

    pub async fn probe(&self, config: &Configuration) -> Result<EnvironmentSnapshot> {
        let os = read_os_info(&self.os_release)?;
        match os.family {
            OsFamily::Debian => log::info!("[Probe] Host: {}", os.describe()),
            OsFamily::Other | OsFamily::Unknown => log::warn!(
                "[Probe] Host '{}' is not Debian-family; package management may not work",
                os.describe()
            ),
        }

        let (package_probe, packages) = self.probe_packages(&config.required_packages).await;
        match package_probe {
            PackageProbe::Supported => {
                let missing: Vec<&String> = packages
                    .iter()
                    .filter(|(_, installed)| !**installed)
                    .map(|(name, _)| name)
                    .collect();
                if missing.is_empty() {
                    log::info!("[Probe] All {} required packages present", packages.len());
                } else {
                    log::info!("[Probe] Missing packages: {:?}", missing);
                }
            }
            PackageProbe::Unsupported => {
                log::warn!("[Probe] dpkg-query unavailable; package state unknown")
            }
        }

        let toolchain = detect_toolchain(self.runner, self.cargo_bin.as_deref()).await;
        match &toolchain {
            Some(tc) => log::info!("[Probe] Rust toolchain {} ({})", tc.version, tc.rustc.display()),
            None => log::info!("[Probe] No Rust toolchain found"),
        }

        let working_copy = inspect_working_copy(&config.source_dir)?;
        log::info!(
            "[Probe] Source directory {}: {}",
            config.source_dir.display(),
            working_copy
        );

        Ok(EnvironmentSnapshot {
            os,
            package_probe,
            packages,
            toolchain,
            working_copy,
            is_root: self.is_root,
        })
    }

    async fn probe_packages(&self, wanted: &[String]) -> (PackageProbe, BTreeMap<String, bool>) {
        match query_installed(self.runner, wanted).await {
            Some(installed) => (PackageProbe::Supported, installed),
            None => (PackageProbe::Unsupported, BTreeMap::new()),
        }
    }
}

/// Asks dpkg which of `wanted` are installed, in one call.
///
/// Returns `None` when dpkg-query cannot be started.
pub async fn query_installed<R: CommandRunner>(
    runner: &R,
    wanted: &[String],
) -> Option<BTreeMap<String, bool>> {
    let mut result: BTreeMap<String, bool> =
        wanted.iter().map(|name| (name.clone(), false)).collect();
    if wanted.is_empty() {
        return Some(result);
    }

    let spec = CommandSpec::new("dpkg-query")
        .arg("-W")
        .arg("-f=${Package} ${Status}\n")
        .args(wanted.iter().cloned());
    // dpkg-query exits 1 when some names are unknown; stdout still lists the rest
    let output = match runner.run(&spec).await {
        Ok(output) => output,
        Err(e) => {
            log::debug!("[Probe] dpkg-query not runnable: {}", e);
            return None;
        }
    };

    for (name, installed) in parse_dpkg_status(&output.stdout) {
        if let Some(entry) = result.get_mut(&name) {
            *entry = *entry || installed;
        }
    }
    Some(result)
}

/// Parses `${Package} ${Status}` lines into (name, installed) pairs.
fn parse_dpkg_status(stdout: &str) -> Vec<(String, bool)> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let package = parts.next()?;
            let status: Vec<&str> = parts.collect();
            let name = package.split(':').next().unwrap_or(package).to_string();
            // Status is "want flag state"; only "installed" counts
            let installed = status.last() == Some(&"installed");
            Some((name, installed))
        })
        .collect()
}

/// Finds an invocable `rustc`, first on PATH, then in `cargo_bin`.
pub async fn detect_toolchain<R: CommandRunner>(
    runner: &R,
    cargo_bin: Option<&Path>,
) -> Option<ToolchainInfo> {
    let mut candidates = vec![PathBuf::from("rustc")];
    if let Some(dir) = cargo_bin {
        candidates.push(dir.join("rustc"));
    }

    for rustc in candidates {
        let spec = CommandSpec::new(rustc.to_string_lossy()).arg("--version");
        match runner.run(&spec).await {
            Ok(output) if output.success() => {
                if let Some(version) = parse_rustc_version(&output.stdout) {
                    return Some(ToolchainInfo { version, rustc });
                }
            }
            Ok(output) => log::debug!(
                "[Probe] {} --version failed ({})",
                rustc.display(),
                output.describe_exit()
            ),
            Err(e) => log::debug!("[Probe] {} not runnable: {}", rustc.display(), e),
        }
    }
    None
}

fn parse_rustc_version(stdout: &str) -> Option<String> {
    let line = stdout.lines().next()?.trim();
    RUSTC_VERSION_REGEX
        .captures(line)
        .map(|caps| caps[1].to_string())
}

/// `$CARGO_HOME/bin`, defaulting to `~/.cargo/bin`.
pub fn cargo_bin_dir() -> Option<PathBuf> {
    match std::env::var_os("CARGO_HOME") {
        Some(home) => Some(PathBuf::from(home).join("bin")),
        None => dirs::home_dir().map(|home| home.join(".cargo").join("bin")),
    }
}

/// Reads and classifies `/etc/os-release`. A missing file yields an unknown OS.
pub fn read_os_info(path: &Path) -> Result<OsInfo> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(parse_os_release(&content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(OsInfo::unknown()),
        Err(e) => Err(PipelineError::Environment(format!(
            "cannot read {}: {}",
            path.display(),
            e
        ))),
    }
}

fn parse_os_release(content: &str) -> OsInfo {
    let mut fields: BTreeMap<&str, String> = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            fields.insert(key.trim(), value.to_string());
        }
    }

    let id = fields
        .get("ID")
        .map(|id| id.to_lowercase())
        .unwrap_or_else(|| "unknown".to_string());
    let id_like = fields
        .get("ID_LIKE")
        .map(|like| like.to_lowercase())
        .unwrap_or_default();

    let debian_like = |name: &str| name == "debian" || name == "ubuntu";
    let family = if debian_like(&id) || id_like.split_whitespace().any(debian_like) {
        OsFamily::Debian
    } else if fields.contains_key("ID") {
        OsFamily::Other
    } else {
        OsFamily::Unknown
    };

    OsInfo {
        family,
        id,
        version: fields.get("VERSION_ID").cloned(),
        pretty_name: fields.get("PRETTY_NAME").cloned(),
    }
}

/// Classifies the source directory without modifying it.
pub fn inspect_working_copy(path: &Path) -> Result<WorkingCopyState> {
    match fs::metadata(path) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(WorkingCopyState::Absent),
        Err(e) => {
            return Err(PipelineError::Environment(format!(
                "cannot inspect {}: {}",
                path.display(),
                e
            )))
        }
    }

    // An empty directory is as good as none: clone into it
    if fs::read_dir(path).map(|mut entries| entries.next().is_none()).unwrap_or(false) {
        return Ok(WorkingCopyState::Absent);
    }

    // Only a repository rooted exactly at `path` counts
    let repo = match Repository::open(path) {
        Ok(repo) => repo,
        Err(_) => return Ok(WorkingCopyState::Foreign),
    };
    if repo.is_bare() {
        return Ok(WorkingCopyState::Foreign);
    }

    let head = match repo.head() {
        Ok(head) => head,
        // Unborn HEAD: a checkout with nothing in it yet
        Err(_) => return Ok(WorkingCopyState::Foreign),
    };
    let branch = if head.is_branch() {
        head.shorthand().map(str::to_string)
    } else {
        None
    };
    let head_id = head
        .target()
        .map(|oid| oid.to_string())
        .unwrap_or_default();

    let mut options = StatusOptions::new();
    options.include_untracked(true).recurse_untracked_dirs(true);
    let changes = repo
        .statuses(Some(&mut options))
        .map_err(|e| {
            PipelineError::Environment(format!(
                "cannot read status of {}: {}",
                path.display(),
                e
            ))
        })?
        .len();

    if changes == 0 {
        Ok(WorkingCopyState::Clean {
            branch,
            head: head_id,
        })
    } else {
        Ok(WorkingCopyState::Dirty {
            branch,
            head: head_id,
            changes,
        })
    }
}
