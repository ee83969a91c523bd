//! Settings file loader.
//!
//! Settings provide the defaults that command line flags override. The file is
//! optional and only ever read; every field in it is optional too.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variable naming an explicit settings file
pub const SETTINGS_ENV: &str = "PROVISION_SETTINGS";

/// Repository built when `--repo` is not given
pub const DEFAULT_REPO: &str = "https://github.com/provision-forks/app.git";
pub const DEFAULT_BRANCH: &str = "master";

/// Debian packages the configure/compile toolchain needs
pub const DEFAULT_PACKAGES: &[&str] = &[
    "autoconf",
    "automake",
    "build-essential",
    "ca-certificates",
    "curl",
    "git",
    "libtool",
    "pkg-config",
];

/// On-disk settings, all optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub jobs: Option<u32>,
    /// Root for the default source, build and log directories
    pub workspace: Option<PathBuf>,
    pub source_dir: Option<PathBuf>,
    pub build_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub packages: Option<Vec<String>>,
    pub install_prefix: Option<PathBuf>,
    /// Artifact path relative to the build directory
    pub artifact: Option<PathBuf>,
    pub smoke_args: Option<Vec<String>>,
}

/// Get the global settings path: `$PROVISION_SETTINGS` or `~/.config/provision/settings.json`
pub fn get_global_settings_path() -> Option<PathBuf> {
    if let Some(explicit) = std::env::var_os(SETTINGS_ENV) {
        return Some(PathBuf::from(explicit));
    }
    dirs::config_dir().map(|dir| dir.join("provision").join("settings.json"))
}

/// Load settings from a JSON file; a missing file yields defaults.
pub fn load_settings_from_file(path: &Path) -> Result<Settings, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Settings::default()),
        Err(e) => return Err(ConfigError::IoError(e)),
    };

    serde_json::from_str(&content).map_err(|source| ConfigError::InvalidJson {
        path: path.display().to_string(),
        source,
    })
}

/// Load the global settings, if any.
pub fn load_global_settings() -> Result<Settings, ConfigError> {
    match get_global_settings_path() {
        Some(path) => load_settings_from_file(&path),
        None => Ok(Settings::default()),
    }
}

/// Default workspace root: `~/provision`
pub fn default_workspace() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join("provision"))
        .ok_or(ConfigError::NoHomeDirectory)
}

/// Detected CPU count, or 4 when detection fails.
pub fn default_jobs() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(4)
        .max(1)
}
