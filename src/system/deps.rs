//! Dependency Installer
//!
//! Brings the host's package set and (optionally) the Rust toolchain up to what
//! the build needs. Installs only what the snapshot reports missing, in a
//! single package-manager call, and re-checks afterwards. Nothing here retries:
//! a failed install needs the operator.

use std::path::PathBuf;

use super::probe::{cargo_bin_dir, detect_toolchain, query_installed};
use super::{CommandRunner, CommandSpec};
use crate::error::{PipelineError, Result};
use crate::models::{Configuration, EnvironmentSnapshot, PackageProbe, StageOutcome, ToolchainInfo};

/// rustup bootstrap, non-interactive, minimal profile
const RUSTUP_BOOTSTRAP: &str =
    "curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh -s -- -y --profile minimal";

pub struct DependencyInstaller<'a, R: CommandRunner> {
    runner: &'a R,
    cargo_bin: Option<PathBuf>,
}

impl<'a, R: CommandRunner> DependencyInstaller<'a, R> {
    pub fn new(runner: &'a R) -> Self {
        DependencyInstaller {
            runner,
            cargo_bin: cargo_bin_dir(),
        }
    }

    /// Where rustup puts `rustc`; used for re-verification.
    pub fn with_cargo_bin(mut self, dir: Option<PathBuf>) -> Self {
        self.cargo_bin = dir;
        self
    }

    /// Installs what is missing. Also returns the toolchain the build should
    /// use, whether it was already present or just acquired.
    pub async fn ensure(
        &self,
        config: &Configuration,
        snapshot: &EnvironmentSnapshot,
    ) -> Result<(StageOutcome, Option<ToolchainInfo>)> {
        let mut performed = Vec::new();
        let mut toolchain = snapshot.toolchain.clone();

        match snapshot.package_probe {
            PackageProbe::Supported => {
                let missing = snapshot.missing_packages();
                if !missing.is_empty() {
                    self.install_packages(&missing, snapshot.is_root).await?;
                    performed.push(format!("installed {}", missing.join(" ")));
                }
            }
            PackageProbe::Unsupported => {
                log::warn!(
                    "[Deps] Cannot query packages on {}; assuming {} are installed",
                    snapshot.os.describe(),
                    config.required_packages.join(" ")
                );
            }
        }

        if config.install_rust_toolchain {
            match &toolchain {
                Some(tc) => log::info!("[Deps] Rust toolchain {} already present", tc.version),
                None => {
                    let acquired = self.acquire_toolchain().await?;
                    performed.push(format!("installed rust toolchain {}", acquired.version));
                    toolchain = Some(acquired);
                }
            }
        }

        let outcome = if performed.is_empty() {
            log::info!("[Deps] Nothing to install");
            StageOutcome::skipped("all dependencies already present")
        } else {
            StageOutcome::succeeded(performed.join("; "))
        };
        Ok((outcome, toolchain))
    }

    async fn install_packages(&self, missing: &[String], is_root: bool) -> Result<()> {
        // Fresh images ship without package lists
        let refresh = update_command(is_root);
        log::info!("[Deps] Refreshing package index: {}", refresh.display());
        let output = self.runner.run(&refresh).await.map_err(|e| {
            PipelineError::dependency(format!("could not run {}: {}", refresh.program, e), None)
        })?;
        if !output.success() {
            return Err(PipelineError::dependency(
                format!("package index refresh failed with {}", output.describe_exit()),
                output.diagnostic(),
            ));
        }

        let spec = install_command(missing, is_root);
        log::info!("[Deps] Installing {} package(s): {}", missing.len(), spec.display());

        let output = self.runner.run(&spec).await.map_err(|e| {
            PipelineError::dependency(format!("could not run {}: {}", spec.program, e), None)
        })?;
        if !output.success() {
            return Err(PipelineError::dependency(
                format!("package installation failed with {}", output.describe_exit()),
                output.diagnostic(),
            ));
        }

        // Postcondition: every requested package is now installed
        let still_missing: Vec<String> = match query_installed(self.runner, missing).await {
            Some(state) => state
                .into_iter()
                .filter(|(_, installed)| !installed)
                .map(|(name, _)| name)
                .collect(),
            None => missing.to_vec(),
        };
        if !still_missing.is_empty() {
            return Err(PipelineError::dependency(
                format!(
                    "package manager succeeded but {} still missing",
                    still_missing.join(" ")
                ),
                output.diagnostic(),
            ));
        }
        Ok(())
    }

    async fn acquire_toolchain(&self) -> Result<ToolchainInfo> {
        log::info!("[Deps] Acquiring Rust toolchain via rustup");
        let spec = CommandSpec::new("sh").arg("-c").arg(RUSTUP_BOOTSTRAP);
        let output = self.runner.run(&spec).await.map_err(|e| {
            PipelineError::dependency(format!("could not start rustup bootstrap: {}", e), None)
        })?;
        if !output.success() {
            return Err(PipelineError::dependency(
                format!("rustup bootstrap failed with {}", output.describe_exit()),
                output.diagnostic(),
            ));
        }

        match detect_toolchain(self.runner, self.cargo_bin.as_deref()).await {
            Some(tc) => {
                log::info!("[Deps] Rust toolchain {} verified at {}", tc.version, tc.rustc.display());
                Ok(tc)
            }
            None => Err(PipelineError::dependency(
                "toolchain acquisition reported success but rustc is still not invocable",
                output.diagnostic(),
            )),
        }
    }
}

/// Package index refresh, run once before installing a non-empty set.
pub fn update_command(is_root: bool) -> CommandSpec {
    CommandSpec::new("apt-get")
        .arg("update")
        .env("DEBIAN_FRONTEND", "noninteractive")
        .interactive()
        .privileged(is_root)
}

/// The single package-manager invocation for a missing set.
pub fn install_command(packages: &[String], is_root: bool) -> CommandSpec {
    CommandSpec::new("apt-get")
        .args(["install", "-y", "--no-install-recommends"])
        .args(packages.iter().cloned())
        .env("DEBIAN_FRONTEND", "noninteractive")
        .interactive()
        .privileged(is_root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_command_as_root() {
        let spec = install_command(&["git".to_string(), "autoconf".to_string()], true);
        assert_eq!(spec.program, "apt-get");
        assert_eq!(
            spec.args,
            vec!["install", "-y", "--no-install-recommends", "git", "autoconf"]
        );
        assert!(spec
            .env
            .contains(&("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string())));
    }

    #[test]
    fn test_update_command() {
        let spec = update_command(true);
        assert_eq!(spec.program, "apt-get");
        assert_eq!(spec.args, vec!["update"]);
        assert_eq!(update_command(false).program, "sudo");
    }

    #[test]
    fn test_install_command_uses_sudo() {
        let spec = install_command(&["git".to_string()], false);
        assert_eq!(spec.program, "sudo");
        assert_eq!(spec.args[0], "env");
        assert_eq!(spec.args[1], "DEBIAN_FRONTEND=noninteractive");
        assert_eq!(spec.args[2], "apt-get");
        assert_eq!(spec.args.last().map(String::as_str), Some("git"));
    }
}
