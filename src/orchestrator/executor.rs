//! Build Invoker: configure argument derivation, configure, compile, install.
//!
//! Arguments are derived purely from the [`Configuration`]; the invoker then
//! drives the project's own autotools-style build out of tree, with the build
//! directory as working directory. Each step runs exactly once.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::models::{Configuration, StageOutcome, ToolchainInfo};
use crate::system::{CommandRunner, CommandSpec};

/// Maps the configuration to the configure step's argument list.
///
/// No host inspection happens here; identical configurations always yield
/// identical arguments.
pub fn derive_configure_args(config: &Configuration) -> Vec<String> {
    let mut args = vec![
        format!("--prefix={}", config.install_prefix.display()),
        "--disable-debug".to_string(),
        "CFLAGS=-O2".to_string(),
        "CXXFLAGS=-O2".to_string(),
    ];

    if config.install_rust_toolchain {
        args.push("--enable-rust".to_string());
    } else {
        args.push("--disable-rust".to_string());
        args.push("--disable-alt-query".to_string());
    }

    if config.static_build {
        args.push("--enable-static".to_string());
        args.push("--disable-shared".to_string());
        args.push("LDFLAGS=-static".to_string());
        args.push("LIBS=-static-libgcc -static-libstdc++".to_string());
    }

    args
}

pub struct BuildInvoker<'a, R: CommandRunner> {
    runner: &'a R,
    config: &'a Configuration,
    /// Prepended to PATH so configure and make find a rustup toolchain
    toolchain_bin: Option<&'a Path>,
}

impl<'a, R: CommandRunner> BuildInvoker<'a, R> {
    pub fn new(runner: &'a R, config: &'a Configuration) -> Self {
        BuildInvoker {
            runner,
            config,
            toolchain_bin: None,
        }
    }

    /// Use the toolchain found or installed by the dependency stage.
    pub fn with_toolchain(mut self, toolchain: Option<&'a ToolchainInfo>) -> Self {
        self.toolchain_bin = toolchain.and_then(ToolchainInfo::bin_dir);
        self
    }

    fn command(&self, program: impl Into<String>) -> CommandSpec {
        let spec = CommandSpec::new(program);
        match self.toolchain_bin {
            Some(dir) => spec.path_prefix(dir),
            None => spec,
        }
    }

    /// Configure then compile. Returns the path the artifact should now exist at.
    pub async fn build(&self) -> Result<(StageOutcome, PathBuf)> {
        self.configure().await?;
        self.compile().await?;
        let artifact = self.config.artifact_path();
        Ok((
            StageOutcome::succeeded(format!(
                "configured and compiled with -j{} into {}",
                self.config.jobs,
                self.config.build_dir.display()
            )),
            artifact,
        ))
    }

    /// Runs the project's configure script once with the derived arguments.
    pub async fn configure(&self) -> Result<()> {
        let source = &self.config.source_dir;
        fs::create_dir_all(&self.config.build_dir).map_err(|e| {
            PipelineError::configure(
                format!("cannot create {}: {}", self.config.build_dir.display(), e),
                None,
            )
        })?;

        let configure = source.join("configure");
        if !configure.exists() {
            let autogen = source.join("autogen.sh");
            if !autogen.exists() {
                return Err(PipelineError::configure(
                    format!(
                        "neither configure nor autogen.sh found in {}",
                        source.display()
                    ),
                    None,
                ));
            }
            log::info!("[Build] [BOOTSTRAP] Generating configure via autogen.sh");
            let spec = self.command("sh").arg("./autogen.sh").current_dir(source);
            self.run_step(&spec, PipelineError::configure).await?;
        }

        let args = derive_configure_args(self.config);
        let spec = self.command(configure.to_string_lossy())
            .args(args)
            .current_dir(&self.config.build_dir);
        log::info!("[Build] [CONFIGURE] {}", spec.display());
        self.run_step(&spec, PipelineError::configure).await
    }

    /// Runs the native build with the configured parallelism.
    pub async fn compile(&self) -> Result<()> {
        let spec = self
            .command("make")
            .arg(format!("-j{}", self.config.jobs))
            .current_dir(&self.config.build_dir);
        log::info!("[Build] [COMPILE] {} (in {})", spec.display(), self.config.build_dir.display());
        self.run_step(&spec, PipelineError::build).await
    }

    /// `make install` into the configured prefix.
    pub async fn install(&self, is_root: bool) -> Result<StageOutcome> {
        let spec = self
            .command("make")
            .arg("install")
            .current_dir(&self.config.build_dir)
            .privileged(is_root);
        log::info!("[Build] [INSTALL] {}", spec.display());
        self.run_step(&spec, PipelineError::build).await?;
        Ok(StageOutcome::succeeded(format!(
            "installed into {}",
            self.config.install_prefix.display()
        )))
    }

    async fn run_step<F>(&self, spec: &CommandSpec, classify: F) -> Result<()>
    where
        F: Fn(String, Option<String>) -> PipelineError,
    {
        let output = self
            .runner
            .run(spec)
            .await
            .map_err(|e| classify(format!("could not run {}: {}", spec.program, e), None))?;
        if output.success() {
            Ok(())
        } else {
            Err(classify(
                format!("{} failed with {}", spec.display(), output.describe_exit()),
                output.diagnostic(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_config() -> Configuration {
        Configuration {
            repo_url: "https://example.invalid/app.git".to_string(),
            branch: "master".to_string(),
            install_rust_toolchain: false,
            static_build: false,
            clean_build: false,
            install_after_build: false,
            jobs: 4,
            source_dir: PathBuf::from("/tmp/provision/source"),
            build_dir: PathBuf::from("/tmp/provision/build"),
            log_dir: PathBuf::from("/tmp/provision/logs"),
            required_packages: vec![],
            install_prefix: PathBuf::from("/usr/local"),
            artifact: PathBuf::from("src/app"),
            smoke_args: vec!["--version".to_string()],
        }
    }

    #[test]
    fn test_default_args_disable_rust() {
        let args = derive_configure_args(&test_config());
        assert_eq!(
            args,
            vec![
                "--prefix=/usr/local",
                "--disable-debug",
                "CFLAGS=-O2",
                "CXXFLAGS=-O2",
                "--disable-rust",
                "--disable-alt-query",
            ]
        );
    }

    #[test]
    fn test_with_rust_enables_rust_only() {
        let mut config = test_config();
        config.install_rust_toolchain = true;
        let args = derive_configure_args(&config);
        assert!(args.contains(&"--enable-rust".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--disable-rust")));
        assert!(!args.contains(&"--disable-alt-query".to_string()));
    }

    #[test]
    fn test_static_adds_link_directives() {
        let mut config = test_config();
        config.static_build = true;
        let args = derive_configure_args(&config);
        assert!(args.contains(&"LDFLAGS=-static".to_string()));
        assert!(args.contains(&"LIBS=-static-libgcc -static-libstdc++".to_string()));
        assert!(args.contains(&"--disable-shared".to_string()));
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let mut config = test_config();
        config.static_build = true;
        config.install_rust_toolchain = true;
        assert_eq!(derive_configure_args(&config), derive_configure_args(&config));
    }

    #[test]
    fn test_prefix_follows_configuration() {
        let mut config = test_config();
        config.install_prefix = PathBuf::from("/opt/app");
        assert_eq!(derive_configure_args(&config)[0], "--prefix=/opt/app");
    }
}
