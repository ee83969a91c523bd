//! Configuration Resolver
//!
//! Turns invocation tokens into one immutable [`Configuration`]:
//!
//! 1. Built-in defaults (`loader::DEFAULT_*`, home-rooted directories)
//! 2. Optional settings file (see [`loader`])
//! 3. Command line flags
//!
//! Unknown flags, missing values and malformed numbers are validation errors;
//! nothing is guessed. `--help` short-circuits before any defaults are resolved.

pub mod loader;

use std::ffi::OsString;
use std::path::PathBuf;

use clap::error::{ContextKind, ContextValue, ErrorKind as ClapErrorKind};
use clap::Parser;

use crate::error::{PipelineError, Result};
use crate::models::Configuration;
use loader::{default_jobs, default_workspace, Settings, DEFAULT_BRANCH, DEFAULT_PACKAGES, DEFAULT_REPO};

/// Command line surface
#[derive(Parser, Debug)]
#[command(
    name = "provision",
    about = "Install build dependencies, sync a repository branch, build it and smoke-test the result",
    long_about = None,
    disable_version_flag = true
)]
struct Cli {
    /// Repository to synchronize from
    #[arg(long, value_name = "URL")]
    repo: Option<String>,

    /// Branch to track
    #[arg(long, value_name = "NAME")]
    branch: Option<String>,

    /// Install a Rust toolchain if missing and enable Rust support
    #[arg(long = "with-rust")]
    with_rust: bool,

    /// Link the artifact statically
    #[arg(long = "static")]
    static_build: bool,

    /// Delete source and build directories first (local changes are lost)
    #[arg(long)]
    clean: bool,

    /// Run `make install` after a successful build
    #[arg(long)]
    install: bool,

    /// Parallel compile jobs [default: CPU count]
    #[arg(long, value_name = "N", value_parser = parse_jobs)]
    jobs: Option<u32>,
}

/// What the invocation asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Run the pipeline with this configuration
    Run(Configuration),
    /// Print this usage text and exit successfully
    Help(String),
}

/// Resolves tokens (program name first) against `settings`.
pub fn resolve<I, T>(tokens: I, settings: &Settings) -> Result<Resolution>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(tokens) {
        Ok(cli) => cli,
        Err(e) if e.kind() == ClapErrorKind::DisplayHelp => {
            return Ok(Resolution::Help(e.render().to_string()))
        }
        Err(e) => return Err(validation_error(&e)),
    };

    let repo = non_empty("--repo", cli.repo.or_else(|| settings.repo.clone()))?
        .unwrap_or_else(|| DEFAULT_REPO.to_string());
    let branch = non_empty("--branch", cli.branch.or_else(|| settings.branch.clone()))?
        .unwrap_or_else(|| DEFAULT_BRANCH.to_string());

    let jobs = match cli.jobs.or(settings.jobs) {
        Some(0) => {
            return Err(PipelineError::validation(
                "jobs",
                "must be a positive integer, got 0",
            ))
        }
        Some(jobs) => jobs,
        None => default_jobs(),
    };

    let workspace = match &settings.workspace {
        Some(path) => path.clone(),
        None => default_workspace()?,
    };

    let config = Configuration {
        repo_url: repo,
        branch,
        install_rust_toolchain: cli.with_rust,
        static_build: cli.static_build,
        clean_build: cli.clean,
        install_after_build: cli.install,
        jobs,
        source_dir: settings
            .source_dir
            .clone()
            .unwrap_or_else(|| workspace.join("source")),
        build_dir: settings
            .build_dir
            .clone()
            .unwrap_or_else(|| workspace.join("build")),
        log_dir: settings
            .log_dir
            .clone()
            .unwrap_or_else(|| workspace.join("logs")),
        required_packages: settings
            .packages
            .clone()
            .unwrap_or_else(|| DEFAULT_PACKAGES.iter().map(|p| p.to_string()).collect()),
        install_prefix: settings
            .install_prefix
            .clone()
            .unwrap_or_else(|| PathBuf::from("/usr/local")),
        artifact: settings
            .artifact
            .clone()
            .unwrap_or_else(|| PathBuf::from("src/app")),
        smoke_args: settings
            .smoke_args
            .clone()
            .unwrap_or_else(|| vec!["--version".to_string()]),
    };

    if config.source_dir == config.build_dir {
        return Err(PipelineError::validation(
            "build_dir",
            "source and build directories must differ",
        ));
    }
    if config.artifact.is_absolute() {
        return Err(PipelineError::validation(
            "artifact",
            "must be relative to the build directory",
        ));
    }

    Ok(Resolution::Run(config))
}

/// Resolves the process arguments against the global settings file.
pub fn resolve_from_env() -> Result<Resolution> {
    let settings = loader::load_global_settings()?;
    resolve(std::env::args_os(), &settings)
}

fn parse_jobs(raw: &str) -> std::result::Result<u32, String> {
    match raw.trim().parse::<u32>() {
        Ok(0) => Err("must be a positive integer, got 0".to_string()),
        Ok(jobs) => Ok(jobs),
        Err(_) => Err(format!("must be a positive integer, got '{}'", raw)),
    }
}

fn non_empty(flag: &str, value: Option<String>) -> Result<Option<String>> {
    match value {
        Some(v) if v.trim().is_empty() => Err(PipelineError::validation(flag, "must not be empty")),
        other => Ok(other),
    }
}

/// Maps a clap parse failure onto a validation error naming the token.
fn validation_error(err: &clap::Error) -> PipelineError {
    let arg = match err.get(ContextKind::InvalidArg) {
        Some(ContextValue::String(arg)) => Some(arg.clone()),
        Some(ContextValue::Strings(args)) => Some(args.join(" ")),
        _ => None,
    }
    // "--jobs <N>" -> "--jobs"
    .map(|arg| arg.split_whitespace().next().unwrap_or_default().to_string());

    let value = match err.get(ContextKind::InvalidValue) {
        Some(ContextValue::String(value)) => Some(value.clone()),
        _ => None,
    };

    let token = match (arg, value) {
        (Some(arg), Some(value)) => format!("{} {}", arg, value),
        (Some(arg), None) => arg,
        (None, Some(value)) => value,
        (None, None) => "<arguments>".to_string(),
    };

    let rendered = err.render().to_string();
    let reason = rendered
        .lines()
        .next()
        .unwrap_or_default()
        .trim_start_matches("error:")
        .trim()
        .to_string();

    PipelineError::validation(token, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn settings() -> Settings {
        Settings {
            workspace: Some(PathBuf::from("/srv/provision")),
            ..Settings::default()
        }
    }

    fn run(tokens: &[&str]) -> Result<Resolution> {
        let mut argv = vec!["provision"];
        argv.extend_from_slice(tokens);
        resolve(argv, &settings())
    }

    fn config(tokens: &[&str]) -> Configuration {
        match run(tokens).expect("valid invocation") {
            Resolution::Run(config) => config,
            Resolution::Help(_) => panic!("unexpected help"),
        }
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]);
        assert_eq!(config.repo_url, DEFAULT_REPO);
        assert_eq!(config.branch, "master");
        assert!(!config.install_rust_toolchain);
        assert!(!config.static_build);
        assert!(!config.clean_build);
        assert!(!config.install_after_build);
        assert!(config.jobs >= 1);
        assert_eq!(config.source_dir, PathBuf::from("/srv/provision/source"));
        assert_eq!(config.build_dir, PathBuf::from("/srv/provision/build"));
        assert_eq!(config.artifact_path(), PathBuf::from("/srv/provision/build/src/app"));
        assert_eq!(config.required_packages.len(), DEFAULT_PACKAGES.len());
    }

    #[test]
    fn test_all_flags() {
        let config = config(&[
            "--repo",
            "https://example.invalid/x.git",
            "--branch",
            "stable",
            "--with-rust",
            "--static",
            "--clean",
            "--install",
            "--jobs",
            "12",
        ]);
        assert_eq!(config.repo_url, "https://example.invalid/x.git");
        assert_eq!(config.branch, "stable");
        assert!(config.install_rust_toolchain);
        assert!(config.static_build);
        assert!(config.clean_build);
        assert!(config.install_after_build);
        assert_eq!(config.jobs, 12);
    }

    #[test]
    fn test_flags_override_settings() {
        let settings = Settings {
            workspace: Some(PathBuf::from("/w")),
            branch: Some("develop".to_string()),
            jobs: Some(3),
            ..Settings::default()
        };
        let resolved = resolve(["provision", "--branch", "release"], &settings).unwrap();
        let Resolution::Run(config) = resolved else {
            panic!("expected run");
        };
        assert_eq!(config.branch, "release");
        assert_eq!(config.jobs, 3);
    }

    #[test]
    fn test_help_short_circuits() {
        match run(&["--help"]).unwrap() {
            Resolution::Help(text) => {
                assert!(text.contains("--with-rust"));
                assert!(text.contains("--jobs"));
            }
            Resolution::Run(_) => panic!("help must not produce a configuration"),
        }
    }

    #[test]
    fn test_jobs_zero_rejected() {
        let err = run(&["--jobs", "0"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("--jobs"));
    }

    #[test]
    fn test_jobs_non_numeric_rejected() {
        let err = run(&["--jobs", "abc"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_unknown_flag_rejected() {
        let err = run(&["--unknown-flag"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("--unknown-flag"));
    }

    #[test]
    fn test_positional_rejected() {
        let err = run(&["master"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_empty_branch_rejected() {
        let err = run(&["--branch", ""]).unwrap_err();
        assert_eq!(
            err,
            PipelineError::validation("--branch", "must not be empty")
        );
    }

    #[test]
    fn test_parse_jobs() {
        assert_eq!(parse_jobs("8"), Ok(8));
        assert!(parse_jobs("0").is_err());
        assert!(parse_jobs("-2").is_err());
        assert!(parse_jobs("four").is_err());
    }
}
