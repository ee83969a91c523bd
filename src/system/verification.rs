//! Post-build artifact verification
//!
//! Confirms the build left an executable at the configured location and that
//! it runs: one smoke invocation with stdin closed must exit zero. The artifact
//! is only read and executed, never modified.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use super::{CommandRunner, CommandSpec};
use crate::error::{PipelineError, Result};
use crate::models::{Artifact, Configuration};

pub struct ArtifactVerifier<'a, R: CommandRunner> {
    runner: &'a R,
}

impl<'a, R: CommandRunner> ArtifactVerifier<'a, R> {
    pub fn new(runner: &'a R) -> Self {
        ArtifactVerifier { runner }
    }

    pub async fn verify(&self, config: &Configuration) -> Result<Artifact> {
        let path = config.artifact_path();
        let size = check_executable(&path)?;
        log::info!("[Verify] Found artifact {} ({} bytes)", path.display(), size);

        let spec = CommandSpec::new(path.to_string_lossy())
            .args(config.smoke_args.iter().cloned())
            .current_dir(&config.build_dir);
        log::info!("[Verify] Smoke test: {}", spec.display());

        let output = self.runner.run(&spec).await.map_err(|e| {
            PipelineError::verification(
                format!("artifact {} could not be executed: {}", path.display(), e),
                None,
            )
        })?;
        if !output.success() {
            return Err(PipelineError::verification(
                format!("smoke test failed with {}", output.describe_exit()),
                output.diagnostic(),
            ));
        }

        let version = first_line(&output.stdout)
            .or_else(|| first_line(&output.stderr))
            .unwrap_or_else(|| "unknown".to_string());
        log::info!("[Verify] Artifact reports version: {}", version);

        Ok(Artifact {
            path,
            version,
            size,
        })
    }
}

/// Returns the file size if `path` is an executable regular file.
fn check_executable(path: &Path) -> Result<u64> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(PipelineError::verification(
                format!(
                    "build exited successfully but produced no artifact at {}",
                    path.display()
                ),
                None,
            ))
        }
        Err(e) => {
            return Err(PipelineError::verification(
                format!("cannot stat artifact {}: {}", path.display(), e),
                None,
            ))
        }
    };

    if !metadata.is_file() {
        return Err(PipelineError::verification(
            format!("artifact path {} is not a regular file", path.display()),
            None,
        ));
    }
    if metadata.permissions().mode() & 0o111 == 0 {
        return Err(PipelineError::verification(
            format!("artifact {} is not executable", path.display()),
            None,
        ));
    }
    Ok(metadata.len())
}

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
