//! Build Orchestration: probe -> dependencies -> source -> build -> (install) -> verify.
//!
//! Stages run strictly in sequence, each at most once. The first failure is
//! recorded, the run moves to `Aborted` and nothing after it executes.

pub mod executor;
pub mod state;

pub use executor::{derive_configure_args, BuildInvoker};
pub use state::{PipelineRun, PipelineState, RunStatus};

use std::path::PathBuf;

use crate::error::PipelineError;
use crate::models::{
    Artifact, Configuration, EnvironmentSnapshot, StageName, StageOutcome, StageResult,
    StageStatus, ToolchainInfo,
};
use crate::source::synchronize_source;
use crate::system::deps::DependencyInstaller;
use crate::system::probe::EnvironmentProber;
use crate::system::verification::ArtifactVerifier;
use crate::system::CommandRunner;

type StageFailure = (StageName, PipelineError);

/// Drives one pipeline run over an immutable configuration.
pub struct Orchestrator<R: CommandRunner> {
    config: Configuration,
    runner: R,
    run: PipelineRun,
    os_release: Option<PathBuf>,
    cargo_bin: Option<Option<PathBuf>>,
    toolchain: Option<ToolchainInfo>,
}

impl<R: CommandRunner> Orchestrator<R> {
    pub fn new(config: Configuration, runner: R) -> Self {
        let mut run = PipelineRun::new();
        // Init -> Configured is always legal
        let _ = run.transition_to(PipelineState::Configured);
        Orchestrator {
            config,
            runner,
            run,
            os_release: None,
            cargo_bin: None,
            toolchain: None,
        }
    }

    /// Read OS identification from a file other than `/etc/os-release`.
    pub fn with_os_release(mut self, path: impl Into<PathBuf>) -> Self {
        self.os_release = Some(path.into());
        self
    }

    /// Override where a rustup-installed `rustc` is looked for.
    pub fn with_cargo_bin(mut self, dir: Option<PathBuf>) -> Self {
        self.cargo_bin = Some(dir);
        self
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Executes every stage and returns the finished run record.
    pub async fn run(mut self) -> PipelineRun {
        log::info!(
            "[Pipeline] Starting: {} ({}) -> {}",
            self.config.repo_url,
            self.config.branch,
            self.config.build_dir.display()
        );

        match self.drive().await {
            Ok(artifact) => {
                self.run.set_artifact(artifact);
                self.advance(PipelineState::Done);
                log::info!("[Pipeline] Done");
            }
            Err((stage, error)) => self.abort(stage, error),
        }
        self.run
    }

    async fn drive(&mut self) -> Result<Artifact, StageFailure> {
        let snapshot = self.probe_stage().await?;
        self.dependencies_stage(&snapshot).await?;
        self.source_stage(&snapshot).await?;
        self.build_stage().await?;
        self.install_stage(&snapshot).await?;
        self.verify_stage().await
    }

    async fn probe_stage(&mut self) -> Result<EnvironmentSnapshot, StageFailure> {
        let mut prober = EnvironmentProber::new(&self.runner);
        if let Some(path) = &self.os_release {
            prober = prober.with_os_release(path.clone());
        }
        if let Some(dir) = &self.cargo_bin {
            prober = prober.with_cargo_bin(dir.clone());
        }
        let result = prober.probe(&self.config).await;
        let result = result.map(|snapshot| (StageOutcome::succeeded(snapshot.summary()), snapshot));
        self.settle(StageName::Probe, result)
    }

    async fn dependencies_stage(&mut self, snapshot: &EnvironmentSnapshot) -> Result<(), StageFailure> {
        let mut installer = DependencyInstaller::new(&self.runner);
        if let Some(dir) = &self.cargo_bin {
            installer = installer.with_cargo_bin(dir.clone());
        }
        let result = installer.ensure(&self.config, snapshot).await;
        self.toolchain = self.settle(StageName::Dependencies, result)?;
        Ok(())
    }

    async fn source_stage(&mut self, snapshot: &EnvironmentSnapshot) -> Result<(), StageFailure> {
        let result = synchronize_source(&self.config, &snapshot.working_copy).await;
        self.settle(StageName::Source, result.map(|outcome| (outcome, ())))
    }

    async fn build_stage(&mut self) -> Result<(), StageFailure> {
        let result = BuildInvoker::new(&self.runner, &self.config)
            .with_toolchain(self.toolchain.as_ref())
            .build()
            .await;
        self.settle(StageName::Build, result.map(|(outcome, _artifact)| (outcome, ())))
    }

    async fn install_stage(&mut self, snapshot: &EnvironmentSnapshot) -> Result<(), StageFailure> {
        if !self.config.install_after_build {
            // Not a state transition: Built goes straight to Verified
            self.record(StageName::Install, &StageOutcome::skipped("install not requested"));
            return Ok(());
        }
        let result = BuildInvoker::new(&self.runner, &self.config)
            .with_toolchain(self.toolchain.as_ref())
            .install(snapshot.is_root)
            .await;
        self.settle(StageName::Install, result.map(|outcome| (outcome, ())))
    }

    async fn verify_stage(&mut self) -> Result<Artifact, StageFailure> {
        let result = ArtifactVerifier::new(&self.runner).verify(&self.config).await;
        let result = result.map(|artifact| {
            let outcome = StageOutcome::succeeded(format!(
                "{} runs, reports '{}'",
                artifact.path.display(),
                artifact.version
            ));
            (outcome, artifact)
        });
        self.settle(StageName::Verify, result)
    }

    /// Records a finished stage and advances the state machine, or hands the
    /// failure back for abort.
    fn settle<T>(
        &mut self,
        stage: StageName,
        result: Result<(StageOutcome, T), PipelineError>,
    ) -> Result<T, StageFailure> {
        match result {
            Ok((outcome, value)) => {
                self.record(stage, &outcome);
                self.advance(PipelineState::after(stage));
                Ok(value)
            }
            Err(error) => Err((stage, error)),
        }
    }

    fn record(&mut self, stage: StageName, outcome: &StageOutcome) {
        match outcome.status {
            StageStatus::Skipped => log::info!("[Pipeline] {} skipped: {}", stage, outcome.detail),
            _ => log::info!("[Pipeline] {} succeeded: {}", stage, outcome.detail),
        }
        self.push(StageResult {
            stage,
            status: outcome.status,
            detail: outcome.detail.clone(),
            error: None,
            diagnostic: None,
        });
    }

    fn abort(&mut self, stage: StageName, error: PipelineError) {
        let kind = error.kind();
        log::error!("[Pipeline] Stage '{}' failed ({}): {}", stage, kind, error);
        if let Some(diagnostic) = error.diagnostic() {
            for line in diagnostic.lines() {
                log::error!("[Pipeline]   | {}", line);
            }
        }
        self.push(StageResult {
            stage,
            status: StageStatus::Failed,
            detail: error.to_string(),
            error: Some(kind),
            diagnostic: error.diagnostic().map(str::to_string),
        });
        self.advance(PipelineState::Aborted { stage, kind });
    }

    fn push(&mut self, result: StageResult) {
        if let Err(e) = self.run.record(result) {
            log::error!("[Pipeline] {}", e);
        }
    }

    fn advance(&mut self, next: PipelineState) {
        if let Err(e) = self.run.transition_to(next) {
            log::error!("[Pipeline] {}", e);
        }
    }
}
