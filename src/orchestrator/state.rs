//! Pipeline state machine and run record
//!
//! `PipelineState` encodes the legal lifecycle
//! `Init → Configured → Probed → DependenciesReady → SourceReady → Built →
//! (Installed) → Verified → Done`, with `Aborted` reachable from every
//! non-terminal state. `PipelineRun` accumulates the stage results of one
//! invocation and is discarded afterwards.

use std::fmt;

use chrono::{DateTime, Local};

use crate::error::ErrorKind;
use crate::models::{Artifact, StageName, StageResult, StageStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Init,
    Configured,
    Probed,
    DependenciesReady,
    SourceReady,
    Built,
    Installed,
    Verified,
    Done,
    Aborted { stage: StageName, kind: ErrorKind },
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Init => "init",
            PipelineState::Configured => "configured",
            PipelineState::Probed => "probed",
            PipelineState::DependenciesReady => "dependencies-ready",
            PipelineState::SourceReady => "source-ready",
            PipelineState::Built => "built",
            PipelineState::Installed => "installed",
            PipelineState::Verified => "verified",
            PipelineState::Done => "done",
            PipelineState::Aborted { .. } => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Aborted { .. })
    }

    /// Whether `next` may directly follow this state.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, PipelineState::Aborted { .. }) {
            return true;
        }
        matches!(
            (self, next),
            (PipelineState::Init, PipelineState::Configured)
                | (PipelineState::Configured, PipelineState::Probed)
                | (PipelineState::Probed, PipelineState::DependenciesReady)
                | (PipelineState::DependenciesReady, PipelineState::SourceReady)
                | (PipelineState::SourceReady, PipelineState::Built)
                | (PipelineState::Built, PipelineState::Installed)
                | (PipelineState::Built, PipelineState::Verified)
                | (PipelineState::Installed, PipelineState::Verified)
                | (PipelineState::Verified, PipelineState::Done)
        )
    }

    /// State reached when `stage` completes without failing.
    pub fn after(stage: StageName) -> PipelineState {
        match stage {
            StageName::Probe => PipelineState::Probed,
            StageName::Dependencies => PipelineState::DependenciesReady,
            StageName::Source => PipelineState::SourceReady,
            StageName::Build => PipelineState::Built,
            StageName::Install => PipelineState::Installed,
            StageName::Verify => PipelineState::Verified,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Aborted { stage, kind } => write!(f, "aborted({}, {})", stage, kind),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Aborted,
}

/// One invocation's ordered stage results.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    state: PipelineState,
    results: Vec<StageResult>,
    artifact: Option<Artifact>,
    started_at: DateTime<Local>,
    finished_at: Option<DateTime<Local>>,
}

impl PipelineRun {
    pub fn new() -> Self {
        PipelineRun {
            state: PipelineState::Init,
            results: Vec::new(),
            artifact: None,
            started_at: Local::now(),
            finished_at: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn results(&self) -> &[StageResult] {
        &self.results
    }

    pub fn result(&self, stage: StageName) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage == stage)
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    /// Succeeded iff the run reached `Done`, i.e. every non-skipped stage succeeded.
    pub fn status(&self) -> RunStatus {
        if self.state == PipelineState::Done
            && self
                .results
                .iter()
                .all(|r| r.status != StageStatus::Failed)
        {
            RunStatus::Succeeded
        } else {
            RunStatus::Aborted
        }
    }

    /// Process exit code: 0 when done, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        match self.status() {
            RunStatus::Succeeded => 0,
            RunStatus::Aborted => 1,
        }
    }

    /// The failing stage result, if the run aborted.
    pub fn failure(&self) -> Option<&StageResult> {
        self.results.iter().find(|r| r.status == StageStatus::Failed)
    }

    pub fn transition_to(&mut self, next: PipelineState) -> Result<(), String> {
        if !self.state.can_transition_to(next) {
            return Err(format!(
                "Invalid pipeline transition: {} -> {}",
                self.state, next
            ));
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Local::now());
        }
        Ok(())
    }

    /// Appends a result; stages must arrive in order and at most once.
    pub fn record(&mut self, result: StageResult) -> Result<(), String> {
        if self.state.is_terminal() {
            return Err(format!(
                "Cannot record stage '{}' after the run ended ({})",
                result.stage, self.state
            ));
        }
        if let Some(last) = self.results.last() {
            if last.stage >= result.stage {
                return Err(format!(
                    "Stage '{}' recorded out of order after '{}'",
                    result.stage, last.stage
                ));
            }
        }
        self.results.push(result);
        Ok(())
    }

    pub fn set_artifact(&mut self, artifact: Artifact) {
        self.artifact = Some(artifact);
    }

    /// Multi-line human summary of the run.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        for result in &self.results {
            let mut line = format!("  {:<13} {:<9} {}", result.stage, result.status.as_str(), result.detail);
            if let Some(kind) = result.error {
                line.push_str(&format!(" [{}]", kind));
            }
            lines.push(line);
        }
        if let Some(artifact) = &self.artifact {
            lines.push(format!("  artifact      {}", artifact.path.display()));
            lines.push(format!("  version       {}", artifact.version));
            lines.push(format!("  size          {} bytes", artifact.size));
        }
        if let Some(finished) = self.finished_at {
            let elapsed = finished - self.started_at;
            lines.push(format!(
                "  finished      {} in {}.{:03}s",
                self.state,
                elapsed.num_seconds(),
                elapsed.num_milliseconds().rem_euclid(1000)
            ));
        }
        lines.join("\n")
    }
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(stage: StageName, status: StageStatus) -> StageResult {
        StageResult {
            stage,
            status,
            detail: String::new(),
            error: None,
            diagnostic: None,
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            PipelineState::Configured,
            PipelineState::Probed,
            PipelineState::DependenciesReady,
            PipelineState::SourceReady,
            PipelineState::Built,
            PipelineState::Verified,
            PipelineState::Done,
        ];
        let mut run = PipelineRun::new();
        for state in path {
            run.transition_to(state).expect("legal transition");
        }
        assert!(run.state().is_terminal());
    }

    #[test]
    fn test_install_is_optional_but_ordered() {
        assert!(PipelineState::Built.can_transition_to(PipelineState::Installed));
        assert!(PipelineState::Installed.can_transition_to(PipelineState::Verified));
        assert!(!PipelineState::Verified.can_transition_to(PipelineState::Installed));
    }

    #[test]
    fn test_cannot_skip_stages() {
        assert!(!PipelineState::Probed.can_transition_to(PipelineState::SourceReady));
        assert!(!PipelineState::Configured.can_transition_to(PipelineState::Built));
    }

    #[test]
    fn test_abort_from_any_non_terminal() {
        let aborted = PipelineState::Aborted {
            stage: StageName::Build,
            kind: ErrorKind::Build,
        };
        assert!(PipelineState::Init.can_transition_to(aborted));
        assert!(PipelineState::SourceReady.can_transition_to(aborted));
        assert!(!PipelineState::Done.can_transition_to(aborted));
        assert!(!aborted.can_transition_to(PipelineState::Probed));
    }

    #[test]
    fn test_record_rejects_out_of_order() {
        let mut run = PipelineRun::new();
        run.record(result(StageName::Probe, StageStatus::Succeeded)).unwrap();
        run.record(result(StageName::Source, StageStatus::Succeeded)).unwrap();
        assert!(run.record(result(StageName::Dependencies, StageStatus::Succeeded)).is_err());
        assert!(run.record(result(StageName::Source, StageStatus::Succeeded)).is_err());
    }

    #[test]
    fn test_record_rejected_after_abort() {
        let mut run = PipelineRun::new();
        run.transition_to(PipelineState::Aborted {
            stage: StageName::Probe,
            kind: ErrorKind::Environment,
        })
        .unwrap();
        assert!(run.record(result(StageName::Probe, StageStatus::Failed)).is_err());
        assert_eq!(run.exit_code(), 1);
    }
}
