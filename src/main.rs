use std::process::ExitCode;

use provision::config::{resolve_from_env, Resolution};
use provision::log_collector;
use provision::{Orchestrator, RunStatus, SystemRunner};

#[tokio::main]
async fn main() -> ExitCode {
    // Validation happens before anything touches the filesystem
    let config = match resolve_from_env() {
        Ok(Resolution::Run(config)) => config,
        Ok(Resolution::Help(text)) => {
            println!("{}", text);
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("error [{}]: {}", e.kind(), e);
            eprintln!("Run 'provision --help' for usage.");
            return ExitCode::FAILURE;
        }
    };

    let collector = match log_collector::init(&config.log_dir) {
        Ok(collector) => Some(collector),
        Err(e) => {
            eprintln!("[WARN] {}", e);
            None
        }
    };
    if let Some(path) = collector.as_ref().and_then(|c| c.session_log_path()) {
        log::info!("[Main] Session log: {}", path.display());
    }

    let run = Orchestrator::new(config, SystemRunner).run().await;

    match run.status() {
        RunStatus::Succeeded => {
            log::info!("[Main] Provisioning finished\n{}", run.summary());
        }
        RunStatus::Aborted => {
            log::error!("[Main] Provisioning aborted\n{}", run.summary());
            if let Some(failure) = run.failure() {
                if let Some(kind) = failure.error {
                    eprintln!("failed at stage '{}' ({}): {}", failure.stage, kind, failure.detail);
                }
                if let Some(diagnostic) = &failure.diagnostic {
                    eprintln!("{}", diagnostic);
                }
            }
        }
    }

    if let Some(collector) = &collector {
        if let Err(e) = collector.wait_for_empty() {
            eprintln!("[WARN] {}", e);
        }
    }

    ExitCode::from(run.exit_code())
}
