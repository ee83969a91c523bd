//! Decoupled logging pipeline for provisioning runs.
//!
//! ```text
//! log::info!() / subprocess output
//!     |
//! [LogCollector] (log::Log, never blocks the caller)
//!     |                      \
//!     | crossbeam unbounded   stderr echo (>= console level, not `output`)
//!     v
//! [writer thread] -> <log_dir>/provision-<timestamp>.log
//! ```
//!
//! Every record reaches the session file, including subprocess output logged
//! under the `output` target. The console only sees records at or above the
//! configured level. [`LogCollector::wait_for_empty`] sends a flush marker and
//! returns once everything queued before it is on disk.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Level, LevelFilter, Log, Metadata, Record};

/// Environment variable selecting the console level (`error` .. `trace`)
pub const LOG_ENV: &str = "PROVISION_LOG";

/// Target used for captured subprocess lines; file only.
pub const OUTPUT_TARGET: &str = "output";

enum LogMessage {
    Line(LogLine),
    /// Flush marker, answered once all earlier lines are written
    Flush(std::sync::mpsc::Sender<()>),
}

/// A log record as persisted.
#[derive(Clone, Debug)]
pub struct LogLine {
    pub level: Level,
    pub target: String,
    pub message: String,
    /// `HH:MM:SS.mmm`
    pub timestamp: String,
}

impl LogLine {
    pub fn new(level: Level, target: impl Into<String>, message: impl Into<String>) -> Self {
        LogLine {
            level,
            target: target.into(),
            message: message.into(),
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    fn format(&self) -> String {
        format!("[{}] [{:<5}] {}\n", self.timestamp, self.level, self.message)
    }
}

/// `log::Log` sink writing a per-run session file.
#[derive(Clone)]
pub struct LogCollector {
    tx: Sender<LogMessage>,
    session_path: Option<PathBuf>,
    console_level: LevelFilter,
}

impl LogCollector {
    /// Opens `<log_dir>/provision-<timestamp>.log` and starts the writer thread.
    pub fn new(log_dir: &Path, console_level: LevelFilter) -> Result<Self, String> {
        fs::create_dir_all(log_dir)
            .map_err(|e| format!("Failed to create log directory {}: {}", log_dir.display(), e))?;

        let session_path = log_dir.join(format!(
            "provision-{}.log",
            Local::now().format("%Y%m%d-%H%M%S")
        ));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&session_path)
            .map_err(|e| format!("Failed to open log file {}: {}", session_path.display(), e))?;

        let tx = spawn_writer(Some(file))?;
        Ok(LogCollector {
            tx,
            session_path: Some(session_path),
            console_level,
        })
    }

    /// Console echo only, for when the log directory is unusable.
    pub fn console_only(console_level: LevelFilter) -> Result<Self, String> {
        let tx = spawn_writer(None)?;
        Ok(LogCollector {
            tx,
            session_path: None,
            console_level,
        })
    }

    pub fn session_log_path(&self) -> Option<&Path> {
        self.session_path.as_deref()
    }

    pub fn console_level(&self) -> LevelFilter {
        self.console_level
    }

    /// Queue a line for the session file. Cannot block.
    pub fn log_line(&self, line: LogLine) {
        let _ = self.tx.send(LogMessage::Line(line));
    }

    /// Blocks until every line queued before this call has been written.
    pub fn wait_for_empty(&self) -> Result<(), String> {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        rx.recv()
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }

    fn echoes(&self, record: &Record) -> bool {
        record.target() != OUTPUT_TARGET && record.level() <= self.console_level
    }
}

impl Log for LogCollector {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let message = record.args().to_string();
        if self.echoes(record) {
            eprintln!("[{}] {}", record.level(), message);
        }
        if self.session_path.is_some() {
            self.log_line(LogLine::new(record.level(), record.target(), message));
        }
    }

    fn flush(&self) {
        let _ = self.wait_for_empty();
    }
}

fn spawn_writer(mut file: Option<File>) -> Result<Sender<LogMessage>, String> {
    let (tx, rx) = unbounded::<LogMessage>();

    // Plain OS thread: independent of whichever tokio runtime is logging
    std::thread::Builder::new()
        .name("provision-log".to_string())
        .spawn(move || {
            while let Ok(msg) = rx.recv() {
                match msg {
                    LogMessage::Line(line) => {
                        if let Some(file) = file.as_mut() {
                            let _ = file.write_all(line.format().as_bytes());
                        }
                    }
                    LogMessage::Flush(done) => {
                        if let Some(file) = file.as_mut() {
                            let _ = file.flush();
                            let _ = file.sync_data();
                        }
                        let _ = done.send(());
                    }
                }
            }
        })
        .map_err(|e| format!("Failed to spawn log writer: {}", e))?;

    Ok(tx)
}

/// Console level from `PROVISION_LOG`, defaulting to `info`.
pub fn console_level_from_env() -> LevelFilter {
    std::env::var(LOG_ENV)
        .ok()
        .and_then(|value| LevelFilter::from_str(value.trim()).ok())
        .unwrap_or(LevelFilter::Info)
}

/// Installs a collector as the global logger.
///
/// Falls back to console-only logging when `log_dir` cannot be used; the
/// returned collector is the one to flush before exit.
pub fn init(log_dir: &Path) -> Result<LogCollector, String> {
    let level = console_level_from_env();
    let collector = match LogCollector::new(log_dir, level) {
        Ok(collector) => collector,
        Err(e) => {
            eprintln!("[WARN] {}; logging to console only", e);
            LogCollector::console_only(level)?
        }
    };

    log::set_boxed_logger(Box::new(collector.clone()))
        .map_err(|e| format!("Failed to install logger: {}", e))?;
    log::set_max_level(LevelFilter::Trace);
    Ok(collector)
}
