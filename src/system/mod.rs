//! OS abstraction: subprocess execution and host facts.
//!
//! Every external tool the pipeline touches (package manager, rustup, configure,
//! make, the built artifact) goes through [`CommandRunner`]. The production
//! [`SystemRunner`] streams output lines into the log sink while capturing them
//! for diagnostics; tests substitute a scripted runner.

pub mod deps;
pub mod probe;
pub mod verification;

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Number of trailing output lines attached to failures.
pub const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// A fully described subprocess invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Let the child read the operator's terminal (for `sudo` prompts)
    pub inherit_stdin: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            inherit_stdin: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn interactive(mut self) -> Self {
        self.inherit_stdin = true;
        self
    }

    /// Put `dir` in front of the inherited `PATH`.
    pub fn path_prefix(self, dir: &Path) -> Self {
        let mut dirs = vec![dir.to_path_buf()];
        if let Some(current) = std::env::var_os("PATH") {
            dirs.extend(std::env::split_paths(&current).filter(|d| d != dir));
        }
        match std::env::join_paths(dirs) {
            Ok(joined) => self.env("PATH", joined.to_string_lossy()),
            Err(e) => {
                log::warn!("[Exec] Cannot add {} to PATH: {}", dir.display(), e);
                self
            }
        }
    }

    /// Wrap the invocation in `sudo` unless already privileged.
    pub fn privileged(self, is_root: bool) -> Self {
        if is_root {
            return self;
        }
        let mut wrapped = CommandSpec::new("sudo");
        // sudo resets the environment and may refuse VAR=value for PATH; `env` does not
        if !self.env.is_empty() {
            wrapped.args.push("env".to_string());
        }
        for (key, value) in &self.env {
            wrapped.args.push(format!("{}={}", key, value));
        }
        wrapped.args.push(self.program);
        wrapped.args.extend(self.args);
        wrapped.cwd = self.cwd;
        wrapped.inherit_stdin = true;
        wrapped
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        let mut rendered = self.program.clone();
        for arg in &self.args {
            rendered.push(' ');
            if arg.contains(' ') {
                rendered.push_str(&format!("'{}'", arg));
            } else {
                rendered.push_str(arg);
            }
        }
        rendered
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the child was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Human readable exit description.
    pub fn describe_exit(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        }
    }

    /// Last `lines` lines of stderr, or of stdout when stderr is empty.
    pub fn diagnostic_tail(&self, lines: usize) -> Option<String> {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let collected: Vec<&str> = source.lines().collect();
        if collected.is_empty() {
            return None;
        }
        let start = collected.len().saturating_sub(lines);
        Some(collected[start..].join("\n"))
    }

    /// Diagnostic tail with the default length.
    pub fn diagnostic(&self) -> Option<String> {
        self.diagnostic_tail(DIAGNOSTIC_TAIL_LINES)
    }
}

/// Executes subprocesses to completion.
///
/// An `Err` means the program could not be started at all (not found, not
/// executable); a started program that exits non-zero is an `Ok` output.
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> impl Future<Output = io::Result<CommandOutput>> + Send;
}

/// Runs real processes via `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        log::debug!("[Exec] {}", spec.display());

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.inherit_stdin {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let mut child = command.spawn()?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (stdout, stderr, status) = tokio::join!(
            collect_stream(stdout, &spec.program),
            collect_stream(stderr, &spec.program),
            child.wait()
        );
        let status = status?;

        Ok(CommandOutput {
            code: status.code(),
            stdout: stdout?,
            stderr: stderr?,
        })
    }
}

/// Reads a child stream line by line, forwarding each line to the log sink.
async fn collect_stream<R>(stream: Option<R>, program: &str) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return Ok(String::new());
    };
    let mut reader = BufReader::new(stream);
    let mut captured = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        log::debug!(target: "output", "[{}] {}", program, line.trim_end());
        captured.push_str(&line);
    }
    Ok(captured)
}

/// Whether the pipeline runs with an effective uid of 0.
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}
