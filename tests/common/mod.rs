//! Shared fixtures: a scripted command runner standing in for the host's
//! tools, and a local git "remote" to synchronize from.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use git2::{Repository, RepositoryInitOptions, Signature};
use provision::{CommandOutput, CommandRunner, CommandSpec, Configuration, Orchestrator, PipelineRun};
use tempfile::TempDir;

pub const APP_VERSION: &str = "app 1.2.3";
pub const RUSTC_VERSION_LINE: &str = "rustc 1.79.0 (129f3b996 2024-06-10)";

struct Failure {
    pattern: String,
    output: CommandOutput,
}

struct ScriptState {
    calls: Vec<CommandSpec>,
    installed: BTreeSet<String>,
    dpkg_available: bool,
    /// rustc answers as plain `rustc`
    rustc_on_path: bool,
    /// rustup ran: rustc answers only under its cargo bin directory
    rustup_installed: bool,
    apt_installs: bool,
    rustup_installs: bool,
    produce_artifact: bool,
    failures: Vec<Failure>,
}

/// Simulates dpkg, apt-get, rustup, rustc, configure, make and the artifact.
///
/// Cloning shares state, so a test keeps a handle after handing one to the
/// orchestrator.
#[derive(Clone)]
pub struct ScriptedRunner {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedRunner {
    /// A Debian host with nothing installed.
    pub fn new() -> Self {
        ScriptedRunner {
            state: Arc::new(Mutex::new(ScriptState {
                calls: Vec::new(),
                installed: BTreeSet::new(),
                dpkg_available: true,
                rustc_on_path: false,
                rustup_installed: false,
                apt_installs: true,
                rustup_installs: true,
                produce_artifact: true,
                failures: Vec::new(),
            })),
        }
    }

    pub fn with_installed(self, packages: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.installed.extend(packages.iter().map(|p| p.to_string()));
        }
        self
    }

    pub fn with_rustc(self) -> Self {
        self.state.lock().unwrap().rustc_on_path = true;
        self
    }

    pub fn without_dpkg(self) -> Self {
        self.state.lock().unwrap().dpkg_available = false;
        self
    }

    /// apt-get exits 0 but installs nothing.
    pub fn with_lying_apt(self) -> Self {
        self.state.lock().unwrap().apt_installs = false;
        self
    }

    /// rustup exits 0 but leaves no rustc behind.
    pub fn with_lying_rustup(self) -> Self {
        self.state.lock().unwrap().rustup_installs = false;
        self
    }

    /// make exits 0 but leaves no artifact behind.
    pub fn without_artifact(self) -> Self {
        self.state.lock().unwrap().produce_artifact = false;
        self
    }

    /// Any command whose rendering contains `pattern` fails with `code`.
    pub fn fail_on(self, pattern: &str, code: i32, stderr: &str) -> Self {
        self.state.lock().unwrap().failures.push(Failure {
            pattern: pattern.to_string(),
            output: CommandOutput {
                code: Some(code),
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        });
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(CommandSpec::display)
            .collect()
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.state.lock().unwrap().calls.clone()
    }

    /// First recorded spec whose program ends with `suffix`.
    pub fn spec_for(&self, suffix: &str) -> Option<CommandSpec> {
        self.specs().into_iter().find(|s| s.program.ends_with(suffix))
    }

    /// Number of recorded calls containing `pattern`.
    pub fn count(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(pattern)).count()
    }

    /// Index of the first call containing `pattern`.
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.contains(pattern))
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn respond(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(spec.clone());

        let rendered = spec.display();
        if let Some(failure) = state.failures.iter().find(|f| rendered.contains(&f.pattern)) {
            return Ok(failure.output.clone());
        }

        // sudo [env VAR=value...] program args...
        let (program, args) = if spec.program == "sudo" {
            let mut rest = spec
                .args
                .iter()
                .skip_while(|a| *a == "env" || a.contains('='));
            let program = rest.next().cloned().unwrap_or_default();
            (program, rest.cloned().collect::<Vec<_>>())
        } else {
            (spec.program.clone(), spec.args.clone())
        };

        match program.as_str() {
            "dpkg-query" => {
                if !state.dpkg_available {
                    return Err(not_found(&program));
                }
                let wanted = args.iter().filter(|a| !a.starts_with('-'));
                let mut stdout = String::new();
                let mut all_known = true;
                for name in wanted {
                    if state.installed.contains(name) {
                        stdout.push_str(&format!("{} install ok installed\n", name));
                    } else {
                        all_known = false;
                    }
                }
                Ok(exit(if all_known { 0 } else { 1 }, stdout))
            }
            "apt-get" if args.first().map(String::as_str) == Some("update") => {
                Ok(exit(0, "Reading package lists... Done\n".to_string()))
            }
            "apt-get" => {
                if state.apt_installs {
                    let packages: Vec<String> =
                        args.iter().filter(|a| !a.starts_with('-') && *a != "install").cloned().collect();
                    state.installed.extend(packages);
                }
                Ok(exit(0, "Setting up packages\n".to_string()))
            }
            "sh" if args.first().map(String::as_str) == Some("-c") => {
                if state.rustup_installs {
                    state.rustup_installed = true;
                }
                Ok(exit(0, "info: default toolchain installed\n".to_string()))
            }
            "make" if args.first().map(String::as_str) == Some("install") => {
                Ok(exit(0, "installing\n".to_string()))
            }
            "make" => {
                if state.produce_artifact {
                    let cwd = spec.cwd.clone().unwrap_or_default();
                    write_executable(&cwd.join("src/app"))?;
                }
                Ok(exit(0, "compiling\n".to_string()))
            }
            p if p == "rustc" || p.ends_with("/rustc") => {
                let found = state.rustc_on_path || (p != "rustc" && state.rustup_installed);
                if found {
                    Ok(exit(0, format!("{}\n", RUSTC_VERSION_LINE)))
                } else {
                    Err(not_found(p))
                }
            }
            p if p.ends_with("/configure") => Ok(exit(0, "config.status: creating Makefile\n".to_string())),
            p if p.ends_with("/src/app") => Ok(exit(0, format!("{}\n", APP_VERSION))),
            p => Err(not_found(p)),
        }
    }
}

impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        self.respond(spec)
    }
}

fn exit(code: i32, stdout: String) -> CommandOutput {
    CommandOutput {
        code: Some(code),
        stdout,
        stderr: String::new(),
    }
}

fn not_found(program: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{}: not found", program))
}

fn write_executable(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, "#!/bin/sh\necho app 1.2.3\n")?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

/// Commits `content` as `name` on the current branch of `repo`.
pub fn commit_file(repo: &Repository, name: &str, content: &str, message: &str) -> git2::Oid {
    let workdir = repo.workdir().expect("non-bare repo").to_path_buf();
    fs::write(workdir.join(name), content).expect("Failed to write file");

    let mut index = repo.index().expect("Failed to get index");
    index.add_path(Path::new(name)).expect("Failed to add file");
    index.write().expect("Failed to write index");
    let tree_id = index.write_tree().expect("Failed to write tree");
    let tree = repo.find_tree(tree_id).expect("Failed to find tree");
    let sig = Signature::now("Test User", "test@example.com").expect("Failed to create signature");

    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .expect("Failed to commit")
}

/// Creates a repository on `master` with a configure script and a README.
pub fn init_remote(path: &Path) -> Repository {
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("master");
    let repo = Repository::init_opts(path, &opts).expect("Failed to init remote repo");
    commit_file(&repo, "configure", "#!/bin/sh\nexit 0\n", "Add configure");
    commit_file(&repo, "README.md", "# app\n", "Add README");
    repo
}

/// Creates `branch` at the current HEAD of `repo` without switching to it.
pub fn create_branch(repo: &Repository, branch: &str) {
    let head = repo.head().unwrap().peel_to_commit().unwrap();
    repo.branch(branch, &head, false).expect("Failed to create branch");
}

pub const DEBIAN_OS_RELEASE: &str = "PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\nNAME=\"Debian GNU/Linux\"\nVERSION_ID=\"12\"\nID=debian\n";

/// A throwaway host: remote repository, os-release file and workspace.
pub struct Host {
    pub dir: TempDir,
    pub remote: Repository,
    pub os_release: PathBuf,
    pub cargo_bin: PathBuf,
}

impl Host {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let remote = init_remote(&dir.path().join("remote"));
        let os_release = dir.path().join("os-release");
        fs::write(&os_release, DEBIAN_OS_RELEASE).expect("Failed to write os-release");
        let cargo_bin = dir.path().join("cargo/bin");
        Host {
            dir,
            remote,
            os_release,
            cargo_bin,
        }
    }

    pub fn remote_url(&self) -> String {
        self.dir.path().join("remote").to_string_lossy().to_string()
    }

    pub fn remote_head(&self) -> String {
        self.remote.head().unwrap().target().unwrap().to_string()
    }

    pub fn config(&self) -> Configuration {
        let ws = self.dir.path().join("ws");
        Configuration {
            repo_url: self.remote_url(),
            branch: "master".to_string(),
            install_rust_toolchain: false,
            static_build: false,
            clean_build: false,
            install_after_build: false,
            jobs: 2,
            source_dir: ws.join("source"),
            build_dir: ws.join("build"),
            log_dir: ws.join("logs"),
            required_packages: vec!["autoconf".to_string(), "git".to_string()],
            install_prefix: self.dir.path().join("prefix"),
            artifact: PathBuf::from("src/app"),
            smoke_args: vec!["--version".to_string()],
        }
    }

    /// Runs the full pipeline against this host.
    pub async fn run(&self, config: Configuration, runner: &ScriptedRunner) -> PipelineRun {
        Orchestrator::new(config, runner.clone())
            .with_os_release(&self.os_release)
            .with_cargo_bin(Some(self.cargo_bin.clone()))
            .run()
            .await
    }
}
