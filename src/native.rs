//! Capability traits that decouple the reconciliation core from the live
//! system: the native package manager, subprocess execution, and anything
//! that would otherwise need a console (review, confirmation, provider
//! choice).
//!
//! Nothing in [`crate::resolver`], [`crate::builder`], or
//! [`crate::reconciler`] calls `pacman`, `git`, or `std::io::stdin`
//! directly — every such call goes through one of these traits, the way
//! [`crate::search`]'s `AurApi` trait lets `Search` be driven by a fake
//! transport in tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;

/// What: The boundary between this crate and a live native package
/// database (pacman or equivalent).
///
/// Details:
/// - `is_installable` decides the native/foreign split for a single
///   dependency expression (constrained or not); implementations typically
///   check both real package names and virtual `provides`.
/// - The install/remove/mark methods are phrased as bulk operations over
///   name sets, mirroring how the reconciler always acts on whole batches
///   rather than one package at a time.
#[async_trait]
pub trait NativePackageCapability: Send + Sync {
    /// What: Whether a dependency expression can be satisfied by the native
    /// package database without building anything.
    async fn is_installable(&self, dependency: &str) -> Result<bool>;

    /// What: Names of natively-installed packages explicitly requested by
    /// the user (not pulled in as a dependency).
    async fn installed_native_explicit(&self) -> Result<HashSet<String>>;

    /// What: Names of foreign (AUR/custom) packages currently installed
    /// with an explicit installation reason.
    async fn installed_foreign_explicit(&self) -> Result<HashSet<String>>;

    /// What: Names of foreign packages installed as a dependency that are
    /// no longer required by anything currently installed.
    async fn foreign_orphans(&self) -> Result<HashSet<String>>;

    /// What: Every currently-installed foreign package, with its installed
    /// version string, regardless of installation reason.
    async fn installed_foreign_versions(&self) -> Result<HashMap<String, String>>;

    /// What: Names of currently-installed packages that declare `pkg` as a
    /// dependency (direct dependants only).
    async fn dependants(&self, pkg: &str) -> Result<HashSet<String>>;

    /// What: Install the given native package names, marked as
    /// dependency-installed.
    async fn install_dependencies(&self, names: &HashSet<String>) -> Result<()>;

    /// What: Install the given package files (already built artifacts).
    /// Names present in `as_explicit` are marked explicit; the rest are
    /// marked dependency.
    async fn install_files(&self, files: &[PathBuf], as_explicit: &HashSet<String>) -> Result<()>;

    /// What: Uninstall the given package names (and their now-unneeded
    /// dependencies).
    async fn remove(&self, names: &HashSet<String>) -> Result<()>;

    /// What: Change the installation reason of the given names to
    /// "dependency" without uninstalling them.
    async fn mark_as_dependency(&self, names: &HashSet<String>) -> Result<()>;

    /// What: Compare an installed version against an available version.
    ///
    /// Output: `Less` if `installed` is older than `available`, `Equal` if
    /// identical, `Greater` if `installed` is newer.
    async fn compare_versions(
        &self,
        installed: &str,
        available: &str,
    ) -> Result<std::cmp::Ordering>;
}

/// Options controlling how a [`CommandRunner`] invocation runs.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Working directory to run the command in; defaults to the caller's
    /// current directory if `None`.
    pub cwd: Option<PathBuf>,
    /// Environment variables to set or override for the child process.
    pub env_overrides: HashMap<String, String>,
    /// Environment variable names to remove from the child's environment
    /// (e.g. `GNUPGHOME` before creating a chroot).
    pub drop_env: Vec<String>,
    /// Unprivileged user to run the command as, if not the current user.
    pub run_as_user: Option<String>,
}

/// Captured result of a [`CommandRunner`] invocation.
#[derive(Clone, Debug)]
pub struct CommandOutput {
    /// Process exit status code.
    pub status: i32,
    /// Combined stdout and stderr.
    pub stdout_and_stderr: String,
}

impl CommandOutput {
    /// What: Whether the command exited successfully (status 0).
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// What: Abstracts subprocess execution (git, chroot tooling, `vercmp`,
/// the packaging tool) so the algorithmic core never spawns a process
/// directly.
///
/// Details:
/// - [`SystemCommandRunner`] is the live implementation, shelling out via
///   `tokio::process::Command`.
/// - A `FakeCommandRunner` keyed by argv stands in for it in tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// What: Run one command to completion and capture its combined output.
    ///
    /// # Errors
    /// Returns [`crate::error::Error::CommandFailed`] if the process could
    /// not be spawned at all. A non-zero exit status is returned as `Ok`
    /// with `status != 0` — callers decide whether that is fatal.
    async fn run(&self, argv: &[String], opts: RunOptions) -> Result<CommandOutput>;
}

/// What: Look up a user's numeric uid/gid by name from `/etc/passwd`.
///
/// Details: mirrors the reconciliation tool's own `pwd.getpwnam`-based
/// lookup, done by hand here since the crate otherwise has no reason to
/// depend on a full `nix`/`users` binding just for this one path.
fn resolve_user(user: &str) -> Result<(u32, u32)> {
    let passwd = std::fs::read_to_string("/etc/passwd")?;
    for line in passwd.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.first() == Some(&user) {
            let uid = fields.get(2).and_then(|s| s.parse().ok());
            let gid = fields.get(3).and_then(|s| s.parse().ok());
            if let (Some(uid), Some(gid)) = (uid, gid) {
                return Ok((uid, gid));
            }
        }
    }
    Err(crate::error::Error::InvalidInput(format!("unknown user '{user}'")))
}

/// The live [`CommandRunner`]: runs commands via `tokio::process::Command`,
/// capturing stdout and stderr (concatenated, stdout first) as one string.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, argv: &[String], opts: RunOptions) -> Result<CommandOutput> {
        use std::os::unix::process::CommandExt as _;
        use tokio::process::Command;

        let Some(program) = argv.first() else {
            return Ok(CommandOutput { status: 0, stdout_and_stderr: String::new() });
        };

        let mut cmd = Command::new(program);
        cmd.args(&argv[1..]);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        if let Some(cwd) = &opts.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &opts.env_overrides {
            cmd.env(key, value);
        }
        for key in &opts.drop_env {
            cmd.env_remove(key);
        }
        if let Some(user) = &opts.run_as_user {
            let (uid, gid) = resolve_user(user)?;
            cmd.uid(uid);
            cmd.gid(gid);
        }

        let command_line = argv.join(" ");
        let child = cmd.spawn().map_err(|e| crate::error::Error::CommandFailed {
            command: command_line.clone(),
            status: None,
            output: e.to_string(),
        })?;
        let output = child.wait_with_output().await.map_err(|e| crate::error::Error::CommandFailed {
            command: command_line,
            status: None,
            output: e.to_string(),
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout_and_stderr: combined,
        })
    }
}

/// What: Stands in for interactive review of a PKGBUILD or a diff against
/// the last reviewed commit, and for simple yes/no confirmation prompts.
///
/// Details:
/// - This is the only place decisions that would otherwise require a
///   console are made; the core calls it but never touches stdin itself.
#[async_trait]
pub trait ReviewPrompter: Send + Sync {
    /// What: Show a diff between `from_commit` and the working tree in
    /// `to_dir`, then ask whether to proceed.
    async fn review_diff(&self, pkgbase: &str, from_commit: &str, to_dir: &Path) -> Result<bool>;

    /// What: Show every non-hidden file in `dir`, then ask whether to
    /// proceed (used when there is no previously-reviewed commit to diff
    /// against).
    async fn review_files(&self, pkgbase: &str, dir: &Path) -> Result<bool>;

    /// What: Ask a plain yes/no question with a default answer.
    async fn confirm(&self, question: &str, default: bool) -> Result<bool>;
}

/// What: Resolves ambiguity when more than one AUR/custom package declares
/// a dependency in its `provides`.
#[async_trait]
pub trait ProviderSelector: Send + Sync {
    /// What: Choose which candidate provides `dependency`.
    ///
    /// Output: the index into `candidates` that was chosen.
    async fn select(&self, dependency: &str, candidates: &[String]) -> Result<usize>;
}

/// A non-interactive [`ProviderSelector`] that always picks the first
/// candidate, matching this crate's default for unattended runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct FirstChoiceSelector;

#[async_trait]
impl ProviderSelector for FirstChoiceSelector {
    async fn select(&self, _dependency: &str, _candidates: &[String]) -> Result<usize> {
        Ok(0)
    }
}

/// A non-interactive [`ReviewPrompter`] that approves everything, matching
/// `force`-style unattended runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysApprove;

#[async_trait]
impl ReviewPrompter for AlwaysApprove {
    async fn review_diff(&self, _pkgbase: &str, _from_commit: &str, _to_dir: &Path) -> Result<bool> {
        Ok(true)
    }

    async fn review_files(&self, _pkgbase: &str, _dir: &Path) -> Result<bool> {
        Ok(true)
    }

    async fn confirm(&self, _question: &str, _default: bool) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn system_command_runner_captures_exit_status_and_output() {
        let runner = SystemCommandRunner;
        let output = runner
            .run(&["echo".to_string(), "hi".to_string()], RunOptions::default())
            .await
            .expect("echo should run");
        assert!(output.success());
        assert_eq!(output.stdout_and_stderr.trim(), "hi");
    }

    #[tokio::test]
    async fn system_command_runner_reports_nonzero_exit() {
        let runner = SystemCommandRunner;
        let output = runner
            .run(
                &["sh".to_string(), "-c".to_string(), "exit 3".to_string()],
                RunOptions::default(),
            )
            .await
            .expect("sh should run");
        assert_eq!(output.status, 3);
        assert!(!output.success());
    }

    #[tokio::test]
    async fn first_choice_selector_always_picks_index_zero() {
        let selector = FirstChoiceSelector;
        let idx = selector
            .select("foo", &["a".to_string(), "b".to_string()])
            .await
            .expect("select never fails");
        assert_eq!(idx, 0);
    }

    #[tokio::test]
    async fn always_approve_approves_everything() {
        let prompter = AlwaysApprove;
        assert!(prompter.confirm("proceed?", false).await.expect("ok"));
        assert!(
            prompter
                .review_files("pkgbase", Path::new("/tmp"))
                .await
                .expect("ok")
        );
    }
}
