//! Network operations against a remote: shallow clone and history fetch
//!
//! Both go through the `git` executable so shallow/unshallow and
//! `--no-single-branch` behave exactly like a user's own clone. Every
//! operation is wrapped in a [`RetryPolicy`].

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::locator::{inject_credentials, is_http, mask_credentials, resolve_locator};
use crate::errors::{AnalysisError, CoreResult};

/// Upper bound on a single backoff sleep.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Retry with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that retries without sleeping (tests, local paths).
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay before attempt `attempt + 1` (attempt is 1-based), capped at
    /// [`MAX_RETRY_DELAY`].
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or the
    /// attempt cap is reached. The last error is returned.
    ///
    /// `op` receives the 1-based attempt number.
    pub fn run<T, F>(&self, label: &str, mut op: F) -> CoreResult<T>
    where
        F: FnMut(u32) -> CoreResult<T>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && e.is_retryable() => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        label, attempt, attempts, delay, e
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Clone settings.
#[derive(Debug, Clone)]
pub struct CloneOptions {
    /// History depth for the initial shallow clone
    pub depth: u32,
    pub retry: RetryPolicy,
    /// Token used for HTTP(S) locators when no explicit credential is given
    pub default_token: Option<String>,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            depth: 50,
            retry: RetryPolicy::default(),
            default_token: None,
        }
    }
}

/// Failure of a `git` invocation.
enum GitCommandError {
    /// git ran and exited non-zero
    Exit(String),
    /// git could not be started at all
    Spawn(std::io::Error),
}

fn run_git(args: &[&str], cwd: Option<&Path>) -> Result<String, GitCommandError> {
    let mut cmd = Command::new("git");
    cmd.args(args).env("GIT_TERMINAL_PROMPT", "0");
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd.output().map_err(GitCommandError::Spawn)?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(GitCommandError::Exit(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

/// Shallow-clone `locator` into `destination`.
///
/// The locator is validated first (never retried). Credentials are injected
/// only for HTTP(S) locators that carry none. A failed attempt removes the
/// partial checkout before the next one.
pub fn clone_repository(
    locator: &str,
    destination: &Path,
    credentials: Option<&str>,
    options: &CloneOptions,
) -> CoreResult<()> {
    let locator = locator.trim();
    resolve_locator(locator)?;

    let token = credentials.or(options.default_token.as_deref());
    let clone_url = if is_http(locator) {
        inject_credentials(locator, token)
    } else {
        locator.to_string()
    };
    let masked = mask_credentials(&clone_url);
    let depth = options.depth.max(1).to_string();
    let dest = destination.to_string_lossy().into_owned();

    options.retry.run("clone", |attempt| {
        if destination.exists() {
            std::fs::remove_dir_all(destination)?;
        }
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!(
            "Cloning {} into {} (depth {}, attempt {})",
            masked,
            destination.display(),
            depth,
            attempt
        );
        let args = [
            "clone",
            "--depth",
            depth.as_str(),
            "--no-single-branch",
            "--",
            clone_url.as_str(),
            dest.as_str(),
        ];
        match run_git(&args, None) {
            Ok(_) => Ok(()),
            Err(GitCommandError::Exit(stderr)) => Err(AnalysisError::CloneFailure {
                locator: masked.clone(),
                attempts: attempt,
                message: redact(&stderr, token),
            }),
            Err(GitCommandError::Spawn(e)) => Err(AnalysisError::Internal(format!(
                "failed to run git clone: {}",
                e
            ))),
        }
    })
    .inspect_err(|_| {
        if destination.exists() {
            if let Err(e) = std::fs::remove_dir_all(destination) {
                warn!("Failed to remove partial clone {}: {}", destination.display(), e);
            }
        }
    })
}

fn redact(text: &str, token: Option<&str>) -> String {
    match token.filter(|t| !t.is_empty()) {
        Some(t) => text.replace(t, "***"),
        None => text.to_string(),
    }
}

/// One of the history fetch sub-operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStep {
    AllBranchesAndTags,
    Unshallow,
    Prune,
}

impl FetchStep {
    pub const ALL: [FetchStep; 3] = [
        FetchStep::AllBranchesAndTags,
        FetchStep::Unshallow,
        FetchStep::Prune,
    ];

    fn args(self) -> &'static [&'static str] {
        match self {
            FetchStep::AllBranchesAndTags => &["fetch", "--all", "--tags"],
            FetchStep::Unshallow => &["fetch", "--unshallow"],
            FetchStep::Prune => &["fetch", "origin", "--prune"],
        }
    }
}

impl std::fmt::Display for FetchStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.args().join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Skipped { reason: String },
    Failed { error: String },
}

/// Per-step result of [`fetch_full_history`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub steps: Vec<(FetchStep, StepStatus)>,
}

impl FetchReport {
    pub fn failed_steps(&self) -> impl Iterator<Item = FetchStep> + '_ {
        self.steps
            .iter()
            .filter(|(_, s)| matches!(s, StepStatus::Failed { .. }))
            .map(|(step, _)| *step)
    }

    pub fn is_degraded(&self) -> bool {
        self.failed_steps().next().is_some()
    }
}

/// Best-effort fetch of the complete history into a working tree.
///
/// Each step is retried on its own; a step that still fails is recorded and
/// the remaining steps run anyway. Only a failure to run `git` at all is
/// returned as an error. Unshallowing is skipped when the checkout is
/// already complete.
pub fn fetch_full_history(workdir: &Path, retry: &RetryPolicy) -> CoreResult<FetchReport> {
    let mut report = FetchReport::default();

    for step in FetchStep::ALL {
        if step == FetchStep::Unshallow && !is_shallow(workdir) {
            debug!("{} is not shallow, skipping unshallow", workdir.display());
            report.steps.push((
                step,
                StepStatus::Skipped {
                    reason: "repository is not shallow".to_string(),
                },
            ));
            continue;
        }

        let result = retry.run(&format!("git {}", step), |_| {
            match run_git(step.args(), Some(workdir)) {
                Ok(_) => Ok(()),
                Err(GitCommandError::Exit(stderr)) => Err(AnalysisError::FetchFailure {
                    path: workdir.to_path_buf(),
                    step: step.to_string(),
                    message: stderr,
                }),
                Err(GitCommandError::Spawn(e)) => Err(AnalysisError::Internal(format!(
                    "failed to run git {}: {}",
                    step, e
                ))),
            }
        });

        match result {
            Ok(()) => report.steps.push((step, StepStatus::Succeeded)),
            Err(e @ AnalysisError::FetchFailure { .. }) => {
                warn!("{}", e);
                report.steps.push((
                    step,
                    StepStatus::Failed {
                        error: e.to_string(),
                    },
                ));
            }
            Err(e) => return Err(e),
        }
    }

    Ok(report)
}

fn is_shallow(workdir: &Path) -> bool {
    git_dir(workdir).join("shallow").exists()
}

fn git_dir(workdir: &Path) -> PathBuf {
    let dot_git = workdir.join(".git");
    if dot_git.is_dir() {
        dot_git
    } else {
        workdir.to_path_buf()
    }
}
