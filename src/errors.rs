//! Error taxonomy for the analysis core
//!
//! Fatal conditions are variants of [`AnalysisError`]. Recoverable conditions
//! (a corrupt cache entry, one file that cannot be blamed, one fetch step that
//! fails) are reported through [`Outcome`] and friends instead, so callers and
//! tests can observe the degraded path without it aborting the run.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::Stage;

/// Errors that can occur while acquiring or analyzing a repository.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Invalid repository locator: {0}")]
    InvalidLocator(String),

    #[error("Insufficient disk space in {path}: {available_mb} MB free, {required_mb} MB required")]
    InsufficientSpace {
        path: PathBuf,
        available_mb: u64,
        required_mb: u64,
    },

    #[error("Clone of {locator} failed after {attempts} attempt(s): {message}")]
    CloneFailure {
        /// Locator with any credentials masked
        locator: String,
        attempts: u32,
        message: String,
    },

    #[error("Fetch `{step}` failed in {path}: {message}")]
    FetchFailure {
        path: PathBuf,
        step: String,
        message: String,
    },

    #[error("Cached checkout at {path} is corrupt: {reason}")]
    CorruptCache { path: PathBuf, reason: String },

    #[error("Blame unavailable for {file}: {reason}")]
    BlameUnavailable { file: String, reason: String },

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected internal error: {0}")]
    Internal(String),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<AnalysisError>,
    },
}

impl AnalysisError {
    /// Transport failures are worth another attempt; everything else is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            AnalysisError::CloneFailure { .. } | AnalysisError::FetchFailure { .. } => true,
            AnalysisError::Stage { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Attach the pipeline stage in which this error surfaced.
    ///
    /// Already-staged errors keep their original stage.
    pub fn at_stage(self, stage: Stage) -> Self {
        match self {
            staged @ AnalysisError::Stage { .. } => staged,
            other => AnalysisError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The stage this error was attributed to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            AnalysisError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The innermost error, skipping the stage wrapper.
    pub fn root(&self) -> &AnalysisError {
        match self {
            AnalysisError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type CoreResult<T> = Result<T, AnalysisError>;

/// Result of an operation that can degrade instead of failing.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Complete(T),
    Degraded { value: T, reason: String },
}

impl<T> Outcome<T> {
    pub fn degraded(value: T, reason: impl Into<String>) -> Self {
        Outcome::Degraded {
            value,
            reason: reason.into(),
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Outcome::Complete(value) | Outcome::Degraded { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Outcome::Complete(value) | Outcome::Degraded { value, .. } => value,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Complete(_) => None,
            Outcome::Degraded { reason, .. } => Some(reason),
        }
    }
}

impl<T: fmt::Display> fmt::Display for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Complete(value) => write!(f, "{}", value),
            Outcome::Degraded { value, reason } => write!(f, "{} (degraded: {})", value, reason),
        }
    }
}
