//! Core data models for archmap
//!
//! These records flow between the commit parser, the ownership calculator,
//! the coupling analyzer and the pipeline summary.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Severity levels for architectural rule violations
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A parsed commit. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Full commit hash
    pub id: String,
    pub author: String,
    pub author_email: String,
    /// Commit time (UTC)
    pub timestamp: DateTime<Utc>,
    /// Full commit message
    pub message: String,
    pub is_bug_fix: bool,
    pub files_changed: usize,
    pub lines_added: usize,
    pub lines_deleted: usize,
}

/// Mapping from file path to the set of commit ids that touched it.
///
/// Also remembers the order in which commits were recorded (newest first when
/// built from a history walk), so the index can be narrowed to recent history.
#[derive(Debug, Clone, Default)]
pub struct ChangeIndex {
    files: BTreeMap<String, FxHashSet<String>>,
    commits: Vec<String>,
    seen_commits: FxHashSet<String>,
}

impl ChangeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `commit_id` touched `file`. Inserts the file if missing,
    /// otherwise unions the commit into its set.
    ///
    /// Returns `true` if the pair was not present before.
    pub fn insert(&mut self, file: &str, commit_id: &str) -> bool {
        if self.seen_commits.insert(commit_id.to_string()) {
            self.commits.push(commit_id.to_string());
        }
        match self.files.get_mut(file) {
            Some(set) => set.insert(commit_id.to_string()),
            None => {
                let mut set = FxHashSet::default();
                set.insert(commit_id.to_string());
                self.files.insert(file.to_string(), set);
                true
            }
        }
    }

    /// Record every file a commit touched.
    pub fn record_commit<I, S>(&mut self, commit_id: &str, files: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.seen_commits.insert(commit_id.to_string()) {
            self.commits.push(commit_id.to_string());
        }
        for file in files {
            self.insert(file.as_ref(), commit_id);
        }
    }

    pub fn commits_for(&self, file: &str) -> Option<&FxHashSet<String>> {
        self.files.get(file)
    }

    /// File paths in ascending order.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &FxHashSet<String>)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// A copy of this index that only knows about the first `n` recorded commits.
    pub fn restricted_to_recent(&self, n: usize) -> ChangeIndex {
        if n >= self.commits.len() {
            return self.clone();
        }
        let keep: FxHashSet<&str> = self.commits[..n].iter().map(String::as_str).collect();
        let mut restricted = ChangeIndex::new();
        for id in &self.commits[..n] {
            restricted.seen_commits.insert(id.clone());
            restricted.commits.push(id.clone());
        }
        for (file, ids) in &self.files {
            let kept: FxHashSet<String> = ids
                .iter()
                .filter(|id| keep.contains(id.as_str()))
                .cloned()
                .collect();
            if !kept.is_empty() {
                restricted.files.insert(file.clone(), kept);
            }
        }
        restricted
    }
}

/// One identity's share of a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerContribution {
    /// Author email (or "unknown")
    pub identity: String,
    /// Author name as recorded on the newest attributed line
    pub name: String,
    pub lines: u32,
    /// Share of the file in percent
    pub percentage: f64,
    /// Most recent commit touching lines attributed to this identity
    pub last_commit: DateTime<Utc>,
}

/// Blame-derived ownership of a single file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOwnership {
    pub file_path: String,
    /// Sorted descending by line count
    pub owners: Vec<OwnerContribution>,
    /// Top owner when their share exceeds 50%
    pub primary_owner: Option<OwnerContribution>,
    /// Attributed lines, floored at 1
    pub total_lines: u32,
    pub last_modified: Option<DateTime<Utc>>,
}

impl FileOwnership {
    /// Ownership record for a file nobody could be attributed to.
    pub fn unowned(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            owners: Vec::new(),
            primary_owner: None,
            total_lines: 1,
            last_modified: None,
        }
    }

    /// Lines actually attributed to owners (not floored).
    pub fn attributed_lines(&self) -> u64 {
        self.owners.iter().map(|o| o.lines as u64).sum()
    }
}

/// Bus factor risk tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Critical,
    High,
    Medium,
    Low,
}

impl RiskLevel {
    pub fn from_bus_factor(count: usize) -> Self {
        match count {
            0 | 1 => RiskLevel::Critical,
            2 => RiskLevel::High,
            3 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Critical => write!(f, "critical"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusFactorResult {
    pub bus_factor: usize,
    /// Identities selected to reach 50% coverage, largest first
    pub critical_developers: Vec<String>,
    pub risk_level: RiskLevel,
    /// Coverage actually reached by `critical_developers`, in percent
    pub coverage_percentage: f64,
}

/// Change coupling between two files. `file_a < file_b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouplingPair {
    pub file_a: String,
    pub file_b: String,
    /// Jaccard similarity of the commit sets
    pub score: f64,
    /// Commits touching both files
    pub co_changes: usize,
    pub confidence: f64,
}

/// Deny rule checked against coupled file pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitecturalRule {
    #[serde(default = "default_rule_name")]
    pub name: String,
    #[serde(default)]
    pub severity: Severity,
    /// (pattern A, pattern B) substring pairs that must not be coupled
    #[serde(default)]
    pub deny: Vec<(String, String)>,
}

fn default_rule_name() -> String {
    "unnamed".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleViolation {
    pub rule: String,
    pub severity: Severity,
    /// File matching pattern A
    pub file_a: String,
    /// File matching pattern B
    pub file_b: String,
    pub score: f64,
}

/// Commit count for one bucket of an author timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyActivity {
    /// `YYYY-MM` of the bucket start
    pub month: String,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Completed,
}

/// Summary of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub repository_id: Uuid,
    pub status: AnalysisStatus,
    pub total_commits: usize,
    pub total_files: usize,
    pub total_authors: usize,
    pub bus_factor: usize,
    pub orphaned_files: usize,
    pub high_coupling_pairs: usize,
    pub duration_seconds: f64,
    pub completed_at: DateTime<Utc>,
}

/// Progress notification emitted at each stage transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: String,
    /// 0-100, non-decreasing within a run
    pub percent: u8,
    pub message: String,
}
