//! Commit history parsing using libgit2
//!
//! Normalizes commits into [`CommitRecord`]s, classifies bug-fix commits and
//! builds the file -> commit-id [`ChangeIndex`] used by coupling analysis.

use chrono::{DateTime, Duration, TimeZone, Utc};
use dashmap::DashMap;
use git2::{Commit, DiffOptions, Repository, Sort};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use crate::errors::CoreResult;
use crate::models::{ChangeIndex, CommitRecord};

/// Lowercase substrings that mark a bug-fix commit.
const BUG_KEYWORDS: &[&str] = &[
    "fix", "fixed", "fixes", "fixing", "bug", "bugs", "bugfix", "error", "errors", "defect",
    "defects", "issue", "issues", "patch", "patched", "resolve", "resolved", "resolves",
];

static ISSUE_REFERENCES: OnceLock<Vec<Regex>> = OnceLock::new();

fn issue_references() -> &'static Vec<Regex> {
    ISSUE_REFERENCES.get_or_init(|| {
        [r"#\d+", r"[A-Z]+-\d+", r"GH-\d+"]
            .iter()
            .map(|p| Regex::new(p).expect("valid issue pattern"))
            .collect()
    })
}

/// Whether a commit message looks like a bug fix.
///
/// Keywords are matched as substrings of the lowercased message; issue
/// references (`#123`, `ABC-123`, `GH-123`) against the original text.
pub fn classify_bug_fix(message: &str) -> bool {
    let lower = message.to_lowercase();
    BUG_KEYWORDS.iter().any(|k| lower.contains(k))
        || issue_references().iter().any(|re| re.is_match(message))
}

/// Commit records and change index produced by one history walk.
#[derive(Debug, Clone, Default)]
pub struct HistorySnapshot {
    /// Newest first
    pub commits: Vec<CommitRecord>,
    pub change_index: ChangeIndex,
}

/// Commit parser with a per-instance record cache.
#[derive(Default)]
pub struct CommitParser {
    cache: DashMap<String, CommitRecord>,
}

impl CommitParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commits parsed so far by this instance.
    pub fn cached_commits(&self) -> usize {
        self.cache.len()
    }

    /// Parse a commit into a [`CommitRecord`], reusing the cached record when
    /// this id was parsed before.
    ///
    /// Change statistics that cannot be read default to zero.
    pub fn parse_commit(&self, repo: &Repository, commit: &Commit) -> CommitRecord {
        let id = commit.id().to_string();
        if let Some(cached) = self.cache.get(&id) {
            return cached.clone();
        }

        let author = commit.author();
        let message = commit.message().unwrap_or("").to_string();
        let (files_changed, lines_added, lines_deleted) = match commit_stats(repo, commit) {
            Ok(stats) => stats,
            Err(e) => {
                debug!("No change stats for {}: {}", id, e);
                (0, 0, 0)
            }
        };

        let record = CommitRecord {
            id: id.clone(),
            author: author.name().unwrap_or("").to_string(),
            author_email: author.email().unwrap_or("").to_string(),
            timestamp: git_time_to_utc(&commit.time()),
            is_bug_fix: classify_bug_fix(&message),
            message,
            files_changed,
            lines_added,
            lines_deleted,
        };
        self.cache.insert(id, record.clone());
        record
    }

    /// Commits reachable from HEAD with commit time in `[start, end]`,
    /// ascending by time.
    pub fn commits_in_range(
        &self,
        repo: &Repository,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<CommitRecord>> {
        let mut revwalk = repo.revwalk()?;
        revwalk.set_sorting(Sort::TIME)?;
        revwalk.push_head()?;

        let mut commits = Vec::new();
        for oid in revwalk {
            let commit = repo.find_commit(oid?)?;
            let when = git_time_to_utc(&commit.time());
            if when > end {
                continue;
            }
            if when < start {
                break; // sorted by time, nothing older can match
            }
            commits.push(self.parse_commit(repo, &commit));
        }

        commits.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(commits)
    }

    /// Walk history from HEAD (newest first, optionally capped), parsing each
    /// commit and indexing the files it touched.
    pub fn parse_history(
        &self,
        repo: &Repository,
        max_commits: Option<usize>,
    ) -> CoreResult<HistorySnapshot> {
        let mut snapshot = HistorySnapshot::default();
        self.walk(repo, max_commits, |commit| {
            snapshot.commits.push(self.parse_commit(repo, commit));
            index_commit(repo, commit, &mut snapshot.change_index);
        })?;
        debug!(
            "Parsed {} commits touching {} files",
            snapshot.commits.len(),
            snapshot.change_index.file_count()
        );
        Ok(snapshot)
    }

    /// Build the file -> commit-id index over history from HEAD.
    ///
    /// Commits whose diff cannot be read are skipped.
    pub fn build_change_index(
        &self,
        repo: &Repository,
        max_commits: Option<usize>,
    ) -> CoreResult<ChangeIndex> {
        let mut index = ChangeIndex::new();
        self.walk(repo, max_commits, |commit| index_commit(repo, commit, &mut index))?;
        Ok(index)
    }

    /// Number of commits touching `file_path` in the trailing `months`
    /// (30-day) months.
    pub fn commit_frequency(
        &self,
        repo: &Repository,
        file_path: &str,
        months: u32,
    ) -> CoreResult<usize> {
        let since = Utc::now() - Duration::days(months as i64 * 30);
        let mut revwalk = repo.revwalk()?;
        revwalk.set_sorting(Sort::TIME)?;
        revwalk.push_head()?;

        let mut count = 0;
        for oid in revwalk {
            let commit = repo.find_commit(oid?)?;
            if git_time_to_utc(&commit.time()) < since {
                break;
            }
            if touches_path(repo, &commit, file_path)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// All blob paths in the HEAD tree.
    pub fn tracked_files(repo: &Repository) -> CoreResult<Vec<String>> {
        let head = repo.head()?;
        let tree = head.peel_to_tree()?;

        let mut files = Vec::new();
        tree.walk(git2::TreeWalkMode::PreOrder, |dir, entry| {
            if entry.kind() == Some(git2::ObjectType::Blob) {
                let path = if dir.is_empty() {
                    entry.name().unwrap_or("").to_string()
                } else {
                    format!("{}{}", dir, entry.name().unwrap_or(""))
                };
                files.push(path);
            }
            git2::TreeWalkResult::Ok
        })?;

        Ok(files)
    }

    fn walk<F>(&self, repo: &Repository, max_commits: Option<usize>, mut visit: F) -> CoreResult<()>
    where
        F: FnMut(&Commit),
    {
        let mut revwalk = repo.revwalk()?;
        revwalk.set_sorting(Sort::TIME)?;
        revwalk.push_head()?;

        let limit = max_commits.unwrap_or(usize::MAX);
        for oid in revwalk.take(limit) {
            let commit = repo.find_commit(oid?)?;
            visit(&commit);
        }
        Ok(())
    }
}

/// Diff a commit against its first parent (or the empty tree).
fn first_parent_diff<'r>(
    repo: &'r Repository,
    commit: &Commit,
    opts: Option<&mut DiffOptions>,
) -> Result<git2::Diff<'r>, git2::Error> {
    let tree = commit.tree()?;
    let parent_tree = match commit.parent(0) {
        Ok(parent) => Some(parent.tree()?),
        Err(_) => None,
    };
    repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), opts)
}

fn commit_stats(repo: &Repository, commit: &Commit) -> Result<(usize, usize, usize), git2::Error> {
    let stats = first_parent_diff(repo, commit, None)?.stats()?;
    Ok((stats.files_changed(), stats.insertions(), stats.deletions()))
}

fn index_commit(repo: &Repository, commit: &Commit, index: &mut ChangeIndex) {
    let id = commit.id().to_string();
    let diff = match first_parent_diff(repo, commit, None) {
        Ok(diff) => diff,
        Err(e) => {
            debug!("Skipping {} in change index: {}", id, e);
            return;
        }
    };
    let files: Vec<String> = diff
        .deltas()
        .filter_map(|delta| {
            delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path())
                .map(|p| p.to_string_lossy().into_owned())
        })
        .collect();
    index.record_commit(&id, files);
}

fn touches_path(repo: &Repository, commit: &Commit, file_path: &str) -> CoreResult<bool> {
    let mut opts = DiffOptions::new();
    opts.pathspec(file_path);
    let diff = first_parent_diff(repo, commit, Some(&mut opts))?;
    Ok(diff.deltas().len() > 0)
}

/// Convert a git timestamp to UTC, falling back to the epoch.
pub(crate) fn git_time_to_utc(time: &git2::Time) -> DateTime<Utc> {
    Utc.timestamp_opt(time.seconds(), 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
