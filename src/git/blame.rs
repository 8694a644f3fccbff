//! Git blame integration for line-level ownership tracking
//!
//! Attributes each line of a file at HEAD to the author of the commit that
//! last changed it, and folds the hunks into per-identity totals.

use chrono::{DateTime, Utc};
use git2::Repository;
use std::collections::HashMap;
use std::path::Path;

use super::history::git_time_to_utc;

/// Identity used when a commit carries no author email.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Blame information for a contiguous range of lines.
#[derive(Debug, Clone, PartialEq)]
pub struct LineBlame {
    /// Full commit hash
    pub commit: String,
    pub author: String,
    /// Author email, or [`UNKNOWN_IDENTITY`]
    pub identity: String,
    pub timestamp: DateTime<Utc>,
    /// Starting line number (1-indexed)
    pub line_start: u32,
    pub line_count: u32,
}

/// Per-identity totals for one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlameSummary {
    pub lines_by_identity: HashMap<String, u32>,
    /// Most recent commit time per identity among its attributed lines
    pub last_touch: HashMap<String, DateTime<Utc>>,
    /// Author name from the most recent attributed line
    pub names: HashMap<String, String>,
}

impl BlameSummary {
    pub fn from_entries(entries: &[LineBlame]) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            let newest = summary
                .last_touch
                .get(&entry.identity)
                .is_none_or(|t| entry.timestamp >= *t);
            if newest {
                summary
                    .names
                    .insert(entry.identity.clone(), entry.author.clone());
            }
            *summary
                .lines_by_identity
                .entry(entry.identity.clone())
                .or_insert(0) += entry.line_count;
            summary
                .last_touch
                .entry(entry.identity.clone())
                .and_modify(|t| {
                    if entry.timestamp > *t {
                        *t = entry.timestamp;
                    }
                })
                .or_insert(entry.timestamp);
        }
        summary
    }

    pub fn total_lines(&self) -> u32 {
        self.lines_by_identity.values().sum()
    }
}

/// Blame a whole file at HEAD.
///
/// Fails when libgit2 cannot blame the path (not present at HEAD, not a
/// tracked file, unreadable object).
pub fn blame_file(repo: &Repository, file_path: &str) -> Result<Vec<LineBlame>, git2::Error> {
    let blame = repo.blame_file(Path::new(file_path), None)?;

    let mut commit_times: HashMap<git2::Oid, DateTime<Utc>> = HashMap::new();
    let mut entries = Vec::with_capacity(blame.len());

    for hunk in blame.iter() {
        let commit_id = hunk.final_commit_id();
        let sig = hunk.final_signature();
        let author = sig.name().unwrap_or("Unknown").to_string();
        let identity = sig
            .email()
            .filter(|e| !e.is_empty())
            .unwrap_or(UNKNOWN_IDENTITY)
            .to_string();

        let timestamp = *commit_times.entry(commit_id).or_insert_with(|| {
            repo.find_commit(commit_id)
                .map(|c| git_time_to_utc(&c.time()))
                .unwrap_or_else(|_| git_time_to_utc(&sig.when()))
        });

        entries.push(LineBlame {
            commit: commit_id.to_string(),
            author,
            identity,
            timestamp,
            line_start: hunk.final_start_line() as u32,
            line_count: hunk.lines_in_hunk() as u32,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::history::test_support::commit_files;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn test_blame_file_two_authors() {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        commit_files(
            &repo,
            &[("lib.rs", "one\ntwo\nthree\n")],
            ("Alice", "alice@example.com"),
            1_600_000_000,
            "Add lib",
        );
        commit_files(
            &repo,
            &[("lib.rs", "one\ntwo\nthree\nfour\n")],
            ("Bob", "bob@example.com"),
            1_600_100_000,
            "Extend lib",
        );

        let entries = blame_file(&repo, "lib.rs").unwrap();
        let summary = BlameSummary::from_entries(&entries);

        assert_eq!(summary.total_lines(), 4);
        assert_eq!(summary.lines_by_identity["alice@example.com"], 3);
        assert_eq!(summary.lines_by_identity["bob@example.com"], 1);
        assert_eq!(
            summary.last_touch["bob@example.com"],
            Utc.timestamp_opt(1_600_100_000, 0).unwrap()
        );
    }

    #[test]
    fn test_blame_missing_file_fails() {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        commit_files(&repo, &[("a.txt", "x\n")], ("A", "a@x.io"), 1_600_000_000, "init");
        assert!(blame_file(&repo, "does/not/exist.txt").is_err());
    }

    #[test]
    fn test_summary_keeps_latest_touch() {
        let early = Utc.timestamp_opt(1_000, 0).unwrap();
        let late = Utc.timestamp_opt(2_000, 0).unwrap();
        let entries = vec![
            LineBlame {
                commit: "c2".into(),
                author: "A".into(),
                identity: "a@x.io".into(),
                timestamp: late,
                line_start: 1,
                line_count: 2,
            },
            LineBlame {
                commit: "c1".into(),
                author: "A".into(),
                identity: "a@x.io".into(),
                timestamp: early,
                line_start: 3,
                line_count: 5,
            },
        ];
        let summary = BlameSummary::from_entries(&entries);
        assert_eq!(summary.lines_by_identity["a@x.io"], 7);
        assert_eq!(summary.last_touch["a@x.io"], late);
    }
}
