//! Ownership, bus factor and knowledge concentration
//!
//! Line attribution comes from blame at HEAD. Everything past the blame call
//! is a pure function over [`FileOwnership`] records, so the pipeline blames
//! each file once and derives bus factor, orphans and Gini from the same data.

use chrono::{DateTime, Datelike, Duration, Utc};
use dashmap::DashMap;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::cache::RepositoryHandle;
use crate::errors::{AnalysisError, CoreResult, Outcome};
use crate::git::blame::{blame_file, BlameSummary};
use crate::git::CommitParser;
use crate::models::{BusFactorResult, FileOwnership, MonthlyActivity, OwnerContribution, RiskLevel};

/// Default inactivity window for orphan detection.
pub const DEFAULT_INACTIVE_DAYS: i64 = 180;

/// Default trailing window for author timelines.
pub const DEFAULT_TIMELINE_MONTHS: u32 = 12;

const BUCKET_DAYS: i64 = 30;

/// Blame cache key: repository path, HEAD commit, file path.
type BlameKey = (String, String, String);

/// Computes blame-derived ownership. Holds a per-instance blame cache keyed
/// by checkout and HEAD, so a moved HEAD never serves stale attribution, and
/// a commit parser whose record cache is shared by every timeline query.
#[derive(Default)]
pub struct OwnershipCalculator {
    blame_cache: DashMap<BlameKey, Arc<BlameSummary>>,
    commit_parser: CommitParser,
}

impl OwnershipCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files blamed so far by this instance.
    pub fn cached_files(&self) -> usize {
        self.blame_cache.len()
    }

    /// Ownership of one file at HEAD.
    ///
    /// Never fails: a file that cannot be blamed (missing at HEAD, binary,
    /// unreadable) yields a zero-owner record marked as degraded.
    pub fn compute_file_ownership(
        &self,
        handle: &RepositoryHandle,
        file_path: &str,
    ) -> Outcome<FileOwnership> {
        match self.blame_summary(handle, file_path) {
            Ok(summary) => Outcome::Complete(ownership_from_summary(file_path, &summary)),
            Err(e) => {
                warn!("{}", e);
                Outcome::degraded(FileOwnership::unowned(file_path), e.to_string())
            }
        }
    }

    /// Ownership of many files, blamed concurrently. Each worker opens its
    /// own repository handle. Output order follows `file_paths`.
    pub fn compute_all(
        &self,
        handle: &RepositoryHandle,
        file_paths: &[String],
    ) -> Vec<Outcome<FileOwnership>> {
        file_paths
            .par_iter()
            .map(|path| self.compute_file_ownership(handle, path))
            .collect()
    }

    /// Bus factor over the given files.
    pub fn compute_bus_factor(
        &self,
        handle: &RepositoryHandle,
        file_paths: &[String],
    ) -> BusFactorResult {
        let records: Vec<FileOwnership> = self
            .compute_all(handle, file_paths)
            .into_iter()
            .map(Outcome::into_value)
            .collect();
        bus_factor(&records)
    }

    /// Files whose primary owner has been inactive for more than
    /// `inactive_days`.
    pub fn detect_orphaned_files(
        &self,
        handle: &RepositoryHandle,
        file_paths: &[String],
        inactive_days: i64,
    ) -> Vec<String> {
        let records: Vec<FileOwnership> = self
            .compute_all(handle, file_paths)
            .into_iter()
            .map(Outcome::into_value)
            .collect();
        orphaned_files(&records, inactive_days, Utc::now())
    }

    /// Commits by `author` (matched on email) in each of the trailing
    /// `months` 30-day buckets, oldest first and zero-filled.
    pub fn author_activity_timeline(
        &self,
        handle: &RepositoryHandle,
        author: &str,
        months: u32,
    ) -> CoreResult<Vec<MonthlyActivity>> {
        let repo = handle.open()?;
        let now = Utc::now();
        let start = now - Duration::days(months as i64 * BUCKET_DAYS);
        let commits = self.commit_parser.commits_in_range(&repo, start, now)?;
        let times: Vec<DateTime<Utc>> = commits
            .iter()
            .filter(|c| c.author_email == author)
            .map(|c| c.timestamp)
            .collect();
        Ok(activity_buckets(&times, months, now))
    }

    fn blame_summary(
        &self,
        handle: &RepositoryHandle,
        file_path: &str,
    ) -> CoreResult<Arc<BlameSummary>> {
        let key = (
            handle.path().to_string_lossy().into_owned(),
            handle.head().to_string(),
            file_path.to_string(),
        );
        if let Some(cached) = self.blame_cache.get(&key) {
            return Ok(Arc::clone(&cached));
        }

        let repo = handle.open()?;
        let entries = blame_file(&repo, file_path).map_err(|e| AnalysisError::BlameUnavailable {
            file: file_path.to_string(),
            reason: e.message().to_string(),
        })?;
        let summary = Arc::new(BlameSummary::from_entries(&entries));
        self.blame_cache.insert(key, Arc::clone(&summary));
        Ok(summary)
    }
}

/// Build a [`FileOwnership`] from per-identity blame totals.
pub fn ownership_from_summary(file_path: &str, summary: &BlameSummary) -> FileOwnership {
    let total_lines = summary.total_lines().max(1);

    let mut owners: Vec<OwnerContribution> = summary
        .lines_by_identity
        .iter()
        .map(|(identity, &lines)| OwnerContribution {
            identity: identity.clone(),
            name: summary
                .names
                .get(identity)
                .cloned()
                .unwrap_or_else(|| identity.clone()),
            lines,
            percentage: lines as f64 / total_lines as f64 * 100.0,
            last_commit: summary
                .last_touch
                .get(identity)
                .copied()
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        })
        .collect();
    owners.sort_by(|a, b| b.lines.cmp(&a.lines).then_with(|| a.identity.cmp(&b.identity)));

    let primary_owner = owners.first().filter(|o| o.percentage > 50.0).cloned();
    let last_modified = owners.iter().map(|o| o.last_commit).max();

    FileOwnership {
        file_path: file_path.to_string(),
        owners,
        primary_owner,
        total_lines,
        last_modified,
    }
}

/// Greedy bus factor: identities in descending contribution order (ties by
/// identity) until at least half of all attributed lines are covered.
pub fn bus_factor(records: &[FileOwnership]) -> BusFactorResult {
    let mut totals: HashMap<&str, u64> = HashMap::new();
    for record in records {
        for owner in &record.owners {
            *totals.entry(owner.identity.as_str()).or_insert(0) += owner.lines as u64;
        }
    }

    let total: u64 = totals.values().sum();
    if total == 0 {
        return BusFactorResult {
            bus_factor: 0,
            critical_developers: Vec::new(),
            risk_level: RiskLevel::from_bus_factor(0),
            coverage_percentage: 0.0,
        };
    }

    let mut ranked: Vec<(&str, u64)> = totals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let mut covered = 0u64;
    let mut critical = Vec::new();
    for (identity, lines) in ranked {
        critical.push(identity.to_string());
        covered += lines;
        if covered * 2 >= total {
            break;
        }
    }

    BusFactorResult {
        bus_factor: critical.len(),
        risk_level: RiskLevel::from_bus_factor(critical.len()),
        critical_developers: critical,
        coverage_percentage: covered as f64 / total as f64 * 100.0,
    }
}

/// Files with a primary owner whose last commit predates `now - inactive_days`.
pub fn orphaned_files(
    records: &[FileOwnership],
    inactive_days: i64,
    now: DateTime<Utc>,
) -> Vec<String> {
    let cutoff = now - Duration::days(inactive_days);
    records
        .iter()
        .filter(|r| {
            r.primary_owner
                .as_ref()
                .is_some_and(|owner| owner.last_commit < cutoff)
        })
        .map(|r| r.file_path.clone())
        .collect()
}

/// Gini coefficient over every owner's line count across all files.
///
/// 0 means evenly spread knowledge, values near 1 mean it sits with few people.
pub fn knowledge_concentration(records: &[FileOwnership]) -> f64 {
    let mut values: Vec<f64> = records
        .iter()
        .flat_map(|r| r.owners.iter().map(|o| o.lines as f64))
        .collect();
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len() as f64;
    let total: f64 = values.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let weighted: f64 = values
        .iter()
        .enumerate()
        .map(|(i, x)| (i as f64 + 1.0) * x)
        .sum();

    let gini = (2.0 * weighted) / (n * total) - (n + 1.0) / n;
    gini.clamp(0.0, 1.0)
}

/// Zero-filled counts over `months` consecutive 30-day buckets ending at `now`.
fn activity_buckets(times: &[DateTime<Utc>], months: u32, now: DateTime<Utc>) -> Vec<MonthlyActivity> {
    let start = now - Duration::days(months as i64 * BUCKET_DAYS);
    let mut counts = vec![0usize; months as usize];
    for t in times {
        if *t < start || *t > now {
            continue;
        }
        let bucket = ((*t - start).num_days() / BUCKET_DAYS) as usize;
        match counts.get_mut(bucket.min(months.saturating_sub(1) as usize)) {
            Some(count) => *count += 1,
            None => warn!("Timeline bucket out of range for {}", t),
        }
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| {
            let bucket_start = start + Duration::days(i as i64 * BUCKET_DAYS);
            MonthlyActivity {
                month: format!("{:04}-{:02}", bucket_start.year(), bucket_start.month()),
                count,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::history::test_support::commit_files;
    use chrono::TimeZone;
    use git2::Repository;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn owner(identity: &str, lines: u32, last_commit: DateTime<Utc>) -> OwnerContribution {
        OwnerContribution {
            identity: identity.to_string(),
            name: identity.to_string(),
            lines,
            percentage: 0.0,
            last_commit,
        }
    }

    fn record(path: &str, owners: Vec<OwnerContribution>) -> FileOwnership {
        let mut summary = BlameSummary::default();
        for o in &owners {
            summary.lines_by_identity.insert(o.identity.clone(), o.lines);
            summary.last_touch.insert(o.identity.clone(), o.last_commit);
        }
        ownership_from_summary(path, &summary)
    }

    #[test]
    fn test_ownership_percentages_and_primary() {
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let r = record("a.rs", vec![owner("a@x.io", 6, t), owner("b@x.io", 4, t)]);
        assert_eq!(r.total_lines, 10);
        assert_eq!(r.owners[0].identity, "a@x.io");
        assert!((r.owners[0].percentage - 60.0).abs() < 1e-9);
        assert_eq!(r.primary_owner.as_ref().map(|o| o.identity.as_str()), Some("a@x.io"));
        assert_eq!(r.last_modified, Some(t));
    }

    #[test]
    fn test_no_primary_at_exactly_half() {
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let r = record("a.rs", vec![owner("a@x.io", 5, t), owner("b@x.io", 5, t)]);
        assert!(r.primary_owner.is_none());
    }

    #[test]
    fn test_empty_summary_floors_total() {
        let r = ownership_from_summary("empty.txt", &BlameSummary::default());
        assert_eq!(r.total_lines, 1);
        assert!(r.owners.is_empty());
        assert!(r.last_modified.is_none());
    }

    #[test]
    fn test_bus_factor_single_author_is_critical() {
        let t = Utc::now();
        let result = bus_factor(&[record("a.rs", vec![owner("a@x.io", 10, t)])]);
        assert_eq!(result.bus_factor, 1);
        assert_eq!(result.risk_level, RiskLevel::Critical);
        assert_eq!(result.critical_developers, vec!["a@x.io"]);
        assert!((result.coverage_percentage - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_bus_factor_even_split() {
        let t = Utc::now();
        let records = vec![
            record("a.rs", vec![owner("a@x.io", 10, t)]),
            record("b.rs", vec![owner("b@x.io", 10, t)]),
            record("c.rs", vec![owner("c@x.io", 10, t)]),
            record("d.rs", vec![owner("d@x.io", 10, t)]),
        ];
        let result = bus_factor(&records);
        assert_eq!(result.bus_factor, 2);
        assert_eq!(result.risk_level, RiskLevel::High);
        // ties resolved by identity
        assert_eq!(result.critical_developers, vec!["a@x.io", "b@x.io"]);
        assert!((result.coverage_percentage - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_bus_factor_empty() {
        let result = bus_factor(&[FileOwnership::unowned("bin.png")]);
        assert_eq!(result.bus_factor, 0);
        assert_eq!(result.risk_level, RiskLevel::Critical);
        assert_eq!(result.coverage_percentage, 0.0);
    }

    #[test]
    fn test_orphaned_files() {
        let now = Utc::now();
        let stale = now - Duration::days(200);
        let fresh = now - Duration::days(10);
        let records = vec![
            record("stale.rs", vec![owner("a@x.io", 10, stale)]),
            record("fresh.rs", vec![owner("a@x.io", 10, fresh)]),
            // no primary owner, never orphaned
            record("shared.rs", vec![owner("a@x.io", 5, stale), owner("b@x.io", 5, stale)]),
        ];
        assert_eq!(orphaned_files(&records, 180, now), vec!["stale.rs"]);
    }

    #[test]
    fn test_gini_even_and_concentrated() {
        let t = Utc::now();
        let even = vec![record("a.rs", vec![owner("a@x.io", 10, t), owner("b@x.io", 10, t)])];
        assert!(knowledge_concentration(&even).abs() < 1e-9);

        let mut owners = vec![owner("big@x.io", 10_000, t)];
        for i in 0..50 {
            owners.push(owner(&format!("dev{}@x.io", i), 1, t));
        }
        let skewed = vec![record("a.rs", owners)];
        assert!(knowledge_concentration(&skewed) > 0.9);
        assert_eq!(knowledge_concentration(&[]), 0.0);
    }

    #[test]
    fn test_activity_buckets_zero_filled() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let times = vec![now - Duration::days(5), now - Duration::days(6), now - Duration::days(65)];
        let buckets = activity_buckets(&times, 3, now);
        assert_eq!(buckets.len(), 3);
        let counts: Vec<usize> = buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 0, 2]);
        assert!(buckets.windows(2).all(|w| w[0].month <= w[1].month));
    }

    #[test]
    fn test_compute_file_ownership_from_repo() {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        commit_files(&repo, &[("lib.rs", "1\n2\n3\n")], ("Alice", "alice@x.io"), 1_600_000_000, "init");
        commit_files(&repo, &[("lib.rs", "1\n2\n3\n4\n")], ("Bob", "bob@x.io"), 1_600_100_000, "more");
        let handle = RepositoryHandle::probe(dir.path()).unwrap();

        let calc = OwnershipCalculator::new();
        let outcome = calc.compute_file_ownership(&handle, "lib.rs");
        assert!(!outcome.is_degraded());
        let ownership = outcome.into_value();
        assert_eq!(ownership.total_lines, 4);
        let primary = ownership.primary_owner.unwrap();
        assert_eq!(primary.identity, "alice@x.io");
        assert_eq!(primary.name, "Alice");
        assert_eq!(calc.cached_files(), 1);

        let missing = calc.compute_file_ownership(&handle, "nope.rs");
        assert!(missing.is_degraded());
        assert!(missing.value().owners.is_empty());
    }

    #[test]
    fn test_timeline_from_repo() {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let now = Utc::now().timestamp();
        commit_files(&repo, &[("a.rs", "1\n")], ("Alice", "alice@x.io"), now - 3 * 86_400, "one");
        commit_files(&repo, &[("a.rs", "2\n")], ("Bob", "bob@x.io"), now - 2 * 86_400, "two");
        let handle = RepositoryHandle::probe(dir.path()).unwrap();

        let calc = OwnershipCalculator::new();
        let timeline = calc.author_activity_timeline(&handle, "alice@x.io", 12).unwrap();
        assert_eq!(timeline.len(), 12);
        assert_eq!(timeline.iter().map(|m| m.count).sum::<usize>(), 1);
        assert_eq!(timeline[11].count, 1);
        assert_eq!(calc.commit_parser.cached_commits(), 2);

        // the second query reuses parsed records
        let bob = calc.author_activity_timeline(&handle, "bob@x.io", 12).unwrap();
        assert_eq!(bob.iter().map(|m| m.count).sum::<usize>(), 1);
        assert_eq!(calc.commit_parser.cached_commits(), 2);
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLog {
        type Writer = CapturedLog;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_blame_failure_logged_as_warning() {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        commit_files(&repo, &[("a.rs", "1\n")], ("Alice", "alice@x.io"), 1_600_000_000, "one");
        let handle = RepositoryHandle::probe(dir.path()).unwrap();

        let log = CapturedLog::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(log.clone())
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .finish();
        let calc = OwnershipCalculator::new();
        let outcome = tracing::subscriber::with_default(subscriber, || {
            calc.compute_file_ownership(&handle, "gone.rs")
        });

        assert!(outcome.is_degraded());
        let text = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("WARN"), "{}", text);
        assert!(text.contains("gone.rs"), "{}", text);
    }

    proptest! {
        #[test]
        fn prop_gini_in_unit_range(lines in prop::collection::vec(0u32..10_000, 0..40)) {
            let t = Utc::now();
            let owners = lines
                .iter()
                .enumerate()
                .map(|(i, &l)| owner(&format!("d{}@x.io", i), l, t))
                .collect();
            let g = knowledge_concentration(&[record("f.rs", owners)]);
            prop_assert!((0.0..=1.0).contains(&g));
        }
    }
}
