//! Repository analysis pipeline
//!
//! Runs the stages in a fixed order:
//! 1. Acquire a checkout (cache hit or clone)
//! 2. Fetch full history (best-effort)
//! 3. Parse commits and build the change index
//! 4. List files at HEAD
//! 5. Blame every file concurrently
//! 6. Change coupling and bus factor, concurrently
//! 7. Aggregate the summary
//!
//! Any stage error aborts the run; there are no partial results.

pub mod progress;

use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::RepositoryCache;
use crate::config::{AnalysisConfig, AnalyzerConfig};
use crate::coupling::CouplingAnalyzer;
use crate::errors::{CoreResult, Outcome};
use crate::git::locator::{mask_credentials, resolve_locator};
use crate::git::{CommitParser, FetchReport};
use crate::models::{
    AnalysisResult, AnalysisStatus, ArchitecturalRule, BusFactorResult, CouplingPair,
    FileOwnership, RuleViolation,
};
use crate::ownership::{bus_factor, knowledge_concentration, orphaned_files, OwnershipCalculator};

pub use progress::{ProgressReporter, ProgressSink};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Clone,
    Fetch,
    ParseCommits,
    ListFiles,
    Ownership,
    Coupling,
    BusFactor,
    Finalize,
    Complete,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Clone,
        Stage::Fetch,
        Stage::ParseCommits,
        Stage::ListFiles,
        Stage::Ownership,
        Stage::Coupling,
        Stage::BusFactor,
        Stage::Finalize,
        Stage::Complete,
    ];

    /// Fixed progress checkpoint reported on entering the stage.
    pub fn percent(self) -> u8 {
        match self {
            Stage::Clone => 5,
            Stage::Fetch => 10,
            Stage::ParseCommits => 20,
            Stage::ListFiles => 40,
            Stage::Ownership => 55,
            Stage::Coupling => 75,
            Stage::BusFactor => 85,
            Stage::Finalize => 95,
            Stage::Complete => 100,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Clone => "clone",
            Stage::Fetch => "fetch",
            Stage::ParseCommits => "parse_commits",
            Stage::ListFiles => "list_files",
            Stage::Ownership => "ownership",
            Stage::Coupling => "coupling",
            Stage::BusFactor => "bus_factor",
            Stage::Finalize => "finalize",
            Stage::Complete => "complete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much history to analyze.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    /// Newest commits only (see `quick_commit_limit`)
    Quick,
    #[default]
    Full,
}

impl FromStr for Depth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quick" => Ok(Depth::Quick),
            "full" => Ok(Depth::Full),
            other => Err(format!("unknown depth `{}` (expected quick or full)", other)),
        }
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Depth::Quick => write!(f, "quick"),
            Depth::Full => write!(f, "full"),
        }
    }
}

/// Summary plus the detail behind each number.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub summary: AnalysisResult,
    pub bus_factor: BusFactorResult,
    /// Gini coefficient of line ownership
    pub knowledge_concentration: f64,
    pub orphaned_files: Vec<String>,
    pub top_coupling_pairs: Vec<CouplingPair>,
    pub logical_modules: Vec<Vec<String>>,
    pub violations: Vec<RuleViolation>,
    /// Files that could not be blamed and count as unowned
    pub degraded_files: usize,
    pub fetch: FetchReport,
}

/// Runs analyses against a repository cache.
///
/// Commit records and blame results are cached per instance, so repeated
/// runs on one analyzer reuse earlier work.
pub struct GitAnalyzer {
    cache: RepositoryCache,
    parser: CommitParser,
    ownership: OwnershipCalculator,
    coupling: CouplingAnalyzer,
    settings: AnalysisConfig,
    rules: Vec<ArchitecturalRule>,
}

impl GitAnalyzer {
    pub fn new(cache: RepositoryCache) -> Self {
        Self {
            cache,
            parser: CommitParser::new(),
            ownership: OwnershipCalculator::new(),
            coupling: CouplingAnalyzer::new(),
            settings: AnalysisConfig::default(),
            rules: Vec::new(),
        }
    }

    pub fn from_config(config: &AnalyzerConfig) -> CoreResult<Self> {
        Ok(Self::new(RepositoryCache::from_config(config)?)
            .with_settings(config.analysis.clone())
            .with_rules(config.rules.clone()))
    }

    pub fn with_settings(mut self, settings: AnalysisConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_rules(mut self, rules: Vec<ArchitecturalRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn cache(&self) -> &RepositoryCache {
        &self.cache
    }

    /// Analyze `locator` and return the summary.
    pub fn analyze(
        &self,
        locator: &str,
        depth: Depth,
        credentials: Option<&str>,
        progress: Option<&dyn ProgressSink>,
    ) -> CoreResult<AnalysisResult> {
        self.analyze_detailed(locator, depth, credentials, progress)
            .map(|report| report.summary)
    }

    /// Analyze `locator` and return the summary with its supporting detail.
    pub fn analyze_detailed(
        &self,
        locator: &str,
        depth: Depth,
        credentials: Option<&str>,
        progress: Option<&dyn ProgressSink>,
    ) -> CoreResult<AnalysisReport> {
        let started = Instant::now();
        let locator = locator.trim();
        let progress = ProgressReporter::new(progress);
        let masked = mask_credentials(locator);

        progress.stage(Stage::Clone, format!("Preparing {}", masked));
        resolve_locator(locator).map_err(|e| e.at_stage(Stage::Clone))?;
        // held until the run ends so no other run fetches into this tree
        let entry = self.cache.lock_entry(locator);
        let handle = self
            .cache
            .acquire(&entry, credentials)
            .map_err(|e| e.at_stage(Stage::Clone))?;

        progress.stage(Stage::Fetch, "Fetching full history");
        let fetch = self
            .cache
            .fetch_full_history(&handle)
            .map_err(|e| e.at_stage(Stage::Fetch))?;
        if fetch.is_degraded() {
            warn!("History fetch for {} was incomplete", masked);
        }
        let handle = handle.refresh().map_err(|e| e.at_stage(Stage::Fetch))?;

        let max_commits = match depth {
            Depth::Quick => Some(self.settings.quick_commit_limit),
            Depth::Full => None,
        };
        progress.stage(Stage::ParseCommits, "Parsing commits");
        let repo = handle.open().map_err(|e| e.at_stage(Stage::ParseCommits))?;
        let history = self
            .parser
            .parse_history(&repo, max_commits)
            .map_err(|e| e.at_stage(Stage::ParseCommits))?;

        progress.stage(Stage::ListFiles, "Listing files");
        let files = CommitParser::tracked_files(&repo).map_err(|e| e.at_stage(Stage::ListFiles))?;
        drop(repo);

        progress.stage(
            Stage::Ownership,
            format!("Calculating ownership for {} files", files.len()),
        );
        let outcomes = self.ownership.compute_all(&handle, &files);
        let degraded_files = outcomes.iter().filter(|o| o.is_degraded()).count();
        if degraded_files > 0 {
            warn!("{} files fell back to zero owners", degraded_files);
        }
        let records: Vec<FileOwnership> = outcomes.into_iter().map(Outcome::into_value).collect();

        progress.stage(Stage::Coupling, "Detecting coupling");
        let (pairs, bus) = rayon::join(
            || {
                self.coupling
                    .compute_file_coupling(&history.change_index, self.settings.min_coupling, None)
            },
            || bus_factor(&records),
        );
        progress.stage(
            Stage::BusFactor,
            format!("Bus factor {} ({})", bus.bus_factor, bus.risk_level),
        );

        progress.stage(Stage::Finalize, "Finalizing");
        let orphans = orphaned_files(&records, self.settings.orphan_inactive_days, Utc::now());
        let high_coupling_pairs = pairs
            .iter()
            .filter(|p| p.score >= self.settings.high_coupling_threshold)
            .count();
        let logical_modules = self
            .coupling
            .detect_logical_modules(&pairs, self.settings.module_threshold);
        let violations = self.coupling.check_architectural_rules(&pairs, &self.rules);
        let total_authors = count_authors(&records);

        let summary = AnalysisResult {
            repository_id: Uuid::new_v4(),
            status: AnalysisStatus::Completed,
            total_commits: history.commits.len(),
            total_files: files.len(),
            total_authors,
            bus_factor: bus.bus_factor,
            orphaned_files: orphans.len(),
            high_coupling_pairs,
            duration_seconds: started.elapsed().as_secs_f64(),
            completed_at: Utc::now(),
        };
        progress.stage(Stage::Complete, "Completed");
        info!(
            "Analyzed {}: {} commits, {} files, bus factor {} in {:.2}s",
            masked,
            summary.total_commits,
            summary.total_files,
            summary.bus_factor,
            summary.duration_seconds
        );

        let mut top_coupling_pairs = pairs;
        top_coupling_pairs.truncate(self.settings.top_coupling_pairs);

        Ok(AnalysisReport {
            summary,
            knowledge_concentration: knowledge_concentration(&records),
            bus_factor: bus,
            orphaned_files: orphans,
            top_coupling_pairs,
            logical_modules,
            violations,
            degraded_files,
            fetch,
        })
    }
}

fn count_authors(records: &[FileOwnership]) -> usize {
    let identities: rustc_hash::FxHashSet<&str> = records
        .iter()
        .flat_map(|r| r.owners.iter().map(|o| o.identity.as_str()))
        .collect();
    identities.len()
}
