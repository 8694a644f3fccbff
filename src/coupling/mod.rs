//! Change coupling between files
//!
//! Two files are coupled when the same commits keep touching both. The score
//! is the Jaccard similarity of their commit-id sets. Strongly coupled pairs
//! form a weighted graph that is partitioned into logical modules.

pub mod louvain;

use petgraph::graph::{NodeIndex, UnGraph};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;
use tracing::debug;

use crate::models::{ArchitecturalRule, ChangeIndex, CouplingPair, RuleViolation};
use louvain::{louvain, WeightedGraph};

/// Default minimum score for a pair to be reported.
pub const DEFAULT_MIN_SCORE: f64 = 0.3;

/// Score at or above which a pair counts as high coupling.
pub const HIGH_COUPLING_THRESHOLD: f64 = 0.6;

/// Default number of pairs returned by [`CouplingAnalyzer::most_coupled_files`].
pub const DEFAULT_TOP_PAIRS: usize = 20;

/// |A ∩ B| / |A ∪ B|, or 0 when both sets are empty.
pub fn jaccard_similarity(a: &FxHashSet<String>, b: &FxHashSet<String>) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let intersection = small.iter().filter(|id| large.contains(*id)).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Descending by score; ties ordered by file names so output is stable.
fn by_score_desc(a: &CouplingPair, b: &CouplingPair) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.file_a.cmp(&b.file_a))
        .then_with(|| a.file_b.cmp(&b.file_b))
}

/// Coupling analysis over a [`ChangeIndex`].
#[derive(Debug, Clone)]
pub struct CouplingAnalyzer {
    /// Louvain resolution; higher values give smaller modules
    resolution: f64,
}

impl Default for CouplingAnalyzer {
    fn default() -> Self {
        Self { resolution: 1.0 }
    }
}

impl CouplingAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution;
        self
    }

    /// Every unordered file pair scoring at least `min_score`, highest first.
    ///
    /// With `max_commits`, only the index's newest `max_commits` commits are
    /// considered.
    pub fn compute_file_coupling(
        &self,
        index: &ChangeIndex,
        min_score: f64,
        max_commits: Option<usize>,
    ) -> Vec<CouplingPair> {
        let restricted;
        let index = match max_commits {
            Some(n) => {
                restricted = index.restricted_to_recent(n);
                &restricted
            }
            None => index,
        };

        let entries: Vec<(&str, &FxHashSet<String>)> = index.entries().collect();
        let mut pairs: Vec<CouplingPair> = (0..entries.len())
            .into_par_iter()
            .flat_map_iter(|i| {
                let (file_a, commits_a) = entries[i];
                entries[i + 1..].iter().filter_map(move |&(file_b, commits_b)| {
                    let score = jaccard_similarity(commits_a, commits_b);
                    if score < min_score {
                        return None;
                    }
                    let co_changes = commits_a.intersection(commits_b).count();
                    let smaller = commits_a.len().min(commits_b.len()).max(1);
                    Some(CouplingPair {
                        file_a: file_a.to_string(),
                        file_b: file_b.to_string(),
                        score,
                        co_changes,
                        confidence: (co_changes as f64 / smaller as f64).min(1.0),
                    })
                })
            })
            .collect();

        pairs.par_sort_by(by_score_desc);
        debug!(
            "Coupling: {} files, {} pairs >= {}",
            entries.len(),
            pairs.len(),
            min_score
        );
        pairs
    }

    /// Partition files joined by pairs scoring at least `threshold` into
    /// modules. Files with no qualifying pair belong to no module.
    ///
    /// Each module is sorted; modules are ordered largest first.
    pub fn detect_logical_modules(&self, pairs: &[CouplingPair], threshold: f64) -> Vec<Vec<String>> {
        let mut graph: UnGraph<&str, f64> = UnGraph::new_undirected();
        let mut nodes: FxHashMap<&str, NodeIndex> = FxHashMap::default();

        for pair in pairs.iter().filter(|p| p.score >= threshold) {
            let a = *nodes
                .entry(pair.file_a.as_str())
                .or_insert_with(|| graph.add_node(pair.file_a.as_str()));
            let b = *nodes
                .entry(pair.file_b.as_str())
                .or_insert_with(|| graph.add_node(pair.file_b.as_str()));
            graph.add_edge(a, b, pair.score);
        }

        if graph.edge_count() == 0 {
            return Vec::new();
        }

        let mut weighted = WeightedGraph::with_nodes(graph.node_count());
        for edge in graph.edge_indices() {
            if let Some((a, b)) = graph.edge_endpoints(edge) {
                weighted.add_edge(a.index(), b.index(), graph[edge]);
            }
        }

        let communities = louvain(&weighted, self.resolution);
        let mut modules: FxHashMap<usize, Vec<String>> = FxHashMap::default();
        for node in graph.node_indices() {
            modules
                .entry(communities[node.index()])
                .or_default()
                .push(graph[node].to_string());
        }

        let mut modules: Vec<Vec<String>> = modules.into_values().collect();
        for module in &mut modules {
            module.sort();
        }
        modules.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        debug!("Detected {} logical modules", modules.len());
        modules
    }

    /// One violation per (pair, rule, deny pattern, orientation) match.
    pub fn check_architectural_rules(
        &self,
        pairs: &[CouplingPair],
        rules: &[ArchitecturalRule],
    ) -> Vec<RuleViolation> {
        let mut violations = Vec::new();
        for pair in pairs {
            for rule in rules {
                for (pattern_a, pattern_b) in &rule.deny {
                    let orientations = [
                        (&pair.file_a, &pair.file_b),
                        (&pair.file_b, &pair.file_a),
                    ];
                    for (first, second) in orientations {
                        if first.contains(pattern_a.as_str()) && second.contains(pattern_b.as_str()) {
                            violations.push(RuleViolation {
                                rule: rule.name.clone(),
                                severity: rule.severity,
                                file_a: first.clone(),
                                file_b: second.clone(),
                                score: pair.score,
                            });
                        }
                    }
                }
            }
        }
        violations
    }

    /// Symmetric N×N Jaccard matrix over `files`, zero diagonal. Files
    /// missing from the index score 0 against everything.
    pub fn coupling_matrix(&self, files: &[String], index: &ChangeIndex) -> Vec<Vec<f64>> {
        let n = files.len();
        let mut matrix = vec![vec![0.0; n]; n];
        for i in 0..n {
            let Some(a) = index.commits_for(&files[i]) else {
                continue;
            };
            for j in (i + 1)..n {
                if let Some(b) = index.commits_for(&files[j]) {
                    let score = jaccard_similarity(a, b);
                    matrix[i][j] = score;
                    matrix[j][i] = score;
                }
            }
        }
        matrix
    }

    /// The `top_n` most coupled pairs regardless of score.
    pub fn most_coupled_files(&self, index: &ChangeIndex, top_n: usize) -> Vec<CouplingPair> {
        let mut pairs = self.compute_file_coupling(index, 0.0, None);
        pairs.truncate(top_n);
        pairs
    }
}

/// Number of pairs at or above [`HIGH_COUPLING_THRESHOLD`].
pub fn high_coupling_count(pairs: &[CouplingPair]) -> usize {
    pairs
        .iter()
        .filter(|p| p.score >= HIGH_COUPLING_THRESHOLD)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use proptest::prelude::*;

    fn set(ids: &[&str]) -> FxHashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn pair(a: &str, b: &str, score: f64) -> CouplingPair {
        CouplingPair {
            file_a: a.to_string(),
            file_b: b.to_string(),
            score,
            co_changes: 1,
            confidence: 1.0,
        }
    }

    #[test]
    fn test_identical_histories() {
        let mut index = ChangeIndex::new();
        for c in ["c1", "c2", "c3"] {
            index.record_commit(c, ["x.rs", "y.rs"]);
        }
        let pairs = CouplingAnalyzer::new().compute_file_coupling(&index, DEFAULT_MIN_SCORE, None);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].score, 1.0);
        assert_eq!(pairs[0].confidence, 1.0);
        assert_eq!(pairs[0].co_changes, 3);
    }

    #[test]
    fn test_partial_overlap() {
        let mut index = ChangeIndex::new();
        index.record_commit("c1", ["a.rs", "b.rs"]);
        index.record_commit("c2", ["a.rs", "b.rs"]);
        index.record_commit("c3", ["a.rs"]);
        index.record_commit("c4", ["b.rs"]);

        let pairs = CouplingAnalyzer::new().compute_file_coupling(&index, 0.3, None);
        assert_eq!(pairs.len(), 1);
        let p = &pairs[0];
        assert_eq!((p.file_a.as_str(), p.file_b.as_str()), ("a.rs", "b.rs"));
        assert!((p.score - 0.5).abs() < 1e-9);
        assert!((p.confidence - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(high_coupling_count(&pairs), 0);

        assert!(CouplingAnalyzer::new().compute_file_coupling(&index, 0.6, None).is_empty());
    }

    #[test]
    fn test_max_commits_restricts_history() {
        let mut index = ChangeIndex::new();
        index.record_commit("c4", ["a.rs", "b.rs"]);
        index.record_commit("c3", ["a.rs"]);
        index.record_commit("c2", ["b.rs"]);
        index.record_commit("c1", ["b.rs"]);

        let analyzer = CouplingAnalyzer::new();
        let all = analyzer.compute_file_coupling(&index, 0.0, None);
        assert!((all[0].score - 0.25).abs() < 1e-9);
        let recent = analyzer.compute_file_coupling(&index, 0.0, Some(1));
        assert_eq!(recent[0].score, 1.0);
    }

    #[test]
    fn test_sorted_descending() {
        let mut index = ChangeIndex::new();
        index.record_commit("c1", ["a", "b", "c"]);
        index.record_commit("c2", ["a", "b"]);
        let pairs = CouplingAnalyzer::new().compute_file_coupling(&index, 0.0, None);
        assert_eq!(pairs.len(), 3);
        assert!(pairs.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!((pairs[0].file_a.as_str(), pairs[0].file_b.as_str()), ("a", "b"));
    }

    #[test]
    fn test_modules_two_triangles() {
        let pairs = vec![
            pair("api/a.rs", "api/b.rs", 0.9),
            pair("api/a.rs", "api/c.rs", 0.8),
            pair("api/b.rs", "api/c.rs", 0.7),
            pair("db/x.rs", "db/y.rs", 0.9),
            pair("db/x.rs", "db/z.rs", 0.9),
            pair("db/y.rs", "db/z.rs", 0.6),
            // below threshold: neither bridges modules nor adds members
            pair("api/c.rs", "db/x.rs", 0.5),
            pair("lonely.rs", "api/a.rs", 0.1),
        ];
        let modules = CouplingAnalyzer::new().detect_logical_modules(&pairs, 0.6);
        assert_eq!(modules.len(), 2);
        assert!(modules.contains(&vec!["api/a.rs".into(), "api/b.rs".into(), "api/c.rs".into()]));
        assert!(modules.contains(&vec!["db/x.rs".into(), "db/y.rs".into(), "db/z.rs".into()]));
        assert!(!modules.iter().flatten().any(|f| f == "lonely.rs"));
    }

    #[test]
    fn test_modules_single_edge_and_empty() {
        let analyzer = CouplingAnalyzer::new();
        let modules = analyzer.detect_logical_modules(&[pair("a", "b", 0.8)], 0.6);
        assert_eq!(modules, vec![vec!["a".to_string(), "b".to_string()]]);
        assert!(analyzer.detect_logical_modules(&[], 0.6).is_empty());
        assert!(analyzer.detect_logical_modules(&[pair("a", "b", 0.2)], 0.6).is_empty());
    }

    #[test]
    fn test_rules_both_orientations() {
        let rule = ArchitecturalRule {
            name: "no-api-db".into(),
            severity: Severity::High,
            deny: vec![("/api/".into(), "/db/".into())],
        };
        let pairs = vec![
            pair("src/api/handler.rs", "src/db/query.rs", 0.7),
            pair("src/db/pool.rs", "src/api/routes.rs", 0.5),
            pair("src/ui/view.rs", "src/db/query.rs", 0.9),
        ];
        let violations = CouplingAnalyzer::new().check_architectural_rules(&pairs, &[rule]);
        assert_eq!(violations.len(), 2);
        assert!(violations.iter().all(|v| v.file_a.contains("/api/") && v.file_b.contains("/db/")));
        assert_eq!(violations[0].severity, Severity::High);
        assert_eq!(violations[1].file_a, "src/api/routes.rs");
    }

    #[test]
    fn test_coupling_matrix() {
        let mut index = ChangeIndex::new();
        index.record_commit("c1", ["a", "b"]);
        index.record_commit("c2", ["a"]);
        let files = vec!["a".to_string(), "b".to_string(), "ghost".to_string()];
        let m = CouplingAnalyzer::new().coupling_matrix(&files, &index);
        assert_eq!(m[0][0], 0.0);
        assert!((m[0][1] - 0.5).abs() < 1e-9);
        assert_eq!(m[0][1], m[1][0]);
        assert_eq!(m[2], vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_most_coupled_files_truncates() {
        let mut index = ChangeIndex::new();
        index.record_commit("c1", ["a", "b", "c", "d"]);
        let top = CouplingAnalyzer::new().most_coupled_files(&index, 2);
        assert_eq!(top.len(), 2);
    }

    #[test]
    fn test_disjoint_files_kept_at_zero_minimum() {
        let mut index = ChangeIndex::new();
        index.record_commit("c1", ["a.rs"]);
        index.record_commit("c2", ["b.rs"]);

        let analyzer = CouplingAnalyzer::new();
        let pairs = analyzer.compute_file_coupling(&index, 0.0, None);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].score, 0.0);
        assert_eq!(pairs[0].co_changes, 0);
        assert_eq!(pairs[0].confidence, 0.0);

        let top = analyzer.most_coupled_files(&index, DEFAULT_TOP_PAIRS);
        assert_eq!(top.len(), 1);
        assert_eq!((top[0].file_a.as_str(), top[0].file_b.as_str()), ("a.rs", "b.rs"));

        // any positive minimum drops them
        assert!(analyzer.compute_file_coupling(&index, 0.01, None).is_empty());
    }

    proptest! {
        #[test]
        fn prop_jaccard_symmetric_and_bounded(
            a in prop::collection::hash_set(0u8..20, 0..15),
            b in prop::collection::hash_set(0u8..20, 0..15),
        ) {
            let a: FxHashSet<String> = a.iter().map(|x| x.to_string()).collect();
            let b: FxHashSet<String> = b.iter().map(|x| x.to_string()).collect();
            let ab = jaccard_similarity(&a, &b);
            prop_assert_eq!(ab, jaccard_similarity(&b, &a));
            prop_assert!((0.0..=1.0).contains(&ab));
        }
    }

    #[test]
    fn test_jaccard_basics() {
        assert_eq!(jaccard_similarity(&set(&[]), &set(&[])), 0.0);
        assert_eq!(jaccard_similarity(&set(&["c1"]), &set(&["c1"])), 1.0);
        assert!((jaccard_similarity(&set(&["c1", "c2", "c3"]), &set(&["c1", "c2", "c4"])) - 0.5).abs() < 1e-9);
    }
}
