//! Configuration for archmap
//!
//! Supports loading config from:
//! - ~/.config/archmap/config.toml (or an explicit path)
//! - Environment variables (`GIT_CACHE_DIR`, `GITHUB_TOKEN`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::cache::default_cache_root;
use crate::git::remote::{CloneOptions, RetryPolicy};
use crate::models::ArchitecturalRule;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AnalyzerConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub clone: CloneConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub rules: Vec<ArchitecturalRule>,
    /// Default credential for HTTP(S) remotes. Only read from the environment.
    #[serde(skip)]
    pub default_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root (default: ~/.archmap/repos)
    pub dir: Option<PathBuf>,
    /// Free space required before cloning, in MB
    pub min_free_mb: u64,
    /// Age after which `cache clean` removes an entry
    pub max_age_days: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            min_free_mb: 600,
            max_age_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CloneConfig {
    pub depth: u32,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            depth: 50,
            max_attempts: 3,
            base_delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Commit cap for `--depth quick`
    pub quick_commit_limit: usize,
    /// Pairs below this score are not reported
    pub min_coupling: f64,
    /// Pairs at or above this score count as high coupling
    pub high_coupling_threshold: f64,
    /// Minimum edge score for module detection
    pub module_threshold: f64,
    pub orphan_inactive_days: i64,
    pub top_coupling_pairs: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            quick_commit_limit: 100,
            min_coupling: 0.3,
            high_coupling_threshold: 0.6,
            module_threshold: 0.6,
            orphan_inactive_days: 180,
            top_coupling_pairs: 20,
        }
    }
}

impl AnalyzerConfig {
    /// Load config with priority:
    /// 1. Environment variables (highest)
    /// 2. `explicit` path, else the user config (~/.config/archmap/config.toml)
    /// 3. Built-in defaults
    ///
    /// A missing user config is not an error; a missing explicit path is.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::user_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment overrides. Empty values are ignored.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = var("GIT_CACHE_DIR").filter(|v| !v.is_empty()) {
            self.cache.dir = Some(PathBuf::from(dir));
        }
        if let Some(token) = var("GITHUB_TOKEN").filter(|v| !v.is_empty()) {
            self.default_token = Some(token);
        }
    }

    /// Get the user config file path
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("archmap").join("config.toml"))
    }

    pub fn cache_root(&self) -> PathBuf {
        self.cache.dir.clone().unwrap_or_else(default_cache_root)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.clone.max_attempts.max(1),
            base_delay: Duration::from_millis(self.clone.base_delay_ms),
            multiplier: self.clone.backoff_multiplier,
        }
    }

    pub fn clone_options(&self) -> CloneOptions {
        CloneOptions {
            depth: self.clone.depth,
            retry: self.retry_policy(),
            default_token: self.default_token.clone(),
        }
    }

    /// Create the user config directory and an example config file.
    /// An existing file is left untouched.
    pub fn init_user_config() -> Result<PathBuf> {
        let config_path = Self::user_config_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Self::write_example(&config_path)?;
        Ok(config_path)
    }

    /// Write the example config to `path` unless it already exists.
    pub fn write_example(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, EXAMPLE_CONFIG)?;
        Ok(true)
    }
}

const EXAMPLE_CONFIG: &str = r#"# archmap configuration

[cache]
# dir = "~/.archmap/repos"   # also: GIT_CACHE_DIR
# min_free_mb = 600
# max_age_days = 30

[clone]
# depth = 50
# max_attempts = 3
# base_delay_ms = 1000
# backoff_multiplier = 2.0

[analysis]
# quick_commit_limit = 100
# min_coupling = 0.3
# high_coupling_threshold = 0.6
# module_threshold = 0.6
# orphan_inactive_days = 180
# top_coupling_pairs = 20

# Pairs of path substrings that must not change together.
# [[rules]]
# name = "api-must-not-couple-to-db"
# severity = "high"
# deny = [["/api/", "/db/"]]
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = AnalyzerConfig::default();
        assert_eq!(config.cache.min_free_mb, 600);
        assert_eq!(config.clone.depth, 50);
        assert_eq!(config.analysis.quick_commit_limit, 100);
        assert_eq!(config.analysis.orphan_inactive_days, 180);
        assert!(config.rules.is_empty());

        let retry = config.retry_policy();
        assert_eq!(retry, RetryPolicy::default());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AnalyzerConfig::from_toml_str(
            r#"
[analysis]
min_coupling = 0.5

[[rules]]
name = "layers"
severity = "critical"
deny = [["ui/", "db/"]]
"#,
        )
        .unwrap();
        assert_eq!(config.analysis.min_coupling, 0.5);
        assert_eq!(config.analysis.module_threshold, 0.6);
        assert_eq!(config.clone.max_attempts, 3);
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.rules[0].severity, Severity::Critical);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [("GIT_CACHE_DIR", "/tmp/archmap-cache"), ("GITHUB_TOKEN", "")]
            .into_iter()
            .collect();
        let mut config = AnalyzerConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.cache_root(), PathBuf::from("/tmp/archmap-cache"));
        assert!(config.default_token.is_none());
    }

    #[test]
    fn test_token_reaches_clone_options() {
        let mut config = AnalyzerConfig::default();
        config.apply_env(|k| (k == "GITHUB_TOKEN").then(|| "tok".to_string()));
        assert_eq!(config.clone_options().default_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_example_config_parses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        assert!(AnalyzerConfig::write_example(&path).unwrap());
        assert!(!AnalyzerConfig::write_example(&path).unwrap());

        let config = AnalyzerConfig::from_file(&path).unwrap();
        assert_eq!(config, AnalyzerConfig::default());
    }

    #[test]
    fn test_missing_explicit_path_fails() {
        let dir = tempdir().unwrap();
        assert!(AnalyzerConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
