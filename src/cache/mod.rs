//! Local cache of cloned repositories
//!
//! One directory per locator under the cache root, named by a digest of the
//! locator string. An entry exists on disk only while it is a valid working
//! tree with a readable HEAD commit: entries failing that probe are deleted
//! and treated as a miss.
//!
//! Filesystem mutations (directory creation, eviction, clearing) are
//! serialized by one re-entrant lock per cache instance. Whole analysis runs
//! on the same locator are serialized by a per-entry lock ([`EntryGuard`]),
//! which also keeps eviction away from trees that are being read.

pub mod paths;

use dashmap::DashMap;
use git2::Repository;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, ReentrantMutex};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

use crate::config::AnalyzerConfig;
use crate::errors::{AnalysisError, CoreResult};
use crate::git::locator::{mask_credentials, resolve_locator};
use crate::git::remote::{self, CloneOptions, FetchReport};

pub use paths::{default_cache_root, entry_name, entry_path};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// A validated checkout: path plus the HEAD commit it was opened at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryHandle {
    path: PathBuf,
    head: String,
}

impl RepositoryHandle {
    /// Open `path` and read its HEAD commit. Fails if either is impossible.
    pub fn probe(path: &Path) -> CoreResult<Self> {
        let repo = Repository::open(path)?;
        let head = repo.head()?.peel_to_commit()?.id().to_string();
        Ok(Self {
            path: path.to_path_buf(),
            head,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// HEAD commit id at the time the handle was created.
    pub fn head(&self) -> &str {
        &self.head
    }

    /// Open a fresh libgit2 handle. `git2::Repository` is not `Sync`, so
    /// each worker thread opens its own.
    pub fn open(&self) -> CoreResult<Repository> {
        Ok(Repository::open(&self.path)?)
    }

    /// Re-read HEAD, e.g. after a fetch moved it.
    pub fn refresh(&self) -> CoreResult<Self> {
        Self::probe(&self.path)
    }
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(RepositoryHandle),
    Miss,
    /// The entry failed the validity probe and was removed
    Evicted { reason: String },
}

impl CacheLookup {
    pub fn into_handle(self) -> Option<RepositoryHandle> {
        match self {
            CacheLookup::Hit(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Exclusive claim on one cache entry for the duration of an analysis run.
pub struct EntryGuard {
    locator: String,
    path: PathBuf,
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl EntryGuard {
    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Thread-safe manager for cached repository checkouts.
pub struct RepositoryCache {
    root: PathBuf,
    min_free_bytes: u64,
    clone_options: CloneOptions,
    fs_lock: ReentrantMutex<()>,
    entry_locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl RepositoryCache {
    /// Create a cache rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> CoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            min_free_bytes: 600 * BYTES_PER_MB,
            clone_options: CloneOptions::default(),
            fs_lock: ReentrantMutex::new(()),
            entry_locks: DashMap::new(),
        })
    }

    pub fn from_config(config: &AnalyzerConfig) -> CoreResult<Self> {
        Ok(Self::new(config.cache_root())?
            .with_min_free_mb(config.cache.min_free_mb)
            .with_clone_options(config.clone_options()))
    }

    pub fn with_min_free_mb(mut self, mb: u64) -> Self {
        self.min_free_bytes = mb.saturating_mul(BYTES_PER_MB);
        self
    }

    pub fn with_clone_options(mut self, options: CloneOptions) -> Self {
        self.clone_options = options;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn clone_options(&self) -> &CloneOptions {
        &self.clone_options
    }

    /// Deterministic entry path for a locator. Surrounding whitespace is
    /// ignored.
    pub fn cache_path_for(&self, locator: &str) -> PathBuf {
        let _fs = self.fs_lock.lock();
        entry_path(&self.root, locator.trim())
    }

    /// Whether an entry directory with a `.git` exists (no validity probe).
    pub fn is_cached(&self, locator: &str) -> bool {
        let path = self.cache_path_for(locator);
        let cached = path.join(".git").exists();
        debug!("Cache exists for {}: {}", mask_credentials(locator), cached);
        cached
    }

    /// Fail with `InsufficientSpace` when the cache volume has less than
    /// `required_bytes` free. Creates the cache root first if it is missing.
    pub fn ensure_space(&self, required_bytes: u64) -> CoreResult<()> {
        let _fs = self.fs_lock.lock();
        std::fs::create_dir_all(&self.root)?;
        let available = fs2::available_space(&self.root)?;
        if available < required_bytes {
            return Err(AnalysisError::InsufficientSpace {
                path: self.root.clone(),
                available_mb: available / BYTES_PER_MB,
                required_mb: required_bytes.div_ceil(BYTES_PER_MB),
            });
        }
        Ok(())
    }

    /// Look up a valid cached checkout. Invalid entries are deleted
    /// (best-effort) and reported as [`CacheLookup::Evicted`].
    pub fn get_cached_repository(&self, locator: &str) -> CacheLookup {
        let _fs = self.fs_lock.lock();
        let path = self.cache_path_for(locator);
        if !path.exists() {
            return CacheLookup::Miss;
        }

        match RepositoryHandle::probe(&path) {
            Ok(handle) => {
                touch(&path);
                CacheLookup::Hit(handle)
            }
            Err(e) => {
                let corrupt = AnalysisError::CorruptCache {
                    path: path.clone(),
                    reason: e.to_string(),
                };
                warn!("{}", corrupt);
                if let Err(rm) = std::fs::remove_dir_all(&path) {
                    error!("Failed to cleanup corrupted cache at {}: {}", path.display(), rm);
                }
                CacheLookup::Evicted {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Shallow-clone `locator` into `destination` and probe the result.
    ///
    /// Locator validation and the disk-space floor are checked once, up
    /// front; only the transport is retried.
    pub fn clone_repository(
        &self,
        locator: &str,
        destination: &Path,
        credentials: Option<&str>,
    ) -> CoreResult<RepositoryHandle> {
        let locator = locator.trim();
        resolve_locator(locator)?;
        {
            let _fs = self.fs_lock.lock();
            self.ensure_space(self.min_free_bytes)?;
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        remote::clone_repository(locator, destination, credentials, &self.clone_options)?;
        RepositoryHandle::probe(destination)
    }

    /// Best-effort fetch of full history into a checkout.
    pub fn fetch_full_history(&self, handle: &RepositoryHandle) -> CoreResult<FetchReport> {
        remote::fetch_full_history(handle.path(), &self.clone_options.retry)
    }

    /// Claim the entry for `locator`, blocking while another run holds it.
    pub fn lock_entry(&self, locator: &str) -> EntryGuard {
        let locator = locator.trim();
        // cleanup prunes the lock map under the fs lock
        let (path, lock) = {
            let _fs = self.fs_lock.lock();
            let path = self.cache_path_for(locator);
            let lock = self.entry_lock(&path);
            (path, lock)
        };
        EntryGuard {
            locator: locator.to_string(),
            _guard: lock.lock_arc(),
            path,
        }
    }

    /// Cached checkout for the claimed entry, cloning on a miss.
    pub fn acquire(
        &self,
        entry: &EntryGuard,
        credentials: Option<&str>,
    ) -> CoreResult<RepositoryHandle> {
        match self.get_cached_repository(entry.locator()) {
            CacheLookup::Hit(handle) => {
                info!("Using cached checkout {}", handle.path().display());
                Ok(handle)
            }
            CacheLookup::Miss => self.clone_repository(entry.locator(), entry.path(), credentials),
            CacheLookup::Evicted { reason } => {
                info!("Re-cloning after evicting corrupt entry: {}", reason);
                self.clone_repository(entry.locator(), entry.path(), credentials)
            }
        }
    }

    /// Delete entries not modified within `days`. Entries claimed by a
    /// running analysis are skipped. Returns the number removed.
    pub fn cleanup_older_than(&self, days: u64) -> usize {
        let cutoff = SystemTime::now() - Duration::from_secs(days.saturating_mul(86_400));
        let _fs = self.fs_lock.lock();

        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                error!("Cannot read cache root {}: {}", self.root.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    error!("Error during cleanup: {}", e);
                    continue;
                }
            };
            if !path.is_dir() {
                continue;
            }
            let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    error!("Error during cleanup for {}: {}", path.display(), e);
                    continue;
                }
            };
            if modified >= cutoff {
                continue;
            }
            let Some(_claim) = self.entry_lock(&path).try_lock_arc() else {
                debug!("Skipping {}: in use", path.display());
                continue;
            };
            match std::fs::remove_dir_all(&path) {
                Ok(()) => {
                    self.release_entry_lock(&path);
                    removed += 1;
                    info!("Removed old cached repo: {}", path.display());
                }
                Err(e) => error!("Error during cleanup for {}: {}", path.display(), e),
            }
        }
        removed
    }

    /// Remove every entry and leave an empty cache root. Entries claimed by
    /// a running analysis are left in place.
    pub fn clear_all(&self) -> CoreResult<()> {
        let _fs = self.fs_lock.lock();
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)?;
            return Ok(());
        }

        let mut busy = 0;
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            let Some(_claim) = self.entry_lock(&path).try_lock_arc() else {
                busy += 1;
                continue;
            };
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match result {
                Ok(()) => self.release_entry_lock(&path),
                Err(e) => error!("Failed to remove {}: {}", path.display(), e),
            }
        }

        if busy > 0 {
            warn!("Left {} in-use entries in {}", busy, self.root.display());
        } else {
            std::fs::remove_dir_all(&self.root)?;
            std::fs::create_dir_all(&self.root)?;
        }
        info!("Cleared cache directory: {}", self.root.display());
        Ok(())
    }

    /// Total size of all files under the cache root, in whole megabytes.
    pub fn size_in_megabytes(&self) -> u64 {
        let _fs = self.fs_lock.lock();
        let walker = ignore::WalkBuilder::new(&self.root)
            .standard_filters(false)
            .hidden(false)
            .follow_links(false)
            .build();

        let bytes: u64 = walker
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_some_and(|t| t.is_file()))
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum();
        bytes / BYTES_PER_MB
    }

    fn entry_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        self.entry_locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Forget the lock of a deleted entry. Called with the fs lock and the
    /// entry's claim held; a lock that another run already cloned is kept.
    fn release_entry_lock(&self, path: &Path) {
        // the map's copy plus the caller's claim
        self.entry_locks
            .remove_if(path, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

/// Refresh an entry's modification time so age-based cleanup tracks last use.
fn touch(path: &Path) {
    let result = std::fs::File::open(path).and_then(|f| f.set_modified(SystemTime::now()));
    if let Err(e) = result {
        debug!("Could not touch {}: {}", path.display(), e);
    }
}
