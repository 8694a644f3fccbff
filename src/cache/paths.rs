//! Cache path utilities - uses ~/.archmap/repos/<locator-hash>/

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Hex characters of the locator digest used as the entry directory name.
const ENTRY_NAME_LEN: usize = 16;

/// Default cache root: `~/.archmap/repos`, or `./.archmap/repos` without a home directory.
pub fn default_cache_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".archmap")
        .join("repos")
}

/// Deterministic directory name for a locator: the first 16 hex characters
/// of its SHA-256 digest.
pub fn entry_name(locator: &str) -> String {
    let digest = Sha256::digest(locator.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..ENTRY_NAME_LEN].to_string()
}

/// Entry directory for a locator under `root`.
pub fn entry_path(root: &Path, locator: &str) -> PathBuf {
    root.join(entry_name(locator))
}
