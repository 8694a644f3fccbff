//! Git access for the analysis core
//!
//! - `locator`: validate repository references, inject and mask credentials
//! - `remote`: shallow clone and best-effort history fetch with retries
//! - `history`: commit parsing, bug-fix classification, change index
//! - `blame`: per-line attribution at HEAD
//!
//! # Example
//!
//! ```no_run
//! use archmap::git::CommitParser;
//! use git2::Repository;
//!
//! let repo = Repository::open("/path/to/repo").unwrap();
//! let parser = CommitParser::new();
//! let index = parser.build_change_index(&repo, Some(100)).unwrap();
//! println!("{} files changed in the last 100 commits", index.file_count());
//! ```

pub mod blame;
pub mod history;
pub mod locator;
pub mod remote;

pub use blame::{BlameSummary, LineBlame};
pub use history::{classify_bug_fix, CommitParser, HistorySnapshot};
pub use locator::{resolve_locator, Platform, RepoInfo};
pub use remote::{CloneOptions, FetchReport, FetchStep, RetryPolicy, StepStatus};
