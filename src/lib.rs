//! archmap - ownership, bus factor and change coupling from git history
//!
//! Mines a repository's commit history and blame data to find where
//! knowledge is concentrated, which files have been abandoned by their
//! owners, and which files keep changing together.
//!
//! The entry point is [`pipeline::GitAnalyzer::analyze`]:
//!
//! ```no_run
//! use archmap::cache::RepositoryCache;
//! use archmap::pipeline::{Depth, GitAnalyzer};
//!
//! let cache = RepositoryCache::new("/tmp/archmap-cache").unwrap();
//! let analyzer = GitAnalyzer::new(cache);
//! let result = analyzer
//!     .analyze("https://github.com/rust-lang/log", Depth::Quick, None, None)
//!     .unwrap();
//! println!("bus factor: {}", result.bus_factor);
//! ```

pub mod cache;
pub mod config;
pub mod coupling;
pub mod errors;
pub mod git;
pub mod models;
pub mod ownership;
pub mod pipeline;

pub use errors::{AnalysisError, CoreResult, Outcome};
pub use pipeline::{AnalysisReport, Depth, GitAnalyzer, ProgressSink, Stage};
