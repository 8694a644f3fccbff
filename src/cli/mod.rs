//! CLI command definitions and handlers

mod analyze;
mod cache;
mod init;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use archmap::config::AnalyzerConfig;
use archmap::Depth;

/// archmap - ownership, bus factor and change coupling from git history
#[derive(Parser, Debug)]
#[command(name = "archmap")]
#[command(
    version,
    about = "Mine git history for code ownership, bus factor, orphaned files and change coupling",
    after_help = "\
Examples:
  archmap analyze https://github.com/rust-lang/log          Full history analysis
  archmap analyze git@github.com:org/repo.git --depth quick Newest 100 commits only
  archmap analyze https://github.com/org/repo --format json JSON output for scripting
  archmap cache size                                        Disk used by cached clones
  archmap cache clean --days 14                             Drop clones unused for 14 days"
)]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn", value_parser = ["error", "warn", "info", "debug", "trace"])]
    pub log_level: String,

    /// Config file (default: ~/.config/archmap/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze a repository by URL or SSH locator
    Analyze {
        /// Repository locator (https://..., ssh://..., git@host:owner/repo.git)
        locator: String,

        /// History depth: quick (newest commits only) or full
        #[arg(long, short = 'd', default_value = "full")]
        depth: Depth,

        /// Access token for HTTP(S) remotes (default: $GITHUB_TOKEN)
        #[arg(long, env = "ARCHMAP_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Output format: text or json
        #[arg(long, short = 'f', default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// Inspect or prune the clone cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Write an example user config file
    Init,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Print the cache directory for a locator
    Path { locator: String },
    /// Print the total cache size
    Size,
    /// Remove entries not used for N days
    Clean {
        /// Age threshold (default: cache.max_age_days from config)
        #[arg(long)]
        days: Option<u64>,
    },
    /// Remove every cached clone
    Clear,
}

pub fn run(cli: Cli) -> Result<()> {
    let config = AnalyzerConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze {
            locator,
            depth,
            token,
            format,
        } => analyze::run(&config, &locator, depth, token.as_deref(), &format),
        Commands::Cache { action } => cache::run(&config, action),
        Commands::Init => init::run(),
    }
}
