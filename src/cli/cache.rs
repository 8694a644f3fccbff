//! Cache command - inspect and prune cached clones

use anyhow::Result;
use console::style;

use archmap::cache::RepositoryCache;
use archmap::config::AnalyzerConfig;

use super::CacheAction;

pub fn run(config: &AnalyzerConfig, action: CacheAction) -> Result<()> {
    let cache = RepositoryCache::from_config(config)?;

    match action {
        CacheAction::Path { locator } => {
            let path = cache.cache_path_for(&locator);
            let state = if cache.is_cached(&locator) {
                style("cached").green()
            } else {
                style("not cached").dim()
            };
            println!("{} ({})", path.display(), state);
        }
        CacheAction::Size => {
            println!(
                "{} MB in {}",
                cache.size_in_megabytes(),
                style(cache.root().display()).cyan()
            );
        }
        CacheAction::Clean { days } => {
            let days = days.unwrap_or(config.cache.max_age_days);
            let removed = cache.cleanup_older_than(days);
            println!(
                "{} Removed {} entr{} older than {} days",
                style("✓").green(),
                removed,
                if removed == 1 { "y" } else { "ies" },
                days
            );
        }
        CacheAction::Clear => {
            cache.clear_all()?;
            println!(
                "{} Cleared {}",
                style("✓").green(),
                style(cache.root().display()).cyan()
            );
        }
    }
    Ok(())
}
