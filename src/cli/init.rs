//! Init command - create the user config file

use anyhow::Result;
use console::style;

use archmap::config::AnalyzerConfig;

pub fn run() -> Result<()> {
    let existed = AnalyzerConfig::user_config_path().is_some_and(|p| p.exists());
    let path = AnalyzerConfig::init_user_config()?;
    if existed {
        println!(
            "{} Config already exists at {}",
            style("✓").green(),
            style(path.display()).cyan()
        );
    } else {
        println!(
            "{} Created {}",
            style("✓").green(),
            style(path.display()).cyan()
        );
    }
    Ok(())
}
