//! Analyze command - run the pipeline with a progress bar

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use archmap::config::AnalyzerConfig;
use archmap::models::{ProgressEvent, RiskLevel};
use archmap::{AnalysisReport, Depth, GitAnalyzer};

pub fn run(
    config: &AnalyzerConfig,
    locator: &str,
    depth: Depth,
    token: Option<&str>,
    format: &str,
) -> Result<()> {
    let analyzer = GitAnalyzer::from_config(config).context("Failed to open repository cache")?;

    let bar = ProgressBar::new(100);
    bar.set_style(create_bar_style());
    let sink = |event: ProgressEvent| {
        bar.set_position(event.percent as u64);
        bar.set_message(event.message);
    };

    let result = analyzer.analyze_detailed(locator, depth, token, Some(&sink));
    bar.finish_and_clear();
    let report = result.with_context(|| format!("Analysis of {} failed", locator))?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text(&report),
    }
    Ok(())
}

/// Create bar progress style
fn create_bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓▒░  ")
}

fn print_text(report: &AnalysisReport) {
    let summary = &report.summary;
    println!("\n{}", style("archmap analysis").bold());
    println!("{}", style("──────────────────────────────────────").dim());
    println!("  Commits        {}", summary.total_commits);
    println!("  Files          {}", summary.total_files);
    println!("  Authors        {}", summary.total_authors);

    let risk = report.bus_factor.risk_level;
    let risk_text = match risk {
        RiskLevel::Critical => style(risk.to_string()).red().bold(),
        RiskLevel::High => style(risk.to_string()).yellow().bold(),
        RiskLevel::Medium => style(risk.to_string()).cyan(),
        RiskLevel::Low => style(risk.to_string()).green(),
    };
    println!(
        "  Bus factor     {} ({}, {:.1}% coverage)",
        style(summary.bus_factor).bold(),
        risk_text,
        report.bus_factor.coverage_percentage
    );
    if !report.bus_factor.critical_developers.is_empty() {
        println!("                 {}", report.bus_factor.critical_developers.join(", "));
    }
    println!("  Concentration  {:.2} (Gini)", report.knowledge_concentration);
    println!("  Orphaned       {}", summary.orphaned_files);
    println!("  High coupling  {}", summary.high_coupling_pairs);
    if report.degraded_files > 0 {
        println!(
            "  {} {} files could not be blamed",
            style("!").yellow(),
            report.degraded_files
        );
    }
    for step in report.fetch.failed_steps() {
        println!("  {} `git {}` failed; history may be shallow", style("!").yellow(), step);
    }

    if !report.top_coupling_pairs.is_empty() {
        println!("\n{}", style("MOST COUPLED FILES").bold());
        for pair in &report.top_coupling_pairs {
            println!(
                "  {:.2}  {} <-> {}  ({} co-changes)",
                pair.score, pair.file_a, pair.file_b, pair.co_changes
            );
        }
    }

    if !report.logical_modules.is_empty() {
        println!("\n{}", style("LOGICAL MODULES").bold());
        for (i, module) in report.logical_modules.iter().enumerate() {
            println!("  #{} ({} files)", i + 1, module.len());
            for file in module {
                println!("     {}", style(file).dim());
            }
        }
    }

    if !report.violations.is_empty() {
        println!("\n{}", style("RULE VIOLATIONS").bold());
        for v in &report.violations {
            println!(
                "  [{}] {}: {} <-> {} ({:.2})",
                v.severity, v.rule, v.file_a, v.file_b, v.score
            );
        }
    }

    if !report.orphaned_files.is_empty() {
        println!("\n{}", style("ORPHANED FILES").bold());
        for file in &report.orphaned_files {
            println!("  {}", file);
        }
    }

    println!(
        "\n{} in {:.1}s",
        style("Done").green(),
        summary.duration_seconds
    );
}
