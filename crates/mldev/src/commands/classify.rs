use anyhow::Context;
use colored::Colorize;
use mldev_build::recovery::{offered_actions, print_failure_report};
use mldev_build::{BuildPhase, classify};
use std::path::Path;

/// Classify a saved build log
pub fn handle(logfile: &Path, phase: &str, json: bool) -> anyhow::Result<()> {
    let logs = std::fs::read_to_string(logfile)
        .with_context(|| format!("Cannot read build log {}", logfile.display()))?;

    let analysis = classify(&logs, BuildPhase::parse(phase));

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(());
    }

    print_failure_report(&logfile.display().to_string(), &analysis);
    let actions: Vec<&str> = offered_actions(&analysis)
        .iter()
        .map(|action| action.label())
        .collect();
    println!("Options:    {}", actions.join(" / ").dimmed());
    Ok(())
}
