//! Configuration commands

use anyhow::{Context, Result};
use logtrail_core::TailConfig;
use owo_colors::OwoColorize;
use std::path::Path;

/// Print the annotated example config
pub fn run_example() -> Result<()> {
    print!("{}", TailConfig::example());
    Ok(())
}

/// Validate a config file and print the settings it resolves to
pub fn run_check(file: &Path) -> Result<()> {
    let config = TailConfig::load(file)
        .with_context(|| format!("Invalid config {}", file.display()))?;
    let effective = config
        .to_toml_string()
        .context("Failed to render config")?;

    println!("{} {}", "✓".green(), file.display());
    println!("{}", "Effective configuration".bold());
    println!("{}", effective.dimmed());
    Ok(())
}
