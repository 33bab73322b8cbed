use anyhow::{Context, Result};

use crate::cli::output::OutputOptions;
use crate::core::config::{AppConfig, ADMIN_KEY_ENV};

pub fn init(_opts: &OutputOptions) -> Result<()> {
    let path = AppConfig::config_path();
    if path.exists() {
        eprintln!("Config file already exists at {}", path.display());
        eprintln!("Remove it first if you want to regenerate.");
        return Ok(());
    }

    let path = AppConfig::default()
        .save()
        .context("failed to generate config")?;
    println!("Generated config at {}", path.display());
    println!("  Set {} to an admin API key before running `ledgerlens report`.", ADMIN_KEY_ENV);
    Ok(())
}

pub fn path(_opts: &OutputOptions) -> Result<()> {
    println!("{}", AppConfig::config_path().display());
    Ok(())
}

pub fn check(_opts: &OutputOptions) -> Result<()> {
    let path = AppConfig::config_path();
    if !path.exists() {
        eprintln!("No config file found at {}", path.display());
        eprintln!("Run `ledgerlens config init` to create one.");
        return Ok(());
    }

    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let issues = config.validate();
    if issues.is_empty() {
        println!("Config is valid: {}", path.display());
        println!("  Ledger: {}", config.ledger.base_url);
        println!("  Snapshot: {}", config.ledger.snapshot_path().display());
        let key = if config.ledger.resolve_api_key().is_some() {
            "found"
        } else {
            "missing"
        };
        println!("  Admin key: {}", key);
        if !config.pricing.models.is_empty() {
            println!("  Pricing overrides: {}", config.pricing.models.len());
        }
    } else {
        eprintln!("Config issues found in {}:", path.display());
        for issue in &issues {
            eprintln!("  - {}", issue);
        }
        std::process::exit(1);
    }
    Ok(())
}
