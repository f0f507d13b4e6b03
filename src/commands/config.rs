//! Config command handlers

use anyhow::{Context, Result};

use klpgen::Config;

/// Print the effective configuration as TOML.
#[cfg(not(tarpaulin_include))]
pub fn handle_show() -> Result<()> {
    let config = Config::load()?;
    let toml_str = toml::to_string_pretty(&config).context("Failed to serialize config")?;
    println!("{}", toml_str);
    Ok(())
}

/// Write the default configuration file unless one exists.
#[cfg(not(tarpaulin_include))]
pub fn handle_init() -> Result<()> {
    let path = Config::config_path()?;
    if path.exists() {
        println!("Config already exists: {}", path.display());
        return Ok(());
    }

    Config::default().save()?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
