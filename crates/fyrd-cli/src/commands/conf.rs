//! Conf command implementations.

use anyhow::Result;
use console::style;

use super::common::{Paths, load_config};

/// Print the whole config as YAML.
pub fn execute_show(paths: &Paths) -> Result<()> {
    let config = load_config(paths)?;
    if let Some(path) = config.path() {
        println!("# {}", path.display());
    }
    print!("{}", serde_yaml_ng::to_string(&config)?);
    Ok(())
}

/// Print one section or value.
pub fn execute_get(paths: &Paths, key: &str) -> Result<()> {
    let config = load_config(paths)?;
    match config.get(key)? {
        Some(value) => print!("{}", serde_yaml_ng::to_string(&value)?),
        None => anyhow::bail!("No config entry '{key}'"),
    }
    Ok(())
}

/// Set a value and save the config.
pub fn execute_set(paths: &Paths, key: &str, value: &str) -> Result<()> {
    let mut config = load_config(paths)?;
    config.set(key, value)?;
    config.save()?;
    println!("{} {key} = {value}", style("✓").green().bold());
    Ok(())
}

/// Remove a value and save the config.
pub fn execute_delete(paths: &Paths, key: &str) -> Result<()> {
    let mut config = load_config(paths)?;
    if config.delete(key)? {
        config.save()?;
        println!("{} Removed {key}", style("✓").green().bold());
    } else {
        println!("{} Nothing to remove for {key}", style("→").cyan().bold());
    }
    Ok(())
}

/// Restore the default config.
pub fn execute_reset(paths: &Paths) -> Result<()> {
    let mut config = load_config(paths)?;
    config.reset();
    config.save()?;
    println!("{} Config reset to defaults", style("✓").green().bold());
    Ok(())
}
