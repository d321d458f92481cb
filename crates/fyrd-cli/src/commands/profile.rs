//! Profile command implementations.
//!
//! Profiles are named option sets stored in the config file.

use anyhow::Result;
use console::style;

use fyrd_sched::options::parse_assignment;
use fyrd_sched::{JobOptions, OptionTable, SchedError};

use super::common::{Paths, load_config};

/// List every profile with its options.
pub fn execute_list(paths: &Paths) -> Result<()> {
    let config = load_config(paths)?;
    println!("{} Profiles:\n", style("→").cyan().bold());
    for name in config.profile_names() {
        let options = config.profile(&name)?;
        println!("  {:<12} {}", style(&name).cyan().bold(), summary(&options));
    }
    Ok(())
}

/// Show the options of one profile.
pub fn execute_show(paths: &Paths, name: &str) -> Result<()> {
    let config = load_config(paths)?;
    let options = config.profile(name)?;
    println!("{} Profile {}:", style("→").cyan().bold(), style(name).cyan());
    for (key, value) in options.iter() {
        println!("  {key:<14} {value}");
    }
    Ok(())
}

/// Create a profile or update some of its options.
pub fn execute_set(paths: &Paths, name: &str, assignments: &[String]) -> Result<()> {
    let mut config = load_config(paths)?;
    let mut options = match config.profile(name) {
        Ok(options) => options,
        Err(SchedError::ProfileNotFound(_)) => JobOptions::new(OptionTable::Function),
        Err(e) => return Err(e.into()),
    };
    for raw in assignments {
        let (key, value) = parse_assignment(raw)?;
        options.replace(&key, value)?;
    }

    config.set_profile(name, &options)?;
    config.save()?;
    println!(
        "{} Saved profile {}: {}",
        style("✓").green().bold(),
        style(name).cyan(),
        summary(&options)
    );
    Ok(())
}

/// Delete a profile.
pub fn execute_delete(paths: &Paths, name: &str) -> Result<()> {
    let mut config = load_config(paths)?;
    if !config.delete_profile(name)? {
        anyhow::bail!("No profile named '{name}'");
    }
    config.save()?;
    println!("{} Deleted profile {}", style("✓").green().bold(), style(name).cyan());
    Ok(())
}

fn summary(options: &JobOptions) -> String {
    options
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}
