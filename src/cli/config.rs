//! `delta-update config`: show or change update settings.
//!
//! Settings live in a JSON file (default `<config dir>/delta/update.json`,
//! overridable with `--config` or `DELTA_UPDATE_CONFIG`).
//!
//! # Examples
//!
//! ```bash
//! delta-update config                                  # Show all settings
//! delta-update config --json                           # Machine-readable
//! delta-update config --set channel=beta               # Follow beta releases
//! delta-update config --set enabled=false --set auto_install=false
//! ```

use crate::config::{ConfigStore, JsonConfigStore};
use crate::upgrade::UpdateConfig;
use anyhow::{Context, Result, anyhow};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

/// Show or change update settings.
#[derive(Args, Debug)]
pub struct ConfigCommand {
    /// Set a value (repeatable), e.g. `--set check_interval=weekly`
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub assignments: Vec<String>,

    /// Print the configuration as JSON
    #[arg(long)]
    pub json: bool,

    /// Print only the configuration file path
    #[arg(long)]
    pub path: bool,
}

impl ConfigCommand {
    pub async fn execute(self, config_path: Option<PathBuf>) -> Result<()> {
        let path = match config_path {
            Some(path) => path,
            None => JsonConfigStore::default_path()?,
        };
        let store = JsonConfigStore::new(path);

        if self.path {
            println!("{}", store.path().display());
            return Ok(());
        }

        let mut config = store.load().await?;
        if !self.assignments.is_empty() {
            apply_assignments(&mut config, &self.assignments)?;
            store.save(&config).await?;
            println!(
                "{} {} setting(s) in {}",
                "Updated".green(),
                self.assignments.len(),
                store.path().display()
            );
        }

        if self.json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            print_config(&config, &store);
        }
        Ok(())
    }
}

fn apply_assignments(config: &mut UpdateConfig, assignments: &[String]) -> Result<()> {
    for assignment in assignments {
        let (key, value) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected KEY=VALUE, got '{assignment}'"))?;
        config
            .set_field(key.trim(), value.trim())
            .with_context(|| format!("Failed to set {}", key.trim()))?;
    }
    Ok(())
}

fn print_config(config: &UpdateConfig, store: &JsonConfigStore) {
    println!("{} {}", "Configuration:".bold(), store.path().display());

    let rows: [(&str, String); 12] = [
        ("enabled", config.enabled.to_string()),
        ("check_on_startup", config.check_on_startup.to_string()),
        ("auto_install", config.auto_install.to_string()),
        ("channel", config.channel.to_string()),
        ("check_interval", config.check_interval.to_string()),
        ("backup_before_update", config.backup_before_update.to_string()),
        ("allow_prerelease", config.allow_prerelease.to_string()),
        ("github_repository", config.github_repository.clone()),
        ("download_directory", config.download_directory.clone()),
        ("notification_level", config.notification_level.to_string()),
        ("skip_version", config.skip_version.clone()),
        ("last_version", config.last_version.clone()),
    ];

    for (key, value) in rows {
        let value = if value.is_empty() {
            "(unset)".dimmed().to_string()
        } else {
            value
        };
        println!("  {key:<22} {value}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upgrade::CheckInterval;
    use crate::version::ReleaseChannel;

    #[test]
    fn test_apply_assignments() {
        let mut config = UpdateConfig::default();
        apply_assignments(
            &mut config,
            &["channel=beta".to_string(), " check_interval = weekly ".to_string()],
        )
        .unwrap();
        assert_eq!(config.channel, ReleaseChannel::Beta);
        assert_eq!(config.check_interval, CheckInterval::Weekly);
    }

    #[test]
    fn test_apply_assignments_rejects_bad_input() {
        let mut config = UpdateConfig::default();
        assert!(apply_assignments(&mut config, &["channel".to_string()]).is_err());
        assert!(apply_assignments(&mut config, &["color=blue".to_string()]).is_err());
        assert!(apply_assignments(&mut config, &["enabled=maybe".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_set_persists() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("update.json");

        ConfigCommand {
            assignments: vec!["auto_install=true".to_string()],
            json: false,
            path: false,
        }
        .execute(Some(path.clone()))
        .await
        .unwrap();

        let saved = JsonConfigStore::new(&path).load().await.unwrap();
        assert!(saved.auto_install);
    }
}
