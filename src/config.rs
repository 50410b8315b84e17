//! Config loader (C7, §6 ADDED).
//!
//! TOML file at `<config_dir>/statline/config.toml`, following the teacher's
//! `Config::load`/`save`/`get_config_path` shape: every field carries a
//! `#[serde(default = "...")]` so an empty or partial file is always valid,
//! and a missing file is simply the all-defaults `Config`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::registry::Thresholds;

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub thresholds: ThresholdOverrides,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Per-category threshold overrides, keyed the same way as the Registry's
/// built-in table (§4.1, §9 Open Question: policy is config-overridable).
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ThresholdOverrides {
    #[serde(flatten)]
    pub categories: HashMap<String, CategoryThresholds>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CategoryThresholds {
    pub fresh_ms: u64,
    pub stale_ms: u64,
    pub critical_ms: u64,
}

impl From<CategoryThresholds> for Thresholds {
    fn from(c: CategoryThresholds) -> Self {
        Thresholds { fresh_ms: c.fresh_ms, stale_ms: c.stale_ms, critical_ms: c.critical_ms }
    }
}

impl ThresholdOverrides {
    pub fn into_registry_overrides(self) -> HashMap<String, Thresholds> {
        self.categories.into_iter().map(|(k, v)| (k, v.into())).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub quota_endpoint: Option<String>,
    #[serde(default)]
    pub version_check_url: Option<String>,
    #[serde(default)]
    pub notifications_feed_path: Option<PathBuf>,
    #[serde(default = "SourcesConfig::default_billing_binary")]
    pub billing_binary: String,
}

impl SourcesConfig {
    fn default_billing_binary() -> String {
        "ccusage".to_string()
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            quota_endpoint: None,
            version_check_url: None,
            notifications_feed_path: None,
            billing_binary: Self::default_billing_binary(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "BrokerConfig::default_overall_deadline_ms")]
    pub overall_deadline_ms: u64,
}

impl BrokerConfig {
    fn default_overall_deadline_ms() -> u64 {
        crate::broker::DEFAULT_OVERALL_DEADLINE.as_millis() as u64
    }

    pub fn overall_deadline(&self) -> Duration {
        Duration::from_millis(self.overall_deadline_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { overall_deadline_ms: Self::default_overall_deadline_ms() }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "SessionConfig::default_inactive_secs")]
    pub inactive_window_secs: u64,
}

impl SessionConfig {
    fn default_inactive_secs() -> u64 {
        crate::session::DEFAULT_INACTIVE_SECS
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { inactive_window_secs: Self::default_inactive_secs() }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = get_config_path()?;
        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = get_config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn create_default() -> Result<PathBuf> {
        let config = Config::default();
        config.save()?;
        get_config_path()
    }
}

fn get_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    Ok(config_dir.join("statline").join("config.toml"))
}

pub fn show_config() -> Result<()> {
    let path = get_config_path()?;
    println!("Config: {}", path.display());
    println!();
    let config = Config::load()?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
