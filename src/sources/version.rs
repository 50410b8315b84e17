//! Tier 3: host-CLI version/update probe (§4.4). Out of scope beyond the
//! Source contract — see [`super::quota`] for the same shape.

use anyhow::{Context, Result};
use std::time::Duration;

use super::{GatherContext, Source, Tier};
use crate::store::SessionHealth;

pub struct VersionSource {
    pub check_url: Option<String>,
    pub current_version: String,
    pub timeout: Duration,
}

impl Default for VersionSource {
    fn default() -> Self {
        Self {
            check_url: None,
            current_version: env!("CARGO_PKG_VERSION").to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl VersionSource {
    pub fn new(check_url: Option<String>) -> Self {
        Self { check_url, ..Default::default() }
    }
}

impl Source for VersionSource {
    fn id(&self) -> &'static str {
        "version"
    }

    fn tier(&self) -> Tier {
        Tier::GloballyShared
    }

    fn freshness_category(&self) -> &'static str {
        "version_check"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn fetch(&self, _ctx: &GatherContext) -> Result<serde_json::Value> {
        let Some(url) = self.check_url.as_ref() else {
            anyhow::bail!("version check url not configured");
        };
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("Failed to build version-check HTTP client")?;
        let resp = client.get(url).send().context("version check request failed")?;
        let latest: String = resp.text().context("version response was not text")?;
        let latest = latest.trim().to_string();
        Ok(serde_json::json!({
            "current": self.current_version,
            "latest": latest,
            "outdated": latest != self.current_version,
        }))
    }

    fn merge(&self, health: &mut SessionHealth, value: &serde_json::Value) {
        if value["outdated"].as_bool().unwrap_or(false) {
            health.alerts.push(format!(
                "update available: {} -> {}",
                value["current"].as_str().unwrap_or("?"),
                value["latest"].as_str().unwrap_or("?")
            ));
        }
        health.sources.insert(
            self.id().to_string(),
            crate::store::CacheEntry::new(value.clone(), std::time::SystemTime::now(), None),
        );
    }
}
