//! Tier 3: upstream account-quota snapshot (§1, §4.4).
//!
//! The upstream quota service's wire format is explicitly out of scope
//! (§1). This source exposes only the fetch/merge boundary; `endpoint`
//! being unset is a valid configuration (quota display simply stays
//! unpopulated) rather than an error.

use anyhow::{Context, Result};
use std::time::Duration;

use super::{GatherContext, Source, Tier};
use crate::store::SessionHealth;

pub struct QuotaSource {
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

impl Default for QuotaSource {
    fn default() -> Self {
        Self { endpoint: None, timeout: Duration::from_secs(5) }
    }
}

impl QuotaSource {
    pub fn new(endpoint: Option<String>) -> Self {
        Self { endpoint, ..Default::default() }
    }
}

impl Source for QuotaSource {
    fn id(&self) -> &'static str {
        "quota"
    }

    fn tier(&self) -> Tier {
        Tier::GloballyShared
    }

    fn freshness_category(&self) -> &'static str {
        "quota_broker"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn fetch(&self, _ctx: &GatherContext) -> Result<serde_json::Value> {
        let Some(endpoint) = self.endpoint.as_ref() else {
            anyhow::bail!("quota endpoint not configured");
        };
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("Failed to build quota HTTP client")?;
        let resp = client.get(endpoint).send().context("quota request failed")?;
        let value: serde_json::Value = resp.json().context("quota response was not JSON")?;
        Ok(value)
    }

    fn merge(&self, health: &mut SessionHealth, value: &serde_json::Value) {
        health.sources.insert(
            self.id().to_string(),
            crate::store::CacheEntry::new(value.clone(), std::time::SystemTime::now(), None),
        );
    }
}
