//! Tier 3: user-facing notifications feed (§4.4). Delivery mechanism and
//! content are out of scope (§1 Non-goals) — this reads a host-provided
//! JSON file of pending notifications, the simplest contract that satisfies
//! the Source boundary.

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

use super::{GatherContext, Source, Tier};
use crate::store::SessionHealth;

pub struct NotificationsSource {
    pub feed_path: Option<PathBuf>,
}

impl Default for NotificationsSource {
    fn default() -> Self {
        Self { feed_path: None }
    }
}

impl NotificationsSource {
    pub fn new(feed_path: Option<PathBuf>) -> Self {
        Self { feed_path }
    }
}

impl Source for NotificationsSource {
    fn id(&self) -> &'static str {
        "notifications"
    }

    fn tier(&self) -> Tier {
        Tier::GloballyShared
    }

    fn freshness_category(&self) -> &'static str {
        "notifications"
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(500)
    }

    fn fetch(&self, _ctx: &GatherContext) -> Result<serde_json::Value> {
        let Some(path) = self.feed_path.as_ref() else {
            return Ok(serde_json::json!({ "items": [] }));
        };
        let raw = std::fs::read_to_string(path)?;
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        Ok(value)
    }

    fn merge(&self, health: &mut SessionHealth, value: &serde_json::Value) {
        health.sources.insert(
            self.id().to_string(),
            crate::store::CacheEntry::new(value.clone(), std::time::SystemTime::now(), None),
        );
    }
}
