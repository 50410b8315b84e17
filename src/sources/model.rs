//! Tier 1: chosen model identifier, read straight from stdin (§4.4).

use anyhow::Result;
use std::time::Duration;

use super::{GatherContext, Source, Tier};
use crate::store::SessionHealth;

pub struct ModelSource;

impl Source for ModelSource {
    fn id(&self) -> &'static str {
        "model"
    }

    fn tier(&self) -> Tier {
        Tier::Instant
    }

    fn freshness_category(&self) -> &'static str {
        "instant"
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(0)
    }

    fn fetch(&self, ctx: &GatherContext) -> Result<serde_json::Value> {
        Ok(serde_json::json!(ctx.session.model.clone().unwrap_or_default()))
    }

    fn merge(&self, health: &mut SessionHealth, value: &serde_json::Value) {
        health.sources.insert(
            self.id().to_string(),
            crate::store::CacheEntry::new(value.clone(), std::time::SystemTime::now(), None),
        );
    }
}
