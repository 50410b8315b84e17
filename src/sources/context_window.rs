//! Tier 1: context-window usage, read straight from stdin (§4.4, §6).

use anyhow::Result;
use std::time::Duration;

use super::{GatherContext, Source, Tier};
use crate::store::SessionHealth;

pub struct ContextWindowSource;

impl Source for ContextWindowSource {
    fn id(&self) -> &'static str {
        "context"
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
        let session = ctx.session;
        let used = session.tokens_used();
        let total = session.context_window_size.unwrap_or(0);
        let pct = if total > 0 { (used as f64 / total as f64) * 100.0 } else { 0.0 };
        Ok(serde_json::json!({
            "used": used,
            "total": total,
            "pct": pct,
        }))
    }

    fn merge(&self, health: &mut SessionHealth, value: &serde_json::Value) {
        health.sources.insert(
            self.id().to_string(),
            crate::store::CacheEntry::new(value.clone(), std::time::SystemTime::now(), None),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    fn session(used: u64, total: u64) -> Session {
        Session {
            session_id: "s".into(),
            cwd: None,
            transcript_path: None,
            model: None,
            context_window_size: Some(total),
            input_tokens: Some(used),
            output_tokens: None,
            cache_read_input_tokens: None,
        }
    }

    #[test]
    fn computes_percentage() {
        let session = session(50_000, 200_000);
        let ctx = GatherContext { session: &session, deadline: std::time::Instant::now() };
        let value = ContextWindowSource.fetch(&ctx).unwrap();
        assert_eq!(value["used"], 50_000);
        assert_eq!(value["total"], 200_000);
        assert!((value["pct"].as_f64().unwrap() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_total_avoids_division_by_zero() {
        let session = session(0, 0);
        let ctx = GatherContext { session: &session, deadline: std::time::Instant::now() };
        let value = ContextWindowSource.fetch(&ctx).unwrap();
        assert_eq!(value["pct"], 0.0);
    }
}
