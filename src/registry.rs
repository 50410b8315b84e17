//! Freshness Registry (C1, §4.1).
//!
//! Freshness is purely a function of wall-clock age and declared thresholds.
//! Nothing here persists an "is fresh" bit anywhere — that was the bug class
//! the previous implementation shipped (§9 Design Notes). Every answer is
//! derived at call time from `fetched_at` plus this static threshold table.

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use crate::session::epoch_millis;

/// Suppresses the stale indicator when a refresh looks imminent.
const INTENT_GRACE_MS: u128 = 30_000;
/// Promotes a category to critical when its intent has gone unmet this long.
const INTENT_BROKEN_MS: u128 = 5 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub fresh_ms: u64,
    pub stale_ms: u64,
    pub critical_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Fresh,
    Stale,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorGlyph {
    /// Data is aging past `stale_ms`; a plain marker is shown.
    Stale,
    /// Data is aging past `critical_ms`, or its refresh loop is broken.
    Critical,
}

lazy_static! {
    /// Built-in category thresholds. Policy, not mechanism (§9 Open
    /// Questions) — operators may override any entry via config (§6 ADDED).
    static ref DEFAULT_CATEGORIES: HashMap<&'static str, Thresholds> = {
        let mut m = HashMap::new();
        m.insert("quota_broker", Thresholds { fresh_ms: 30_000, stale_ms: 300_000, critical_ms: 3_600_000 });
        m.insert("billing_ccusage", Thresholds { fresh_ms: 60_000, stale_ms: 600_000, critical_ms: 3_600_000 });
        m.insert("git_status", Thresholds { fresh_ms: 5_000, stale_ms: 60_000, critical_ms: 600_000 });
        m.insert("version_check", Thresholds { fresh_ms: 6 * 3_600_000, stale_ms: 24 * 3_600_000, critical_ms: 7 * 24 * 3_600_000 });
        m.insert("notifications", Thresholds { fresh_ms: 60_000, stale_ms: 900_000, critical_ms: 3_600_000 });
        m
    };
}

/// Registry of category thresholds. Starts from [`DEFAULT_CATEGORIES`] and
/// accepts config-driven overrides (§6 ADDED config loader).
#[derive(Debug, Clone)]
pub struct Registry {
    categories: HashMap<String, Thresholds>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            categories: DEFAULT_CATEGORIES
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        }
    }
}

impl Registry {
    pub fn with_overrides(overrides: HashMap<String, Thresholds>) -> Self {
        let mut categories = Self::default().categories;
        categories.extend(overrides);
        Self { categories }
    }

    pub fn thresholds(&self, category: &str) -> Thresholds {
        self.categories.get(category).copied().unwrap_or(Thresholds {
            fresh_ms: 30_000,
            stale_ms: 300_000,
            critical_ms: 3_600_000,
        })
    }

    pub fn is_fresh(&self, fetched_at: SystemTime, category: &str) -> bool {
        age_ms(fetched_at) < self.thresholds(category).fresh_ms as u128
    }

    pub fn status(&self, fetched_at: SystemTime, category: &str) -> Status {
        let age = age_ms(fetched_at);
        let t = self.thresholds(category);
        if age < t.fresh_ms as u128 {
            Status::Fresh
        } else if age < t.critical_ms as u128 {
            Status::Stale
        } else {
            Status::Critical
        }
    }

    pub fn indicator(&self, fetched_at: SystemTime, category: &str) -> Option<IndicatorGlyph> {
        match self.status(fetched_at, category) {
            Status::Fresh => None,
            Status::Stale => Some(IndicatorGlyph::Stale),
            Status::Critical => Some(IndicatorGlyph::Critical),
        }
    }

    /// Context-aware variant consulted by the Renderer: suppresses the stale
    /// indicator when a refresh looks imminent (a young intent marker
    /// exists), and promotes to critical when the intent marker is old
    /// enough that the refresh loop looks broken (§4.1, §8 scenario 4).
    pub fn context_aware_indicator(
        &self,
        fetched_at: SystemTime,
        category: &str,
        intent_age_ms: Option<u128>,
    ) -> Option<IndicatorGlyph> {
        if let Some(age) = intent_age_ms {
            if age >= INTENT_BROKEN_MS {
                return Some(IndicatorGlyph::Critical);
            }
            if age < INTENT_GRACE_MS {
                return None;
            }
        }
        self.indicator(fetched_at, category)
    }
}

fn age_ms(fetched_at: SystemTime) -> u128 {
    let now = epoch_millis(SystemTime::now());
    let then = epoch_millis(fetched_at);
    now.saturating_sub(then)
}

/// Converts a [`Duration`] age directly to a status for a category, useful
/// in tests that want to avoid wall-clock flakiness.
pub fn status_for_age(age: Duration, t: Thresholds) -> Status {
    let ms = age.as_millis();
    if ms < t.fresh_ms as u128 {
        Status::Fresh
    } else if ms < t.critical_ms as u128 {
        Status::Stale
    } else {
        Status::Critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn thresholds() -> Thresholds {
        Thresholds { fresh_ms: 30_000, stale_ms: 300_000, critical_ms: 3_600_000 }
    }

    #[test]
    fn fresh_within_threshold() {
        let now = SystemTime::now();
        let reg = Registry::default();
        assert!(reg.is_fresh(now, "quota_broker"));
        assert_eq!(reg.indicator(now, "quota_broker"), None);
    }

    #[test]
    fn stale_past_fresh_threshold() {
        let ts = SystemTime::now() - Duration::from_secs(600);
        let reg = Registry::default();
        assert!(!reg.is_fresh(ts, "quota_broker"));
        assert_eq!(reg.indicator(ts, "quota_broker"), Some(IndicatorGlyph::Stale));
    }

    #[test]
    fn critical_past_critical_threshold() {
        let ts = SystemTime::now() - Duration::from_secs(4000);
        let reg = Registry::default();
        assert_eq!(reg.indicator(ts, "quota_broker"), Some(IndicatorGlyph::Critical));
    }

    #[test]
    fn context_aware_suppresses_when_intent_young() {
        let ts = SystemTime::now() - Duration::from_secs(600);
        let reg = Registry::default();
        assert_eq!(
            reg.context_aware_indicator(ts, "quota_broker", Some(5_000)),
            None
        );
    }

    #[test]
    fn context_aware_promotes_when_intent_broken() {
        let ts = SystemTime::now() - Duration::from_secs(600);
        let reg = Registry::default();
        assert_eq!(
            reg.context_aware_indicator(ts, "quota_broker", Some(6 * 60 * 1000)),
            Some(IndicatorGlyph::Critical)
        );
    }

    #[test]
    fn context_aware_behaves_like_plain_indicator_otherwise() {
        let ts = SystemTime::now() - Duration::from_secs(600);
        let reg = Registry::default();
        assert_eq!(
            reg.context_aware_indicator(ts, "quota_broker", Some(60_000)),
            Some(IndicatorGlyph::Stale)
        );
    }

    #[test]
    fn overrides_replace_default_thresholds() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "quota_broker".to_string(),
            Thresholds { fresh_ms: 1, stale_ms: 2, critical_ms: 3 },
        );
        let reg = Registry::with_overrides(overrides);
        assert_eq!(reg.thresholds("quota_broker").fresh_ms, 1);
    }

    #[test]
    fn status_for_age_matches_bands() {
        let t = thresholds();
        assert_eq!(status_for_age(Duration::from_millis(0), t), Status::Fresh);
        assert_eq!(status_for_age(Duration::from_secs(60), t), Status::Stale);
        assert_eq!(status_for_age(Duration::from_secs(4000), t), Status::Critical);
    }
}
