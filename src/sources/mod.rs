//! Data-source descriptor contract (§4.4 "Source descriptor contract").
//!
//! Each source is a small, self-contained `{ id, tier, freshness_category,
//! timeout, fetch, merge }` tuple. `fetch` may fail; failures never
//! propagate past the Broker. `merge` is pure with respect to the health
//! record it mutates.

pub mod billing;
pub mod context_window;
pub mod git;
pub mod model;
pub mod notifications;
pub mod quota;
pub mod transcript;
pub mod version;

use anyhow::Result;
use std::time::Duration;

use crate::config::SourcesConfig;
use crate::session::Session;
use crate::store::SessionHealth;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Read directly from the invocation's stdin payload. Never blocks.
    Instant,
    /// Scans session-local state (the transcript file).
    SessionScoped,
    /// Reaches out to the host, the network, or state shared across
    /// sessions/processes (e.g. a repository's status); must go through
    /// the Coordinator.
    GloballyShared,
}

/// Everything a source's `fetch` needs: the parsed stdin payload and a
/// shared deadline clock.
pub struct GatherContext<'a> {
    pub session: &'a Session,
    pub deadline: std::time::Instant,
}

impl<'a> GatherContext<'a> {
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(std::time::Instant::now())
    }
}

pub trait Source: Send + Sync {
    fn id(&self) -> &'static str;
    fn tier(&self) -> Tier;
    fn freshness_category(&self) -> &'static str;
    fn timeout(&self) -> Duration;
    /// A context key to scope this source's cache entry by (e.g. the
    /// working directory for `git_status`). `None` for global sources.
    fn context_key(&self, ctx: &GatherContext) -> Option<String> {
        let _ = ctx;
        None
    }
    fn fetch(&self, ctx: &GatherContext) -> Result<serde_json::Value>;
    fn merge(&self, health: &mut SessionHealth, value: &serde_json::Value);
}

/// All known sources, in no particular order — the Broker partitions them
/// by [`Tier`] itself. `config` supplies the per-source endpoints/binaries
/// that make the Tier 3 network/subprocess sources actually reachable
/// (§6 ADDED config loader) instead of permanently bailing out unconfigured.
pub fn all_sources(config: &SourcesConfig) -> Vec<Box<dyn Source>> {
    vec![
        Box::new(model::ModelSource),
        Box::new(context_window::ContextWindowSource),
        Box::new(transcript::TranscriptSource),
        Box::new(git::GitStatusSource),
        Box::new(billing::BillingSource::new(config.billing_binary.clone())),
        Box::new(quota::QuotaSource::new(config.quota_endpoint.clone())),
        Box::new(version::VersionSource::new(config.version_check_url.clone())),
        Box::new(notifications::NotificationsSource::new(config.notifications_feed_path.clone())),
    ]
}
