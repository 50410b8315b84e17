//! Data-Source Broker (C4, §4.4).
//!
//! Runs every known [`Source`] under one overall deadline, tier by tier:
//! Tier 1 reads straight off the stdin payload and never blocks; Tier 2
//! scans session-local state in parallel; Tier 3 reaches the host or
//! network and is gated through the [`Coordinator`] so only one process per
//! category ever fetches at a time. A source that misses its slice of the
//! deadline yields whatever was already cached, never an error — the
//! contract is "stale is fine, wrong is not" (§4.4, §8 scenario 6).

use anyhow::Result;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SourcesConfig;
use crate::coordinator::{AcquireOutcome, Coordinator, Outcome};
use crate::error::StatlineError;
use crate::registry::Registry;
use crate::session::{epoch_millis, Session};
use crate::sources::{all_sources, GatherContext, Source, Tier};
use crate::store::{CacheEntry, SessionHealth, Store};

/// Default wall-clock ceiling for one full gather, matching the Renderer's
/// "sub-10ms" promise only insofar as the Broker is the component allowed to
/// be slow (§4.4). Overridable via config (§6 ADDED).
pub const DEFAULT_OVERALL_DEADLINE: Duration = Duration::from_millis(3_000);

/// Ceiling on how long a non-acquirer waits for a concurrent Tier-3 refresh
/// to land before giving up and riding on whatever is already cached
/// (§4.4 step 4.c, §8 scenario 2).
const CONTENTION_WAIT_CEILING: Duration = Duration::from_secs(3);
const CONTENTION_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct Broker {
    store: Store,
    registry: Registry,
    coordinator: Coordinator,
    overall_deadline: Duration,
    sources_config: SourcesConfig,
}

impl Broker {
    pub fn new(store: Store, registry: Registry, overall_deadline: Duration) -> Self {
        Self::with_sources(store, registry, overall_deadline, SourcesConfig::default())
    }

    pub fn with_sources(
        store: Store,
        registry: Registry,
        overall_deadline: Duration,
        sources_config: SourcesConfig,
    ) -> Self {
        let coordinator = Coordinator::new(store.intents_dir());
        Self { store, registry, coordinator, overall_deadline, sources_config }
    }

    /// Runs a full gather for `session` and persists the resulting health
    /// record (including freshly pre-rendered width variants). Returns the
    /// health record so a caller (the Runner binary, or a synchronous CLI
    /// invocation) can inspect what happened.
    pub fn gather(&self, session: &Session) -> Result<SessionHealth> {
        let deadline = Instant::now() + self.overall_deadline;

        let mut health = self
            .store
            .read_session(&session.session_id)
            .unwrap_or_else(|| SessionHealth::new(session.session_id.clone()));
        // Alerts reflect current state only; each merge re-derives whatever
        // is still true instead of appending onto last gather's list.
        health.alerts.clear();

        let sources: Vec<Arc<dyn Source>> =
            all_sources(&self.sources_config).into_iter().map(Arc::from).collect();
        let tier1: Vec<_> = sources.iter().filter(|s| s.tier() == Tier::Instant).cloned().collect();
        let tier2: Vec<_> = sources.iter().filter(|s| s.tier() == Tier::SessionScoped).cloned().collect();
        let tier3: Vec<_> = sources.iter().filter(|s| s.tier() == Tier::GloballyShared).cloned().collect();

        let ctx = GatherContext { session, deadline };
        for source in &tier1 {
            self.fetch_and_merge(source.as_ref(), &ctx, &mut health);
        }

        self.run_tier2(&tier2, session, deadline, &mut health);
        self.run_tier3(&tier3, session, deadline, &mut health);

        health.updated_at_ms = epoch_millis(std::time::SystemTime::now());
        health.variants = crate::renderer::build_variants(session, &health);
        self.store.write_session(&health)?;

        self.maybe_sweep();
        Ok(health)
    }

    fn fetch_and_merge(&self, source: &dyn Source, ctx: &GatherContext, health: &mut SessionHealth) {
        match source.fetch(ctx) {
            Ok(value) => source.merge(health, &value),
            Err(e) => {
                let err = StatlineError::FetchFailed { source_id: source.id().to_string(), reason: e.to_string() };
                tracing::warn!(error = %err, "source fetch failed");
            }
        }
    }

    /// Tier 2: each source runs on its own thread against an owned clone of
    /// `session`, so the soft timeout below never blocks waiting on a slow
    /// fetch — if a source misses its slice of the deadline, the thread is
    /// left to finish on its own (its underlying subprocess/file read is
    /// itself bounded) and this gather simply moves on without it.
    fn run_tier2(&self, sources: &[Arc<dyn Source>], session: &Session, deadline: Instant, health: &mut SessionHealth) {
        let mut handles = Vec::new();
        for source in sources {
            let source = Arc::clone(source);
            let session = session.clone();
            let (tx, rx) = mpsc::channel();
            let budget = soft_budget(source.timeout(), deadline);
            std::thread::spawn(move || {
                let ctx = GatherContext { session: &session, deadline };
                let result = source.fetch(&ctx);
                let _ = tx.send(result);
            });
            handles.push((source, rx, budget));
        }

        for (source, rx, budget) in handles {
            match rx.recv_timeout(budget) {
                Ok(Ok(value)) => source.merge(health, &value),
                Ok(Err(e)) => {
                    let err = StatlineError::FetchFailed { source_id: source.id().to_string(), reason: e.to_string() };
                    tracing::warn!(error = %err, "source fetch failed");
                }
                Err(_) => {
                    tracing::warn!(source = source.id(), "source missed its soft timeout, leaving cached value");
                }
            }
        }
    }

    /// Tier 3: freshness-gated and single-flight-coordinated. A source whose
    /// cached value is already fresh is never fetched at all; a source whose
    /// value is stale triggers at most one cross-process fetch, with every
    /// other contender waiting briefly for it to land (see
    /// [`Broker::wait_for_fresher`]) before falling back to whatever is
    /// cached (§4.2, §4.4 step 4.c, §8 scenario 2).
    fn run_tier3(&self, sources: &[Arc<dyn Source>], session: &Session, deadline: Instant, health: &mut SessionHealth) {
        let mut global = self.store.read_global();
        let mut dirty = false;

        for source in sources {
            let ctx = GatherContext { session, deadline };
            let context_key = source.context_key(&ctx);
            let category = source.freshness_category();

            if let Some(entry) = global.get(source.id(), context_key.as_deref()) {
                if self.registry.is_fresh(entry.fetched_at(), category) {
                    source.merge(health, &entry.value.clone());
                    continue;
                }
                // Stale but present: merge it now so the Renderer always has
                // something to show, then see if we can refresh it below.
                source.merge(health, &entry.value.clone());
            }

            if let Err(e) = self.coordinator.signal_need(category) {
                tracing::warn!(category, error = %e, "failed to signal refresh intent");
                continue;
            }

            match self.coordinator.try_acquire(category) {
                Ok(AcquireOutcome::AcquiredByMe) => {
                    let budget = soft_budget(source.timeout(), deadline);
                    let outcome = self.fetch_with_budget(Arc::clone(source), session, deadline, budget);
                    match outcome {
                        Some(Ok(value)) => {
                            let entry = CacheEntry::new(value.clone(), std::time::SystemTime::now(), context_key.clone());
                            global.upsert(source.id(), entry);
                            dirty = true;
                            source.merge(health, &value);
                            let _ = self.coordinator.release(category, Outcome::Success);
                        }
                        Some(Err(e)) => {
                            let err = StatlineError::FetchFailed { source_id: source.id().to_string(), reason: e.to_string() };
                            tracing::warn!(error = %err, "tier-3 fetch failed");
                            let _ = self.coordinator.release(category, Outcome::Failure);
                        }
                        None => {
                            tracing::warn!(source = source.id(), "tier-3 fetch missed its soft timeout");
                            let _ = self.coordinator.release(category, Outcome::Failure);
                        }
                    }
                }
                Ok(AcquireOutcome::HeldBy { .. }) | Ok(AcquireOutcome::Dead) => {
                    // Someone else is already refreshing this category (or a
                    // takeover race was lost). Wait briefly for it to land
                    // rather than immediately settling for the stale value
                    // merged above (§4.4 step 4.c, §8 scenario 2).
                    let since = global.get(source.id(), context_key.as_deref()).map(|e| e.fetched_at_ms);
                    if let Some(fresher) = self.wait_for_fresher(source.id(), context_key.as_deref(), since, deadline) {
                        source.merge(health, &fresher.value.clone());
                        global.upsert(source.id(), fresher);
                    }
                }
                Err(e) => {
                    tracing::warn!(category, error = %e, "failed to acquire refresh intent");
                }
            }
        }

        if dirty {
            if let Err(e) = self.store.write_global(&global) {
                tracing::warn!(error = %e, "failed to persist global cache");
            }
        }
    }

    /// Runs `source.fetch` on its own thread, bounded by `budget`. Each
    /// Source's own `fetch` already enforces its declared timeout
    /// internally (subprocess wall-clock or HTTP client timeout); this
    /// `recv_timeout` is a safety valve so a misbehaving source can never
    /// hold up the overall gather deadline.
    fn fetch_with_budget(
        &self,
        source: Arc<dyn Source>,
        session: &Session,
        deadline: Instant,
        budget: Duration,
    ) -> Option<Result<serde_json::Value>> {
        let session = session.clone();
        let source_id = source.id();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let ctx = GatherContext { session: &session, deadline };
            let result = source.fetch(&ctx);
            let _ = tx.send(result);
        });
        match rx.recv_timeout(budget) {
            Ok(result) => Some(result),
            Err(_) => {
                tracing::warn!(source = source_id, "fetch exceeded its soft budget");
                None
            }
        }
    }

    /// Polls the global cache for up to `CONTENTION_WAIT_CEILING` (bounded
    /// further by the overall `deadline`), re-reading from disk each time,
    /// until `source_id`'s entry advances past `since_fetched_at_ms` or the
    /// wait runs out. Used only by a contender that lost `try_acquire` to a
    /// concurrent refresh, so it can pick up the fresh value instead of
    /// settling for whatever was cached before the race began.
    fn wait_for_fresher(
        &self,
        source_id: &str,
        context_key: Option<&str>,
        since_fetched_at_ms: Option<u128>,
        deadline: Instant,
    ) -> Option<CacheEntry> {
        let wait_budget = CONTENTION_WAIT_CEILING.min(deadline.saturating_duration_since(Instant::now()));
        let wait_until = Instant::now() + wait_budget;

        loop {
            let now = Instant::now();
            if now >= wait_until {
                return None;
            }
            std::thread::sleep(CONTENTION_POLL_INTERVAL.min(wait_until - now));

            let cache = self.store.read_global();
            if let Some(entry) = cache.get(source_id, context_key) {
                let advanced = since_fetched_at_ms.map(|prior| entry.fetched_at_ms > prior).unwrap_or(true);
                if advanced {
                    return Some(entry.clone());
                }
            }
        }
    }

    /// Opportunistic housekeeping, gated the same way a Tier 3 refresh is:
    /// an intent marker under a reserved pseudo-category doubles as a
    /// cooldown so every invocation doesn't re-scan the health directory.
    fn maybe_sweep(&self) {
        const SWEEP_CATEGORY: &str = "_sweep";
        const SWEEP_COOLDOWN: Duration = Duration::from_secs(600);

        let due = match self.coordinator.intent_age(SWEEP_CATEGORY) {
            Some(age) => age >= SWEEP_COOLDOWN,
            None => true,
        };
        if !due {
            return;
        }
        if self.coordinator.signal_need(SWEEP_CATEGORY).is_err() {
            return;
        }
        if let Ok(removed) = self.store.sweep_inactive_sessions(crate::session::DEFAULT_INACTIVE_SECS) {
            if removed > 0 {
                tracing::debug!(removed, "swept inactive session health files");
            }
        }
        if let Ok(removed) = self.store.sweep_stale_temp_files() {
            if removed > 0 {
                tracing::debug!(removed, "swept stale temp files");
            }
        }
    }
}

/// Splits the deadline fairly: a source never gets more than its own
/// declared timeout, nor more than whatever is left of the overall
/// deadline.
fn soft_budget(declared: Duration, overall_deadline: Instant) -> Duration {
    let remaining = overall_deadline.saturating_duration_since(Instant::now());
    declared.min(remaining)
}
