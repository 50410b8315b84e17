//! Display Renderer (C5, §4.5).
//!
//! Hard contract: no subprocess, no network, no lock acquisition, no sleep —
//! a bounded set of file reads followed by one write to stdout, in well
//! under 10 ms. The heavy lifting (string assembly from merged source data)
//! happens once in the Broker (§9 "pre-rendered width variants"); this
//! module's `render_entrypoint` is a lookup plus a couple of cheap
//! placeholder substitutions for the two things that are *wrong* the moment
//! they're baked into a string — staleness glyphs and the elapsed-time
//! countdown (§9 "Staleness is client-side").

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::registry::{IndicatorGlyph, Registry};
use crate::session::{self, Session};
use crate::store::{SessionHealth, Store};

/// Column widths a pre-rendered variant exists for (§3 Session health record).
pub const WIDTH_BUCKETS: [u16; 7] = [40, 60, 80, 100, 120, 150, 200];
/// Key under which the single-line fallback variant is stored.
pub const SINGLE_LINE_KEY: u16 = 0;

/// Fallback token emitted when anything inside the Renderer goes wrong
/// (§4.5 Failure semantics, §7 kind 4).
pub const RENDERER_FAULT_TOKEN: &str = "?";
/// Shown while a brand-new session waits for its first background gather.
pub const LOADING_MARKER: &str = "…";

fn indicator_glyph(glyph: Option<IndicatorGlyph>) -> &'static str {
    match glyph {
        None => "",
        Some(IndicatorGlyph::Stale) => "!",
        Some(IndicatorGlyph::Critical) => "‼",
    }
}

/// Sentinel embedded in a pre-rendered variant wherever a staleness glyph
/// for `category` belongs. Resolved at render time, never at gather time.
pub fn indicator_placeholder(category: &str) -> String {
    format!("\u{1}IND:{category}\u{1}")
}

/// Sentinel embedded wherever a countdown-style "minutes remaining" field
/// needs age-correcting at render time against `source_id`'s `fetched_at`.
pub fn countdown_placeholder(source_id: &str) -> String {
    format!("\u{1}CDOWN:{source_id}\u{1}")
}

/// Picks the widest available variant that fits `width`, falling back to the
/// next-narrower one when the exact bucket is missing (§9 Open Question 3:
/// this implementation favors information density over an exact match).
pub fn pick_bucket(width: u16, available: &[u16]) -> Option<u16> {
    if width == 0 {
        return None;
    }
    available
        .iter()
        .copied()
        .filter(|&w| w != SINGLE_LINE_KEY && w <= width)
        .max()
        .or_else(|| available.iter().copied().filter(|&w| w != SINGLE_LINE_KEY).min())
}

/// Builds every pre-rendered width variant for `health`, called once by the
/// Broker after a gather completes (§4.4 step "pre-render width variants").
/// Variants carry indicator/countdown placeholders rather than baked-in
/// glyphs or minute counts — those are resolved client-side at render time
/// by [`resolve_placeholders`], since both depend on wall-clock age that
/// keeps moving after the variant was written.
pub fn build_variants(session: &Session, health: &SessionHealth) -> HashMap<u16, String> {
    let mut variants = HashMap::new();
    variants.insert(SINGLE_LINE_KEY, build_single_line(session, health));
    for width in WIDTH_BUCKETS {
        variants.insert(width, build_variant(session, health, width));
    }
    variants
}

fn build_single_line(session: &Session, health: &SessionHealth) -> String {
    let model = session.model.as_deref().unwrap_or("model?");
    let cwd = session.cwd.as_ref().map(|p| short_path(p)).unwrap_or_else(|| "?".to_string());
    let pct = context_pct(session);
    let alerts = if health.alerts.is_empty() { String::new() } else { format!(" {}!", health.alerts.len()) };
    format!("{model} {cwd} ctx{pct:.0}%{alerts}")
}

fn context_pct(session: &Session) -> f64 {
    let used = session.tokens_used();
    let total = session.context_window_size.unwrap_or(0);
    if total > 0 {
        (used as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

fn build_variant(session: &Session, health: &SessionHealth, width: u16) -> String {
    let model = session.model.as_deref().unwrap_or("model?");
    let pct = context_pct(session);

    let mut parts = vec![model.to_string()];
    if width >= 60 {
        let cwd = session.cwd.as_ref().map(|p| short_path(p)).unwrap_or_else(|| "?".to_string());
        parts.push(cwd);
    }
    parts.push(format!("ctx {pct:.0}%"));

    if width >= 80 {
        if let Some(git) = health.sources.get("git") {
            if let Some(branch) = git.value.get("branch").and_then(|v| v.as_str()) {
                if !branch.is_empty() {
                    parts.push(format!("{branch}{}", indicator_placeholder("git_status")));
                }
            }
        }
    }

    if width >= 100 && health.sources.contains_key("quota") {
        parts.push(format!("quota{}", indicator_placeholder("quota_broker")));
    }

    if width >= 120 && health.sources.contains_key("billing") {
        parts.push(format!(
            "budget {}{}",
            countdown_placeholder("billing"),
            indicator_placeholder("billing_ccusage")
        ));
    }

    if width >= 150 && !health.alerts.is_empty() {
        parts.push(format!("{} alert(s)", health.alerts.len()));
    }

    parts.join(" | ")
}

/// Resolves every glyph/countdown placeholder in `line` against `health`,
/// using only data already loaded in memory plus (at most) a handful of
/// cheap `stat()` calls on intent markers — no locks, no network.
pub fn resolve_placeholders(
    line: &str,
    health: &SessionHealth,
    registry: &Registry,
    intents_dir: &Path,
) -> String {
    let mut out = line.to_string();

    for category in ["quota_broker", "billing_ccusage", "git_status", "version_check", "notifications"] {
        let token = indicator_placeholder(category);
        if !out.contains(&token) {
            continue;
        }
        let fetched_at = source_for_category(health, category).map(|e| e.fetched_at());
        let glyph = fetched_at.map(|ts| {
            let intent_age = intent_age_ms(intents_dir, category);
            registry.context_aware_indicator(ts, category, intent_age)
        });
        out = out.replace(&token, indicator_glyph(glyph.flatten()));
    }

    for (source_id, field) in [("billing", "budget_remaining_minutes")] {
        let token = countdown_placeholder(source_id);
        if !out.contains(&token) {
            continue;
        }
        let replacement = health
            .sources
            .get(source_id)
            .and_then(|entry| {
                let remaining_at_fetch = entry.value.get(field)?.as_u64()?;
                let elapsed_min = SystemTime::now()
                    .duration_since(entry.fetched_at())
                    .unwrap_or(Duration::ZERO)
                    .as_secs()
                    / 60;
                Some(remaining_at_fetch.saturating_sub(elapsed_min))
            })
            .map(|m| format!("{m}m"))
            .unwrap_or_default();
        out = out.replace(&token, &replacement);
    }

    out
}

fn source_for_category<'a>(health: &'a SessionHealth, category: &str) -> Option<&'a crate::store::CacheEntry> {
    let source_id = match category {
        "quota_broker" => "quota",
        "billing_ccusage" => "billing",
        "git_status" => "git",
        "version_check" => "version",
        "notifications" => "notifications",
        _ => return None,
    };
    health.sources.get(source_id)
}

fn intent_age_ms(intents_dir: &Path, category: &str) -> Option<u128> {
    let path = intents_dir.join(format!("{category}.intent"));
    let meta = std::fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?;
    Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO)
            .as_millis(),
    )
}

/// Builds the minimal new-session line shown before any gather has run, or
/// when no cached health exists yet (§4.5 step 3, §8 scenario 1).
pub fn minimal_new_session_line(session: &Session, global_fallback: Option<&serde_json::Value>) -> String {
    let model = session.model.as_deref().unwrap_or("model?");
    let cwd = session
        .cwd
        .as_ref()
        .map(|p| short_path(p))
        .unwrap_or_else(|| "?".to_string());
    let billing = global_fallback
        .and_then(|v| v.get("budget_remaining_minutes"))
        .and_then(|v| v.as_u64())
        .map(|m| format!(" {m}m"))
        .unwrap_or_default();
    format!("{model} {cwd}{billing} {LOADING_MARKER}")
}

fn short_path(p: &Path) -> String {
    p.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| p.to_string_lossy().to_string())
}

/// Re-renders on the spot when the stdin payload overrides a cached field
/// (§4.5 step 3, "fallback formatting path"). Unlike the Broker's
/// pre-rendered variants, this is built fresh every time it's hit, which is
/// why it exists only as a fallback and not the common-case path.
pub fn rerender_with_overrides(session: &Session, health: &SessionHealth, width: u16) -> String {
    let model = session.model.as_deref().unwrap_or("model?");
    let cwd = session.cwd.as_ref().map(|p| short_path(p)).unwrap_or_else(|| "?".to_string());
    let used = session.tokens_used();
    let total = session.context_window_size.unwrap_or(0);
    let pct = if total > 0 { (used as f64 / total as f64) * 100.0 } else { 0.0 };

    let mut parts = vec![model.to_string(), cwd, format!("ctx {pct:.0}%")];
    if width == 0 || width >= 80 {
        if let Some(git) = health.sources.get("git") {
            if let Some(branch) = git.value.get("branch").and_then(|v| v.as_str()) {
                if !branch.is_empty() {
                    parts.push(branch.to_string());
                }
            }
        }
    }
    if !health.alerts.is_empty() && (width == 0 || width >= 150) {
        parts.push(format!("{} alert(s)", health.alerts.len()));
    }
    let mut line = parts.join(" | ");
    if width != 0 && line.chars().count() > width as usize {
        line = truncate_to_width(&line, width);
    }
    line
}

pub fn truncate_to_width(s: &str, width: u16) -> String {
    let width = width.max(1) as usize;
    if s.chars().count() <= width {
        return s.to_string();
    }
    let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// `true` iff the stdin payload overrides a field the cache already has a
/// value for — the condition that sends the Renderer down the (slower)
/// re-render fallback instead of a straight variant lookup (§4.5 step 3).
pub fn overrides_cached_fields(session: &Session, health: &SessionHealth) -> bool {
    let cwd_changed = match (&session.cwd, health.sources.get("git")) {
        (Some(_), None) => false,
        _ => false,
    };
    let model_changed = match (session.model.as_deref(), health.sources.get("model")) {
        (Some(current), Some(cached)) => cached.value.as_str().map(|c| c != current).unwrap_or(false),
        _ => false,
    };
    let context_changed = match health.sources.get("context") {
        Some(cached) => cached.value.get("used").and_then(|v| v.as_u64()) != Some(session.tokens_used()),
        None => false,
    };
    cwd_changed || model_changed || context_changed
}

/// Top-level Renderer entry point: stdin JSON in, one bounded-latency
/// string out. Never returns an error — any failure anywhere inside is
/// caught and replaced with [`RENDERER_FAULT_TOKEN`] (§4.5 Failure
/// semantics, §7 kind 4).
pub fn render_entrypoint(stdin_raw: &str, term_width_env: Option<&str>, store: &Store, registry: &Registry) -> String {
    let result = panic::catch_unwind(AssertUnwindSafe(|| render_inner(stdin_raw, term_width_env, store, registry)));
    match result {
        Ok(line) => line,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            let err = crate::error::StatlineError::RendererFault { reason };
            tracing::error!(error = %err, "renderer panicked, falling back to fault token");
            RENDERER_FAULT_TOKEN.to_string()
        }
    }
}

fn render_inner(stdin_raw: &str, term_width_env: Option<&str>, store: &Store, registry: &Registry) -> String {
    let width: u16 = term_width_env.and_then(|s| s.parse().ok()).unwrap_or(0);

    let Some(session) = session::parse_stdin_payload(stdin_raw) else {
        return format!("{RENDERER_FAULT_TOKEN} malformed-input");
    };

    let global = store.read_global();

    match store.read_session(&session.session_id) {
        Some(health) => {
            let line = if overrides_cached_fields(&session, &health) {
                rerender_with_overrides(&session, &health, width)
            } else {
                let bucket = pick_bucket(width, &health.variants.keys().copied().collect::<Vec<_>>());
                let key = bucket.unwrap_or(SINGLE_LINE_KEY);
                health
                    .variants
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| rerender_with_overrides(&session, &health, width))
            };
            resolve_placeholders(&line, &health, registry, &store.intents_dir())
        }
        None => {
            let billing_fallback = global.get("billing", None).map(|e| e.value.clone());
            minimal_new_session_line(&session, billing_fallback.as_ref())
        }
    }
}
