//! End-to-end coverage of the freshness/coordination scenarios (§8):
//! cold cache, refresh stampede prevention, stale-with-no-refresher,
//! crashed refresher takeover, and client-side countdown correction.

use statline_core::broker::Broker;
use statline_core::coordinator::{AcquireOutcome, Coordinator};
use statline_core::registry::Registry;
use statline_core::renderer;
use statline_core::session::Session;
use statline_core::store::{CacheEntry, SessionHealth, Store};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

fn session(id: &str) -> Session {
    Session {
        session_id: id.to_string(),
        cwd: None,
        transcript_path: None,
        model: Some("Sonnet".into()),
        context_window_size: Some(200_000),
        input_tokens: Some(1_000),
        output_tokens: Some(200),
        cache_read_input_tokens: None,
    }
}

#[test]
fn scenario_cold_cache_produces_loading_line_then_populated_line() {
    let tmp = TempDir::new().unwrap();
    let store = Store::new(tmp.path());
    let registry = Registry::default();

    let raw = r#"{"session_id":"cold1","model":{"display_name":"Sonnet"}}"#;
    let first = renderer::render_entrypoint(raw, None, &store, &registry);
    assert!(first.contains(renderer::LOADING_MARKER));

    let broker = Broker::new(Store::new(tmp.path()), Registry::default(), Duration::from_millis(500));
    broker.gather(&session("cold1")).unwrap();

    let second = renderer::render_entrypoint(raw, None, &store, &registry);
    assert!(!second.contains(renderer::LOADING_MARKER));
    assert!(second.contains("Sonnet"));
}

#[test]
fn scenario_stampede_is_prevented_single_flight() {
    let tmp = TempDir::new().unwrap();
    let coordinator = Coordinator::new(tmp.path().join("intents"));

    let first = coordinator.try_acquire("quota_broker").unwrap();
    assert_eq!(first, AcquireOutcome::AcquiredByMe);

    // A second contender arriving before release must not also fetch.
    match coordinator.try_acquire("quota_broker").unwrap() {
        AcquireOutcome::HeldBy { .. } => {}
        other => panic!("expected a concurrent contender to be turned away, got {other:?}"),
    }
}

#[test]
fn scenario_stale_with_no_refresher_shows_plain_stale_indicator() {
    let tmp = TempDir::new().unwrap();
    let registry = Registry::default();

    let mut health = SessionHealth::new("stale1");
    health.sources.insert(
        "quota".to_string(),
        CacheEntry::new(serde_json::json!({}), SystemTime::now() - Duration::from_secs(600), None),
    );
    let line = format!("quota{}", renderer::indicator_placeholder("quota_broker"));
    let resolved = renderer::resolve_placeholders(&line, &health, &registry, &tmp.path().join("intents"));
    assert_eq!(resolved, "quota!");
}

#[test]
fn scenario_crashed_refresher_is_taken_over() {
    let tmp = TempDir::new().unwrap();
    let coordinator = Coordinator::new(tmp.path());

    // Simulate a holder that crashed: write an in-progress marker with a
    // PID that is essentially guaranteed not to exist.
    std::fs::create_dir_all(tmp.path()).unwrap();
    std::fs::write(tmp.path().join("quota_broker.inprogress"), "999999").unwrap();

    let outcome = coordinator.try_acquire("quota_broker").unwrap();
    assert_eq!(outcome, AcquireOutcome::AcquiredByMe);
}

#[test]
fn scenario_client_side_countdown_corrects_for_elapsed_time() {
    let tmp = TempDir::new().unwrap();
    let registry = Registry::default();

    let mut health = SessionHealth::new("billing1");
    health.sources.insert(
        "billing".to_string(),
        CacheEntry::new(
            serde_json::json!({ "budget_remaining_minutes": 60 }),
            SystemTime::now() - Duration::from_secs(15 * 60),
            None,
        ),
    );
    let line = format!("budget {}", renderer::countdown_placeholder("billing"));
    let resolved = renderer::resolve_placeholders(&line, &health, &registry, &tmp.path().join("intents"));
    assert_eq!(resolved, "budget 45m");
}

#[test]
fn scenario_deadline_miss_yields_stale_not_error() {
    let tmp = TempDir::new().unwrap();
    let store = Store::new(tmp.path());
    let registry = Registry::default();
    // An overall deadline of zero forces every Tier 2/3 source to miss its
    // soft budget; the gather must still succeed and persist something.
    let broker = Broker::new(store, registry, Duration::from_millis(0));
    let result = broker.gather(&session("deadline1"));
    assert!(result.is_ok());
}

#[test]
fn renderer_never_panics_on_truncated_json() {
    let tmp = TempDir::new().unwrap();
    let store = Store::new(tmp.path());
    let registry = Registry::default();
    let line = renderer::render_entrypoint(r#"{"session_id": "x", "model": {"#, None, &store, &registry);
    assert!(line.starts_with(renderer::RENDERER_FAULT_TOKEN));
}
