//! Cache Store (C3, §4.3).
//!
//! Two physical stores, both written with the same atomic discipline: write
//! to a uniquely-named temp file in the target's own directory, then
//! `persist()` (rename) over the target. This is the teacher's
//! `write_core::AtomicWriter` pattern, trimmed to what JSON cache/health
//! files need — no CAS, no idempotent-skip, no permission preservation,
//! since those concerns belong to the teacher's general-purpose file-write
//! command, not a small versioned cache record.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;

use crate::error::StatlineError;
use crate::session::epoch_millis;

pub const GLOBAL_CACHE_VERSION: u32 = 1;

/// A cache entry: a value plus when it was produced, optionally scoped by a
/// context key (e.g. a repository working directory for `git_status`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    /// Milliseconds since the Unix epoch. Stored as millis (not a
    /// `SystemTime`) so the file format is portable and trivially ordered.
    pub fetched_at_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_key: Option<String>,
}

impl CacheEntry {
    pub fn fetched_at(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + std::time::Duration::from_millis(self.fetched_at_ms as u64)
    }

    pub fn new(value: serde_json::Value, fetched_at: SystemTime, context_key: Option<String>) -> Self {
        Self { value, fetched_at_ms: epoch_millis(fetched_at), context_key }
    }
}

fn entry_key(source_id: &str, context_key: Option<&str>) -> String {
    match context_key {
        Some(ctx) => format!("{source_id}\u{1}{ctx}"),
        None => source_id.to_string(),
    }
}

/// Versioned, per-host map from source identifier (optionally scoped by
/// `context_key`) to its last-known value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalCache {
    pub version: u32,
    pub entries: HashMap<String, CacheEntry>,
}

impl Default for GlobalCache {
    fn default() -> Self {
        Self { version: GLOBAL_CACHE_VERSION, entries: HashMap::new() }
    }
}

impl GlobalCache {
    pub fn get(&self, source_id: &str, context_key: Option<&str>) -> Option<&CacheEntry> {
        self.entries.get(&entry_key(source_id, context_key))
    }

    /// Inserts `entry`, refusing to replace a newer entry with an older one
    /// (§3 invariant: `fetched_at` is monotonic for a given key).
    pub fn upsert(&mut self, source_id: &str, entry: CacheEntry) {
        let key = entry_key(source_id, entry.context_key.as_deref());
        match self.entries.get(&key) {
            Some(existing) if existing.fetched_at_ms >= entry.fetched_at_ms => {}
            _ => {
                self.entries.insert(key, entry);
            }
        }
    }
}

/// The complete per-session state written by the Broker and read by the
/// Renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHealth {
    pub session_id: String,
    pub sources: HashMap<String, CacheEntry>,
    pub alerts: Vec<String>,
    /// Pre-rendered width-bucketed variants, keyed by column width. `0`
    /// holds the single-line fallback.
    pub variants: HashMap<u16, String>,
    pub updated_at_ms: u128,
}

impl SessionHealth {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            sources: HashMap::new(),
            alerts: Vec::new(),
            variants: HashMap::new(),
            updated_at_ms: epoch_millis(SystemTime::now()),
        }
    }
}

/// Root of the persisted state layout (§6): `<base>/statline/`.
pub struct Store {
    base: PathBuf,
}

impl Store {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn default_base() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("statline")
    }

    pub fn health_dir(&self) -> PathBuf {
        self.base.join("session-health")
    }

    pub fn intents_dir(&self) -> PathBuf {
        self.health_dir().join("intents")
    }

    pub fn runner_log_path(&self) -> PathBuf {
        self.health_dir().join("runner.log")
    }

    fn global_cache_path(&self) -> PathBuf {
        self.health_dir().join("global-cache.json")
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.health_dir().join(format!("{}.json", sanitize(session_id)))
    }

    /// Returns an empty cache (never an error) on an absent or malformed
    /// file, or on a version mismatch (§4.3 operation contract).
    pub fn read_global(&self) -> GlobalCache {
        let path = self.global_cache_path();
        let Ok(raw) = fs::read_to_string(&path) else {
            return GlobalCache::default();
        };
        match serde_json::from_str::<GlobalCache>(&raw) {
            Ok(cache) if cache.version == GLOBAL_CACHE_VERSION => cache,
            Ok(cache) => {
                let err = StatlineError::CacheFormat {
                    path: path.clone(),
                    reason: format!("unsupported version {}", cache.version),
                };
                tracing::warn!(error = %err, "global cache version mismatch, treating as empty");
                GlobalCache::default()
            }
            Err(e) => {
                let err = StatlineError::CacheFormat { path: path.clone(), reason: e.to_string() };
                tracing::warn!(error = %err, "global cache malformed, treating as empty");
                GlobalCache::default()
            }
        }
    }

    pub fn write_global(&self, cache: &GlobalCache) -> Result<()> {
        fs::create_dir_all(self.health_dir())?;
        atomic_write_json(&self.global_cache_path(), cache)
    }

    /// Returns `None` on absence; `None` (with a warning) on parse failure.
    pub fn read_session(&self, session_id: &str) -> Option<SessionHealth> {
        let path = self.session_path(session_id);
        let raw = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(health) => Some(health),
            Err(e) => {
                let err = StatlineError::CacheFormat { path: path.clone(), reason: e.to_string() };
                tracing::warn!(error = %err, "session health malformed");
                None
            }
        }
    }

    pub fn write_session(&self, health: &SessionHealth) -> Result<()> {
        fs::create_dir_all(self.health_dir())?;
        atomic_write_json(&self.session_path(&health.session_id), health)
    }

    /// Removes session health files whose `updated_at_ms` is older than
    /// `window_secs` (§3 Lifecycle: inactive sessions become cleanup
    /// eligible).
    pub fn sweep_inactive_sessions(&self, window_secs: u64) -> Result<usize> {
        let dir = self.health_dir();
        let Ok(read_dir) = fs::read_dir(&dir) else {
            return Ok(0);
        };
        let now = epoch_millis(SystemTime::now());
        let mut removed = 0;
        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.file_name().and_then(|n| n.to_str()) == Some("global-cache.json") {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(raw) = fs::read_to_string(&path) else { continue };
            let Ok(health) = serde_json::from_str::<SessionHealth>(&raw) else { continue };
            let age_ms = now.saturating_sub(health.updated_at_ms);
            if age_ms > (window_secs as u128) * 1000 {
                if fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Removes leftover `.tmp*` files older than 24h from an interrupted
    /// atomic write (§5 Resource leakage). Opportunistic: any Broker
    /// invocation may call this under its own cooldown.
    pub fn sweep_stale_temp_files(&self) -> Result<usize> {
        let dir = self.health_dir();
        let Ok(read_dir) = fs::read_dir(&dir) else {
            return Ok(0);
        };
        let mut removed = 0;
        for entry in read_dir.flatten() {
            let path = entry.path();
            let is_tmp = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.contains(".tmp"))
                .unwrap_or(false);
            if !is_tmp {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                if let Ok(modified) = meta.modified() {
                    if SystemTime::now()
                        .duration_since(modified)
                        .map(|d| d.as_secs() > 24 * 3600)
                        .unwrap_or(false)
                    {
                        let _ = fs::remove_file(&path);
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }
}

fn sanitize(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    let json = serde_json::to_string(value).context("Failed to serialize cache/health record")?;

    let mut temp_file = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
    temp_file
        .write_all(json.as_bytes())
        .with_context(|| format!("Failed to write temp file for {}", path.display()))?;
    temp_file.flush().context("Failed to flush temp file")?;
    temp_file.as_file().sync_data().ok();

    temp_file.persist(path).map_err(|e| {
        anyhow::Error::new(e.error).context(format!("Failed to atomically replace {}", path.display()))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (Store, TempDir) {
        let tmp = TempDir::new().unwrap();
        (Store::new(tmp.path()), tmp)
    }

    #[test]
    fn read_global_missing_is_empty_not_error() {
        let (store, _tmp) = store();
        let cache = store.read_global();
        assert!(cache.entries.is_empty());
        assert_eq!(cache.version, GLOBAL_CACHE_VERSION);
    }

    #[test]
    fn write_then_read_session_round_trips() {
        let (store, _tmp) = store();
        let health = SessionHealth::new("s1");
        store.write_session(&health).unwrap();
        let loaded = store.read_session("s1").unwrap();
        assert_eq!(loaded.session_id, "s1");
    }

    #[test]
    fn corrupt_global_cache_treated_as_empty() {
        let (store, _tmp) = store();
        fs::create_dir_all(store.health_dir()).unwrap();
        fs::write(store.global_cache_path(), b"not json").unwrap();
        let cache = store.read_global();
        assert!(cache.entries.is_empty());
    }

    #[test]
    fn version_mismatch_treated_as_empty() {
        let (store, _tmp) = store();
        fs::create_dir_all(store.health_dir()).unwrap();
        let bogus = serde_json::json!({ "version": 999, "entries": {} });
        fs::write(store.global_cache_path(), bogus.to_string()).unwrap();
        let cache = store.read_global();
        assert!(cache.entries.is_empty());
    }

    #[test]
    fn upsert_rejects_older_entry() {
        let mut cache = GlobalCache::default();
        let newer = CacheEntry::new(serde_json::json!("new"), SystemTime::now(), None);
        let older = CacheEntry::new(
            serde_json::json!("old"),
            SystemTime::now() - std::time::Duration::from_secs(10),
            None,
        );
        cache.upsert("quota", newer.clone());
        cache.upsert("quota", older);
        assert_eq!(cache.get("quota", None).unwrap().value, serde_json::json!("new"));
    }

    #[test]
    fn context_key_scopes_distinct_entries() {
        let mut cache = GlobalCache::default();
        let a = CacheEntry::new(serde_json::json!("repo-a"), SystemTime::now(), Some("a".into()));
        let b = CacheEntry::new(serde_json::json!("repo-b"), SystemTime::now(), Some("b".into()));
        cache.upsert("git_status", a);
        cache.upsert("git_status", b);
        assert_eq!(cache.get("git_status", Some("a")).unwrap().value, serde_json::json!("repo-a"));
        assert_eq!(cache.get("git_status", Some("b")).unwrap().value, serde_json::json!("repo-b"));
    }

    #[test]
    fn missing_session_health_returns_none() {
        let (store, _tmp) = store();
        assert!(store.read_session("nope").is_none());
    }

    #[test]
    fn sweep_inactive_sessions_removes_old_files_only() {
        let (store, _tmp) = store();
        let mut stale = SessionHealth::new("old");
        stale.updated_at_ms = 0;
        store.write_session(&stale).unwrap();
        let fresh = SessionHealth::new("new");
        store.write_session(&fresh).unwrap();

        let removed = store.sweep_inactive_sessions(crate::session::DEFAULT_INACTIVE_SECS).unwrap();
        assert_eq!(removed, 1);
        assert!(store.read_session("old").is_none());
        assert!(store.read_session("new").is_some());
    }

    #[test]
    fn concurrent_writes_to_different_sessions_both_land() {
        let (store, _tmp) = store();
        let h1 = SessionHealth::new("s1");
        let h2 = SessionHealth::new("s2");
        store.write_session(&h1).unwrap();
        store.write_session(&h2).unwrap();
        assert!(store.read_session("s1").is_some());
        assert!(store.read_session("s2").is_some());
    }
}
