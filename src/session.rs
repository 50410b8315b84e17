//! Session identity and account-scope derivation (§3 Data Model).

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use xxhash_rust::xxh3::xxh3_64;

/// Default silence window after which a session is considered inactive and
/// eligible for cleanup (§3 Lifecycle).
pub const DEFAULT_INACTIVE_SECS: u64 = 60 * 60;

/// An identified interaction, as observed on a single invocation's stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub cwd: Option<PathBuf>,
    pub transcript_path: Option<PathBuf>,
    pub model: Option<String>,
    pub context_window_size: Option<u64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_read_input_tokens: Option<u64>,
}

impl Session {
    /// Total tokens consumed in the current context window, per §6's
    /// consumed fields. Any field that was never observed counts as zero.
    pub fn tokens_used(&self) -> u64 {
        self.input_tokens.unwrap_or(0)
            + self.output_tokens.unwrap_or(0)
            + self.cache_read_input_tokens.unwrap_or(0)
    }

    /// Derives the account scope key deterministically from the transcript
    /// path: locate the `/projects/` marker segment and hash the prefix up
    /// to and including it. Two sessions whose transcripts share that
    /// prefix share the same credential slot and the same global quota data.
    pub fn account_scope_key(&self) -> Option<String> {
        let transcript = self.transcript_path.as_ref()?;
        account_scope_key_for(transcript)
    }
}

/// Same derivation as [`Session::account_scope_key`], usable without a full
/// `Session` (e.g. from a raw transcript path read out of a cached health
/// record).
pub fn account_scope_key_for(transcript_path: &Path) -> Option<String> {
    let raw = transcript_path.to_string_lossy();
    let marker = "/projects/";
    let idx = raw.find(marker)?;
    let prefix = &raw[..idx + marker.len()];
    Some(format!("{:08x}", (xxh3_64(prefix.as_bytes()) & 0xffff_ffff) as u32))
}

/// Best-effort parse of the invocation's stdin JSON payload (§6 Invocation
/// interface). Every field is optional; unrecognized extras are ignored.
/// Returns `None` only when the payload is not even a JSON object.
pub fn parse_stdin_payload(raw: &str) -> Option<Session> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let obj = value.as_object()?;

    let session_id = obj
        .get("session_id")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let transcript_path = obj
        .get("transcript_path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);

    let cwd = obj
        .get("start_directory")
        .and_then(|v| v.as_str())
        .or_else(|| obj.get("cwd").and_then(|v| v.as_str()))
        .or_else(|| {
            obj.get("workspace")
                .and_then(|w| w.get("current_dir"))
                .and_then(|v| v.as_str())
        })
        .map(PathBuf::from);

    let model = obj.get("model").and_then(|m| {
        m.get("display_name")
            .or_else(|| m.get("id"))
            .or_else(|| m.get("name"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    });

    let ctx = obj.get("context_window");
    let context_window_size = ctx.and_then(|c| c.get("context_window_size")).and_then(|v| v.as_u64());
    let usage = ctx.and_then(|c| c.get("current_usage"));
    let input_tokens = usage.and_then(|u| u.get("input_tokens")).and_then(|v| v.as_u64());
    let output_tokens = usage.and_then(|u| u.get("output_tokens")).and_then(|v| v.as_u64());
    let cache_read_input_tokens =
        usage.and_then(|u| u.get("cache_read_input_tokens")).and_then(|v| v.as_u64());

    Some(Session {
        session_id,
        cwd,
        transcript_path,
        model,
        context_window_size,
        input_tokens,
        output_tokens,
        cache_read_input_tokens,
    })
}

/// Returns `true` when a session has gone quiet longer than `window` and is
/// eligible for cleanup (§3 Lifecycle).
pub fn is_inactive(last_touched: SystemTime, window_secs: u64) -> bool {
    let now = epoch_secs(SystemTime::now());
    let last = epoch_secs(last_touched);
    now.saturating_sub(last) > window_secs
}

pub fn epoch_secs(ts: SystemTime) -> u64 {
    ts.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

pub fn epoch_millis(ts: SystemTime) -> u128 {
    ts.duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_scope_key_stable_for_same_prefix() {
        let a = PathBuf::from("/home/alice/.config/app/projects/foo/transcript.jsonl");
        let b = PathBuf::from("/home/alice/.config/app/projects/bar/other.jsonl");
        assert_eq!(account_scope_key_for(&a), account_scope_key_for(&b));
    }

    #[test]
    fn account_scope_key_differs_for_different_prefix() {
        let a = PathBuf::from("/home/alice/.config/app/projects/foo/transcript.jsonl");
        let b = PathBuf::from("/home/bob/.config/app/projects/foo/transcript.jsonl");
        assert_ne!(account_scope_key_for(&a), account_scope_key_for(&b));
    }

    #[test]
    fn account_scope_key_none_without_marker() {
        let a = PathBuf::from("/tmp/no-marker-here.jsonl");
        assert_eq!(account_scope_key_for(&a), None);
    }

    #[test]
    fn account_scope_key_is_eight_hex_chars() {
        let a = PathBuf::from("/x/projects/y/z.jsonl");
        let key = account_scope_key_for(&a).unwrap();
        assert_eq!(key.len(), 8);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tokens_used_sums_known_fields() {
        let s = Session {
            session_id: "s1".into(),
            cwd: None,
            transcript_path: None,
            model: None,
            context_window_size: None,
            input_tokens: Some(10),
            output_tokens: Some(5),
            cache_read_input_tokens: Some(2),
        };
        assert_eq!(s.tokens_used(), 17);
    }

    #[test]
    fn parse_stdin_payload_reads_recognized_fields() {
        let raw = r#"{
            "session_id": "S1",
            "transcript_path": "/x/projects/y/t.jsonl",
            "start_directory": "/work/repo",
            "model": {"display_name": "Sonnet"},
            "context_window": {
                "context_window_size": 200000,
                "current_usage": {"input_tokens": 50000, "output_tokens": 10, "cache_read_input_tokens": 5}
            },
            "extra_unrecognized_field": 42
        }"#;
        let session = parse_stdin_payload(raw).unwrap();
        assert_eq!(session.session_id, "S1");
        assert_eq!(session.cwd, Some(PathBuf::from("/work/repo")));
        assert_eq!(session.model, Some("Sonnet".to_string()));
        assert_eq!(session.context_window_size, Some(200_000));
        assert_eq!(session.tokens_used(), 50_015);
    }

    #[test]
    fn parse_stdin_payload_falls_back_across_cwd_aliases() {
        let raw = r#"{"session_id": "S1", "workspace": {"current_dir": "/via/workspace"}}"#;
        let session = parse_stdin_payload(raw).unwrap();
        assert_eq!(session.cwd, Some(PathBuf::from("/via/workspace")));
    }

    #[test]
    fn parse_stdin_payload_rejects_non_object() {
        assert!(parse_stdin_payload("[1,2,3]").is_none());
        assert!(parse_stdin_payload("not json").is_none());
    }

    #[test]
    fn is_inactive_respects_window() {
        let old = SystemTime::now() - std::time::Duration::from_secs(3700);
        assert!(is_inactive(old, DEFAULT_INACTIVE_SECS));
        assert!(!is_inactive(SystemTime::now(), DEFAULT_INACTIVE_SECS));
    }
}
