//! Tier 2: session-local transcript scanning (§4.4).
//!
//! Stats the transcript file and scans it for secret-looking patterns. The
//! secret-scanning *rules themselves* are out of scope (§1 Non-goals name a
//! dedicated secret scanner as an external collaborator); this source only
//! needs a cheap, self-contained heuristic good enough to surface a warning
//! glyph, not to replace a real scanner.

use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use std::time::Duration;

use super::{GatherContext, Source, Tier};
use crate::store::SessionHealth;

lazy_static! {
    static ref SECRET_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"sk-[A-Za-z0-9]{20,}").unwrap(),
        Regex::new(r"(?i)aws_secret_access_key\s*[:=]").unwrap(),
        Regex::new(r"-----BEGIN [A-Z ]*PRIVATE KEY-----").unwrap(),
    ];
}

pub struct TranscriptSource;

impl Source for TranscriptSource {
    fn id(&self) -> &'static str {
        "transcript"
    }

    fn tier(&self) -> Tier {
        Tier::SessionScoped
    }

    fn freshness_category(&self) -> &'static str {
        "transcript"
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(300)
    }

    fn fetch(&self, ctx: &GatherContext) -> Result<serde_json::Value> {
        let Some(path) = ctx.session.transcript_path.as_ref() else {
            return Ok(serde_json::json!({ "exists": false, "secrets_found": false, "bytes": 0 }));
        };

        let Ok(contents) = std::fs::read_to_string(path) else {
            return Ok(serde_json::json!({ "exists": false, "secrets_found": false, "bytes": 0 }));
        };

        let secrets_found = SECRET_PATTERNS.iter().any(|re| re.is_match(&contents));
        Ok(serde_json::json!({
            "exists": true,
            "secrets_found": secrets_found,
            "bytes": contents.len(),
        }))
    }

    fn merge(&self, health: &mut SessionHealth, value: &serde_json::Value) {
        if value["secrets_found"].as_bool().unwrap_or(false) {
            health.alerts.push("transcript: possible secret detected".to_string());
        }
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
    use std::io::Write;

    fn session_with_transcript(path: std::path::PathBuf) -> Session {
        Session {
            session_id: "s".into(),
            cwd: None,
            transcript_path: Some(path),
            model: None,
            context_window_size: None,
            input_tokens: None,
            output_tokens: None,
            cache_read_input_tokens: None,
        }
    }

    #[test]
    fn missing_transcript_reports_absent() {
        let session = session_with_transcript("/nonexistent/path.jsonl".into());
        let ctx = GatherContext { session: &session, deadline: std::time::Instant::now() };
        let value = TranscriptSource.fetch(&ctx).unwrap();
        assert_eq!(value["exists"], false);
    }

    #[test]
    fn detects_secret_pattern() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp.as_file(), "token=sk-abcdefghijklmnopqrstuvwx").unwrap();
        let session = session_with_transcript(tmp.path().to_path_buf());
        let ctx = GatherContext { session: &session, deadline: std::time::Instant::now() };
        let value = TranscriptSource.fetch(&ctx).unwrap();
        assert_eq!(value["secrets_found"], true);

        let mut health = SessionHealth::new("s");
        TranscriptSource.merge(&mut health, &value);
        assert!(health.alerts.iter().any(|a| a.contains("secret")));
    }

    #[test]
    fn clean_transcript_raises_no_alert() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp.as_file(), "hello world").unwrap();
        let session = session_with_transcript(tmp.path().to_path_buf());
        let ctx = GatherContext { session: &session, deadline: std::time::Instant::now() };
        let value = TranscriptSource.fetch(&ctx).unwrap();

        let mut health = SessionHealth::new("s");
        TranscriptSource.merge(&mut health, &value);
        assert!(health.alerts.is_empty());
    }
}
