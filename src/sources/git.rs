//! Tier 3: per-repository status, shelled out to the system `git` (§4.4).
//!
//! Classified globally-shared rather than session-scoped: the glossary
//! describes repository status as a context-key-scoped entry in the global
//! cache, coordinated through the Refresh-Intent Coordinator the same as
//! quota or billing, so a working tree shared by several concurrent
//! sessions is only ever `git status`-ed by one of them at a time. Uses the
//! subprocess discipline of §4.4: stderr captured, exit status inspected,
//! bounded wall-clock. Parsing follows the same `git status --porcelain`
//! idiom the teacher uses in `git.rs::run_status`, scaled down to the
//! handful of fields a status line needs.

use anyhow::Result;
use std::process::Command;
use std::time::Duration;

use super::{GatherContext, Source, Tier};
use crate::store::SessionHealth;
use crate::subprocess::run_bounded;

pub struct GitStatusSource;

impl Source for GitStatusSource {
    fn id(&self) -> &'static str {
        "git"
    }

    fn tier(&self) -> Tier {
        Tier::GloballyShared
    }

    fn freshness_category(&self) -> &'static str {
        "git_status"
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(400)
    }

    fn context_key(&self, ctx: &GatherContext) -> Option<String> {
        ctx.session.cwd.as_ref().map(|p| p.to_string_lossy().to_string())
    }

    fn fetch(&self, ctx: &GatherContext) -> Result<serde_json::Value> {
        let Some(cwd) = ctx.session.cwd.as_ref() else {
            return Ok(serde_json::json!({ "in_repo": false }));
        };

        let mut cmd = Command::new("git");
        cmd.arg("status").arg("--porcelain=2").arg("--branch").current_dir(cwd);
        let out = run_bounded(cmd, self.timeout())?;
        if !out.success {
            anyhow::bail!("git status failed: {}", out.stderr_tail);
        }

        Ok(parse_status(&out.stdout))
    }

    fn merge(&self, health: &mut SessionHealth, value: &serde_json::Value) {
        health.sources.insert(
            self.id().to_string(),
            crate::store::CacheEntry::new(value.clone(), std::time::SystemTime::now(), None),
        );
    }
}

fn parse_status(stdout: &str) -> serde_json::Value {
    let mut branch = String::new();
    let mut ahead = 0i64;
    let mut behind = 0i64;
    let mut changed = 0u64;

    for line in stdout.lines() {
        if let Some(rest) = line.strip_prefix("# branch.head ") {
            branch = rest.to_string();
        } else if let Some(rest) = line.strip_prefix("# branch.ab ") {
            let mut parts = rest.split_whitespace();
            ahead = parts.next().and_then(|s| s.trim_start_matches('+').parse().ok()).unwrap_or(0);
            behind = parts
                .next()
                .and_then(|s| s.trim_start_matches('-').parse().ok())
                .unwrap_or(0);
        } else if line.starts_with('1') || line.starts_with('2') || line.starts_with('?') {
            changed += 1;
        }
    }

    serde_json::json!({
        "in_repo": true,
        "branch": branch,
        "ahead": ahead,
        "behind": behind,
        "changed": changed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_branch_and_ahead_behind() {
        let stdout = "# branch.oid abc123\n# branch.head main\n# branch.ab +2 -1\n1 .M N... 100644 100644 100644 aaaa bbbb src/lib.rs\n";
        let value = parse_status(stdout);
        assert_eq!(value["branch"], "main");
        assert_eq!(value["ahead"], 2);
        assert_eq!(value["behind"], 1);
        assert_eq!(value["changed"], 1);
    }

    #[test]
    fn empty_status_reports_zero_changes() {
        let value = parse_status("# branch.head main\n");
        assert_eq!(value["changed"], 0);
    }
}
