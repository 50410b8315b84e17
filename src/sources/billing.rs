//! Tier 3: daily billing sample via an external CLI sampler (§1, §4.4).
//!
//! The exact sampler binary and its output format are explicitly out of
//! scope (§1 Non-goals) — this source only needs the Source contract: a
//! bounded `fetch` that shells out under the subprocess discipline of §4.4
//! and yields a JSON value the Renderer can read fields off of.

use anyhow::Result;
use std::process::Command;
use std::time::Duration;

use super::{GatherContext, Source, Tier};
use crate::store::SessionHealth;
use crate::subprocess::run_bounded;

pub struct BillingSource {
    /// Name (or path) of the external sampler binary. Configurable; default
    /// matches the tool most status lines already shell out to.
    pub binary: String,
}

impl Default for BillingSource {
    fn default() -> Self {
        Self { binary: "ccusage".to_string() }
    }
}

impl BillingSource {
    pub fn new(binary: String) -> Self {
        Self { binary }
    }
}

impl Source for BillingSource {
    fn id(&self) -> &'static str {
        "billing"
    }

    fn tier(&self) -> Tier {
        Tier::GloballyShared
    }

    fn freshness_category(&self) -> &'static str {
        "billing_ccusage"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(25)
    }

    fn fetch(&self, _ctx: &GatherContext) -> Result<serde_json::Value> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--json");
        let out = run_bounded(cmd, self.timeout())?;
        if !out.success {
            anyhow::bail!("{} exited non-zero: {}", self.binary, out.stderr_tail);
        }
        let parsed: serde_json::Value =
            serde_json::from_str(out.stdout.trim()).unwrap_or_else(|_| serde_json::json!({ "raw": out.stdout }));
        Ok(parsed)
    }

    fn merge(&self, health: &mut SessionHealth, value: &serde_json::Value) {
        health.sources.insert(
            self.id().to_string(),
            crate::store::CacheEntry::new(value.clone(), std::time::SystemTime::now(), None),
        );
    }
}
