//! Unified error taxonomy for the freshness-and-coordination substrate (§7).
//!
//! Call sites keep propagating `anyhow::Result`, same as the rest of the
//! crate; `StatlineError` gives the four documented error kinds a concrete
//! shape so the Broker, Coordinator, Store, and Renderer can log a
//! structured value at the point each kind actually occurs, instead of an
//! ad hoc string.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatlineError {
    /// Kind 1: a Tier 2 or Tier 3 source failed or timed out.
    #[error("source '{source_id}' fetch failed: {reason}")]
    FetchFailed { source_id: String, reason: String },

    /// Kind 2: a cache or health file failed to parse or carried the wrong
    /// schema version. Treated as absent by callers, never propagated.
    #[error("cache file {path} is malformed or at an unsupported version: {reason}")]
    CacheFormat { path: PathBuf, reason: String },

    /// Kind 3: an in-progress marker outlived its owning process, or an
    /// intent marker aged past the critical threshold with no success.
    #[error("coordination anomaly for category '{category}': {reason}")]
    CoordinationAnomaly { category: String, reason: String },

    /// Kind 4: the Renderer hit an unhandled error or ran out of time.
    #[error("renderer fault: {reason}")]
    RendererFault { reason: String },
}
