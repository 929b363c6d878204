//! Per-package progress sections.
//!
//! The engine owns no terminal; it reports through a [`ProgressSink`] that
//! hands out one section per package node. Section updates return a
//! boolean: `false` requests cooperative cancellation of the current
//! operation (the operation aborts, other nodes are not preempted). The
//! default sink forwards to tracing.

use std::sync::Arc;
use tracing::debug;

/// Factory for per-package sections. Shared across worker threads.
pub trait ProgressSink: Send + Sync {
    fn section(&self, key: &str) -> Box<dyn ProgressSection>;
}

/// One package's progress stream. Updates return `false` to abort the
/// operation being reported.
pub trait ProgressSection: Send {
    /// Aggregated transfer progress across the package's fetches.
    fn transfer(&mut self, transferred: u64, total: Option<u64>) -> bool;

    /// Extraction progress in files.
    fn files(&mut self, processed: u64, total: Option<u64>) -> bool;

    /// Phase transition or other status text.
    fn message(&mut self, text: &str);
}

/// Default sink: structured logging only.
pub struct TracingSink;

struct TracingSection {
    key: String,
}

impl ProgressSink for TracingSink {
    fn section(&self, key: &str) -> Box<dyn ProgressSection> {
        Box::new(TracingSection {
            key: key.to_string(),
        })
    }
}

impl ProgressSection for TracingSection {
    fn transfer(&mut self, transferred: u64, total: Option<u64>) -> bool {
        debug!(key = %self.key, transferred, total, "transfer progress");
        true
    }

    fn files(&mut self, processed: u64, total: Option<u64>) -> bool {
        debug!(key = %self.key, processed, total, "extract progress");
        true
    }

    fn message(&mut self, text: &str) {
        debug!(key = %self.key, "{text}");
    }
}

pub(crate) fn default_sink() -> Arc<dyn ProgressSink> {
    Arc::new(TracingSink)
}
