//! Progress reporting for long-running pipeline stages.
//!
//! [`ProgressCallback`] keeps the normalizer, resolvers, and uploader free
//! of any rendering backend. The CLI plugs in `indicatif` bars; tests and
//! library callers use [`NullProgress`].

use std::sync::Arc;

/// Receives progress updates from a pipeline stage.
///
/// Implementations must be `Send + Sync` so a single reporter can be
/// shared by concurrent region-resolution chunks.
pub trait ProgressCallback: Send + Sync {
    /// Units of work in the stage (records, chunks, batches).
    fn set_total(&self, total: u64);

    fn inc(&self, delta: u64);

    /// Replaces the label shown next to the indicator.
    fn set_message(&self, msg: String);

    /// Stage done; keep the indicator with a final message.
    fn finish(&self, msg: String);
}

/// Ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
