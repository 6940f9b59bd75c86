//! How the fetcher and the loader report how far along they are.
//!
//! The download counts bytes and the load counts documents. Neither knows
//! what draws the numbers: the binary attaches `indicatif` bars, everything
//! else passes [`null_progress()`].

use std::sync::Arc;

/// Receiver of progress updates for one ingest phase.
///
/// One observer is shared between the async download and the blocking load
/// thread, hence `Send + Sync`. Calls must not block.
pub trait ProgressCallback: Send + Sync {
    /// Size of the phase, e.g. the dump's Content-Length.
    fn set_total(&self, total: u64);

    /// Units done so far.
    fn set_position(&self, pos: u64);

    /// `delta` more bytes downloaded or documents stored.
    fn inc(&self, delta: u64);

    fn set_message(&self, msg: String);

    /// The phase succeeded; `msg` summarizes it.
    fn finish(&self, msg: String);

    /// The phase stopped early; nothing is left on screen.
    fn finish_and_clear(&self);
}

/// Observer that discards every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn set_position(&self, _pos: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
    fn finish_and_clear(&self) {}
}

/// [`NullProgress`] behind the shared handle the pipeline expects.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}

/// Fraction of `total` covered by `done`, clamped to `0.0..=1.0`.
///
/// A zero `total` counts as complete.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 1.0;
    }
    (done as f64 / total as f64).clamp(0.0, 1.0)
}
