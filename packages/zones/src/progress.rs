//! Progress reporting for long-running analysis steps.
//!
//! Evaluating cluster quality over a range of `k` dominates the run time
//! of an analysis. Steps report through [`ProgressCallback`] so the
//! caller decides how (or whether) to render it: a terminal progress
//! bar in the CLI, nothing in tests and library use.

/// Receives progress updates from an analysis step.
///
/// Implementations must be `Send + Sync` so a fit running on a worker
/// thread can report to a renderer owned elsewhere.
pub trait ProgressCallback: Send + Sync {
    /// Set the total expected units of work.
    fn set_total(&self, total: u64);

    /// Advance progress by `delta` units.
    fn inc(&self, delta: u64);

    /// Update the message displayed alongside the progress indicator.
    fn set_message(&self, msg: String);

    /// Mark progress as complete with a final message.
    fn finish(&self, msg: String);

    /// Mark progress as complete and remove the progress indicator.
    fn finish_and_clear(&self);
}

/// Ignores all progress updates.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
    fn finish_and_clear(&self) {}
}
