/// Trait for reporting pipeline progress.
///
/// Hosts implement it to drive progress bars or UI callbacks.
/// All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_compare_start(&self, _total_pairs: usize) {}
    fn on_compare_progress(&self, _pairs_done: usize, _total_pairs: usize) {}
    fn on_compare_complete(&self, _duplicate_pairs: usize, _duration_secs: f64) {}
    fn on_cluster_start(&self) {}
    fn on_cluster_complete(&self, _groups: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
