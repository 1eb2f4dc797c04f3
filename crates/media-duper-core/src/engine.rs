use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::cluster::{self, ClusterReport};
use crate::config::{AppConfig, Thresholds};
use crate::error::Error;
use crate::media::{FileCatalog, MediaFile, MediaType};
use crate::progress::ProgressReporter;
use crate::scoring::{compare, CompareContext, PairVerdict};
use crate::signal::providers::ProviderRegistry;
use crate::signal::weights::WeightTable;

/// Cooperative cancellation flag shared between a caller and a running pass.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

pub struct DedupeEngine {
    config: AppConfig,
    registry: ProviderRegistry,
}

#[derive(Debug)]
pub struct DedupeResult {
    pub compare_duration: Duration,
    pub cluster_duration: Duration,
    pub pairs_compared: usize,
    pub duplicate_pairs: usize,
    /// Every verdict produced, matches and non-matches alike. Keep these for `recluster`.
    pub verdicts: Vec<PairVerdict>,
    pub report: ClusterReport,
}

impl DedupeEngine {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            registry: ProviderRegistry::with_builtin(),
        }
    }

    pub fn with_registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry_mut(&mut self) -> &mut ProviderRegistry {
        &mut self.registry
    }

    /// Run the duplicate detection pipeline:
    /// 1. Candidate pairs per media type
    /// 2. Parallel pairwise comparison on a bounded pool
    /// 3. Clustering over the full verdict set
    pub fn find_duplicates(
        &self,
        catalog: &FileCatalog,
        reporter: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<DedupeResult, Error> {
        info!("Finding duplicates among {} files...", catalog.len());

        // Phase 1: Compare
        let compare_start = Instant::now();
        let verdicts = self.compare_all(catalog, reporter, cancel)?;
        let compare_duration = compare_start.elapsed();
        let duplicate_pairs = verdicts.iter().filter(|v| v.is_duplicate).count();
        reporter.on_compare_complete(duplicate_pairs, compare_duration.as_secs_f64());
        debug!(
            "Compared {} pairs in {:.2}s, {} matched",
            verdicts.len(),
            compare_duration.as_secs_f64(),
            duplicate_pairs
        );

        // Phase 2: Cluster
        reporter.on_cluster_start();
        let cluster_start = Instant::now();
        let report = cluster::cluster_cancellable(catalog, &verdicts, &self.config.thresholds, cancel)?;
        let cluster_duration = cluster_start.elapsed();
        reporter.on_cluster_complete(report.groups.len(), cluster_duration.as_secs_f64());
        info!(
            "Found {} duplicate groups ({} files orphaned by cohesion splits)",
            report.groups.len(),
            report.orphaned.len()
        );

        Ok(DedupeResult {
            compare_duration,
            cluster_duration,
            pairs_compared: verdicts.len(),
            duplicate_pairs,
            verdicts,
            report,
        })
    }

    /// Compare every candidate pair. Returns `Error::Cancelled` if `cancel` fires.
    pub fn compare_all(
        &self,
        catalog: &FileCatalog,
        reporter: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<Vec<PairVerdict>, Error> {
        let pairs = candidate_pairs(catalog.files(), self.config.max_comparisons_per_file);
        let total = pairs.len();
        reporter.on_compare_start(total);

        let threads = self.config.concurrency.unwrap_or(0);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| Error::Other(format!("Failed to build comparison pool: {}", e)))?;

        let ctx_weights = &self.config.weights;
        let ctx_thresholds = &self.config.thresholds;
        let timeout = self.config.pair_timeout();
        let done = AtomicUsize::new(0);

        let verdicts: Vec<Option<PairVerdict>> = pool.install(|| {
            pairs
                .par_iter()
                .map(|(a, b)| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    let ctx = CompareContext {
                        registry: &self.registry,
                        weights: ctx_weights,
                        thresholds: ctx_thresholds,
                        deadline: timeout.map(|t| Instant::now() + t),
                    };
                    let verdict = compare(a, b, &ctx);
                    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                    if n % 256 == 0 || n == total {
                        reporter.on_compare_progress(n, total);
                    }
                    Some(verdict)
                })
                .collect()
        });

        if cancel.is_cancelled() {
            info!("Comparison cancelled after {} of {} pairs", done.load(Ordering::Relaxed), total);
            return Err(Error::Cancelled);
        }

        let mut verdicts: Vec<PairVerdict> = verdicts.into_iter().flatten().collect();
        verdicts.sort_by_key(|v| v.key());
        Ok(verdicts)
    }

    /// Re-run grouping over verdicts from an earlier pass with new settings.
    pub fn recluster(
        &self,
        catalog: &FileCatalog,
        verdicts: &[PairVerdict],
        weights: &WeightTable,
        thresholds: &Thresholds,
    ) -> ClusterReport {
        cluster::recluster(catalog, verdicts, weights, thresholds)
    }
}

/// Pairs worth comparing: same media type and non-empty.
///
/// With a cap of `k`, files are ordered by size and each one is compared with its
/// next `k` neighbours only.
pub fn candidate_pairs<'a>(
    files: impl IntoIterator<Item = &'a MediaFile>,
    max_per_file: Option<usize>,
) -> Vec<(&'a MediaFile, &'a MediaFile)> {
    let mut by_type: Vec<(MediaType, Vec<&'a MediaFile>)> = Vec::new();
    for file in files.into_iter().filter(|f| f.file_size > 0) {
        match by_type.iter_mut().find(|(t, _)| *t == file.media_type) {
            Some((_, bucket)) => bucket.push(file),
            None => by_type.push((file.media_type, vec![file])),
        }
    }
    by_type.sort_by_key(|(t, _)| *t);

    let mut pairs = Vec::new();
    for (_, mut bucket) in by_type {
        bucket.sort_by_key(|f| (f.file_size, f.id));
        let n = bucket.len();
        for i in 0..n {
            let end = match max_per_file {
                Some(k) => (i + 1 + k).min(n),
                None => n,
            };
            for j in (i + 1)..end {
                pairs.push((bucket[i], bucket[j]));
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_pairs_skip_empty_and_mixed_types() {
        let photos: Vec<MediaFile> = (1..=3)
            .map(|i| MediaFile::new(format!("/p/{}.jpg", i), MediaType::Photo, i * 10))
            .collect();
        let empty = MediaFile::new("/p/empty.jpg", MediaType::Photo, 0);
        let video = MediaFile::new("/v/a.mp4", MediaType::Video, 100);
        let all: Vec<&MediaFile> = photos.iter().chain([&empty, &video]).collect();

        let pairs = candidate_pairs(all.iter().copied(), None);
        assert_eq!(pairs.len(), 3);
        assert!(pairs.iter().all(|(a, b)| a.media_type == b.media_type));
        assert!(pairs.iter().all(|(a, b)| a.id != empty.id && b.id != empty.id));
    }

    #[test]
    fn test_candidate_pairs_cap() {
        let photos: Vec<MediaFile> = (1..=5)
            .map(|i| MediaFile::new(format!("/p/{}.jpg", i), MediaType::Photo, i * 10))
            .collect();
        let pairs = candidate_pairs(photos.iter(), Some(1));
        assert_eq!(pairs.len(), 4);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let shared = token.clone();
        assert!(!token.is_cancelled());
        shared.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!shared.is_cancelled());
    }
}
