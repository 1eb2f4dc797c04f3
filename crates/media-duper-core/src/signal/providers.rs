use std::collections::BTreeMap;

use super::measure::{relative_delta, within_cutoff, HashDistance, PixelDifference, VideoFrameDistance};
use super::weights::WeightTable;
use super::{Signal, SignalKind, Unavailable};
use crate::config::Thresholds;
use crate::media::{MediaFile, MediaType, MetadataField};

/// Raw provider output before weighting.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub raw_score: f64,
    pub rationale: String,
}

impl Measurement {
    pub fn new(raw_score: f64, rationale: impl Into<String>) -> Self {
        Self {
            raw_score,
            rationale: rationale.into(),
        }
    }
}

/// Source of one kind of pairwise measurement.
///
/// `Ok(None)` means the signal carries no information for this pair (for example
/// two different checksums, or optional data absent on either side) and is left
/// out of scoring. `Err` means the measurement should have been possible but
/// could not be taken.
pub trait SignalProvider: Send + Sync {
    fn kind(&self) -> SignalKind;

    fn applies_to(&self, _media_type: MediaType) -> bool {
        true
    }

    fn measure(
        &self,
        a: &MediaFile,
        b: &MediaFile,
        thresholds: &Thresholds,
    ) -> Result<Option<Measurement>, Unavailable>;
}

/// Providers keyed by the signal they produce. Registering a kind twice replaces the first.
pub struct ProviderRegistry {
    providers: BTreeMap<SignalKind, Box<dyn SignalProvider>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self {
            providers: BTreeMap::new(),
        }
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(ChecksumProvider);
        registry.register(PerceptualHashProvider);
        registry.register(FrameSequenceProvider);
        registry.register(FileSizeProvider);
        registry.register(DimensionsProvider);
        registry.register(DurationProvider);
        registry.register(CaptureTimeProvider);
        registry.register(MetadataProvider);
        registry.register(FilenameProvider);
        registry
    }

    pub fn register<P: SignalProvider + 'static>(&mut self, provider: P) {
        self.providers.insert(provider.kind(), Box::new(provider));
    }

    pub fn get(&self, kind: SignalKind) -> Option<&dyn SignalProvider> {
        self.providers.get(&kind).map(|p| p.as_ref())
    }

    pub fn kinds(&self) -> impl Iterator<Item = SignalKind> + '_ {
        self.providers.keys().copied()
    }

    /// Measure one signal for a pair and weight it. `Ok(None)` when no provider
    /// is registered, it does not apply, or it reports nothing informative.
    pub fn provide_signal(
        &self,
        a: &MediaFile,
        b: &MediaFile,
        kind: SignalKind,
        weights: &WeightTable,
        thresholds: &Thresholds,
    ) -> Result<Option<Signal>, Unavailable> {
        let provider = match self.get(kind) {
            Some(p) if p.applies_to(a.media_type) => p,
            _ => return Ok(None),
        };
        let measurement = provider.measure(a, b, thresholds)?;
        Ok(measurement.map(|m| Signal::new(kind, m.raw_score, weights.weight(kind), m.rationale)))
    }
}

pub struct ChecksumProvider;

impl SignalProvider for ChecksumProvider {
    fn kind(&self) -> SignalKind {
        SignalKind::Checksum
    }

    fn measure(
        &self,
        a: &MediaFile,
        b: &MediaFile,
        _thresholds: &Thresholds,
    ) -> Result<Option<Measurement>, Unavailable> {
        match (&a.features.checksum, &b.features.checksum) {
            (Some(ca), Some(cb)) if ca == cb => Ok(Some(Measurement::new(
                1.0,
                format!("Checksums are identical ({})", ca),
            ))),
            // Differing or absent checksums say nothing about near-duplicates.
            _ => Ok(None),
        }
    }
}

pub struct PerceptualHashProvider;

impl SignalProvider for PerceptualHashProvider {
    fn kind(&self) -> SignalKind {
        SignalKind::PerceptualHash
    }

    fn applies_to(&self, media_type: MediaType) -> bool {
        media_type == MediaType::Photo
    }

    fn measure(
        &self,
        a: &MediaFile,
        b: &MediaFile,
        thresholds: &Thresholds,
    ) -> Result<Option<Measurement>, Unavailable> {
        let (ha, hb) = match (a.features.perceptual_hash, b.features.perceptual_hash) {
            (Some(ha), Some(hb)) => (ha, hb),
            _ => return Err(Unavailable::new(self.kind(), "perceptual hash not computed")),
        };
        let distance = HashDistance::between(ha, hb);
        let max = thresholds.image_hash_distance;
        Ok(Some(Measurement::new(
            distance.similarity(max, thresholds.acceptance),
            format!(
                "Hash distance {} of {} bits (match at <= {})",
                distance.distance, distance.bits, max
            ),
        )))
    }
}

pub struct FrameSequenceProvider;

impl SignalProvider for FrameSequenceProvider {
    fn kind(&self) -> SignalKind {
        SignalKind::FrameSequence
    }

    fn applies_to(&self, media_type: MediaType) -> bool {
        media_type == MediaType::Video
    }

    fn measure(
        &self,
        a: &MediaFile,
        b: &MediaFile,
        thresholds: &Thresholds,
    ) -> Result<Option<Measurement>, Unavailable> {
        if a.features.frame_hashes.is_empty() || b.features.frame_hashes.is_empty() {
            return Err(Unavailable::new(self.kind(), "video signature not computed"));
        }
        let distance = VideoFrameDistance::between(&a.features.frame_hashes, &b.features.frame_hashes);
        let max = thresholds.video_frame_distance;
        Ok(Some(Measurement::new(
            distance.similarity(max, thresholds.acceptance),
            format!(
                "{} of {} sampled frames within distance {}",
                distance.matching_frames(max),
                distance.total_frames,
                max
            ),
        )))
    }
}

pub struct FileSizeProvider;

impl SignalProvider for FileSizeProvider {
    fn kind(&self) -> SignalKind {
        SignalKind::FileSize
    }

    fn measure(
        &self,
        a: &MediaFile,
        b: &MediaFile,
        _thresholds: &Thresholds,
    ) -> Result<Option<Measurement>, Unavailable> {
        if a.file_size == 0 || b.file_size == 0 {
            return Err(Unavailable::new(self.kind(), "zero-byte file"));
        }
        let ratio = a.file_size.min(b.file_size) as f64 / a.file_size.max(b.file_size) as f64;
        Ok(Some(Measurement::new(
            ratio,
            format!("Sizes {} and {} bytes", a.file_size, b.file_size),
        )))
    }
}

pub struct DimensionsProvider;

impl SignalProvider for DimensionsProvider {
    fn kind(&self) -> SignalKind {
        SignalKind::Dimensions
    }

    fn applies_to(&self, media_type: MediaType) -> bool {
        matches!(media_type, MediaType::Photo | MediaType::Video)
    }

    fn measure(
        &self,
        a: &MediaFile,
        b: &MediaFile,
        _thresholds: &Thresholds,
    ) -> Result<Option<Measurement>, Unavailable> {
        let fa = &a.features;
        let fb = &b.features;
        let diff = match (fa.width, fa.height, fb.width, fb.height) {
            (Some(width_a), Some(height_a), Some(width_b), Some(height_b)) => PixelDifference {
                width_a,
                height_a,
                width_b,
                height_b,
            },
            _ => return Ok(None),
        };
        Ok(Some(Measurement::new(
            diff.similarity(),
            format!(
                "{}x{} vs {}x{}",
                diff.width_a, diff.height_a, diff.width_b, diff.height_b
            ),
        )))
    }
}

pub struct DurationProvider;

impl SignalProvider for DurationProvider {
    fn kind(&self) -> SignalKind {
        SignalKind::Duration
    }

    fn applies_to(&self, media_type: MediaType) -> bool {
        matches!(media_type, MediaType::Video | MediaType::Audio)
    }

    fn measure(
        &self,
        a: &MediaFile,
        b: &MediaFile,
        thresholds: &Thresholds,
    ) -> Result<Option<Measurement>, Unavailable> {
        let (da, db) = match (a.features.duration_secs, b.features.duration_secs) {
            (Some(da), Some(db)) => (da, db),
            _ if a.media_type == MediaType::Audio => {
                return Err(Unavailable::new(self.kind(), "duration not measured"))
            }
            _ => return Ok(None),
        };
        let delta_pct = relative_delta(da, db) * 100.0;
        let tolerance = thresholds.duration_tolerance_pct;
        let raw = within_cutoff(delta_pct, tolerance, thresholds.acceptance);
        Ok(Some(Measurement::new(
            raw,
            format!(
                "Durations {:.1}s and {:.1}s differ by {:.1}% (tolerance {:.0}%)",
                da, db, delta_pct, tolerance
            ),
        )))
    }
}

pub struct CaptureTimeProvider;

impl SignalProvider for CaptureTimeProvider {
    fn kind(&self) -> SignalKind {
        SignalKind::CaptureTime
    }

    fn measure(
        &self,
        a: &MediaFile,
        b: &MediaFile,
        thresholds: &Thresholds,
    ) -> Result<Option<Measurement>, Unavailable> {
        let (ta, tb) = match (a.features.captured_at, b.features.captured_at) {
            (Some(ta), Some(tb)) => (ta, tb),
            _ => return Ok(None),
        };
        let delta = (ta - tb).num_seconds().abs();
        let window = thresholds.capture_window_secs;
        let raw = within_cutoff(delta as f64, window as f64, thresholds.acceptance);
        Ok(Some(Measurement::new(
            raw,
            format!("Captured {}s apart (window {}s)", delta, window),
        )))
    }
}

pub struct MetadataProvider;

impl SignalProvider for MetadataProvider {
    fn kind(&self) -> SignalKind {
        SignalKind::Metadata
    }

    fn measure(
        &self,
        a: &MediaFile,
        b: &MediaFile,
        _thresholds: &Thresholds,
    ) -> Result<Option<Measurement>, Unavailable> {
        let mut compared = 0usize;
        let mut agreeing = 0usize;
        for field in MetadataField::ALL {
            if let (Some(va), Some(vb)) = (a.metadata.get(field), b.metadata.get(field)) {
                compared += 1;
                if va == vb {
                    agreeing += 1;
                }
            }
        }
        if compared == 0 {
            return Ok(None);
        }
        Ok(Some(Measurement::new(
            agreeing as f64 / compared as f64,
            format!("{} of {} shared metadata fields agree", agreeing, compared),
        )))
    }
}

pub struct FilenameProvider;

impl SignalProvider for FilenameProvider {
    fn kind(&self) -> SignalKind {
        SignalKind::Filename
    }

    fn measure(
        &self,
        a: &MediaFile,
        b: &MediaFile,
        _thresholds: &Thresholds,
    ) -> Result<Option<Measurement>, Unavailable> {
        let na = normalize_stem(&a.file_name());
        let nb = normalize_stem(&b.file_name());
        if na.is_empty() || nb.is_empty() {
            return Ok(None);
        }
        let similarity = strsim::normalized_levenshtein(&na, &nb);
        Ok(Some(Measurement::new(
            similarity,
            format!("Names '{}' and '{}' are {:.0}% similar", na, nb, similarity * 100.0),
        )))
    }
}

/// Lowercased stem with copy suffixes such as " (1)", "-copy" or "_2" removed.
pub fn normalize_stem(file_name: &str) -> String {
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    };
    let mut stem = stem.trim().to_lowercase();

    loop {
        let before = stem.len();
        for suffix in [" - copy", " copy", "-copy", "_copy"] {
            if let Some(s) = stem.strip_suffix(suffix) {
                stem = s.trim_end().to_string();
            }
        }
        if stem.ends_with(')') {
            if let Some(open) = stem.rfind(" (") {
                if stem[open + 2..stem.len() - 1].chars().all(|c| c.is_ascii_digit()) {
                    stem.truncate(open);
                    stem = stem.trim_end().to_string();
                }
            }
        }
        if let Some((head, tail)) = stem.rsplit_once(['_', '-']) {
            if !head.is_empty()
                && !tail.is_empty()
                && tail.len() <= 2
                && tail.chars().all(|c| c.is_ascii_digit())
            {
                stem = head.trim_end().to_string();
            }
        }
        if stem.len() == before {
            break;
        }
    }
    stem
}
