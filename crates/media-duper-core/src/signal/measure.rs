//! Provider-side measurement structs and their normalization into similarity scores.

/// Hamming distance between two perceptual hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashDistance {
    pub distance: u32,
    pub bits: u32,
}

impl HashDistance {
    pub fn between(a: u64, b: u64) -> Self {
        Self {
            distance: (a ^ b).count_ones(),
            bits: u64::BITS,
        }
    }

    /// 1.0 at distance 0, falling linearly to `floor` at the cutoff; 0.0 beyond it.
    pub fn similarity(&self, max_distance: u32, floor: f64) -> f64 {
        within_cutoff(self.distance as f64, max_distance as f64, floor)
    }
}

/// Pixel geometry of two images or video streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelDifference {
    pub width_a: u32,
    pub height_a: u32,
    pub width_b: u32,
    pub height_b: u32,
}

impl PixelDifference {
    pub fn aspect_ratio_matches(&self) -> bool {
        if self.height_a == 0 || self.height_b == 0 {
            return false;
        }
        let ra = self.width_a as f64 / self.height_a as f64;
        let rb = self.width_b as f64 / self.height_b as f64;
        (ra - rb).abs() / ra.max(rb) < 0.01
    }

    /// Identical geometry scores 1.0; a rescaled copy keeps half credit plus the size ratio.
    pub fn similarity(&self) -> f64 {
        if self.width_a == self.width_b && self.height_a == self.height_b {
            return 1.0;
        }
        if !self.aspect_ratio_matches() {
            return 0.0;
        }
        let pa = self.width_a as f64 * self.height_a as f64;
        let pb = self.width_b as f64 * self.height_b as f64;
        if pa <= 0.0 || pb <= 0.0 {
            return 0.0;
        }
        0.5 + 0.5 * (pa.min(pb) / pa.max(pb))
    }
}

/// Per-frame hash distances between two sampled frame sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrameDistance {
    pub per_frame: Vec<u32>,
    /// Length of the longer sequence; unmatched tail frames count as misses.
    pub total_frames: usize,
}

impl VideoFrameDistance {
    pub fn between(a: &[u64], b: &[u64]) -> Self {
        let per_frame = a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| HashDistance::between(*x, *y).distance)
            .collect();
        Self {
            per_frame,
            total_frames: a.len().max(b.len()),
        }
    }

    pub fn matching_frames(&self, max_distance: u32) -> usize {
        self.per_frame.iter().filter(|d| **d <= max_distance).count()
    }

    /// Fraction of frames within the cutoff, scaled by how close those frames are.
    pub fn similarity(&self, max_distance: u32, floor: f64) -> f64 {
        if self.total_frames == 0 {
            return 0.0;
        }
        let close: Vec<f64> = self
            .per_frame
            .iter()
            .filter(|d| **d <= max_distance)
            .map(|d| {
                HashDistance {
                    distance: *d,
                    bits: u64::BITS,
                }
                .similarity(max_distance, floor)
            })
            .collect();
        if close.is_empty() {
            return 0.0;
        }
        let coverage = close.len() as f64 / self.total_frames as f64;
        let closeness = close.iter().sum::<f64>() / close.len() as f64;
        coverage * closeness
    }
}

/// Maps a difference onto a score: 1.0 at zero, `floor` at `cutoff`, 0.0 past it.
///
/// Pass the acceptance threshold as `floor` so that anything inside the cutoff is
/// enough on its own to call a match.
pub fn within_cutoff(delta: f64, cutoff: f64, floor: f64) -> f64 {
    if delta > cutoff {
        return 0.0;
    }
    if cutoff <= 0.0 {
        return 1.0;
    }
    1.0 - (1.0 - floor.clamp(0.0, 1.0)) * delta / cutoff
}

/// Relative difference `|a - b| / max(a, b)`, as a fraction.
pub fn relative_delta(a: f64, b: f64) -> f64 {
    let max = a.abs().max(b.abs());
    if max == 0.0 {
        return 0.0;
    }
    (a - b).abs() / max
}
