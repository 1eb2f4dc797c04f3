pub mod measure;
pub mod providers;
pub mod weights;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::media::MediaType;

/// Every similarity measurement the scorer knows how to weigh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Checksum,
    PerceptualHash,
    FrameSequence,
    FileSize,
    Dimensions,
    Duration,
    CaptureTime,
    Metadata,
    Filename,
}

impl SignalKind {
    pub const ALL: [SignalKind; 9] = [
        SignalKind::Checksum,
        SignalKind::PerceptualHash,
        SignalKind::FrameSequence,
        SignalKind::FileSize,
        SignalKind::Dimensions,
        SignalKind::Duration,
        SignalKind::CaptureTime,
        SignalKind::Metadata,
        SignalKind::Filename,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            SignalKind::Checksum => "checksum",
            SignalKind::PerceptualHash => "perceptual_hash",
            SignalKind::FrameSequence => "frame_sequence",
            SignalKind::FileSize => "file_size",
            SignalKind::Dimensions => "dimensions",
            SignalKind::Duration => "duration",
            SignalKind::CaptureTime => "capture_time",
            SignalKind::Metadata => "metadata",
            SignalKind::Filename => "filename",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SignalKind::Checksum => "Identical content",
            SignalKind::PerceptualHash => "Visual similarity",
            SignalKind::FrameSequence => "Frame similarity",
            SignalKind::FileSize => "File size",
            SignalKind::Dimensions => "Dimensions",
            SignalKind::Duration => "Duration",
            SignalKind::CaptureTime => "Capture time",
            SignalKind::Metadata => "Metadata",
            SignalKind::Filename => "File name",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Display verdict for a single signal. Not stored on the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    Pass,
    Warn,
    Fail,
}

/// One normalized similarity measurement between two files, weighted for aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    /// 1.0 means identical.
    pub raw_score: f64,
    /// Share of the overall confidence; never exceeds the kind's configured weight.
    pub contribution: f64,
    pub rationale: String,
}

impl Signal {
    pub fn new(kind: SignalKind, raw_score: f64, weight: f64, rationale: impl Into<String>) -> Self {
        let raw_score = raw_score.clamp(0.0, 1.0);
        let weight = weight.max(0.0);
        Self {
            kind,
            raw_score,
            contribution: raw_score * weight,
            rationale: rationale.into(),
        }
    }

    pub fn key(&self) -> &'static str {
        self.kind.key()
    }

    pub fn band(&self) -> Band {
        if self.contribution > 0.3 || self.raw_score >= 1.0 {
            Band::Pass
        } else if self.contribution > 0.1 {
            Band::Warn
        } else {
            Band::Fail
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "signal")]
pub enum PenaltyKind {
    HashMissing,
    VideoSignatureMissing,
    DurationMissing,
    SignalUnavailable(SignalKind),
    DeadlineExceeded,
}

impl PenaltyKind {
    pub fn key(&self) -> String {
        match self {
            PenaltyKind::HashMissing => "hash_missing".to_string(),
            PenaltyKind::VideoSignatureMissing => "video_signature_missing".to_string(),
            PenaltyKind::DurationMissing => "duration_missing".to_string(),
            PenaltyKind::SignalUnavailable(kind) => format!("{}_unavailable", kind.key()),
            PenaltyKind::DeadlineExceeded => "deadline_exceeded".to_string(),
        }
    }
}

/// A hard negative indicator. Any penalty drops a pair's confidence into the fail band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Penalty {
    pub kind: PenaltyKind,
    pub rationale: String,
}

impl Penalty {
    pub fn new(kind: PenaltyKind, rationale: impl Into<String>) -> Self {
        Self {
            kind,
            rationale: rationale.into(),
        }
    }

    pub fn key(&self) -> String {
        self.kind.key()
    }
}

/// A provider could not measure one signal for one pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unavailable {
    pub kind: SignalKind,
    pub reason: String,
}

impl Unavailable {
    pub fn new(kind: SignalKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    /// Converts the failure into the penalty that represents it for this media type.
    pub fn into_penalty(self, media_type: MediaType) -> Penalty {
        let kind = match (media_type.required_signal(), self.kind) {
            (Some(required), kind) if required == kind => match kind {
                SignalKind::PerceptualHash => PenaltyKind::HashMissing,
                SignalKind::FrameSequence => PenaltyKind::VideoSignatureMissing,
                SignalKind::Duration => PenaltyKind::DurationMissing,
                other => PenaltyKind::SignalUnavailable(other),
            },
            (_, kind) => PenaltyKind::SignalUnavailable(kind),
        };
        Penalty::new(kind, format!("{}: {}", self.kind.label(), self.reason))
    }
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} unavailable: {}", self.kind, self.reason)
    }
}
