use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{trace, warn};
use uuid::Uuid;

use super::aggregate::aggregate;
use crate::config::Thresholds;
use crate::media::{MediaFile, MediaType};
use crate::signal::providers::ProviderRegistry;
use crate::signal::weights::WeightTable;
use crate::signal::{Penalty, PenaltyKind, Signal, SignalKind};

/// Everything `compare` needs besides the two files.
pub struct CompareContext<'a> {
    pub registry: &'a ProviderRegistry,
    pub weights: &'a WeightTable,
    pub thresholds: &'a Thresholds,
    /// Signal extraction for the pair stops once this passes.
    pub deadline: Option<Instant>,
}

/// Outcome of comparing two files. `file_a` always sorts before `file_b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairVerdict {
    pub file_a: Uuid,
    pub file_b: Uuid,
    pub media_type: MediaType,
    pub is_duplicate: bool,
    pub confidence: f64,
    pub signals: Vec<Signal>,
    pub penalties: Vec<Penalty>,
    pub rationale: Vec<String>,
}

impl PairVerdict {
    /// Decide a pair from already-collected signals.
    ///
    /// An identical checksum wins outright. Otherwise the pair is a duplicate only if
    /// the aggregate clears `thresholds.acceptance` with no penalty present.
    pub fn decide(
        a: Uuid,
        b: Uuid,
        media_type: MediaType,
        signals: Vec<Signal>,
        penalties: Vec<Penalty>,
        weights: &WeightTable,
        thresholds: &Thresholds,
    ) -> Self {
        let (file_a, file_b) = ordered(a, b);
        let mut rationale: Vec<String> = Vec::new();

        let exact = weights.is_enabled(SignalKind::Checksum)
            && signals
                .iter()
                .any(|s| s.kind == SignalKind::Checksum && s.raw_score >= 1.0);
        if exact {
            rationale.push("Identical checksum".to_string());
            return Self {
                file_a,
                file_b,
                media_type,
                is_duplicate: true,
                confidence: 1.0,
                signals,
                penalties,
                rationale,
            };
        }

        let agg = aggregate(&signals, &penalties, weights);
        for signal in &signals {
            rationale.push(format!("{}: {}", signal.kind.label(), signal.rationale));
        }
        for penalty in &penalties {
            rationale.push(format!("Penalty {}: {}", penalty.key(), penalty.rationale));
        }

        let is_duplicate = !agg.penalized && agg.confidence >= thresholds.acceptance;
        rationale.push(format!(
            "Confidence {:.2} ({} acceptance {:.2})",
            agg.confidence,
            if is_duplicate { "meets" } else { "below" },
            thresholds.acceptance
        ));

        Self {
            file_a,
            file_b,
            media_type,
            is_duplicate,
            confidence: agg.confidence,
            signals,
            penalties,
            rationale,
        }
    }

    pub fn involves(&self, id: Uuid) -> bool {
        self.file_a == id || self.file_b == id
    }

    pub fn other(&self, id: Uuid) -> Option<Uuid> {
        if self.file_a == id {
            Some(self.file_b)
        } else if self.file_b == id {
            Some(self.file_a)
        } else {
            None
        }
    }

    pub fn key(&self) -> (Uuid, Uuid) {
        (self.file_a, self.file_b)
    }
}

pub fn ordered(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Compare two files and decide whether they are the same item.
///
/// Files of different media types never match. The checksum provider runs first so an
/// exact copy skips every other provider. A provider that cannot measure its signal
/// adds a penalty, and so does running out of time before all providers have run.
pub fn compare(a: &MediaFile, b: &MediaFile, ctx: &CompareContext<'_>) -> PairVerdict {
    if a.media_type != b.media_type {
        let (file_a, file_b) = ordered(a.id, b.id);
        return PairVerdict {
            file_a,
            file_b,
            media_type: a.media_type,
            is_duplicate: false,
            confidence: 0.0,
            signals: Vec::new(),
            penalties: Vec::new(),
            rationale: vec![format!(
                "Media types differ ({} vs {})",
                a.media_type, b.media_type
            )],
        };
    }

    let media_type = a.media_type;
    let mut signals: Vec<Signal> = Vec::new();
    let mut penalties: Vec<Penalty> = Vec::new();

    if ctx.weights.is_enabled(SignalKind::Checksum) {
        match ctx.registry.provide_signal(
            a,
            b,
            SignalKind::Checksum,
            ctx.weights,
            ctx.thresholds,
        ) {
            Ok(Some(signal)) if signal.raw_score >= 1.0 => {
                trace!("Exact checksum match {} / {}", a.id, b.id);
                return PairVerdict::decide(
                    a.id,
                    b.id,
                    media_type,
                    vec![signal],
                    penalties,
                    ctx.weights,
                    ctx.thresholds,
                );
            }
            Ok(_) => {}
            Err(unavailable) => {
                warn!(
                    "Signal unavailable for {} / {}: {}",
                    a.path.display(),
                    b.path.display(),
                    unavailable
                );
                penalties.push(unavailable.into_penalty(media_type));
            }
        }
    }

    let kinds: Vec<SignalKind> = ctx
        .registry
        .kinds()
        .filter(|k| *k != SignalKind::Checksum && ctx.weights.is_enabled(*k))
        .collect();

    for kind in kinds {
        if let Some(deadline) = ctx.deadline {
            if Instant::now() >= deadline {
                warn!(
                    "Deadline exceeded comparing {} and {} before {} signal",
                    a.path.display(),
                    b.path.display(),
                    kind
                );
                penalties.push(Penalty::new(
                    PenaltyKind::DeadlineExceeded,
                    format!("Ran out of time before measuring {}", kind.label()),
                ));
                break;
            }
        }

        match ctx
            .registry
            .provide_signal(a, b, kind, ctx.weights, ctx.thresholds)
        {
            Ok(Some(signal)) => signals.push(signal),
            Ok(None) => {}
            Err(unavailable) => {
                warn!(
                    "Signal unavailable for {} / {}: {}",
                    a.path.display(),
                    b.path.display(),
                    unavailable
                );
                penalties.push(unavailable.into_penalty(media_type));
            }
        }
    }

    PairVerdict::decide(
        a.id,
        b.id,
        media_type,
        signals,
        penalties,
        ctx.weights,
        ctx.thresholds,
    )
}
