use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::SignalKind;

/// Per-signal weights plus the set of signals excluded from scoring.
///
/// Kinds without a registered weight score as zero-weight; disabled kinds are
/// dropped from both sides of the weighted average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightTable {
    weights: BTreeMap<SignalKind, f64>,
    disabled: BTreeSet<SignalKind>,
}

impl Default for WeightTable {
    fn default() -> Self {
        let weights = [
            (SignalKind::Checksum, 1.0),
            (SignalKind::PerceptualHash, 0.8),
            (SignalKind::FrameSequence, 0.8),
            (SignalKind::FileSize, 0.3),
            (SignalKind::Dimensions, 0.5),
            (SignalKind::Duration, 0.4),
            (SignalKind::CaptureTime, 0.3),
            (SignalKind::Metadata, 0.2),
            (SignalKind::Filename, 0.1),
        ]
        .into_iter()
        .collect();

        Self {
            weights,
            disabled: BTreeSet::new(),
        }
    }
}

impl WeightTable {
    pub fn weight(&self, kind: SignalKind) -> f64 {
        self.weights.get(&kind).copied().unwrap_or(0.0).max(0.0)
    }

    pub fn is_enabled(&self, kind: SignalKind) -> bool {
        !self.disabled.contains(&kind)
    }

    pub fn with_weight(mut self, kind: SignalKind, weight: f64) -> Self {
        self.set_weight(kind, weight);
        self
    }

    pub fn set_weight(&mut self, kind: SignalKind, weight: f64) {
        self.weights.insert(kind, weight.max(0.0));
    }

    pub fn disable(&mut self, kind: SignalKind) {
        self.disabled.insert(kind);
    }

    pub fn enable(&mut self, kind: SignalKind) {
        self.disabled.remove(&kind);
    }

    pub fn enabled_kinds(&self) -> impl Iterator<Item = SignalKind> + '_ {
        SignalKind::ALL
            .into_iter()
            .filter(move |k| self.is_enabled(*k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights() {
        let table = WeightTable::default();
        assert_eq!(table.weight(SignalKind::Checksum), 1.0);
        assert_eq!(table.weight(SignalKind::PerceptualHash), 0.8);
        assert_eq!(table.weight(SignalKind::FileSize), 0.3);
        assert_eq!(table.weight(SignalKind::Dimensions), 0.5);
        assert_eq!(table.weight(SignalKind::Duration), 0.4);
        assert_eq!(table.weight(SignalKind::Metadata), 0.2);
        assert_eq!(table.enabled_kinds().count(), SignalKind::ALL.len());
    }

    #[test]
    fn test_disable_removes_kind() {
        let mut table = WeightTable::default();
        table.disable(SignalKind::Filename);
        assert!(!table.is_enabled(SignalKind::Filename));
        assert!(table.enabled_kinds().all(|k| k != SignalKind::Filename));
        table.enable(SignalKind::Filename);
        assert!(table.is_enabled(SignalKind::Filename));
    }

    #[test]
    fn test_deserialize_partial_table() {
        let json = r#"{"weights": {"checksum": 0.9, "metadata": 0.5}, "disabled": ["filename"]}"#;
        let table: WeightTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.weight(SignalKind::Checksum), 0.9);
        assert_eq!(table.weight(SignalKind::PerceptualHash), 0.0);
        assert!(!table.is_enabled(SignalKind::Filename));
    }
}
