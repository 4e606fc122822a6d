use std::collections::BTreeMap;

/// Per-detector clipping thresholds.
///
/// Detectors missing from the table are combined without sigma clipping.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorTable {
    sigmas: BTreeMap<u8, f64>,
}

impl DetectorTable {
    pub fn new(entries: impl IntoIterator<Item = (u8, f64)>) -> Self {
        Self {
            sigmas: entries.into_iter().collect(),
        }
    }

    pub fn sigma(&self, detector: u8) -> Option<f64> {
        self.sigmas.get(&detector).copied()
    }

    /// Detector ids in ascending order
    pub fn detectors(&self) -> Vec<u8> {
        self.sigmas.keys().copied().collect()
    }
}

impl Default for DetectorTable {
    /// The four-chip mosaic: the outer pair clips harder than the inner pair
    fn default() -> Self {
        Self::new([(1, 4.0), (2, 4.0), (3, 6.0), (4, 6.0)])
    }
}
