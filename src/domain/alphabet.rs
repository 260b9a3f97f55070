// ============================================================
// Layer 3 — Alphabet Domain Type
// ============================================================
// The label alphabet shared by the model head, the decoders
// and the reference sequences in the chunk dataset.
//
// Index 0 is always the blank ("N"). The remaining labels
// are the bases, so a standard DNA model has labels
//   ["N", "A", "C", "G", "T"]
// and n_base = 4.
//
// References are stored as label indices (1..=n_base) and
// padded with 0, which is why the blank doubles as padding.
//
// Reference: Graves et al. (2006) Connectionist Temporal Classification

use serde::{Deserialize, Serialize};

/// The default nanopore DNA alphabet.
pub const DEFAULT_LABELS: [&str; 5] = ["N", "A", "C", "G", "T"];

/// An ordered list of output labels with the blank at index 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alphabet {
    pub labels: Vec<String>,
}

impl Default for Alphabet {
    fn default() -> Self {
        Self::new(DEFAULT_LABELS.iter().map(|s| s.to_string()).collect())
    }
}

impl Alphabet {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Number of real bases (everything except the blank).
    pub fn n_base(&self) -> usize {
        self.labels.len().saturating_sub(1)
    }

    /// Total number of output classes including the blank.
    pub fn n_classes(&self) -> usize {
        self.labels.len()
    }

    /// Turn label indices into a base string.
    /// Blanks (0) and out-of-range indices are skipped.
    pub fn decode_labels(&self, indices: &[usize]) -> String {
        indices
            .iter()
            .filter(|&&i| i > 0)
            .filter_map(|&i| self.labels.get(i))
            .map(String::as_str)
            .collect()
    }

    /// Decode a base index in 0..n_base (no blank offset), as
    /// emitted by the CRF transition structure.
    pub fn base(&self, base_index: usize) -> Option<&str> {
        self.labels.get(base_index + 1).map(String::as_str)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_alphabet() {
        let a = Alphabet::default();
        assert_eq!(a.n_base(), 4);
        assert_eq!(a.n_classes(), 5);
    }

    #[test]
    fn test_decode_labels_skips_blank() {
        let a = Alphabet::default();
        assert_eq!(a.decode_labels(&[0, 1, 0, 4, 9]), "AT");
    }

    #[test]
    fn test_base_offset() {
        let a = Alphabet::default();
        assert_eq!(a.base(0), Some("A"));
        assert_eq!(a.base(3), Some("T"));
        assert_eq!(a.base(4), None);
    }
}
