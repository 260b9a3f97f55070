// ============================================================
// Layer 3 — Chunk Domain Type
// ============================================================
// A single training example: a fixed-length window of raw
// nanopore signal and the reference bases it covers.
//
// The reference is stored as label indices (1..=n_base),
// zero padded to the longest reference in the dataset,
// with the true length kept alongside.
//
// Reference: Rust Book §5 (Structs and Methods)

use serde::{Deserialize, Serialize};

/// One signal chunk with its padded reference labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSample {
    /// Normalised signal, one value per sample
    pub signal: Vec<f32>,

    /// Reference labels, 0 padded
    pub reference: Vec<u8>,

    /// Number of meaningful entries in `reference`
    pub reference_length: usize,
}

impl ChunkSample {
    pub fn new(signal: Vec<f32>, reference: Vec<u8>, reference_length: usize) -> Self {
        Self { signal, reference, reference_length }
    }

    /// The unpadded reference labels.
    pub fn target(&self) -> &[u8] {
        &self.reference[..self.reference_length.min(self.reference.len())]
    }
}
