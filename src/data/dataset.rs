use burn::data::dataset::Dataset;

use crate::domain::chunk::ChunkSample;

/// In-memory chunk dataset for Burn's DataLoader.
pub struct ChunkDataset {
    samples: Vec<ChunkSample>,
}

impl ChunkDataset {
    pub fn new(samples: Vec<ChunkSample>) -> Self { Self { samples } }

    pub fn sample_count(&self) -> usize { self.samples.len() }

    /// Batches per epoch at `batch_size`, counting a final partial batch.
    pub fn batches(&self, batch_size: usize) -> usize {
        self.samples.len().div_ceil(batch_size.max(1))
    }
}

impl Dataset<ChunkSample> for ChunkDataset {
    fn get(&self, index: usize) -> Option<ChunkSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
