// ============================================================
// Layer 4 — Chunk Batcher
// ============================================================
// Implements Burn's Batcher trait to turn a Vec<ChunkSample>
// into a model-ready batch.
//
//   Input:  N chunks of S signal samples each
//   Output: signal tensor [N, 1, S]  (batch, channel, time)
//           N unpadded reference label lists
//
// References stay on the host: the losses build their index
// tensors from them and validation decodes them to strings.
//
// Chunks in one dataset share a length; a shorter chunk is
// zero padded to the longest in the batch.
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::domain::chunk::ChunkSample;

// ─── ChunkBatch ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct ChunkBatch<B: Backend> {
    /// Raw signal — shape: [batch, 1, samples]
    pub signal: Tensor<B, 3>,

    /// Reference labels per chunk (1..=n_base), padding removed
    pub targets: Vec<Vec<usize>>,
}

// ─── ChunkBatcher ─────────────────────────────────────────────────────────────
#[derive(Clone, Debug, Default)]
pub struct ChunkBatcher;

impl<B: Backend> Batcher<B, ChunkSample, ChunkBatch<B>> for ChunkBatcher {
    fn batch(&self, items: Vec<ChunkSample>, device: &B::Device) -> ChunkBatch<B> {
        let batch_size = items.len();
        let samples    = items.iter().map(|c| c.signal.len()).max().unwrap_or(0);

        // ── Flatten signal, zero padding short chunks ─────────────────────────
        let mut flat = vec![0f32; batch_size * samples];
        for (n, chunk) in items.iter().enumerate() {
            flat[n * samples..n * samples + chunk.signal.len()].copy_from_slice(&chunk.signal);
        }
        let signal = Tensor::<B, 3>::from_data(
            TensorData::new(flat, [batch_size, 1, samples]),
            device,
        );

        let targets = items
            .iter()
            .map(|c| c.target().iter().map(|&l| l as usize).collect())
            .collect();

        ChunkBatch { signal, targets }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_batch_shapes_and_targets() {
        let device = Default::default();
        let items = vec![
            ChunkSample::new(vec![1.0, 2.0, 3.0], vec![1, 2, 0, 0], 2),
            ChunkSample::new(vec![4.0, 5.0, 6.0], vec![3, 3, 4, 1], 4),
        ];
        let batch: ChunkBatch<TestBackend> = ChunkBatcher.batch(items, &device);

        assert_eq!(batch.signal.dims(), [2, 1, 3]);
        assert_eq!(batch.targets, vec![vec![1, 2], vec![3, 3, 4, 1]]);
        let values: Vec<f32> = batch.signal.into_data().to_vec().unwrap();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_short_chunk_is_zero_padded() {
        let device = Default::default();
        let items = vec![
            ChunkSample::new(vec![1.0, 1.0], vec![1], 1),
            ChunkSample::new(vec![2.0, 2.0, 2.0], vec![2], 1),
        ];
        let batch: ChunkBatch<TestBackend> = ChunkBatcher.batch(items, &device);
        let values: Vec<f32> = batch.signal.into_data().to_vec().unwrap();
        assert_eq!(values, vec![1.0, 1.0, 0.0, 2.0, 2.0, 2.0]);
    }
}
