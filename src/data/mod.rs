// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between a chunk dataset directory and the
// tensor batches the trainer consumes:
//
//   chunks.json + references.json + reference_lengths.json
//       │
//       ▼
//   JsonChunkLoader   → reads the parallel arrays into ChunkSamples
//       │
//       ▼
//   split_train_val   → holds out the tail when there is no
//       │               validation/ directory
//       ▼
//   ChunkDataset      → implements Burn's Dataset trait
//       │
//       ▼
//   ChunkBatcher      → stacks signal into [N, 1, T], keeps the
//       │               references on the host
//       ▼
//   DataLoader        → feeds batches to the training loop
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Reads the JSON chunk dataset format
pub mod loader;

/// Implements Burn's Dataset trait for signal chunks
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Deterministic tail split into train/validation sets
pub mod splitter;
