// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// This layer contains ALL Burn framework specific code apart
// from the data batcher.
//
// What's in this layer:
//
//   registry.rs   — layer type names → descriptors (write-once)
//   layers/       — the Layer node enum and every layer type:
//                   activations, serial, reverse, convolution,
//                   lstm, linearcrfencoder, attention blocks,
//                   layerscale, permute
//   params.rs     — canonical host-side parameter tensors
//   serializer.rs — Layer tree ⇄ JSON model document
//   model.rs      — encoder + CTC/CRF head, config.json
//   loss.rs       — CTC and CTC-CRF forward-algorithm losses
//   decoder.rs    — greedy CTC and Viterbi CRF decoders
//   scheduler.rs  — learning rate schedules with warm-up
//   scaler.rs     — dynamic loss scaling
//   trainer.rs    — the training loop
//   exporter.rs   — config + latest weights → model document
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)

/// Typed errors for building and restoring models
pub mod error;

/// Registry of layer type names
pub mod registry;

/// Layer nodes and their Burn modules
pub mod layers;

/// Engine-independent parameter tensors
pub mod params;

/// Model document serialisation
pub mod serializer;

/// Basecaller model and config.json
pub mod model;

/// Sequence losses
pub mod loss;

/// Score → sequence decoders
pub mod decoder;

/// Learning rate schedules
pub mod scheduler;

/// Dynamic loss scaling
pub mod scaler;

/// Full training loop with validation and checkpointing
pub mod trainer;

/// Model export with optional weights
pub mod exporter;
