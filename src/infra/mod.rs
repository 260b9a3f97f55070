// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything that touches the run directory on disk:
//
//   checkpoint.rs — weights_{epoch}.safetensors and config.json
//                   Finds the latest epoch, writes parameter
//                   sets, and aligns saved tensors to a model
//                   whose names may differ.
//
//   metrics.rs    — training.csv (per epoch) and
//                   losses_{epoch}.csv (per step)
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)

/// Checkpoint files, config.json and name alignment
pub mod checkpoint;

/// CSV training logs
pub mod metrics;
