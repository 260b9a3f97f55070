// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The application layer loads training data through
// ChunkSource, so a different on-disk format only needs a
// new implementation, not changes to the training workflow.
//
//   - JsonChunkLoader implements ChunkSource
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;
use crate::domain::chunk::ChunkSample;

// ─── ChunkSource ──────────────────────────────────────────────────────────────
/// Any component that can produce signal chunks with references.
pub trait ChunkSource {
    /// Load up to `limit` chunks (all of them when `limit` is 0).
    fn load_chunks(&self, limit: usize) -> Result<Vec<ChunkSample>>;
}
