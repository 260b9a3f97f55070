// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust structs, traits and algorithms that define the
// core concepts of basecalling: labels, chunks, decoding of
// score matrices and alignment-based accuracy.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, traits and functions
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// Output labels with the blank at index 0
pub mod alphabet;

// A signal chunk and its reference
pub mod chunk;

// CTC greedy and CRF Viterbi over host score matrices
pub mod decoding;

// Smith-Waterman-Gotoh accuracy scoring
pub mod alignment;

// Core abstractions (traits) that other layers implement
pub mod traits;
