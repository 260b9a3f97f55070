// ============================================================
// Layer 4 — Chunk Loader
// ============================================================
// Reads a chunk dataset directory:
//
//   chunks.json             [n][samples]  f32 signal
//   references.json         [n][max_len]  u8 labels, 0 padded
//   reference_lengths.json  [n]           true reference lengths
//
// The three files are parallel arrays; a mismatch in their
// lengths is an error rather than a silent truncation.
// Every chunk is checked before training sees it: its length
// must fit the reference row and every label inside that
// length must be a base (1..=n_base). Padding zeros inside the
// reference would otherwise reach the loss as blanks.
//
// Reference: Rust Book §9 (Error Handling)
//            serde_json documentation

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::{alphabet::Alphabet, chunk::ChunkSample, traits::ChunkSource};

pub const CHUNKS_FILE:     &str = "chunks.json";
pub const REFERENCES_FILE: &str = "references.json";
pub const LENGTHS_FILE:    &str = "reference_lengths.json";

/// Loads chunks from the JSON files in one directory.
pub struct JsonChunkLoader {
    dir:    PathBuf,
    n_base: usize,
}

impl JsonChunkLoader {
    /// A loader for the default DNA alphabet.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), n_base: Alphabet::default().n_base() }
    }

    /// Accept labels 1..=n_base.
    pub fn with_n_base(mut self, n_base: usize) -> Self {
        self.n_base = n_base;
        self
    }

    fn validate(&self, index: usize, sample: &ChunkSample) -> Result<()> {
        if sample.reference_length > sample.reference.len() {
            bail!(
                "Chunk {} in '{}' has reference length {} but only {} labels",
                index,
                self.dir.display(),
                sample.reference_length,
                sample.reference.len()
            );
        }
        if let Some(label) = sample.target().iter().find(|&&l| l == 0 || l as usize > self.n_base) {
            bail!(
                "Chunk {} in '{}' has label {} outside 1..={}",
                index,
                self.dir.display(),
                label,
                self.n_base
            );
        }
        Ok(())
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.dir.join(name);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid JSON in '{}'", path.display()))
    }
}

impl ChunkSource for JsonChunkLoader {
    fn load_chunks(&self, limit: usize) -> Result<Vec<ChunkSample>> {
        let chunks:     Vec<Vec<f32>> = self.read(CHUNKS_FILE)?;
        let references: Vec<Vec<u8>>  = self.read(REFERENCES_FILE)?;
        let lengths:    Vec<usize>    = self.read(LENGTHS_FILE)?;

        if chunks.len() != references.len() || chunks.len() != lengths.len() {
            bail!(
                "Dataset '{}' is inconsistent: {} chunks, {} references, {} lengths",
                self.dir.display(),
                chunks.len(),
                references.len(),
                lengths.len()
            );
        }

        let take = if limit == 0 { chunks.len() } else { limit.min(chunks.len()) };
        let samples: Vec<ChunkSample> = chunks
            .into_iter()
            .zip(references)
            .zip(lengths)
            .take(take)
            .map(|((signal, reference), length)| ChunkSample::new(signal, reference, length))
            .collect();
        for (index, sample) in samples.iter().enumerate() {
            self.validate(index, sample)?;
        }

        tracing::info!("Loaded {} chunks from '{}'", samples.len(), self.dir.display());
        Ok(samples)
    }
}

/// Write a dataset in the layout JsonChunkLoader reads.
#[cfg(test)]
pub(crate) fn write_chunks(dir: &Path, samples: &[ChunkSample]) -> Result<()> {
    fs::create_dir_all(dir)?;
    let chunks: Vec<&[f32]> = samples.iter().map(|s| s.signal.as_slice()).collect();
    let references: Vec<&[u8]> = samples.iter().map(|s| s.reference.as_slice()).collect();
    let lengths: Vec<usize> = samples.iter().map(|s| s.reference_length).collect();
    fs::write(dir.join(CHUNKS_FILE), serde_json::to_string(&chunks)?)?;
    fs::write(dir.join(REFERENCES_FILE), serde_json::to_string(&references)?)?;
    fs::write(dir.join(LENGTHS_FILE), serde_json::to_string(&lengths)?)?;
    Ok(())
}
