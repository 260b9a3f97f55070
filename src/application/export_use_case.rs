// ============================================================
// Layer 2 — ExportUseCase
// ============================================================
// Writes a trained run as a single model document, optionally
// carrying the latest checkpoint's weights inline.
//
//   Step 1: Rebuild + re-serialise the model  (Layer 5 - ml)
//   Step 2: Write JSON to --output or stdout  (Layer 2)

use anyhow::{Context, Result};
use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
};

use crate::infra::checkpoint::CheckpointManager;
use crate::ml::exporter::export_model;

pub struct ExportUseCase {
    model_directory: PathBuf,
    weights:         bool,
    output:          Option<PathBuf>,
}

impl ExportUseCase {
    pub fn new(model_directory: PathBuf, weights: bool, output: Option<PathBuf>) -> Self {
        Self { model_directory, weights, output }
    }

    pub fn execute(&self) -> Result<()> {
        let ckpt_manager = CheckpointManager::new(&self.model_directory);
        let document     = export_model(&ckpt_manager, self.weights)?;
        let json         = serde_json::to_string_pretty(&document)?;

        match &self.output {
            Some(path) => {
                fs::write(path, json)
                    .with_context(|| format!("Cannot write '{}'", path.display()))?;
                tracing::info!("Model written to '{}'", path.display());
            }
            None => {
                let mut stdout = io::stdout().lock();
                writeln!(stdout, "{json}")?;
            }
        }
        Ok(())
    }
}
