// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Two append-only CSV logs per training run:
//
//   training.csv        one row per completed epoch
//     time,duration,epoch,train_loss,validation_loss,
//     validation_mean,validation_median
//
//   losses_{epoch}.csv  one row per optimiser step
//     chunks,time,grad_norm,loss,lr
//
// The header is written only when the file is created, so a
// resumed run keeps appending to the same training.csv.
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use serde::{Deserialize, Serialize};

const TRAINING_HEADER: &str =
    "time,duration,epoch,train_loss,validation_loss,validation_mean,validation_median";
const STEP_HEADER: &str = "chunks,time,grad_norm,loss,lr";

/// Open `path` for appending, writing `header` if the file is new.
fn open_csv(path: &Path, header: &str) -> Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let is_new = !path.exists();
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Cannot open log '{}'", path.display()))?;
    if is_new {
        writeln!(f, "{header}")?;
        tracing::debug!("Created log '{}'", path.display());
    }
    Ok(f)
}

/// One row of training.csv
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Seconds since the Unix epoch when the row was written
    pub time:              u64,
    /// Wall-clock training time for the epoch, in seconds
    pub duration:          u64,
    pub epoch:             usize,
    pub train_loss:        f64,
    pub validation_loss:   f64,
    /// Mean / median read accuracy over the validation set, [0, 1]
    pub validation_mean:   f64,
    pub validation_median: f64,
}

impl EpochMetrics {
    pub fn new(
        epoch:             usize,
        duration:          u64,
        train_loss:        f64,
        validation_loss:   f64,
        validation_mean:   f64,
        validation_median: f64,
    ) -> Self {
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self { time, duration, epoch, train_loss, validation_loss, validation_mean, validation_median }
    }
}

/// Appends epoch rows to `{dir}/training.csv`.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    pub fn new(dir: &Path) -> Result<Self> {
        let csv_path = dir.join("training.csv");
        open_csv(&csv_path, TRAINING_HEADER)?;
        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = open_csv(&self.csv_path, TRAINING_HEADER)?;
        writeln!(
            f,
            "{},{},{},{:.6},{:.6},{:.6},{:.6}",
            m.time,
            m.duration,
            m.epoch,
            m.train_loss,
            m.validation_loss,
            m.validation_mean,
            m.validation_median,
        )?;
        tracing::debug!(
            "Logged epoch {}: train_loss={:.4}, validation_loss={:.4}",
            m.epoch,
            m.train_loss,
            m.validation_loss,
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &PathBuf {
        &self.csv_path
    }
}

// ─── Per-step log ─────────────────────────────────────────────────────────────

/// One row of losses_{epoch}.csv
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StepRecord {
    /// Chunks seen so far this epoch
    pub chunks:    usize,
    /// Seconds since the epoch started
    pub time:      f64,
    pub grad_norm: f64,
    pub loss:      f64,
    pub lr:        f64,
}

/// Keeps losses_{epoch}.csv open for the length of an epoch.
pub struct StepLogger {
    file: fs::File,
}

impl StepLogger {
    pub fn create(dir: &Path, epoch: usize) -> Result<Self> {
        let file = open_csv(&dir.join(format!("losses_{epoch}.csv")), STEP_HEADER)?;
        Ok(Self { file })
    }

    pub fn append(&mut self, r: &StepRecord) -> Result<()> {
        writeln!(
            self.file,
            "{},{:.3},{:.6},{:.6},{:.8}",
            r.chunks, r.time, r.grad_norm, r.loss, r.lr
        )?;
        Ok(())
    }
}
