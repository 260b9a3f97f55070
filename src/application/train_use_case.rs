// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates a training run in order:
//
//   Step 1: Guard the workdir          (Layer 2)
//   Step 2: Choose the model config    (Layer 6 - infra)
//   Step 3: Load chunk datasets        (Layer 4 - data)
//   Step 4: Split train/validation     (Layer 4 - data)
//   Step 5: Save configs               (Layer 6 - infra)
//   Step 6: Install Ctrl-C handler     (Layer 2)
//   Step 7: Run training loop          (Layer 5 - ml)
//
// Re-running with --force on an existing workdir resumes from
// its latest checkpoint.
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Burn Book §5 (Training)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::data::{
    dataset::ChunkDataset,
    loader::JsonChunkLoader,
    splitter::{split_train_val, TRAIN_FRACTION},
};
use crate::domain::{chunk::ChunkSample, traits::ChunkSource};
use crate::infra::checkpoint::{self, CheckpointManager};
use crate::ml::{
    model::ModelConfig,
    trainer::{run_training, FitOutcome},
};

const TRAIN_CONFIG_FILE: &str = "train_config.json";

// ─── Training Configuration ──────────────────────────────────────────────────
// All options for a training run. Serialisable so it can be stored
// next to the checkpoints and merged into config.json as `training`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub training_directory: PathBuf,
    pub config:             Option<PathBuf>,
    pub pretrained:         Option<PathBuf>,
    pub directory:          PathBuf,
    pub lr:                 f64,
    pub seed:               u64,
    pub epochs:             usize,
    pub batch:              usize,
    /// 0 loads every chunk
    pub chunks:             usize,
    pub amp:                bool,
    pub force:              bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            training_directory: PathBuf::from("training"),
            config:             None,
            pretrained:         None,
            directory:          PathBuf::from("data"),
            lr:                 2e-3,
            seed:               25,
            epochs:             5,
            batch:              64,
            chunks:             0,
            amp:                true,
            force:              false,
        }
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<FitOutcome> {
        let cfg     = &self.config;
        let workdir = &cfg.training_directory;

        // ── Step 1: Refuse to clobber an existing run ────────────────────────
        if workdir.exists() && !cfg.force {
            bail!(
                "Training directory '{}' already exists; use --force to resume or overwrite",
                workdir.display()
            );
        }

        // ── Step 2: Model config, whose alphabet the chunks must use ─────────
        let mut model_cfg = select_model_config(cfg)?;

        // ── Steps 3 + 4: Chunks, with a held-out tail if needed ──────────────
        let (train_samples, val_samples) =
            load_datasets(&cfg.directory, cfg.chunks, model_cfg.labels.n_base())?;
        tracing::info!(
            "Loaded {} training and {} validation chunks",
            train_samples.len(),
            val_samples.len()
        );
        if train_samples.is_empty() {
            bail!("No training chunks found in '{}'", cfg.directory.display());
        }

        // ── Step 5: Workdir and configs ──────────────────────────────────────
        fs::create_dir_all(workdir)
            .with_context(|| format!("Cannot create '{}'", workdir.display()))?;
        let ckpt_manager = CheckpointManager::new(workdir);
        model_cfg
            .extra
            .insert("training".into(), serde_json::to_value(cfg)?);
        ckpt_manager.save_config(&model_cfg)?;
        fs::write(workdir.join(TRAIN_CONFIG_FILE), serde_json::to_string_pretty(cfg)?)
            .context("Cannot write train_config.json")?;

        // ── Step 6: Ctrl-C stops at the next batch boundary ──────────────────
        let interrupt = Arc::new(AtomicBool::new(false));
        let flag      = Arc::clone(&interrupt);
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
            tracing::warn!("Cannot install Ctrl-C handler: {}", e);
        }

        // ── Step 7: Training loop (Layer 5) ──────────────────────────────────
        let outcome = run_training(
            cfg,
            &model_cfg,
            ChunkDataset::new(train_samples),
            ChunkDataset::new(val_samples),
            &ckpt_manager,
            interrupt,
        )?;
        Ok(outcome)
    }
}

/// Training chunks from `dir`, with validation from `dir/validation`
/// when present, else the tail of the training set.
fn load_datasets(
    dir:    &Path,
    limit:  usize,
    n_base: usize,
) -> Result<(Vec<ChunkSample>, Vec<ChunkSample>)> {
    let samples = JsonChunkLoader::new(dir).with_n_base(n_base).load_chunks(limit)?;
    let val_dir = dir.join("validation");
    if val_dir.is_dir() {
        let valid = JsonChunkLoader::new(&val_dir).with_n_base(n_base).load_chunks(0)?;
        Ok((samples, valid))
    } else {
        Ok(split_train_val(samples, TRAIN_FRACTION))
    }
}

/// A pretrained run's config wins, then --config, then the built-in model.
fn select_model_config(cfg: &TrainConfig) -> Result<ModelConfig> {
    if let Some(dir) = &cfg.pretrained {
        tracing::info!("Using config from pretrained model '{}'", dir.display());
        return CheckpointManager::new(dir).load_config();
    }
    if let Some(path) = &cfg.config {
        tracing::info!("Using model config '{}'", path.display());
        return checkpoint::load_config(path);
    }
    tracing::info!("Using the built-in model config");
    Ok(ModelConfig::builtin())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::write_chunks;

    fn sample(i: usize) -> ChunkSample {
        ChunkSample::new(vec![i as f32; 8], vec![1, 2, 0], 2)
    }

    #[test]
    fn test_existing_workdir_refused_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig {
            training_directory: dir.path().to_path_buf(),
            ..TrainConfig::default()
        };
        let err = TrainUseCase::new(cfg).execute().unwrap_err();
        assert!(err.to_string().contains("--force"));
    }

    #[test]
    fn test_tail_split_without_validation_dir() {
        let dir     = tempfile::tempdir().unwrap();
        let samples: Vec<_> = (0..100).map(sample).collect();
        write_chunks(dir.path(), &samples).unwrap();

        let (train, valid) = load_datasets(dir.path(), 0, 4).unwrap();
        assert_eq!(train.len(), 97);
        assert_eq!(valid.len(), 3);
        assert_eq!(valid[0].signal[0], 97.0);
    }

    #[test]
    fn test_validation_dir_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let train: Vec<_> = (0..10).map(sample).collect();
        write_chunks(dir.path(), &train).unwrap();
        let val_dir = dir.path().join("validation");
        fs::create_dir(&val_dir).unwrap();
        write_chunks(&val_dir, &[sample(42)]).unwrap();

        let (train, valid) = load_datasets(dir.path(), 4, 4).unwrap();
        assert_eq!(train.len(), 4);
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].signal[0], 42.0);
    }

    #[test]
    fn test_model_config_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig::default();
        assert_eq!(select_model_config(&cfg).unwrap().model, ModelConfig::builtin().model);

        let mut custom = ModelConfig::builtin();
        custom.model   = crate::ml::model::HeadConfig::Ctc;
        CheckpointManager::new(dir.path()).save_config(&custom).unwrap();

        let cfg = TrainConfig {
            config: Some(dir.path().join("config.json")),
            ..TrainConfig::default()
        };
        assert_eq!(select_model_config(&cfg).unwrap().model, custom.model);

        let cfg = TrainConfig {
            pretrained: Some(dir.path().to_path_buf()),
            ..TrainConfig::default()
        };
        assert_eq!(select_model_config(&cfg).unwrap().model, custom.model);
    }
}
