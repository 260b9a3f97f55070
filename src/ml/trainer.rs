// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Epoch loop over Burn's DataLoader with AdamW:
//
//   INIT → (TRAIN → SAVE_CHECKPOINT → VALIDATE → LOG)* → STOP
//
// Every step:
//   1. forward + loss (CTC or CTC-CRF, per the model head)
//   2. backward on loss × scale (dynamic loss scaling)
//   3. global gradient norm; non-finite → skip the step
//   4. unscale and clip to a total norm of 2.0
//   5. AdamW update at the scheduled learning rate
//
// The interrupt flag is checked between batches, never inside
// one. An interrupted epoch writes no checkpoint and no log
// row; checkpoints from earlier epochs stay on disk.
//
// Key Burn 0.20 insight:
//   - Training uses MyBackend (Autodiff<Wgpu>) for gradients
//   - model.valid() returns the model on MyInnerBackend (Wgpu)
//   - Validation batches must also use MyInnerBackend
//   - Gradients live on the inner backend, keyed by ParamId
//
// Reference: Burn Book §5, Loshchilov & Hutter (2019) AdamW

use anyhow::Result;
use std::{
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};
use burn::{
    data::dataloader::DataLoaderBuilder,
    module::{AutodiffModule, Param},
    optim::{AdamWConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use indicatif::{ProgressBar, ProgressStyle};

use crate::application::train_use_case::TrainConfig;
use crate::data::{
    batcher::{ChunkBatch, ChunkBatcher},
    dataset::ChunkDataset,
};
use crate::domain::{
    alignment::{accuracy, balanced_accuracy, mean, median},
    chunk::ChunkSample,
};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::{EpochMetrics, MetricsLogger, StepLogger, StepRecord},
};
use crate::ml::{
    model::{BasecallModel, ModelConfig},
    params::ParamVisitor,
    scaler::GradScaler,
    scheduler::LrScheduler,
};

pub type MyBackend      = burn::backend::Autodiff<burn::backend::Wgpu>;
pub type MyInnerBackend = burn::backend::Wgpu;

pub const MAX_GRAD_NORM: f64 = 2.0;
pub const MIN_COVERAGE:  f64 = 0.5;
const WEIGHT_DECAY:      f32 = 0.01;

/// How a call to `fit` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitOutcome {
    Completed { last_epoch: usize },
    Interrupted { last_epoch: usize },
}

pub fn run_training(
    cfg:          &TrainConfig,
    model_cfg:    &ModelConfig,
    train:        ChunkDataset,
    valid:        ChunkDataset,
    ckpt_manager: &CheckpointManager,
    interrupt:    Arc<AtomicBool>,
) -> Result<FitOutcome> {
    let device = burn::backend::wgpu::WgpuDevice::default();
    tracing::info!("Using WGPU device: {:?}", device);

    let mut model: BasecallModel<MyBackend> = model_cfg.init(&device)?;

    // ── Pretrained weights, then our own latest checkpoint ───────────────────
    if let Some(dir) = &cfg.pretrained {
        let source = CheckpointManager::new(dir);
        let epoch = source.latest_epoch();
        if epoch > 0 {
            tracing::info!("Using pretrained weights from '{}' (epoch {})", dir.display(), epoch);
            model = source.load_and_align(epoch, model, &device)?;
        }
    }
    let last_epoch = ckpt_manager.latest_epoch();
    if last_epoch > 0 {
        println!("[picking up from epoch {last_epoch}]");
        model = ckpt_manager.load_and_align(last_epoch, model, &device)?;
    }

    fit(cfg, model, last_epoch, train, valid, ckpt_manager, interrupt, &device)
}

/// Train for `cfg.epochs` epochs after `last_epoch`.
#[allow(clippy::too_many_arguments)]
pub fn fit<B: AutodiffBackend>(
    cfg:          &TrainConfig,
    mut model:    BasecallModel<B>,
    last_epoch:   usize,
    train:        ChunkDataset,
    valid:        ChunkDataset,
    ckpt_manager: &CheckpointManager,
    interrupt:    Arc<AtomicBool>,
    device:       &B::Device,
) -> Result<FitOutcome> {
    let workdir   = ckpt_manager.dir();
    let n_train   = train.sample_count();
    let n_batches = train.batches(cfg.batch);

    // ── AdamW optimiser ───────────────────────────────────────────────────────
    // m = β1*m + (1-β1)*g
    // v = β2*v + (1-β2)*g²
    // θ = θ - lr * (m / (√v + ε) + λθ)
    let mut optim  = AdamWConfig::new().with_weight_decay(WEIGHT_DECAY).init();
    let scheduler  = LrScheduler::cosine(cfg.lr, cfg.epochs * n_batches, last_epoch * n_batches);
    let mut scaler = GradScaler::new(cfg.amp);
    let mut step   = 0usize;
    if scaler.is_enabled() {
        tracing::info!("Dynamic loss scaling on, initial scale {}", scaler.scale());
    }

    // ── Data loaders ──────────────────────────────────────────────────────────
    let train_loader = DataLoaderBuilder::<B, ChunkSample, ChunkBatch<B>>::new(ChunkBatcher)
        .batch_size(cfg.batch)
        .shuffle(cfg.seed)
        .num_workers(1)
        .set_device(device.clone())
        .build(train);

    let val_loader = DataLoaderBuilder::<B::InnerBackend, ChunkSample, ChunkBatch<B::InnerBackend>>::new(ChunkBatcher)
        .batch_size(cfg.batch)
        .num_workers(1)
        .set_device(device.clone())
        .build(valid);

    let metrics = MetricsLogger::new(workdir)?;

    // ── Epoch loop ────────────────────────────────────────────────────────────
    let mut completed = last_epoch;
    for epoch in last_epoch + 1..=last_epoch + cfg.epochs {
        if interrupt.load(Ordering::SeqCst) {
            return Ok(FitOutcome::Interrupted { last_epoch: completed });
        }

        // ── Training phase ────────────────────────────────────────────────────
        let started = Instant::now();
        let mut step_log = StepLogger::create(workdir, epoch)?;
        let progress = progress_bar(n_batches as u64);
        let mut smoothed: Option<f64> = None;
        let mut chunks = 0usize;

        for batch in train_loader.iter() {
            if interrupt.load(Ordering::SeqCst) {
                progress.abandon();
                tracing::warn!("Interrupted during epoch {}; no checkpoint written", epoch);
                return Ok(FitOutcome::Interrupted { last_epoch: completed });
            }
            chunks += batch.targets.len();

            let lr = scheduler.lr(step);
            let (next, loss, grad_norm) = train_step(model, batch, &mut optim, &mut scaler, lr);
            model = next;
            step += 1;

            smoothed = Some(match smoothed {
                Some(s) if loss.is_finite() => 0.01 * loss + 0.99 * s,
                Some(s)                     => s,
                None                        => loss,
            });
            step_log.append(&StepRecord {
                chunks,
                time: started.elapsed().as_secs_f64(),
                grad_norm,
                loss,
                lr,
            })?;

            progress.set_message(format!("[{chunks}/{n_train}] loss={:.4}", smoothed.unwrap_or(loss)));
            progress.inc(1);
        }
        progress.finish();
        drop(step_log);

        let train_loss = smoothed.unwrap_or(f64::NAN);
        let duration   = started.elapsed().as_secs();

        // ── Checkpoint ────────────────────────────────────────────────────────
        let path = ckpt_manager.save(&model, epoch)?;
        completed = epoch;
        tracing::info!("Checkpoint saved to '{}'", path.display());

        // ── Validation phase ──────────────────────────────────────────────────
        // model.valid() → BasecallModel<B::InnerBackend>, dropout disabled
        let model_valid = model.valid();
        let decoder     = model_valid.decoder();
        let mut losses   = Vec::new();
        let mut accs     = Vec::new();
        let mut balanced = Vec::new();

        for batch in val_loader.iter() {
            if interrupt.load(Ordering::SeqCst) {
                return Ok(FitOutcome::Interrupted { last_epoch: completed });
            }
            let scores = model_valid.forward(batch.signal);
            losses.push(model_valid.loss(scores.clone(), &batch.targets).into_scalar().elem::<f64>());

            let calls = decoder.decode_batch(scores)?;
            for (call, target) in calls.iter().zip(&batch.targets) {
                let reference = model_valid.alphabet().decode_labels(target);
                if call.is_empty() {
                    accs.push(0.0);
                    balanced.push(0.0);
                } else {
                    accs.push(accuracy(&reference, call, MIN_COVERAGE));
                    balanced.push(balanced_accuracy(&reference, call, MIN_COVERAGE));
                }
            }
        }

        let val_loss   = mean(&losses);
        let val_mean   = mean(&accs);
        let val_median = median(&accs);

        println!(
            "[epoch {}] directory={} loss={:.4} mean_acc={:.3}% median_acc={:.3}%",
            epoch,
            workdir.display(),
            val_loss,
            val_mean * 100.0,
            val_median * 100.0,
        );

        tracing::info!("Balanced validation accuracy {:.3}%", mean(&balanced) * 100.0);

        metrics.log(&EpochMetrics::new(epoch, duration, train_loss, val_loss, val_mean, val_median))?;
    }

    tracing::info!("Training complete!");
    Ok(FitOutcome::Completed { last_epoch: completed })
}

/// One optimiser step. Returns the updated model, the unscaled
/// loss and the unscaled gradient norm before clipping.
fn train_step<B, O>(
    model:  BasecallModel<B>,
    batch:  ChunkBatch<B>,
    optim:  &mut O,
    scaler: &mut GradScaler,
    lr:     f64,
) -> (BasecallModel<B>, f64, f64)
where
    B: AutodiffBackend,
    O: Optimizer<BasecallModel<B>, B>,
{
    let scores = model.forward(batch.signal);
    let loss   = model.loss(scores, &batch.targets);
    let loss_value: f64 = loss.clone().into_scalar().elem();

    let scale = scaler.scale();
    let grads = loss.mul_scalar(scale).backward();
    let mut grads = GradientsParams::from_grads(grads, &model);

    let mut norm = GradNorm::<B>::new(&grads);
    model.visit_params(&mut norm);
    let grad_norm = norm.total() / scale;

    if !scaler.update(grad_norm.is_finite() && loss_value.is_finite()) {
        tracing::debug!("Skipping step with non-finite gradients");
        return (model, loss_value, grad_norm);
    }

    // ── Unscale + clip in one pass ────────────────────────────────────────────
    let clip   = if grad_norm > MAX_GRAD_NORM { MAX_GRAD_NORM / (grad_norm + 1e-6) } else { 1.0 };
    let factor = clip / scale;
    if factor != 1.0 {
        let mut rescale = ScaleGrads::<B>::new(&mut grads, factor);
        model.visit_params(&mut rescale);
    }

    (optim.step(lr, model, grads), loss_value, grad_norm)
}

fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} {bar:40.cyan/blue} {pos}/{len} [{elapsed_precise}]")
            .map(|s| s.progress_chars("##-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}

// ─── Gradient visitors ────────────────────────────────────────────────────────

/// Accumulates the global L2 norm of all gradients.
struct GradNorm<'a, B: AutodiffBackend> {
    grads:  &'a GradientsParams,
    sum_sq: f64,
    _b:     PhantomData<B>,
}

impl<'a, B: AutodiffBackend> GradNorm<'a, B> {
    fn new(grads: &'a GradientsParams) -> Self {
        Self { grads, sum_sq: 0.0, _b: PhantomData }
    }

    fn total(&self) -> f64 {
        self.sum_sq.sqrt()
    }
}

impl<B: AutodiffBackend> ParamVisitor<B> for GradNorm<'_, B> {
    fn visit<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        if let Some(g) = self.grads.get::<B::InnerBackend, D>(param.id) {
            self.sum_sq += (g.clone() * g).sum().into_scalar().elem::<f64>();
        }
    }
}

/// Multiplies every gradient by a constant.
struct ScaleGrads<'a, B: AutodiffBackend> {
    grads:  &'a mut GradientsParams,
    factor: f64,
    _b:     PhantomData<B>,
}

impl<'a, B: AutodiffBackend> ScaleGrads<'a, B> {
    fn new(grads: &'a mut GradientsParams, factor: f64) -> Self {
        Self { grads, factor, _b: PhantomData }
    }
}

impl<B: AutodiffBackend> ParamVisitor<B> for ScaleGrads<'_, B> {
    fn visit<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        if let Some(g) = self.grads.remove::<B::InnerBackend, D>(param.id) {
            self.grads.register(param.id, g.mul_scalar(self.factor));
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use burn::{
        backend::{Autodiff, NdArray},
        data::dataloader::batcher::Batcher,
    };
    use serde_json::json;

    use crate::domain::alphabet::Alphabet;
    use crate::ml::model::HeadConfig;

    type TestBackend = Autodiff<NdArray>;

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            model:   HeadConfig::Crf { state_len: 1 },
            labels:  Alphabet::default(),
            encoder: json!({
                "type": "serial",
                "sublayers": [
                    { "type": "convolution", "insize": 1, "size": 4, "winlen": 3, "padding": 1, "activation": "tanh" },
                    { "type": "permute", "dims": [2, 0, 1] },
                    { "type": "linearcrfencoder", "insize": 4, "n_base": 4, "state_len": 1 }
                ]
            }),
            extra:   Default::default(),
        }
    }

    fn samples(n: usize) -> Vec<ChunkSample> {
        (0..n)
            .map(|i| {
                let signal = (0..12).map(|t| ((t + i) as f32 * 0.7).sin()).collect();
                ChunkSample::new(signal, vec![1, 2, 3, 4, 0], 4)
            })
            .collect()
    }

    fn chunks(n: usize) -> ChunkDataset {
        ChunkDataset::new(samples(n))
    }

    fn train_config(workdir: &Path, epochs: usize) -> TrainConfig {
        TrainConfig {
            training_directory: workdir.to_path_buf(),
            epochs,
            batch: 2,
            ..TrainConfig::default()
        }
    }

    #[test]
    fn test_fit_writes_checkpoints_and_logs() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let cfg = train_config(dir.path(), 2);
        let manager = CheckpointManager::new(dir.path());
        let model = tiny_config().init::<TestBackend>(&device).unwrap();

        let outcome = fit(
            &cfg, model, 0, chunks(4), chunks(2), &manager,
            Arc::new(AtomicBool::new(false)), &device,
        )
        .unwrap();

        assert_eq!(outcome, FitOutcome::Completed { last_epoch: 2 });
        assert_eq!(manager.latest_epoch(), 2);
        assert!(dir.path().join("losses_1.csv").exists());
        let log = std::fs::read_to_string(dir.path().join("training.csv")).unwrap();
        assert_eq!(log.lines().count(), 3);
    }

    #[test]
    fn test_interrupt_writes_no_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let cfg = train_config(dir.path(), 3);
        let manager = CheckpointManager::new(dir.path());
        let model = tiny_config().init::<TestBackend>(&device).unwrap();

        let outcome = fit(
            &cfg, model, 0, chunks(4), chunks(2), &manager,
            Arc::new(AtomicBool::new(true)), &device,
        )
        .unwrap();

        assert_eq!(outcome, FitOutcome::Interrupted { last_epoch: 0 });
        assert_eq!(manager.latest_epoch(), 0);
    }

    #[test]
    fn test_resumed_fit_continues_epoch_numbering() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let cfg = train_config(dir.path(), 1);
        let manager = CheckpointManager::new(dir.path());
        let model = tiny_config().init::<TestBackend>(&device).unwrap();
        manager.save(&model, 3).unwrap();

        let model = manager.load_and_align(3, model, &device).unwrap();
        let outcome = fit(
            &cfg, model, 3, chunks(4), chunks(2), &manager,
            Arc::new(AtomicBool::new(false)), &device,
        )
        .unwrap();
        assert_eq!(outcome, FitOutcome::Completed { last_epoch: 4 });
        assert!(manager.weights_path(4).exists());
    }

    #[test]
    fn test_clipping_bounds_the_update() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device).unwrap();
        let before = model.export_params().unwrap();

        let batch: ChunkBatch<TestBackend> = ChunkBatcher.batch(samples(2), &device);
        let mut optim = AdamWConfig::new().init();
        let mut scaler = GradScaler::new(true);
        let (after, loss, norm) = train_step(model, batch, &mut optim, &mut scaler, 1e-3);

        assert!(loss.is_finite() && loss > 0.0);
        assert!(norm.is_finite() && norm > 0.0);
        assert_ne!(after.export_params().unwrap(), before);
    }
}
