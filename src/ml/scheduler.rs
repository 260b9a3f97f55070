// ============================================================
// Layer 5 — Learning Rate Schedules
// ============================================================
// A schedule maps training progress t ∈ [0, 1] to a multiplier
// of the base learning rate. Schedules compose: `Piecewise`
// stitches several together at knot points, each piece seeing
// its own local progress in [0, 1].
//
//   const(y)            y
//   linear(y0, y1)      y0 + (y1 - y0)·t
//   cosine_decay(y0,y1) y1 + ½(y0 - y1)(1 + cos πt)
//
// The training schedule is cosine decay 1.0 → 0.1 with a
// linear warm-up from 0.1× over the first 500 steps:
//
//   lr(step) = base_lr · f((step + start_step) / total_steps)
//
// start_step lets a resumed run continue the curve where the
// previous run left off.

use std::f64::consts::PI;

pub trait Schedule: Send + Sync {
    fn at(&self, t: f64) -> f64;
}

// ─── Building blocks ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Constant(pub f64);

impl Schedule for Constant {
    fn at(&self, _t: f64) -> f64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Linear {
    pub y0: f64,
    pub y1: f64,
}

impl Schedule for Linear {
    fn at(&self, t: f64) -> f64 {
        self.y0 + (self.y1 - self.y0) * t
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CosineDecay {
    pub y0: f64,
    pub y1: f64,
}

impl Schedule for CosineDecay {
    fn at(&self, t: f64) -> f64 {
        self.y1 + 0.5 * (self.y0 - self.y1) * ((t * PI).cos() + 1.0)
    }
}

/// `pieces[i]` covers [knots[i-1], knots[i]), with 0 and 1 as
/// the implicit outer knots. Needs knots.len() + 1 pieces.
pub struct Piecewise {
    knots:  Vec<f64>,
    pieces: Vec<Box<dyn Schedule>>,
}

impl Schedule for Piecewise {
    fn at(&self, t: f64) -> f64 {
        // first knot ≥ t (left-side search)
        let i = self.knots.partition_point(|&k| k < t);
        let t0 = if i == 0 { 0.0 } else { self.knots[i - 1] };
        let t1 = self.knots.get(i).copied().unwrap_or(1.0);
        let local = if t1 > t0 { (t - t0) / (t1 - t0) } else { 0.0 };
        self.pieces[i].at(local)
    }
}

// ─── Step scheduler ───────────────────────────────────────────────────────────

pub const WARMUP_STEPS: usize = 500;
pub const WARMUP_RATIO: f64   = 0.1;

/// Turns an optimiser step count into a learning rate.
pub struct LrScheduler {
    base_lr:     f64,
    total_steps: usize,
    start_step:  usize,
    func:        Box<dyn Schedule>,
}

impl LrScheduler {
    /// Wrap `func` with a linear warm-up from `warmup_ratio · func(0)`.
    pub fn new(
        base_lr:      f64,
        func:         Box<dyn Schedule>,
        total_steps:  usize,
        warmup_steps: usize,
        warmup_ratio: f64,
        start_step:   usize,
    ) -> Self {
        let total_steps = total_steps.max(1);
        let func: Box<dyn Schedule> = if warmup_steps > 0 {
            let y0 = func.at(0.0);
            let warmup: Box<dyn Schedule> = Box::new(Linear { y0: warmup_ratio * y0, y1: y0 });
            let knot = warmup_steps as f64 / total_steps as f64;
            Box::new(Piecewise { knots: vec![knot], pieces: vec![warmup, func] })
        } else {
            func
        };
        Self { base_lr, total_steps, start_step, func }
    }

    /// Cosine 1.0 → 0.1 with the standard warm-up.
    pub fn cosine(base_lr: f64, total_steps: usize, start_step: usize) -> Self {
        Self::new(
            base_lr,
            Box::new(CosineDecay { y0: 1.0, y1: 0.1 }),
            total_steps,
            WARMUP_STEPS,
            WARMUP_RATIO,
            start_step,
        )
    }

    pub fn lr(&self, step: usize) -> f64 {
        let t = (step + self.start_step) as f64 / self.total_steps as f64;
        self.base_lr * self.func.at(t)
    }
}
