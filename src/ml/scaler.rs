// ============================================================
// Layer 5 — Dynamic Loss Scaling
// ============================================================
// The loss is multiplied by `scale` before backward so small
// gradients survive reduced-precision arithmetic, and the
// gradients are divided by it again before clipping.
//
//   non-finite gradients → skip the step, scale *= 0.5
//   2000 clean steps     → scale *= 2
//
// Disabled, the scale is fixed at 1 and every step is taken.

const INIT_SCALE:      f64   = 65536.0;
const GROWTH_FACTOR:   f64   = 2.0;
const BACKOFF_FACTOR:  f64   = 0.5;
const GROWTH_INTERVAL: usize = 2000;

#[derive(Debug, Clone)]
pub struct GradScaler {
    enabled:     bool,
    scale:       f64,
    clean_steps: usize,
}

impl GradScaler {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, scale: INIT_SCALE, clean_steps: 0 }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn scale(&self) -> f64 {
        if self.enabled { self.scale } else { 1.0 }
    }

    /// Record the outcome of a step. Returns whether the
    /// optimiser should apply it.
    pub fn update(&mut self, grads_finite: bool) -> bool {
        if !self.enabled {
            return grads_finite;
        }
        if grads_finite {
            self.clean_steps += 1;
            if self.clean_steps == GROWTH_INTERVAL {
                self.scale *= GROWTH_FACTOR;
                self.clean_steps = 0;
            }
        } else {
            self.scale *= BACKOFF_FACTOR;
            self.clean_steps = 0;
            tracing::debug!("Non-finite gradients, loss scale backed off to {}", self.scale);
        }
        grads_finite
    }
}
