// ============================================================
// Layer 5 — Linear CRF Encoder
// ============================================================
// Projects features [time, batch, insize] to CRF transition
// scores. With n_base bases and a state_len history there are
// S = n_base^state_len k-mer states, each with n_base + 1
// incoming transitions (one stay, n_base moves), so the output
// width is S * (n_base + 1).
//
// With a fixed `blank_score` the stay transitions are not
// learned: the projection only produces the S * n_base move
// scores and the constant blank column is prepended to every
// state's group:
//
//   [T, N, S * n_base] → [T, N, S, n_base]
//                      → cat(blank, ·) → [T, N, S, n_base + 1]
//                      → [T, N, S * (n_base + 1)]

use burn::{
    module::Ignored,
    nn::{Linear, LinearConfig},
    prelude::*,
};
use serde::{Deserialize, Serialize};

use super::{
    activation::{maybe_activate, ActivationKind},
    export_linear, import_linear, visit_linear,
};
use crate::ml::{
    error::{ConstructionFailure, ModelResult},
    params::{ParamSet, ParamVisitor},
};

fn yes() -> bool { true }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearCrfEncoderConfig {
    pub insize:    usize,
    pub n_base:    usize,
    pub state_len: usize,
    #[serde(default = "yes")]
    pub bias:      bool,
    #[serde(default)]
    pub scale:     Option<f64>,
    #[serde(default)]
    pub activation:  Option<ActivationKind>,
    #[serde(default)]
    pub blank_score: Option<f64>,
}

impl LinearCrfEncoderConfig {
    pub fn new(insize: usize, n_base: usize, state_len: usize) -> Self {
        Self {
            insize,
            n_base,
            state_len,
            bias: true,
            scale: None,
            activation: None,
            blank_score: None,
        }
    }

    pub fn with_blank_score(mut self, blank_score: Option<f64>) -> Self {
        self.blank_score = blank_score;
        self
    }

    pub fn with_scale(mut self, scale: Option<f64>) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_activation(mut self, activation: Option<ActivationKind>) -> Self {
        self.activation = activation;
        self
    }

    /// Number of k-mer states.
    pub fn n_states(&self) -> usize {
        self.n_base.pow(self.state_len as u32)
    }

    /// Width of the linear projection.
    pub fn projection_size(&self) -> usize {
        match self.blank_score {
            Some(_) => self.n_states() * self.n_base,
            None    => self.n_states() * (self.n_base + 1),
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<LinearCrfEncoder<B>, ConstructionFailure> {
        if self.insize == 0 || self.n_base == 0 || self.state_len == 0 {
            return Err(ConstructionFailure::Invalid(
                "insize, n_base and state_len must be positive".into(),
            ));
        }
        let linear = LinearConfig::new(self.insize, self.projection_size())
            .with_bias(self.bias)
            .init(device);
        Ok(LinearCrfEncoder { linear, config: Ignored(self.clone()) })
    }
}

#[derive(Module, Debug)]
pub struct LinearCrfEncoder<B: Backend> {
    pub linear: Linear<B>,
    pub config: Ignored<LinearCrfEncoderConfig>,
}

impl<B: Backend> LinearCrfEncoder<B> {
    /// x: [time, batch, insize] → [time, batch, S * (n_base + 1)]
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let cfg = &self.config.0;
        let mut scores = maybe_activate(cfg.activation, self.linear.forward(x));
        if let Some(scale) = cfg.scale {
            scores = scores * scale;
        }
        match cfg.blank_score {
            None => scores,
            Some(blank) => {
                let [steps, batch, width] = scores.dims();
                let groups = width / cfg.n_base;
                let moves  = scores.reshape([steps, batch, groups, cfg.n_base]);
                let stay   = Tensor::<B, 4>::full([steps, batch, groups, 1], blank, &moves.device());
                Tensor::cat(vec![stay, moves], 3).reshape([steps, batch, groups * (cfg.n_base + 1)])
            }
        }
    }

    pub fn config(&self) -> LinearCrfEncoderConfig {
        self.config.0.clone()
    }

    pub fn export_params(&self) -> ModelResult<ParamSet> {
        export_linear(&self.linear)
    }

    pub fn import_params(mut self, params: &ParamSet, device: &B::Device) -> ModelResult<Self> {
        self.linear = import_linear(self.linear, params, device)?;
        Ok(self)
    }

    pub fn visit_params<V: ParamVisitor<B>>(&self, visitor: &mut V) {
        visit_linear(&self.linear, visitor);
    }
}
