// ============================================================
// Layer 5 — LSTM
// ============================================================
// A single-layer, single-direction LSTM over [time, batch, C].
// Setting `reverse` runs it right-to-left by flipping time on
// the way in and out, which is how bidirectional stacks are
// built from alternating layers.
//
// Gate order follows the usual convention: input, forget,
// cell candidate, output.
//
//   i = σ(x·Wi + h·Ui + b_i)
//   f = σ(x·Wf + h·Uf + b_f)
//   g = tanh(x·Wg + h·Ug + b_g)
//   o = σ(x·Wo + h·Uo + b_o)
//   c' = f⊙c + i⊙g
//   h' = o⊙tanh(c')
//
// Weights are held as matmul-ready [in, 4H] / [H, 4H] and
// converted to the canonical iW [4, H, I], sW [4, H, H],
// b [4, H] only at the serialisation boundary.
//
// Initialisation: each gate's [H, I] and [H, H] block is an
// independent (semi-)orthogonal matrix, and the bias is drawn
// from 0.5 * N(0, 1) truncated to ±2. There is one bias per
// gate only; the recurrent path carries no bias of its own.
//
// Reference: Hochreiter & Schmidhuber (1997)

use burn::{
    module::{Ignored, Param},
    nn::Initializer,
    prelude::*,
    tensor::{
        activation::{sigmoid, tanh},
        Distribution,
    },
};
use serde::{Deserialize, Serialize};

use crate::ml::{
    error::{ConstructionFailure, ModelResult},
    params::{ParamSet, ParamTensor, ParamVisitor},
};

fn yes() -> bool { true }

const GATES: usize = 4;
/// Draws per value before falling back to clamping.
const RESAMPLE: usize = 5;
const TRUNCATE: f64 = 2.0;
const BIAS_SCALE: f64 = 0.5;

/// [in, 4H] with every gate's [H, in] block orthogonal.
fn orthogonal_gates<B: Backend>(hidden: usize, insize: usize, device: &B::Device) -> Tensor<B, 2> {
    let blocks: Vec<Tensor<B, 2>> = (0..GATES)
        .map(|_| {
            Initializer::Orthogonal { gain: 1.0 }
                .init::<B, 2, _>([hidden, insize], device)
                .into_value()
                .transpose()
        })
        .collect();
    Tensor::cat(blocks, 1)
}

/// N(0, 1) truncated to ±2: the first of a few draws that
/// lands inside the bounds, clamped if none does.
fn truncated_normal<B: Backend>(size: usize, device: &B::Device) -> Tensor<B, 1> {
    let draws = Tensor::<B, 2>::random([size, RESAMPLE], Distribution::Normal(0.0, 1.0), device);
    let inside = draws.clone().abs().lower_elem(TRUNCATE).int();
    let first = inside.argmax(1);
    draws
        .gather(1, first)
        .clamp(-TRUNCATE, TRUNCATE)
        .reshape([size])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmConfig {
    /// Hidden size H
    pub size:    usize,
    /// Input size I
    pub insize:  usize,
    #[serde(default = "yes")]
    pub bias:    bool,
    #[serde(default)]
    pub reverse: bool,
}

impl LstmConfig {
    pub fn new(size: usize, insize: usize) -> Self {
        Self { size, insize, bias: true, reverse: false }
    }

    pub fn with_reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Lstm<B>, ConstructionFailure> {
        if self.size == 0 || self.insize == 0 {
            return Err(ConstructionFailure::Invalid("size and insize must be positive".into()));
        }
        let gates = GATES * self.size;
        Ok(Lstm {
            input_weight: Param::from_tensor(orthogonal_gates(self.size, self.insize, device)),
            state_weight: Param::from_tensor(orthogonal_gates(self.size, self.size, device)),
            bias:         self
                .bias
                .then(|| Param::from_tensor(truncated_normal(gates, device) * BIAS_SCALE)),
            config:       Ignored(self.clone()),
        })
    }
}

#[derive(Module, Debug)]
pub struct Lstm<B: Backend> {
    /// [I, 4H]
    pub input_weight: Param<Tensor<B, 2>>,
    /// [H, 4H]
    pub state_weight: Param<Tensor<B, 2>>,
    /// [4H]
    pub bias:         Option<Param<Tensor<B, 1>>>,
    pub config:       Ignored<LstmConfig>,
}

impl<B: Backend> Lstm<B> {
    /// x: [time, batch, insize] → [time, batch, size]
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let cfg = &self.config.0;
        let [steps, batch, insize] = x.dims();
        let hidden = cfg.size;
        let device = x.device();

        let x = if cfg.reverse { x.flip([0]) } else { x };

        // Input projection for every step at once
        let mut xw = x.reshape([steps * batch, insize]).matmul(self.input_weight.val());
        if let Some(b) = &self.bias {
            xw = xw + b.val().unsqueeze::<2>();
        }
        let xw = xw.reshape([steps, batch, 4 * hidden]);

        let state_weight = self.state_weight.val();
        let mut h = Tensor::<B, 2>::zeros([batch, hidden], &device);
        let mut c = Tensor::<B, 2>::zeros([batch, hidden], &device);
        let mut outputs = Vec::with_capacity(steps);

        for t in 0..steps {
            let gates = xw
                .clone()
                .slice([t..t + 1, 0..batch, 0..4 * hidden])
                .reshape([batch, 4 * hidden])
                + h.clone().matmul(state_weight.clone());

            let gate = |k: usize| gates.clone().slice([0..batch, k * hidden..(k + 1) * hidden]);

            c = sigmoid(gate(1)) * c + sigmoid(gate(0)) * tanh(gate(2));
            h = sigmoid(gate(3)) * tanh(c.clone());
            outputs.push(h.clone());
        }

        let y = Tensor::stack::<3>(outputs, 0);
        if cfg.reverse { y.flip([0]) } else { y }
    }

    pub fn config(&self) -> LstmConfig {
        self.config.0.clone()
    }

    pub fn export_params(&self) -> ModelResult<ParamSet> {
        let (h, i) = (self.config.size, self.config.insize);
        let mut params = ParamSet::new();
        params.insert(
            "iW",
            ParamTensor::from_param(&self.input_weight)?.transpose()?.reshape(vec![4, h, i])?,
        );
        params.insert(
            "sW",
            ParamTensor::from_param(&self.state_weight)?.transpose()?.reshape(vec![4, h, h])?,
        );
        params.insert(
            "b",
            match &self.bias {
                Some(b) => ParamTensor::from_param(b)?.reshape(vec![4, h])?,
                None    => ParamTensor::empty(),
            },
        );
        Ok(params)
    }

    pub fn import_params(mut self, params: &ParamSet, device: &B::Device) -> ModelResult<Self> {
        let (h, i) = (self.config.size, self.config.insize);
        self.input_weight = params
            .require("iW")?
            .clone()
            .reshape(vec![4 * h, i])?
            .transpose()?
            .to_param(device)?;
        self.state_weight = params
            .require("sW")?
            .clone()
            .reshape(vec![4 * h, h])?
            .transpose()?
            .to_param(device)?;
        if self.bias.is_some() {
            self.bias = Some(params.require("b")?.clone().reshape(vec![4 * h])?.to_param(device)?);
        }
        Ok(self)
    }

    pub fn visit_params<V: ParamVisitor<B>>(&self, visitor: &mut V) {
        visitor.visit(&self.input_weight);
        visitor.visit(&self.state_weight);
        if let Some(b) = &self.bias {
            visitor.visit(b);
        }
    }
}
