// ============================================================
// Layer 5 — Convolution
// ============================================================
// 1-D convolution over [batch, channels, time] with an
// optional activation. Weights are kept in the canonical
// [out, in, winlen] layout so no conversion is needed when
// serialising.
//
// Reference: Burn Book §3 (Modules)

use burn::{
    module::{Ignored, Param},
    nn::Initializer,
    prelude::*,
    tensor::{module::conv1d, ops::ConvOptions},
};
use serde::{Deserialize, Serialize};

use super::activation::{maybe_activate, ActivationKind};
use crate::ml::{
    error::{ConstructionFailure, ModelResult},
    params::{ParamSet, ParamTensor, ParamVisitor},
};

fn one() -> usize { 1 }
fn yes() -> bool { true }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvolutionConfig {
    pub insize:  usize,
    pub size:    usize,
    pub winlen:  usize,
    #[serde(default = "one")]
    pub stride:  usize,
    #[serde(default)]
    pub padding: usize,
    #[serde(default = "yes")]
    pub bias:    bool,
    #[serde(default)]
    pub activation: Option<ActivationKind>,
}

impl ConvolutionConfig {
    pub fn new(insize: usize, size: usize, winlen: usize) -> Self {
        Self { insize, size, winlen, stride: 1, padding: 0, bias: true, activation: None }
    }

    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_activation(mut self, activation: Option<ActivationKind>) -> Self {
        self.activation = activation;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Convolution<B>, ConstructionFailure> {
        if self.insize == 0 || self.size == 0 || self.winlen == 0 || self.stride == 0 {
            return Err(ConstructionFailure::Invalid(
                "insize, size, winlen and stride must be positive".into(),
            ));
        }
        let fan_in = self.insize * self.winlen;
        let weight = Initializer::KaimingUniform { gain: 1.0 / 3f64.sqrt(), fan_out_only: false }
            .init_with([self.size, self.insize, self.winlen], Some(fan_in), Some(self.size * self.winlen), device);
        let bound = 1.0 / (fan_in as f64).sqrt();
        let bias = self
            .bias
            .then(|| Initializer::Uniform { min: -bound, max: bound }.init([self.size], device));

        Ok(Convolution { weight, bias, config: Ignored(self.clone()) })
    }
}

#[derive(Module, Debug)]
pub struct Convolution<B: Backend> {
    /// [out, in, winlen]
    pub weight: Param<Tensor<B, 3>>,
    pub bias:   Option<Param<Tensor<B, 1>>>,
    pub config: Ignored<ConvolutionConfig>,
}

impl<B: Backend> Convolution<B> {
    /// x: [batch, insize, time] → [batch, size, time']
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let cfg = &self.config.0;
        let out = conv1d(
            x,
            self.weight.val(),
            self.bias.as_ref().map(|b| b.val()),
            ConvOptions::new([cfg.stride], [cfg.padding], [1], 1),
        );
        maybe_activate(cfg.activation, out)
    }

    pub fn config(&self) -> ConvolutionConfig {
        self.config.0.clone()
    }

    pub fn export_params(&self) -> ModelResult<ParamSet> {
        let mut params = ParamSet::new();
        params.insert("W", ParamTensor::from_param(&self.weight)?);
        params.insert(
            "b",
            match &self.bias {
                Some(b) => ParamTensor::from_param(b)?,
                None    => ParamTensor::empty(),
            },
        );
        Ok(params)
    }

    pub fn import_params(mut self, params: &ParamSet, device: &B::Device) -> ModelResult<Self> {
        self.weight = params.require("W")?.to_param(device)?;
        if self.bias.is_some() {
            self.bias = Some(params.require("b")?.to_param(device)?);
        }
        Ok(self)
    }

    pub fn visit_params<V: ParamVisitor<B>>(&self, visitor: &mut V) {
        visitor.visit(&self.weight);
        if let Some(b) = &self.bias {
            visitor.visit(b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_output_length() {
        let device = Default::default();
        let conv = ConvolutionConfig::new(1, 4, 5)
            .with_stride(2)
            .with_padding(2)
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::<TestBackend, 3>::zeros([3, 1, 20], &device);
        // (20 + 2*2 - 5) / 2 + 1 = 10
        assert_eq!(conv.forward(x).dims(), [3, 4, 10]);
    }

    #[test]
    fn test_params_canonical_shape() {
        let device = Default::default();
        let conv = ConvolutionConfig::new(2, 3, 4).init::<TestBackend>(&device).unwrap();
        let params = conv.export_params().unwrap();
        assert_eq!(params.get("W").unwrap().shape, vec![3, 2, 4]);
        assert_eq!(params.get("b").unwrap().shape, vec![3]);
    }

    #[test]
    fn test_disabled_bias_exports_empty() {
        let device = Default::default();
        let mut cfg = ConvolutionConfig::new(2, 3, 4);
        cfg.bias = false;
        let conv = cfg.init::<TestBackend>(&device).unwrap();
        assert!(conv.export_params().unwrap().get("b").unwrap().is_empty());
    }

    #[test]
    fn test_zero_size_rejected() {
        let device = Default::default();
        assert!(ConvolutionConfig::new(0, 3, 4).init::<TestBackend>(&device).is_err());
    }
}
