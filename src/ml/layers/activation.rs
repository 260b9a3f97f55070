// ============================================================
// Layer 5 — Activations
// ============================================================
// Parameter-free element-wise layers. They appear both as
// standalone layer nodes ("relu", "tanh", "swish") and as the
// optional `activation` field of convolution and CRF encoder
// layers, where they are serialised by name.

use burn::{
    prelude::*,
    tensor::activation::{relu, silu, tanh},
};
use serde::{Deserialize, Serialize};

/// Activation names as they appear in model documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationKind {
    Relu,
    Tanh,
    Swish,
}

impl ActivationKind {
    pub fn apply<B: Backend, const D: usize>(self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            ActivationKind::Relu  => relu(x),
            ActivationKind::Tanh  => tanh(x),
            ActivationKind::Swish => silu(x),
        }
    }
}

/// Apply an optional activation.
pub fn maybe_activate<B: Backend, const D: usize>(
    activation: Option<ActivationKind>,
    x:          Tensor<B, D>,
) -> Tensor<B, D> {
    match activation {
        Some(kind) => kind.apply(x),
        None       => x,
    }
}

#[derive(Module, Clone, Debug, Default)]
pub struct Relu;

#[derive(Module, Clone, Debug, Default)]
pub struct Tanh;

/// x * sigmoid(x), also known as SiLU.
#[derive(Module, Clone, Debug, Default)]
pub struct Swish;

impl Relu {
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        relu(x)
    }
}

impl Tanh {
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        tanh(x)
    }
}

impl Swish {
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        silu(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_activation_names() {
        let json = serde_json::to_string(&Some(ActivationKind::Swish)).unwrap();
        assert_eq!(json, "\"swish\"");
        let none: Option<ActivationKind> = serde_json::from_str("null").unwrap();
        assert_eq!(none, None);
    }

    #[test]
    fn test_swish_at_zero() {
        let device = Default::default();
        let x = Tensor::<NdArray, 1>::from_floats([0.0, 1.0], &device);
        let y: Vec<f32> = Swish.forward(x).into_data().to_vec().unwrap();
        assert_eq!(y[0], 0.0);
        assert!((y[1] - 0.7310586).abs() < 1e-6);
    }
}
