// ============================================================
// Layer 5 — Attention Blocks
// ============================================================
// The single-headed attention block (SHA-RNN style) and its
// building blocks. All of them work on [time, batch, dim],
// matching the LSTM layers they are interleaved with.
//
//   ShaBlock:
//     kv = norm_kv(x);  q = norm_q(x)
//     x  = attn(q, kv) + x
//     x  = ff(x) + x
//
//   attn is Sha for one head, Mha (64-wide heads) for more.
//   ff   is FeedForward, or Boom when `boom` is set.
//
// Sha and Mha are also layer types of their own. Used alone
// they attend over their own input (q = kv = x).
//
// Every residual branch ends in a LayerScale initialised to a
// small constant, so a fresh block starts close to identity.
//
// Reference: Merity (2019) Single Headed Attention RNN
//            Touvron et al. (2021) Going deeper with Image Transformers

use burn::{
    module::{Ignored, Param},
    nn::{Dropout, DropoutConfig, Initializer, LayerNorm, LayerNormConfig, Linear, LinearConfig},
    prelude::*,
    tensor::activation::{gelu, softmax},
};
use serde::{Deserialize, Serialize};

use super::{export_linear, import_linear, visit_linear};
use crate::ml::{
    error::{ConstructionFailure, ModelResult},
    params::{join, ParamSet, ParamTensor, ParamVisitor},
};

const MHA_HEAD_DIM: usize = 64;

fn four() -> usize { 4 }
fn one() -> usize { 1 }
fn head_dim() -> usize { MHA_HEAD_DIM }
fn layerscale_eps() -> f64 { 1e-5 }

fn positive(value: usize, what: &str) -> Result<(), ConstructionFailure> {
    if value == 0 {
        return Err(ConstructionFailure::Invalid(format!("{what} must be positive")));
    }
    Ok(())
}

fn probability(p: f64, what: &str) -> Result<(), ConstructionFailure> {
    if !(0.0..1.0).contains(&p) {
        return Err(ConstructionFailure::Invalid(format!("{what} must be in [0, 1), got {p}")));
    }
    Ok(())
}

// ─── LayerNorm params ─────────────────────────────────────────────────────────
// burn's LayerNorm names its scale gamma and its shift beta;
// documents call them weight and bias.

fn layer_norm<B: Backend>(dim: usize, device: &B::Device) -> LayerNorm<B> {
    LayerNormConfig::new(dim).init(device)
}

fn export_norm<B: Backend>(norm: &LayerNorm<B>, prefix: &str, params: &mut ParamSet) -> ModelResult<()> {
    params.insert(join(prefix, "weight"), ParamTensor::from_param(&norm.gamma)?);
    params.insert(
        join(prefix, "bias"),
        match &norm.beta {
            Some(beta) => ParamTensor::from_param(beta)?,
            None       => ParamTensor::empty(),
        },
    );
    Ok(())
}

fn import_norm<B: Backend>(
    mut norm: LayerNorm<B>,
    prefix:   &str,
    params:   &ParamSet,
    device:   &B::Device,
) -> ModelResult<LayerNorm<B>> {
    norm.gamma = params.require(&join(prefix, "weight"))?.to_param(device)?;
    if norm.beta.is_some() {
        norm.beta = Some(params.require(&join(prefix, "bias"))?.to_param(device)?);
    }
    Ok(norm)
}

fn visit_norm<B: Backend, V: ParamVisitor<B>>(norm: &LayerNorm<B>, visitor: &mut V) {
    visitor.visit(&norm.gamma);
    if let Some(beta) = &norm.beta {
        visitor.visit(beta);
    }
}

// ─── LayerScale ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerScaleConfig {
    pub features: usize,
    #[serde(default = "layerscale_eps")]
    pub eps:      f64,
}

impl LayerScaleConfig {
    pub fn new(features: usize) -> Self {
        Self { features, eps: layerscale_eps() }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<LayerScale<B>, ConstructionFailure> {
        positive(self.features, "features")?;
        Ok(LayerScale {
            scale:  Initializer::Constant { value: self.eps }.init([1, 1, self.features], device),
            config: Ignored(self.clone()),
        })
    }
}

/// Learned per-channel scale, shape [1, 1, features].
#[derive(Module, Debug)]
pub struct LayerScale<B: Backend> {
    pub scale:  Param<Tensor<B, 3>>,
    pub config: Ignored<LayerScaleConfig>,
}

impl<B: Backend> LayerScale<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        x * self.scale.val()
    }

    pub fn config(&self) -> LayerScaleConfig {
        self.config.0.clone()
    }

    pub fn export_params(&self) -> ModelResult<ParamSet> {
        let mut params = ParamSet::new();
        params.insert("scale", ParamTensor::from_param(&self.scale)?);
        Ok(params)
    }

    pub fn import_params(mut self, params: &ParamSet, device: &B::Device) -> ModelResult<Self> {
        self.scale = params.require("scale")?.to_param(device)?;
        Ok(self)
    }

    pub fn visit_params<V: ParamVisitor<B>>(&self, visitor: &mut V) {
        visitor.visit(&self.scale);
    }
}

// ─── FeedForward ──────────────────────────────────────────────────────────────
/// Shared by FeedForward and Boom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedForwardConfig {
    pub dim:     usize,
    #[serde(default = "four")]
    pub mult:    usize,
    #[serde(default)]
    pub dropout: f64,
}

impl FeedForwardConfig {
    pub fn new(dim: usize) -> Self {
        Self { dim, mult: 4, dropout: 0.0 }
    }

    fn validate(&self) -> Result<(), ConstructionFailure> {
        positive(self.dim, "dim")?;
        positive(self.mult, "mult")?;
        probability(self.dropout, "dropout")
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<FeedForward<B>, ConstructionFailure> {
        self.validate()?;
        let inner = self.dim * self.mult;
        Ok(FeedForward {
            norm:       layer_norm(self.dim, device),
            fc1:        LinearConfig::new(self.dim, inner).init(device),
            dropout:    DropoutConfig::new(self.dropout).init(),
            fc2:        LinearConfig::new(inner, self.dim).init(device),
            layerscale: LayerScaleConfig::new(self.dim).init(device)?,
            config:     Ignored(self.clone()),
        })
    }

    pub fn init_boom<B: Backend>(&self, device: &B::Device) -> Result<Boom<B>, ConstructionFailure> {
        self.validate()?;
        Ok(Boom {
            norm:       layer_norm(self.dim, device),
            fc1:        LinearConfig::new(self.dim, self.dim * self.mult).init(device),
            dropout:    DropoutConfig::new(self.dropout).init(),
            layerscale: LayerScaleConfig::new(self.dim).init(device)?,
            config:     Ignored(self.clone()),
        })
    }
}

/// norm → linear(dim, dim·mult) → GELU → dropout → linear(dim·mult, dim) → layerscale
#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    pub norm:       LayerNorm<B>,
    pub fc1:        Linear<B>,
    pub dropout:    Dropout,
    pub fc2:        Linear<B>,
    pub layerscale: LayerScale<B>,
    pub config:     Ignored<FeedForwardConfig>,
}

impl<B: Backend> FeedForward<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = gelu(self.fc1.forward(self.norm.forward(x)));
        let x = self.fc2.forward(self.dropout.forward(x));
        self.layerscale.forward(x)
    }

    pub fn config(&self) -> FeedForwardConfig {
        self.config.0.clone()
    }

    pub fn export_params(&self) -> ModelResult<ParamSet> {
        let mut params = ParamSet::new();
        export_norm(&self.norm, "norm", &mut params)?;
        params.extend_scoped("fc1", export_linear(&self.fc1)?);
        params.extend_scoped("fc2", export_linear(&self.fc2)?);
        params.extend_scoped("layerscale", self.layerscale.export_params()?);
        Ok(params)
    }

    pub fn import_params(mut self, params: &ParamSet, device: &B::Device) -> ModelResult<Self> {
        self.norm       = import_norm(self.norm, "norm", params, device)?;
        self.fc1        = import_linear(self.fc1, &params.scoped("fc1"), device)?;
        self.fc2        = import_linear(self.fc2, &params.scoped("fc2"), device)?;
        self.layerscale = self.layerscale.import_params(&params.scoped("layerscale"), device)?;
        Ok(self)
    }

    pub fn visit_params<V: ParamVisitor<B>>(&self, visitor: &mut V) {
        visit_norm(&self.norm, visitor);
        visit_linear(&self.fc1, visitor);
        visit_linear(&self.fc2, visitor);
        self.layerscale.visit_params(visitor);
    }
}

// ─── Boom ─────────────────────────────────────────────────────────────────────
/// Expands to dim·mult, then folds back by summing the mult
/// groups instead of a second projection.
#[derive(Module, Debug)]
pub struct Boom<B: Backend> {
    pub norm:       LayerNorm<B>,
    pub fc1:        Linear<B>,
    pub dropout:    Dropout,
    pub layerscale: LayerScale<B>,
    pub config:     Ignored<FeedForwardConfig>,
}

impl<B: Backend> Boom<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [steps, batch, dim] = x.dims();
        let out = self.dropout.forward(gelu(self.fc1.forward(self.norm.forward(x))));
        let out = out
            .reshape([steps, batch, self.config.mult, dim])
            .sum_dim(2)
            .reshape([steps, batch, dim]);
        self.layerscale.forward(out)
    }

    pub fn config(&self) -> FeedForwardConfig {
        self.config.0.clone()
    }

    pub fn export_params(&self) -> ModelResult<ParamSet> {
        let mut params = ParamSet::new();
        export_norm(&self.norm, "norm", &mut params)?;
        params.extend_scoped("fc1", export_linear(&self.fc1)?);
        params.extend_scoped("layerscale", self.layerscale.export_params()?);
        Ok(params)
    }

    pub fn import_params(mut self, params: &ParamSet, device: &B::Device) -> ModelResult<Self> {
        self.norm       = import_norm(self.norm, "norm", params, device)?;
        self.fc1        = import_linear(self.fc1, &params.scoped("fc1"), device)?;
        self.layerscale = self.layerscale.import_params(&params.scoped("layerscale"), device)?;
        Ok(self)
    }

    pub fn visit_params<V: ParamVisitor<B>>(&self, visitor: &mut V) {
        visit_norm(&self.norm, visitor);
        visit_linear(&self.fc1, visitor);
        self.layerscale.visit_params(visitor);
    }
}

// ─── SHA ──────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaConfig {
    pub dim:     usize,
    #[serde(default)]
    pub dropout: f64,
}

impl ShaConfig {
    pub fn new(dim: usize) -> Self {
        Self { dim, dropout: 0.0 }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Sha<B>, ConstructionFailure> {
        positive(self.dim, "dim")?;
        probability(self.dropout, "dropout")?;
        Ok(Sha {
            to_q:       LinearConfig::new(self.dim, self.dim).init(device),
            q_norm:     layer_norm(self.dim, device),
            dropout:    DropoutConfig::new(self.dropout).init(),
            layerscale: LayerScaleConfig::new(self.dim).init(device)?,
            config:     Ignored(self.clone()),
        })
    }
}

/// Single-headed attention where the key also serves as the
/// value.
#[derive(Module, Debug)]
pub struct Sha<B: Backend> {
    pub to_q:       Linear<B>,
    pub q_norm:     LayerNorm<B>,
    pub dropout:    Dropout,
    pub layerscale: LayerScale<B>,
    pub config:     Ignored<ShaConfig>,
}

impl<B: Backend> Sha<B> {
    /// Self-attention: x: [time, batch, dim] → same shape
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.attend(x.clone(), x)
    }

    /// x, kv: [time, batch, dim]
    pub fn attend(&self, x: Tensor<B, 3>, kv: Tensor<B, 3>) -> Tensor<B, 3> {
        let x  = x.swap_dims(0, 1);
        let kv = kv.swap_dims(0, 1);

        let scale = (self.config.dim as f64).powf(-0.5);
        let q     = self.q_norm.forward(self.to_q.forward(x));
        let sim   = q.matmul(kv.clone().swap_dims(1, 2)) * scale;
        let attn  = self.dropout.forward(softmax(sim, 2));

        let out = attn.matmul(kv).swap_dims(0, 1);
        self.layerscale.forward(out)
    }

    pub fn config(&self) -> ShaConfig {
        self.config.0.clone()
    }

    pub fn export_params(&self) -> ModelResult<ParamSet> {
        let mut params = ParamSet::new();
        params.extend_scoped("to_q", export_linear(&self.to_q)?);
        export_norm(&self.q_norm, "q_norm", &mut params)?;
        params.extend_scoped("layerscale", self.layerscale.export_params()?);
        Ok(params)
    }

    pub fn import_params(mut self, params: &ParamSet, device: &B::Device) -> ModelResult<Self> {
        self.to_q       = import_linear(self.to_q, &params.scoped("to_q"), device)?;
        self.q_norm     = import_norm(self.q_norm, "q_norm", params, device)?;
        self.layerscale = self.layerscale.import_params(&params.scoped("layerscale"), device)?;
        Ok(self)
    }

    pub fn visit_params<V: ParamVisitor<B>>(&self, visitor: &mut V) {
        visit_linear(&self.to_q, visitor);
        visit_norm(&self.q_norm, visitor);
        self.layerscale.visit_params(visitor);
    }
}

// ─── MHA ──────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MhaConfig {
    pub dim:      usize,
    #[serde(default = "four")]
    pub heads:    usize,
    #[serde(default = "head_dim")]
    pub dim_head: usize,
    #[serde(default)]
    pub dropout:  f64,
}

impl MhaConfig {
    pub fn new(dim: usize) -> Self {
        Self { dim, heads: 4, dim_head: MHA_HEAD_DIM, dropout: 0.0 }
    }

    pub fn with_heads(mut self, heads: usize) -> Self {
        self.heads = heads;
        self
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Mha<B>, ConstructionFailure> {
        positive(self.dim, "dim")?;
        positive(self.heads, "heads")?;
        positive(self.dim_head, "dim_head")?;
        probability(self.dropout, "dropout")?;
        let inner = self.heads * self.dim_head;
        Ok(Mha {
            to_q:       LinearConfig::new(self.dim, inner).with_bias(false).init(device),
            q_norm:     layer_norm(self.dim_head, device),
            to_kv:      LinearConfig::new(self.dim, inner).with_bias(false).init(device),
            to_out:     LinearConfig::new(inner, self.dim).init(device),
            out_norm:   layer_norm(self.dim, device),
            dropout:    DropoutConfig::new(self.dropout).init(),
            layerscale: LayerScaleConfig::new(self.dim).init(device)?,
            config:     Ignored(self.clone()),
        })
    }
}

/// Multi-headed variant with per-head query normalisation.
/// Key and value share one projection.
#[derive(Module, Debug)]
pub struct Mha<B: Backend> {
    pub to_q:       Linear<B>,
    pub q_norm:     LayerNorm<B>,
    pub to_kv:      Linear<B>,
    pub to_out:     Linear<B>,
    pub out_norm:   LayerNorm<B>,
    pub dropout:    Dropout,
    pub layerscale: LayerScale<B>,
    pub config:     Ignored<MhaConfig>,
}

impl<B: Backend> Mha<B> {
    fn split_heads(&self, x: Tensor<B, 3>) -> Tensor<B, 4> {
        let [batch, steps, _] = x.dims();
        x.reshape([batch, steps, self.config.heads, self.config.dim_head]).swap_dims(1, 2)
    }

    /// Self-attention: x: [time, batch, dim] → same shape
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.attend(x.clone(), x)
    }

    /// x, kv: [time, batch, dim]
    pub fn attend(&self, x: Tensor<B, 3>, kv: Tensor<B, 3>) -> Tensor<B, 3> {
        let (heads, dim_head) = (self.config.heads, self.config.dim_head);
        let [steps, batch, _] = x.dims();
        let x  = x.swap_dims(0, 1);
        let kv = kv.swap_dims(0, 1);

        let q  = self.q_norm.forward(self.split_heads(self.to_q.forward(x)));
        let kv = self.split_heads(self.to_kv.forward(kv));

        let scale = (dim_head as f64).powf(-0.5);
        let sim   = q.matmul(kv.clone().swap_dims(2, 3)) * scale;
        let attn  = self.dropout.forward(softmax(sim, 3));

        let out = attn
            .matmul(kv)
            .swap_dims(1, 2)
            .reshape([batch, steps, heads * dim_head]);
        let out = self.out_norm.forward(self.to_out.forward(out)).swap_dims(0, 1);
        self.layerscale.forward(out)
    }

    pub fn config(&self) -> MhaConfig {
        self.config.0.clone()
    }

    pub fn export_params(&self) -> ModelResult<ParamSet> {
        let mut params = ParamSet::new();
        params.extend_scoped("to_q", export_linear(&self.to_q)?);
        export_norm(&self.q_norm, "q_norm", &mut params)?;
        params.extend_scoped("to_kv", export_linear(&self.to_kv)?);
        params.extend_scoped("to_out", export_linear(&self.to_out)?);
        export_norm(&self.out_norm, "out_norm", &mut params)?;
        params.extend_scoped("layerscale", self.layerscale.export_params()?);
        Ok(params)
    }

    pub fn import_params(mut self, params: &ParamSet, device: &B::Device) -> ModelResult<Self> {
        self.to_q       = import_linear(self.to_q, &params.scoped("to_q"), device)?;
        self.q_norm     = import_norm(self.q_norm, "q_norm", params, device)?;
        self.to_kv      = import_linear(self.to_kv, &params.scoped("to_kv"), device)?;
        self.to_out     = import_linear(self.to_out, &params.scoped("to_out"), device)?;
        self.out_norm   = import_norm(self.out_norm, "out_norm", params, device)?;
        self.layerscale = self.layerscale.import_params(&params.scoped("layerscale"), device)?;
        Ok(self)
    }

    pub fn visit_params<V: ParamVisitor<B>>(&self, visitor: &mut V) {
        visit_linear(&self.to_q, visitor);
        visit_norm(&self.q_norm, visitor);
        visit_linear(&self.to_kv, visitor);
        visit_linear(&self.to_out, visitor);
        visit_norm(&self.out_norm, visitor);
        self.layerscale.visit_params(visitor);
    }
}

// ─── ShaBlock ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaBlockConfig {
    pub dim:            usize,
    #[serde(default)]
    pub attn_dropout:   f64,
    #[serde(default)]
    pub ff_dropout:     f64,
    #[serde(default = "one")]
    pub num_attn_heads: usize,
    #[serde(default = "four")]
    pub ff_mult:        usize,
    #[serde(default)]
    pub boom:           bool,
}

impl ShaBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<ShaBlock<B>, ConstructionFailure> {
        positive(self.dim, "dim")?;
        positive(self.num_attn_heads, "num_attn_heads")?;

        let attn = if self.num_attn_heads > 1 {
            let cfg = MhaConfig::new(self.dim)
                .with_heads(self.num_attn_heads)
                .with_dropout(self.attn_dropout);
            Attention::Multi(cfg.init(device)?)
        } else {
            let cfg = ShaConfig { dropout: self.attn_dropout, ..ShaConfig::new(self.dim) };
            Attention::Single(cfg.init(device)?)
        };

        let ff_cfg = FeedForwardConfig {
            mult:    self.ff_mult,
            dropout: self.ff_dropout,
            ..FeedForwardConfig::new(self.dim)
        };
        let ff = if self.boom {
            Residual::Boom(ff_cfg.init_boom(device)?)
        } else {
            Residual::Dense(ff_cfg.init(device)?)
        };

        Ok(ShaBlock {
            query_norm: layer_norm(self.dim, device),
            kv_norm:    layer_norm(self.dim, device),
            attn,
            ff,
            config:     Ignored(self.clone()),
        })
    }
}

#[derive(Module, Debug)]
pub enum Attention<B: Backend> {
    Single(Sha<B>),
    Multi(Mha<B>),
}

#[derive(Module, Debug)]
pub enum Residual<B: Backend> {
    Dense(FeedForward<B>),
    Boom(Boom<B>),
}

#[derive(Module, Debug)]
pub struct ShaBlock<B: Backend> {
    pub query_norm: LayerNorm<B>,
    pub kv_norm:    LayerNorm<B>,
    pub attn:       Attention<B>,
    pub ff:         Residual<B>,
    pub config:     Ignored<ShaBlockConfig>,
}

impl<B: Backend> ShaBlock<B> {
    /// x: [time, batch, dim] → same shape
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let kv = self.kv_norm.forward(x.clone());
        let q  = self.query_norm.forward(x.clone());

        let attended = match &self.attn {
            Attention::Single(sha) => sha.attend(q, kv),
            Attention::Multi(mha)  => mha.attend(q, kv),
        };
        let x = attended + x;

        let ff = match &self.ff {
            Residual::Dense(ff) => ff.forward(x.clone()),
            Residual::Boom(ff)  => ff.forward(x.clone()),
        };
        ff + x
    }

    pub fn config(&self) -> ShaBlockConfig {
        self.config.0.clone()
    }

    pub fn export_params(&self) -> ModelResult<ParamSet> {
        let mut params = ParamSet::new();
        export_norm(&self.query_norm, "query_norm", &mut params)?;
        export_norm(&self.kv_norm, "kv_norm", &mut params)?;

        let attn = match &self.attn {
            Attention::Single(sha) => sha.export_params()?,
            Attention::Multi(mha)  => mha.export_params()?,
        };
        params.extend_scoped("attn", attn);

        let ff = match &self.ff {
            Residual::Dense(ff) => ff.export_params()?,
            Residual::Boom(ff)  => ff.export_params()?,
        };
        params.extend_scoped("ff", ff);
        Ok(params)
    }

    pub fn import_params(mut self, params: &ParamSet, device: &B::Device) -> ModelResult<Self> {
        self.query_norm = import_norm(self.query_norm, "query_norm", params, device)?;
        self.kv_norm    = import_norm(self.kv_norm, "kv_norm", params, device)?;

        let attn = params.scoped("attn");
        self.attn = match self.attn {
            Attention::Single(sha) => Attention::Single(sha.import_params(&attn, device)?),
            Attention::Multi(mha)  => Attention::Multi(mha.import_params(&attn, device)?),
        };

        let ff = params.scoped("ff");
        self.ff = match self.ff {
            Residual::Dense(inner) => Residual::Dense(inner.import_params(&ff, device)?),
            Residual::Boom(inner)  => Residual::Boom(inner.import_params(&ff, device)?),
        };
        Ok(self)
    }

    pub fn visit_params<V: ParamVisitor<B>>(&self, visitor: &mut V) {
        visit_norm(&self.query_norm, visitor);
        visit_norm(&self.kv_norm, visitor);
        match &self.attn {
            Attention::Single(sha) => sha.visit_params(visitor),
            Attention::Multi(mha)  => mha.visit_params(visitor),
        }
        match &self.ff {
            Residual::Dense(ff) => ff.visit_params(visitor),
            Residual::Boom(ff)  => ff.visit_params(visitor),
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray;

    fn block_config(dim: usize) -> ShaBlockConfig {
        serde_json::from_value(serde_json::json!({ "dim": dim })).unwrap()
    }

    #[test]
    fn test_norm_params_use_document_names() {
        let device = Default::default();
        let norm = layer_norm::<TestBackend>(4, &device);
        let mut params = ParamSet::new();
        export_norm(&norm, "norm", &mut params).unwrap();
        assert_eq!(params.names().collect::<Vec<_>>(), vec!["norm.weight", "norm.bias"]);
        assert_eq!(params.get("norm.weight").unwrap().values, vec![1.0; 4]);

        params.insert("norm.bias", ParamTensor::new(vec![4], vec![2.0; 4]).unwrap());
        let norm = import_norm(norm, "norm", &params, &device).unwrap();
        let x = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0, 3.0, 4.0]], &device);
        let y: Vec<f32> = norm.forward(x).into_data().to_vec().unwrap();
        let mean: f32 = y.iter().sum::<f32>() / 4.0;
        assert!((mean - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_sha_block_preserves_shape() {
        let device = Default::default();
        let block = block_config(8).init::<TestBackend>(&device).unwrap();
        let x = Tensor::<TestBackend, 3>::random([5, 2, 8], Distribution::Default, &device);
        assert_eq!(block.forward(x).dims(), [5, 2, 8]);
    }

    #[test]
    fn test_multi_head_boom_block_preserves_shape() {
        let device = Default::default();
        let mut cfg = block_config(8);
        cfg.num_attn_heads = 2;
        cfg.boom = true;
        let block = cfg.init::<TestBackend>(&device).unwrap();
        let x = Tensor::<TestBackend, 3>::random([4, 3, 8], Distribution::Default, &device);
        assert_eq!(block.forward(x).dims(), [4, 3, 8]);

        let params = block.export_params().unwrap();
        assert_eq!(params.get("attn.to_q.W").unwrap().shape, vec![128, 8]);
        assert!(params.get("attn.to_q.b").unwrap().is_empty());
        assert_eq!(params.get("attn.q_norm.weight").unwrap().shape, vec![64]);
        assert_eq!(params.get("ff.layerscale.scale").unwrap().shape, vec![1, 1, 8]);
    }

    #[test]
    fn test_standalone_attention_is_self_attention() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::random([6, 2, 8], Distribution::Default, &device);

        let sha = ShaConfig::new(8).init::<TestBackend>(&device).unwrap();
        let own: Vec<f32> = sha.forward(x.clone()).into_data().to_vec().unwrap();
        let explicit: Vec<f32> = sha.attend(x.clone(), x.clone()).into_data().to_vec().unwrap();
        assert_eq!(own, explicit);

        let mut cfg = MhaConfig::new(8).with_heads(2);
        cfg.dim_head = 4;
        let mha = cfg.init::<TestBackend>(&device).unwrap();
        assert_eq!(mha.forward(x).dims(), [6, 2, 8]);
        let params = mha.export_params().unwrap();
        assert_eq!(params.get("to_kv.W").unwrap().shape, vec![8, 8]);
        assert_eq!(params.get("q_norm.weight").unwrap().shape, vec![4]);
    }

    #[test]
    fn test_layerscale_initial_value() {
        let device = Default::default();
        let ls = LayerScaleConfig::new(3).init::<TestBackend>(&device).unwrap();
        let y: Vec<f32> = ls.forward(Tensor::ones([1, 1, 3], &device)).into_data().to_vec().unwrap();
        assert!(y.iter().all(|&v| (v - 1e-5).abs() < 1e-9));
    }

    #[test]
    fn test_invalid_dropout_rejected() {
        let device = Default::default();
        let mut cfg = FeedForwardConfig::new(4);
        cfg.dropout = 1.5;
        assert!(cfg.init::<TestBackend>(&device).is_err());
        assert!(ShaConfig { dim: 4, dropout: -0.1 }.init::<TestBackend>(&device).is_err());
    }
}
