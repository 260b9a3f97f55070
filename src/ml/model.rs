// ============================================================
// Layer 5 — Basecaller Model
// ============================================================
// A basecaller is an encoder (a Layer tree, usually a conv
// front end, a Permute and a stack of alternating LSTMs or
// attention blocks) plus a head that says how to read its
// output:
//
//   ctc  scores [T, N, labels]         → log_softmax, CTC loss,
//                                        greedy decoding
//   crf  scores [T, N, S·(n_base+1)]   → CTC-CRF loss,
//                                        Viterbi decoding
//
// The whole thing round-trips through config.json:
//
//   { "model":   { "type": "crf", "state_len": 3 },
//     "labels":  { "labels": ["N", "A", "C", "G", "T"] },
//     "encoder": { "type": "serial", "sublayers": [...] },
//     "training": { ... } }
//
// Keys this module does not know are carried in `extra` so
// that rewriting the config never drops them.

use burn::{
    module::Ignored,
    prelude::*,
    tensor::activation::log_softmax,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::domain::{alphabet::Alphabet, decoding::crf_states};
use crate::ml::{
    decoder::{CrfViterbi, CtcGreedy, Decoder},
    error::{ModelError, ModelResult},
    layers::{
        activation::ActivationKind,
        convolution::ConvolutionConfig,
        crf_encoder::LinearCrfEncoderConfig,
        lstm::LstmConfig,
        permute::PermuteConfig,
        Layer,
    },
    loss::{ctc_crf_loss, ctc_loss},
    params::{ParamSet, ParamVisitor},
    registry::{LayerKind, LayerRegistry},
    serializer::{from_document, layer_spec, to_document},
};

const ENCODER: &str = "encoder";

fn default_state_len() -> usize { 5 }

/// How the encoder output is interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HeadConfig {
    Ctc,
    Crf {
        #[serde(default = "default_state_len")]
        state_len: usize,
    },
}

// ─── ModelConfig ──────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model:   HeadConfig,
    #[serde(default)]
    pub labels:  Alphabet,
    pub encoder: Value,
    #[serde(flatten)]
    pub extra:   Map<String, Value>,
}

impl ModelConfig {
    /// The model trained when no config is given: a small
    /// conv + bidirectional-LSTM stack with a k-mer CRF head.
    pub fn builtin() -> Self {
        let features  = 96;
        let state_len = 3;
        let labels    = Alphabet::default();

        let conv = |insize, size, winlen, stride, activation| {
            let cfg = ConvolutionConfig::new(insize, size, winlen)
                .with_stride(stride)
                .with_padding(winlen / 2)
                .with_activation(Some(activation));
            layer_spec(LayerKind::Convolution, &cfg)
        };
        let lstm = |reverse| layer_spec(LayerKind::Lstm, &LstmConfig::new(features, features).with_reverse(reverse));
        let crf = LinearCrfEncoderConfig::new(features, labels.n_base(), state_len)
            .with_activation(Some(ActivationKind::Tanh))
            .with_scale(Some(5.0))
            .with_blank_score(Some(2.0));

        let encoder = json!({
            "type": "serial",
            "sublayers": [
                conv(1, 4, 5, 1, ActivationKind::Swish),
                conv(4, 16, 5, 1, ActivationKind::Swish),
                conv(16, features, 19, 5, ActivationKind::Tanh),
                layer_spec(LayerKind::Permute, &PermuteConfig::new([2, 0, 1])),
                lstm(true), lstm(false), lstm(true), lstm(false), lstm(true),
                layer_spec(LayerKind::LinearCrfEncoder, &crf),
            ]
        });
        Self {
            model:   HeadConfig::Crf { state_len },
            labels,
            encoder,
            extra:   Map::new(),
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ModelResult<BasecallModel<B>> {
        if self.labels.n_base() == 0 {
            return Err(ModelError::InvalidModel("alphabet has no bases".into()));
        }
        if let HeadConfig::Crf { state_len: 0 } = self.model {
            return Err(ModelError::InvalidModel("crf state_len must be at least 1".into()));
        }
        let encoder = from_document(&self.encoder, LayerRegistry::global(), device)?;
        self.check_head(&encoder)?;
        tracing::debug!("Built encoder with {} layers", encoder.leaves().len());
        Ok(BasecallModel {
            encoder,
            head:     Ignored(self.model.clone()),
            alphabet: Ignored(self.labels.clone()),
        })
    }
}

impl ModelConfig {
    /// The encoder's output width must be what the head reads:
    /// labels for CTC, S * (n_base + 1) transitions for a CRF
    /// whose last projection uses the same n_base and state_len.
    fn check_head<B: Backend>(&self, encoder: &Layer<B>) -> ModelResult<()> {
        let n_base = self.labels.n_base();
        let width  = encoder.output_width();
        let expected = match self.model {
            HeadConfig::Ctc => self.labels.n_classes(),
            HeadConfig::Crf { state_len } => {
                let crf = encoder.crf_encoder().map(|l| l.config()).ok_or_else(|| {
                    ModelError::InvalidModel("a crf head needs a linearcrfencoder in the encoder".into())
                })?;
                if crf.n_base != n_base || crf.state_len != state_len {
                    return Err(ModelError::InvalidModel(format!(
                        "linearcrfencoder has n_base {} and state_len {}, the head expects n_base {} and state_len {}",
                        crf.n_base, crf.state_len, n_base, state_len
                    )));
                }
                crf_states(n_base, state_len) * (n_base + 1)
            }
        };
        match width {
            Some(width) if width != expected => Err(ModelError::InvalidModel(format!(
                "encoder emits {width} channels, the {} head needs {expected}",
                self.head_name()
            ))),
            _ => Ok(()),
        }
    }

    fn head_name(&self) -> &'static str {
        match self.model {
            HeadConfig::Ctc        => "ctc",
            HeadConfig::Crf { .. } => "crf",
        }
    }
}

// ─── BasecallModel ────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct BasecallModel<B: Backend> {
    pub encoder:  Layer<B>,
    pub head:     Ignored<HeadConfig>,
    pub alphabet: Ignored<Alphabet>,
}

impl<B: Backend> BasecallModel<B> {
    /// signal [batch, 1, samples] → scores [time, batch, classes]
    pub fn forward(&self, signal: Tensor<B, 3>) -> Tensor<B, 3> {
        let scores = self.encoder.forward(signal);
        match self.head.0 {
            HeadConfig::Ctc         => log_softmax(scores, 2),
            HeadConfig::Crf { .. }  => scores,
        }
    }

    /// Mean per-base loss for `targets` (label indices, unpadded).
    pub fn loss(&self, scores: Tensor<B, 3>, targets: &[Vec<usize>]) -> Tensor<B, 1> {
        match self.head.0 {
            HeadConfig::Ctc => ctc_loss(scores, targets),
            HeadConfig::Crf { state_len } => {
                ctc_crf_loss(scores, targets, self.alphabet.n_base(), state_len)
            }
        }
    }

    pub fn decoder(&self) -> Box<dyn Decoder<B>> {
        let alphabet = self.alphabet.0.clone();
        match self.head.0 {
            HeadConfig::Ctc               => Box::new(CtcGreedy { alphabet }),
            HeadConfig::Crf { state_len } => Box::new(CrfViterbi { alphabet, state_len }),
        }
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet.0
    }

    /// All parameters, keyed "encoder.<path>".
    pub fn export_params(&self) -> ModelResult<ParamSet> {
        let mut params = ParamSet::new();
        params.extend_scoped(ENCODER, self.encoder.export_params()?);
        Ok(params)
    }

    pub fn import_params(mut self, params: &ParamSet, device: &B::Device) -> ModelResult<Self> {
        self.encoder = self.encoder.import_params(&params.scoped(ENCODER), device)?;
        Ok(self)
    }

    pub fn visit_params<V: ParamVisitor<B>>(&self, visitor: &mut V) {
        self.encoder.visit_params(visitor);
    }

    /// The config this model was built from, optionally with
    /// its current weights inlined into the encoder document.
    pub fn to_config(&self, include_weights: bool) -> ModelResult<ModelConfig> {
        Ok(ModelConfig {
            model:   self.head.0.clone(),
            labels:  self.alphabet.0.clone(),
            encoder: to_document(&self.encoder, include_weights)?,
            extra:   Map::new(),
        })
    }
}
