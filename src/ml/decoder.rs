// ============================================================
// Layer 5 — Decoders
// ============================================================
// Turns model scores into base strings. The DP itself lives
// in the domain layer (pure Rust); this module only moves
// tensors to the host and picks the algorithm.
//
// Batch support is an explicit capability: the default
// decode_batch loops over decode, one device→host copy per
// read. CrfViterbi overrides it to copy the whole [T, N, C]
// block once.

use burn::prelude::*;

use crate::domain::{
    alphabet::Alphabet,
    decoding::{ctc_greedy, viterbi_crf, ScoreMatrix},
};
use crate::ml::{error::ModelResult, params::ParamTensor};

pub trait Decoder<B: Backend> {
    /// scores: [time, classes] → called bases
    fn decode(&self, scores: Tensor<B, 2>) -> ModelResult<String>;

    /// Whether decode_batch is cheaper than looping over decode.
    fn supports_batch(&self) -> bool {
        false
    }

    /// scores: [time, batch, classes] → one call per batch entry
    fn decode_batch(&self, scores: Tensor<B, 3>) -> ModelResult<Vec<String>> {
        let [steps, batch, classes] = scores.dims();
        (0..batch)
            .map(|n| {
                let one = scores
                    .clone()
                    .slice([0..steps, n..n + 1, 0..classes])
                    .reshape([steps, classes]);
                self.decode(one)
            })
            .collect()
    }
}

fn to_host<B: Backend>(scores: Tensor<B, 2>) -> ModelResult<ScoreMatrix> {
    let [steps, classes] = scores.dims();
    let host = ParamTensor::from_tensor(scores)?;
    Ok(ScoreMatrix::new(steps, classes, host.values))
}

// ─── CTC ──────────────────────────────────────────────────────────────────────
pub struct CtcGreedy {
    pub alphabet: Alphabet,
}

impl<B: Backend> Decoder<B> for CtcGreedy {
    fn decode(&self, scores: Tensor<B, 2>) -> ModelResult<String> {
        let labels = ctc_greedy(&to_host(scores)?);
        Ok(self.alphabet.decode_labels(&labels))
    }
}

// ─── CRF ──────────────────────────────────────────────────────────────────────
pub struct CrfViterbi {
    pub alphabet:  Alphabet,
    pub state_len: usize,
}

impl CrfViterbi {
    fn call(&self, scores: &ScoreMatrix) -> ModelResult<String> {
        Ok(viterbi_crf(scores, self.alphabet.n_base(), self.state_len)?
            .into_iter()
            .filter_map(|b| self.alphabet.base(b))
            .collect())
    }
}

impl<B: Backend> Decoder<B> for CrfViterbi {
    fn decode(&self, scores: Tensor<B, 2>) -> ModelResult<String> {
        self.call(&to_host(scores)?)
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn decode_batch(&self, scores: Tensor<B, 3>) -> ModelResult<Vec<String>> {
        let [steps, batch, classes] = scores.dims();
        let host = ParamTensor::from_tensor(scores)?.values;

        (0..batch)
            .map(|n| {
                let mut data = Vec::with_capacity(steps * classes);
                for t in 0..steps {
                    let start = (t * batch + n) * classes;
                    data.extend_from_slice(&host[start..start + classes]);
                }
                self.call(&ScoreMatrix::new(steps, classes, data))
            })
            .collect()
    }
}
