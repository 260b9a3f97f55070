// ============================================================
// Layer 5 — Sequence Losses
// ============================================================
// Both losses run the forward algorithm in log space with
// Burn tensor ops, so autodiff gives the backward pass for
// free. The time loop is sequential; every step is vectorised
// over the batch and over lattice positions.
//
// CTC (for CTC-head models)
//   Extended target l' = blank, y1, blank, y2, ..., blank.
//   α_t(s) = lse(α_{t-1}(s), α_{t-1}(s-1), α_{t-1}(s-2)·skip) + emit_t(l'_s)
//   where the s-2 skip is allowed only between distinct labels.
//   loss = -lse(α_T(S-1), α_T(S-2)) / len(y), averaged over the batch.
//
// CTC-CRF (for CRF-head models)
//   Target path: the sequence of k-mer states visited by the
//   reference. At each step the path either stays in its state
//   or moves to the next one. The log partition function runs
//   the same recursion over *all* k-mer states.
//   loss = -(score(target) - log Z) / len(y), averaged.
//
// Targets arrive on the host as label indices (1..=n_base).
//
// Reference: Graves et al. (2006) CTC
//            Hannun (2017) Sequence Modeling with CTC

use burn::{prelude::*, tensor::Int};

use crate::domain::decoding::{crf_predecessor, crf_states};

/// Stand-in for log(0) that survives exp/log without NaNs.
const NEG: f32 = -1e30;

// ─── log-space helpers ───────────────────────────────────────────────────────

fn log_add<B: Backend, const D: usize>(a: Tensor<B, D>, b: Tensor<B, D>) -> Tensor<B, D> {
    let m = a.clone().max_pair(b.clone());
    m.clone() + ((a - m.clone()).exp() + (b - m).exp()).log()
}

fn log_add3<B: Backend, const D: usize>(a: Tensor<B, D>, b: Tensor<B, D>, c: Tensor<B, D>) -> Tensor<B, D> {
    let m = a.clone().max_pair(b.clone()).max_pair(c.clone());
    m.clone() + ((a - m.clone()).exp() + (b - m.clone()).exp() + (c - m).exp()).log()
}

/// log Σ exp along `dim`, keeping the axis.
fn log_sum_exp<B: Backend, const D: usize>(x: Tensor<B, D>, dim: usize) -> Tensor<B, D> {
    let m = x.clone().max_dim(dim);
    m.clone() + (x - m).exp().sum_dim(dim).log()
}

/// Shift right by `k` along axis 1, filling with NEG.
fn shift<B: Backend>(x: Tensor<B, 2>, k: usize) -> Tensor<B, 2> {
    let [n, s] = x.dims();
    let pad = Tensor::<B, 2>::full([n, k.min(s)], NEG, &x.device());
    if k >= s {
        return pad;
    }
    Tensor::cat(vec![pad, x.slice([0..n, 0..s - k])], 1)
}

fn float_2d<B: Backend>(values: Vec<f32>, shape: [usize; 2], device: &B::Device) -> Tensor<B, 2> {
    Tensor::from_data(TensorData::new(values, shape), device)
}

fn int_tensor<B: Backend, const D: usize>(values: Vec<i64>, shape: [usize; D], device: &B::Device) -> Tensor<B, D, Int> {
    Tensor::from_data(TensorData::new(values, shape), device)
}

/// Index [T, N, W] that repeats a [N, W] index over time.
fn over_time<B: Backend>(index: &[i64], steps: usize, batch: usize, width: usize, device: &B::Device) -> Tensor<B, 3, Int> {
    let mut repeated = Vec::with_capacity(steps * index.len());
    for _ in 0..steps {
        repeated.extend_from_slice(index);
    }
    int_tensor(repeated, [steps, batch, width], device)
}

fn target_lengths<B: Backend>(targets: &[Vec<usize>], device: &B::Device) -> Tensor<B, 1> {
    let lens: Vec<f32> = targets.iter().map(|t| t.len().max(1) as f32).collect();
    let n = lens.len();
    Tensor::from_data(TensorData::new(lens, [n]), device)
}

// ─── CTC ──────────────────────────────────────────────────────────────────────

/// CTC loss. `log_probs` is [time, batch, classes] after
/// log_softmax; targets hold labels in 1..classes (0 is blank).
pub fn ctc_loss<B: Backend>(log_probs: Tensor<B, 3>, targets: &[Vec<usize>]) -> Tensor<B, 1> {
    let [steps, batch, _] = log_probs.dims();
    let device = log_probs.device();
    let width = 2 * targets.iter().map(Vec::len).max().unwrap_or(0) + 1;

    // Extended labels, skip penalties, and final positions
    let mut ext   = vec![0i64; batch * width];
    let mut skip  = vec![NEG; batch * width];
    let mut init  = vec![NEG; batch * width];
    let mut last  = vec![0i64; batch];
    let mut prev  = vec![0i64; batch];
    let mut prev_ok = vec![NEG; batch];
    for (n, target) in targets.iter().enumerate() {
        let row = n * width;
        for (j, &label) in target.iter().enumerate() {
            let s = 2 * j + 1;
            ext[row + s] = label as i64;
            if j > 0 && target[j - 1] != label {
                skip[row + s] = 0.0;
            }
        }
        let used = 2 * target.len() + 1;
        init[row] = 0.0;
        if used > 1 {
            init[row + 1] = 0.0;
            prev[n] = (used - 2) as i64;
            prev_ok[n] = 0.0;
        }
        last[n] = (used - 1) as i64;
    }

    let emit = log_probs.gather(2, over_time::<B>(&ext, steps, batch, width, &device));
    let skip = float_2d::<B>(skip, [batch, width], &device);
    let step = |t: usize| emit.clone().slice([t..t + 1, 0..batch, 0..width]).reshape([batch, width]);

    let mut alpha = step(0) + float_2d::<B>(init, [batch, width], &device);
    for t in 1..steps {
        let stay = alpha.clone();
        let next = shift(alpha.clone(), 1);
        let jump = shift(alpha, 2) + skip.clone();
        alpha = log_add3(stay, next, jump) + step(t);
    }

    let end  = alpha.clone().gather(1, int_tensor(last, [batch, 1], &device));
    let end2 = alpha.gather(1, int_tensor(prev, [batch, 1], &device))
        + float_2d::<B>(prev_ok, [batch, 1], &device);
    let log_likelihood = log_add(end, end2).reshape([batch]);

    (log_likelihood.neg() / target_lengths::<B>(targets, &device)).mean()
}

// ─── CTC-CRF ──────────────────────────────────────────────────────────────────

/// Log partition function over all k-mer paths: [batch].
pub fn crf_log_partition<B: Backend>(scores: Tensor<B, 3>, n_base: usize, state_len: usize) -> Tensor<B, 1> {
    let [steps, batch, classes] = scores.dims();
    let device = scores.device();
    let n_states = crf_states(n_base, state_len);
    let n_trans  = n_base + 1;

    // For column s*(n_base+1)+k: the state the transition comes from
    let mut from = Vec::with_capacity(batch * classes);
    for _ in 0..batch {
        for s in 0..n_states {
            from.push(s as i64);
            for r in 0..n_base {
                from.push(crf_predecessor(s, r, n_base, n_states) as i64);
            }
        }
    }
    let from = int_tensor::<B, 2>(from, [batch, classes], &device);

    let mut alpha = Tensor::<B, 2>::zeros([batch, n_states], &device);
    for t in 0..steps {
        let score_t = scores.clone().slice([t..t + 1, 0..batch, 0..classes]).reshape([batch, classes]);
        let cand = (alpha.gather(1, from.clone()) + score_t).reshape([batch, n_states, n_trans]);
        alpha = log_sum_exp(cand, 2).reshape([batch, n_states]);
    }
    log_sum_exp(alpha, 1).reshape([batch])
}

/// Score of the reference path through the k-mer lattice: [batch].
pub fn crf_target_score<B: Backend>(
    scores:    Tensor<B, 3>,
    targets:   &[Vec<usize>],
    n_base:    usize,
    state_len: usize,
) -> Tensor<B, 1> {
    let [steps, batch, _] = scores.dims();
    let device = scores.device();
    let n_trans = n_base + 1;

    // Path positions: one per k-mer window of the reference
    let positions = |t: &Vec<usize>| (t.len() + 1).saturating_sub(state_len).max(1);
    let width = targets.iter().map(positions).max().unwrap_or(1);

    let mut stay_idx  = vec![0i64; batch * width];
    let mut move_idx  = vec![0i64; batch * width];
    let mut move_mask = vec![NEG; batch * width];
    let mut last      = vec![0i64; batch];

    for (n, target) in targets.iter().enumerate() {
        // labels 1..=n_base → bases 0..n_base
        let bases: Vec<usize> = target.iter().map(|&l| l.saturating_sub(1)).collect();
        let count = positions(target);
        let kmer = |i: usize| {
            (0..state_len).fold(0usize, |acc, k| acc * n_base + bases.get(i + k).copied().unwrap_or(0))
        };
        for i in 0..count {
            let state = kmer(i);
            stay_idx[n * width + i] = (state * n_trans) as i64;
            if i > 0 {
                move_idx[n * width + i] = (state * n_trans + bases[i - 1] + 1) as i64;
                move_mask[n * width + i] = 0.0;
            }
        }
        last[n] = (count - 1) as i64;
    }

    let stay = scores.clone().gather(2, over_time::<B>(&stay_idx, steps, batch, width, &device));
    let mv   = scores.gather(2, over_time::<B>(&move_idx, steps, batch, width, &device));
    let move_mask = float_2d::<B>(move_mask, [batch, width], &device);
    let at = |x: &Tensor<B, 3>, t: usize| x.clone().slice([t..t + 1, 0..batch, 0..width]).reshape([batch, width]);

    let mut init = vec![NEG; batch * width];
    for n in 0..batch {
        init[n * width] = 0.0;
    }
    let mut alpha = float_2d::<B>(init, [batch, width], &device);
    for t in 0..steps {
        let stayed = alpha.clone() + at(&stay, t);
        let moved  = shift(alpha, 1) + at(&mv, t) + move_mask.clone();
        alpha = log_add(stayed, moved);
    }

    alpha.gather(1, int_tensor(last, [batch, 1], &device)).reshape([batch])
}

/// CTC-CRF loss over raw CRF scores [time, batch, S·(n_base+1)].
pub fn ctc_crf_loss<B: Backend>(
    scores:    Tensor<B, 3>,
    targets:   &[Vec<usize>],
    n_base:    usize,
    state_len: usize,
) -> Tensor<B, 1> {
    let device = scores.device();
    let log_z  = crf_log_partition(scores.clone(), n_base, state_len);
    let target = crf_target_score(scores, targets, n_base, state_len);
    ((log_z - target) / target_lengths::<B>(targets, &device)).mean()
}
