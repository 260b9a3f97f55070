// ============================================================
// Layer 3 — Host-side Decoding
// ============================================================
// Pure Rust decoding of a per-timestep score matrix.
// The ML layer copies scores off the device once and hands
// them here, so this module never sees a Burn tensor.
//
// Two decoders:
//
//   ctc_greedy   — argmax per step, collapse repeats, drop blank
//
//   viterbi_crf  — max-product DP over k-mer states.
//                  With n_base bases and state_len history,
//                  there are S = n_base^state_len states and
//                  every state has n_base + 1 incoming moves:
//
//                    k = 0       stay in s, emit nothing
//                    k = r + 1   come from (r*S + s) / n_base,
//                                emit base s % n_base
//
//                  Scores are laid out as [T, S * (n_base + 1)]
//                  with column s * (n_base + 1) + k.
//
// Reference: Graves et al. (2006) CTC
//            Viterbi (1967)

/// A dense row-major [T, C] score matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreMatrix {
    pub steps:   usize,
    pub classes: usize,
    pub data:    Vec<f32>,
}

impl ScoreMatrix {
    pub fn new(steps: usize, classes: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), steps * classes);
        Self { steps, classes, data }
    }

    pub fn row(&self, t: usize) -> &[f32] {
        &self.data[t * self.classes..(t + 1) * self.classes]
    }
}

/// Index of the largest value; the first one wins ties.
fn argmax(row: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}

/// Greedy CTC path decoding.
/// Returns label indices with repeats collapsed and blanks (0) removed.
pub fn ctc_greedy(scores: &ScoreMatrix) -> Vec<usize> {
    let mut out  = Vec::new();
    let mut prev = None;
    for t in 0..scores.steps {
        let label = argmax(scores.row(t));
        if Some(label) != prev && label != 0 {
            out.push(label);
        }
        prev = Some(label);
    }
    out
}

/// Number of k-mer states for a CRF head.
pub fn crf_states(n_base: usize, state_len: usize) -> usize {
    n_base.pow(state_len as u32)
}

/// Predecessor of `state` for the move transition `r` (0..n_base).
#[inline]
pub fn crf_predecessor(state: usize, r: usize, n_base: usize, n_states: usize) -> usize {
    (r * n_states + state) / n_base
}

/// Scores whose width does not fit the CRF they are decoded with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("CRF scores have {found} classes, n_base {n_base} with state_len {state_len} needs {expected}")]
pub struct ScoreWidthError {
    pub found:     usize,
    pub expected:  usize,
    pub n_base:    usize,
    pub state_len: usize,
}

/// Viterbi decoding of CRF transition scores.
/// Returns base indices in 0..n_base.
pub fn viterbi_crf(
    scores:    &ScoreMatrix,
    n_base:    usize,
    state_len: usize,
) -> Result<Vec<usize>, ScoreWidthError> {
    let n_states = crf_states(n_base, state_len);
    let n_trans  = n_base + 1;
    if scores.classes != n_states * n_trans {
        return Err(ScoreWidthError {
            found: scores.classes,
            expected: n_states * n_trans,
            n_base,
            state_len,
        });
    }
    if scores.steps == 0 || n_states == 0 {
        return Ok(Vec::new());
    }

    let mut alpha = vec![0f32; n_states];
    let mut next  = vec![0f32; n_states];
    // chosen transition per (t, state)
    let mut back = vec![0u8; scores.steps * n_states];

    for t in 0..scores.steps {
        let row = scores.row(t);
        for s in 0..n_states {
            let base = s * n_trans;
            let mut best   = alpha[s] + row[base];
            let mut best_k = 0usize;
            for r in 0..n_base {
                let prev = crf_predecessor(s, r, n_base, n_states);
                let cand = alpha[prev] + row[base + r + 1];
                if cand > best {
                    best = cand;
                    best_k = r + 1;
                }
            }
            next[s] = best;
            back[t * n_states + s] = best_k as u8;
        }
        std::mem::swap(&mut alpha, &mut next);
    }

    // ── Traceback ─────────────────────────────────────────────────────────────
    let mut state = argmax(&alpha);
    let mut bases = Vec::new();
    for t in (0..scores.steps).rev() {
        let k = back[t * n_states + state] as usize;
        if k > 0 {
            bases.push(state % n_base);
            state = crf_predecessor(state, k - 1, n_base, n_states);
        }
    }
    bases.reverse();
    Ok(bases)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn one_hot_rows(path: &[usize], classes: usize) -> ScoreMatrix {
        let mut data = vec![0.0; path.len() * classes];
        for (t, &c) in path.iter().enumerate() {
            data[t * classes + c] = 1.0;
        }
        ScoreMatrix::new(path.len(), classes, data)
    }

    #[test]
    fn test_ctc_greedy_collapses_and_drops_blank() {
        let scores = one_hot_rows(&[1, 1, 0, 1, 2, 2, 0], 5);
        assert_eq!(ctc_greedy(&scores), vec![1, 1, 2]);
    }

    #[test]
    fn test_ctc_greedy_all_blank() {
        let scores = one_hot_rows(&[0, 0, 0], 5);
        assert!(ctc_greedy(&scores).is_empty());
    }

    #[test]
    fn test_predecessor_state_len_one() {
        // With one base of history the predecessor is just r
        for s in 0..4 {
            for r in 0..4 {
                assert_eq!(crf_predecessor(s, r, 4, 4), r);
            }
        }
    }

    #[test]
    fn test_predecessor_shifts_kmer() {
        // state_len 2: state "CG" (1*4+2 = 6) comes from "xC" = r*4 + 1
        let n_states = crf_states(4, 2);
        assert_eq!(crf_predecessor(6, 0, 4, n_states), 1);
        assert_eq!(crf_predecessor(6, 3, 4, n_states), 13);
    }

    #[test]
    fn test_viterbi_follows_forced_path() {
        // n_base 4, state_len 1: 4 states, 5 transitions each
        let (n_base, n_trans, steps) = (4, 5, 4);
        let classes = 4 * n_trans;
        let mut data = vec![-10.0f32; steps * classes];
        let mut set = |t: usize, s: usize, k: usize| data[t * classes + s * n_trans + k] = 5.0;
        set(0, 0, 1); // A (from A)
        set(1, 1, 1); // C from A
        set(2, 1, 0); // stay
        set(3, 2, 2); // G from C
        let scores = ScoreMatrix::new(steps, classes, data);
        assert_eq!(viterbi_crf(&scores, n_base, 1).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_viterbi_all_stay() {
        let classes = 4 * 5;
        let mut data = vec![-1.0f32; 3 * classes];
        for t in 0..3 {
            for s in 0..4 {
                data[t * classes + s * 5] = 0.0;
            }
        }
        let scores = ScoreMatrix::new(3, classes, data);
        assert!(viterbi_crf(&scores, 4, 1).unwrap().is_empty());
    }

    #[test]
    fn test_viterbi_rejects_mismatched_width() {
        // 64 * 5 columns are a state_len 3 head; state_len 5 needs 1024 * 5
        let scores = ScoreMatrix::new(2, 64 * 5, vec![0.0; 2 * 64 * 5]);
        let err = viterbi_crf(&scores, 4, 5).unwrap_err();
        assert_eq!(err.expected, 1024 * 5);
        assert_eq!(err.found, 320);

        let empty = ScoreMatrix::new(0, 7, Vec::new());
        assert!(viterbi_crf(&empty, 4, 1).is_err());
    }
}
