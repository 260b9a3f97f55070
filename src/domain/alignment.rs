// ============================================================
// Layer 3 — Alignment Accuracy
// ============================================================
// Scores a called sequence against its reference.
//
// The call is aligned to the reference with a local
// affine-gap alignment (Smith-Waterman with Gotoh's three
// matrices). Scoring follows the usual nucleotide setup:
//
//   match      +5
//   mismatch   -4
//   gap open    8   (cost of the first gapped position)
//   gap extend  4   (cost of every further position)
//
// From the traceback we count the CIGAR operations:
//   '=' matches, 'X' mismatches, 'I' insertions (bases in the
//   call only) and 'D' deletions (bases in the reference only).
//
//   identity = = / (= + X + I + D)
//   coverage = aligned reference span / len(reference)
//
// Low-coverage calls are scored 0 instead of failing, so one
// bad example never aborts a validation pass.
//
// Reference: Smith & Waterman (1981), Gotoh (1982)

use serde::{Deserialize, Serialize};

const MATCH:      i32 = 5;
const MISMATCH:   i32 = -4;
const GAP_OPEN:   i32 = 8;
const GAP_EXTEND: i32 = 4;

// Large enough to never win a max, small enough not to overflow.
const NEG_INF: i32 = i32::MIN / 4;

/// Summary of one local alignment between a reference and a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alignment {
    pub score:       i32,
    pub matches:     usize,
    pub mismatches:  usize,
    pub insertions:  usize,
    pub deletions:   usize,
    /// Aligned reference span, end exclusive
    pub ref_start:   usize,
    pub ref_end:     usize,
    /// Aligned call span, end exclusive
    pub query_start: usize,
    pub query_end:   usize,
}

impl Alignment {
    /// Number of CIGAR columns in the alignment.
    pub fn columns(&self) -> usize {
        self.matches + self.mismatches + self.insertions + self.deletions
    }

    /// Fraction of the reference covered by the aligned span.
    pub fn coverage(&self, ref_len: usize) -> f64 {
        if ref_len == 0 {
            return 0.0;
        }
        (self.ref_end - self.ref_start) as f64 / ref_len as f64
    }

    /// = / (= + X + I + D)
    pub fn identity(&self) -> f64 {
        let cols = self.columns();
        if cols == 0 {
            return 0.0;
        }
        self.matches as f64 / cols as f64
    }

    /// (= - I) / (= + X + D), clamped to [0, 1].
    pub fn balanced_identity(&self) -> f64 {
        let denom = self.matches + self.mismatches + self.deletions;
        if denom == 0 {
            return 0.0;
        }
        let num = self.matches as f64 - self.insertions as f64;
        (num / denom as f64).clamp(0.0, 1.0)
    }
}

// Traceback pointers for the three Gotoh matrices.
#[derive(Clone, Copy, PartialEq, Eq)]
enum From {
    Stop,
    Diag,
    Del,
    Ins,
}

#[inline]
fn substitution(a: u8, b: u8) -> i32 {
    if a.eq_ignore_ascii_case(&b) { MATCH } else { MISMATCH }
}

/// Local affine-gap alignment of `query` against `reference`.
///
/// Returns `None` when no positive-scoring local alignment exists,
/// which includes either input being empty.
pub fn align(reference: &str, query: &str) -> Option<Alignment> {
    let r = reference.as_bytes();
    let q = query.as_bytes();
    let (n, m) = (r.len(), q.len());
    if n == 0 || m == 0 {
        return None;
    }

    let w = m + 1;
    let idx = |i: usize, j: usize| i * w + j;

    // h: best score ending at (i, j); e: ending in a deletion;
    // f: ending in an insertion.
    let mut h = vec![0i32; (n + 1) * w];
    let mut e = vec![NEG_INF; (n + 1) * w];
    let mut f = vec![NEG_INF; (n + 1) * w];
    let mut h_from = vec![From::Stop; (n + 1) * w];
    // true when the gap was extended rather than opened
    let mut e_ext = vec![false; (n + 1) * w];
    let mut f_ext = vec![false; (n + 1) * w];

    let mut best = (0i32, 0usize, 0usize);

    for i in 1..=n {
        for j in 1..=m {
            let open_e = h[idx(i - 1, j)] - GAP_OPEN;
            let ext_e  = e[idx(i - 1, j)] - GAP_EXTEND;
            if ext_e > open_e {
                e[idx(i, j)] = ext_e;
                e_ext[idx(i, j)] = true;
            } else {
                e[idx(i, j)] = open_e;
            }

            let open_f = h[idx(i, j - 1)] - GAP_OPEN;
            let ext_f  = f[idx(i, j - 1)] - GAP_EXTEND;
            if ext_f > open_f {
                f[idx(i, j)] = ext_f;
                f_ext[idx(i, j)] = true;
            } else {
                f[idx(i, j)] = open_f;
            }

            let diag = h[idx(i - 1, j - 1)] + substitution(r[i - 1], q[j - 1]);

            let (mut score, mut from) = (0, From::Stop);
            if diag > score {
                score = diag;
                from = From::Diag;
            }
            if e[idx(i, j)] > score {
                score = e[idx(i, j)];
                from = From::Del;
            }
            if f[idx(i, j)] > score {
                score = f[idx(i, j)];
                from = From::Ins;
            }
            h[idx(i, j)] = score;
            h_from[idx(i, j)] = from;

            if score > best.0 {
                best = (score, i, j);
            }
        }
    }

    let (score, end_i, end_j) = best;
    if score <= 0 {
        return None;
    }

    // ── Traceback ─────────────────────────────────────────────────────────────
    let mut aln = Alignment {
        score,
        ref_end: end_i,
        query_end: end_j,
        ..Alignment::default()
    };
    let (mut i, mut j) = (end_i, end_j);
    let mut state = From::Diag;

    loop {
        match state {
            From::Diag => match h_from[idx(i, j)] {
                From::Stop => break,
                From::Diag => {
                    if r[i - 1].eq_ignore_ascii_case(&q[j - 1]) {
                        aln.matches += 1;
                    } else {
                        aln.mismatches += 1;
                    }
                    i -= 1;
                    j -= 1;
                }
                From::Del => state = From::Del,
                From::Ins => state = From::Ins,
            },
            From::Del => {
                aln.deletions += 1;
                let extended = e_ext[idx(i, j)];
                i -= 1;
                if !extended {
                    state = From::Diag;
                }
            }
            From::Ins => {
                aln.insertions += 1;
                let extended = f_ext[idx(i, j)];
                j -= 1;
                if !extended {
                    state = From::Diag;
                }
            }
            From::Stop => break,
        }
    }

    aln.ref_start = i;
    aln.query_start = j;
    Some(aln)
}

/// Identity of `call` against `reference`, or 0.0 when the call is
/// empty, nothing aligns, or the aligned reference span covers less
/// than `min_coverage` of the reference.
pub fn accuracy(reference: &str, call: &str, min_coverage: f64) -> f64 {
    match align(reference, call) {
        Some(aln) if aln.coverage(reference.len()) >= min_coverage => aln.identity(),
        _ => 0.0,
    }
}

/// Like [`accuracy`] but penalises insertions against matches:
/// (= - I) / (= + X + D), clamped to [0, 1].
pub fn balanced_accuracy(reference: &str, call: &str, min_coverage: f64) -> f64 {
    match align(reference, call) {
        Some(aln) if aln.coverage(reference.len()) >= min_coverage => aln.balanced_identity(),
        _ => 0.0,
    }
}

/// Arithmetic mean, 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median (average of the two middle values for even lengths).
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
