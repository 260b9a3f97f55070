// ============================================================
// Layer 4 — Train/Validation Splitter
// ============================================================
// Used when a dataset has no validation/ subdirectory: the
// tail of the training set is held out.
//
// The split is a plain cut, not a shuffle, so the same
// directory always yields the same validation set and a
// resumed run validates on exactly the chunks it did before.
// Shuffling for training happens later, in the DataLoader.
//
// Split ratio: 97% training, 3% validation
//
// Reference: Rust Book §8 (Vectors)

/// Fraction of chunks kept for training.
pub const TRAIN_FRACTION: f64 = 0.97;

/// Split `samples` into (train, validation) at
/// floor(len · train_fraction).
pub fn split_train_val<T>(mut samples: Vec<T>, train_fraction: f64) -> (Vec<T>, Vec<T>) {
    let total    = samples.len();
    let split_at = ((total as f64) * train_fraction).floor() as usize;
    let split_at = split_at.min(total);

    // split_off(n) removes elements [n..] and returns them
    let val = samples.split_off(split_at);

    tracing::debug!(
        "Dataset split: {} training, {} validation",
        samples.len(),
        val.len(),
    );

    (samples, val)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correct_split_sizes() {
        let items: Vec<usize> = (0..100).collect();
        let (train, val)      = split_train_val(items, TRAIN_FRACTION);
        assert_eq!(train.len(), 97);
        assert_eq!(val.len(),   3);
    }

    #[test]
    fn test_tail_is_held_out() {
        let items: Vec<usize> = (0..10).collect();
        let (train, val)      = split_train_val(items, 0.8);
        assert_eq!(train, (0..8).collect::<Vec<_>>());
        assert_eq!(val, vec![8, 9]);
    }

    #[test]
    fn test_floor_rounding() {
        // 33 · 0.97 = 32.01 → 32 kept
        let items: Vec<usize> = (0..33).collect();
        let (train, val)      = split_train_val(items, TRAIN_FRACTION);
        assert_eq!(train.len(), 32);
        assert_eq!(val.len(),   1);
    }

    #[test]
    fn test_empty_dataset() {
        let items: Vec<usize> = Vec::new();
        let (train, val)      = split_train_val(items, TRAIN_FRACTION);
        assert!(train.is_empty());
        assert!(val.is_empty());
    }
}
