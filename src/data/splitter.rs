// ============================================================
// Layer 4 — Train/Eval Splitter
// ============================================================
// Shuffles sequences and splits them into a training set and
// an evaluation set.
//
// The shuffle is seeded. A resumed run rebuilds its data from
// scratch, and an unseeded split would leak training
// sequences into the evaluation set after every restart.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Shuffle `samples` with `seed` and split into (train, eval).
///
/// `train_fraction` is clamped to [0, 1]; 0.8 keeps 80% for training.
pub fn split_train_eval<T>(mut samples: Vec<T>, train_fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let total    = samples.len();
    let fraction = train_fraction.clamp(0.0, 1.0);
    let split_at = (((total as f64) * fraction).round() as usize).min(total);

    let eval = samples.split_off(split_at);

    tracing::debug!(
        "Dataset split: {} training, {} evaluation (seed {})",
        samples.len(),
        eval.len(),
        seed,
    );

    (samples, eval)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correct_split_sizes() {
        let items: Vec<usize> = (0..100).collect();
        let (train, eval)     = split_train_eval(items, 0.8, 7);
        assert_eq!(train.len(), 80);
        assert_eq!(eval.len(),  20);
    }

    #[test]
    fn test_same_seed_same_split() {
        let (a, _) = split_train_eval((0..50).collect::<Vec<usize>>(), 0.5, 42);
        let (b, _) = split_train_eval((0..50).collect::<Vec<usize>>(), 0.5, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn test_all_items_preserved() {
        let (mut train, eval) = split_train_eval((0..50).collect::<Vec<usize>>(), 0.7, 1);
        train.extend(eval);
        train.sort();
        assert_eq!(train, (0..50).collect::<Vec<usize>>());
    }

    #[test]
    fn test_empty_dataset() {
        let (train, eval) = split_train_eval(Vec::<usize>::new(), 0.8, 0);
        assert!(train.is_empty());
        assert!(eval.is_empty());
    }
}
