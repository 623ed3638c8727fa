use rand::seq::SliceRandom;

use crate::domain::{batch::TokenBatch, traits::BatchStream};

/// A set of equally long token sequences served as fixed-shape batches.
///
/// The last partial batch of every pass is dropped so that each
/// batch is exactly `[batch_size, seq_len]`.
pub struct SequenceDataset {
    sequences:  Vec<Vec<u32>>,
    batch_size: usize,
    shuffle:    bool,
}

impl SequenceDataset {
    pub fn new(sequences: Vec<Vec<u32>>, batch_size: usize, shuffle: bool) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");
        Self { sequences, batch_size, shuffle }
    }

    /// `count` copies of the same sequence, in order.
    pub fn repeated(sequence: Vec<u32>, count: usize, batch_size: usize) -> Self {
        Self::new(vec![sequence; count], batch_size, false)
    }

    pub fn batch_count(&self) -> usize { self.sequences.len() / self.batch_size }
}

impl BatchStream for SequenceDataset {
    fn batches(&self) -> Box<dyn Iterator<Item = TokenBatch> + '_> {
        let mut order: Vec<usize> = (0..self.sequences.len()).collect();
        if self.shuffle {
            order.shuffle(&mut rand::thread_rng());
        }
        let batch_size = self.batch_size;

        Box::new((0..self.batch_count()).map(move |b| {
            let rows: Vec<Vec<u32>> = order[b * batch_size..(b + 1) * batch_size]
                .iter()
                .map(|&i| self.sequences[i].clone())
                .collect();
            TokenBatch::from_rows(&rows)
        }))
    }
}
