//! Shared fixtures for the ml tests: a CPU autodiff backend and a
//! model small enough to train for a few hundred steps in a test.

use crate::data::dataset::SequenceDataset;
use crate::ml::model::AutoencoderConfig;

pub type TestBackend = burn::backend::Autodiff<burn::backend::NdArray>;

pub const SEQ_LEN: usize = 8;
pub const NTOKENS: usize = 16;

pub fn tiny_model_config() -> AutoencoderConfig {
    AutoencoderConfig::new(NTOKENS, 16, 32, 2, 2, 0.0, SEQ_LEN, 2)
}

/// `batches` all-zero batches of shape [4, SEQ_LEN].
pub fn zero_stream(batches: usize) -> SequenceDataset {
    SequenceDataset::repeated(vec![0; SEQ_LEN], batches * 4, 4)
}

/// Deterministic, varied sequences so latent vectors differ.
pub fn patterned_stream(batches: usize) -> SequenceDataset {
    let sequences: Vec<Vec<u32>> = (0..batches * 4)
        .map(|i| (0..SEQ_LEN).map(|j| ((i * 3 + j * 5) % NTOKENS) as u32).collect())
        .collect();
    SequenceDataset::new(sequences, 4, false)
}
