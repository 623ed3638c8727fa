// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Turns raw corpus bytes into fixed-shape token batches.
//
//   corpus file(s)
//       │
//       ▼
//   CorpusLoader      → reads files as raw bytes
//       │
//       ▼
//   ByteChunker       → fixed-length byte or bit token sequences
//       │
//       ▼
//   split_train_eval  → seeded shuffle + train/eval split
//       │
//       ▼
//   SequenceDataset   → BatchStream of [batch_size, seq_len] batches
//       │
//       ▼
//   TokenBatcher      → Int tensor on the training device
//
// The training core only ever sees the BatchStream trait and
// TokenBatcher, so tests can feed it synthetic data.

/// Reads corpus files as raw bytes
pub mod corpus;

/// Splits byte strings into fixed-length token sequences
pub mod chunker;

/// Seeded train/eval split
pub mod splitter;

/// Fixed-shape batch streams over token sequences
pub mod dataset;

/// Host batch → device tensor
pub mod batcher;

use anyhow::Result;

use crate::data::{
    chunker::ByteChunker,
    corpus::CorpusLoader,
    dataset::SequenceDataset,
    splitter::split_train_eval,
};

/// Parameters of the train/eval stream pair.
#[derive(Debug, Clone)]
pub struct DataSettings {
    pub corpus:           String,
    pub chunk_size:       usize,
    pub split_percentage: f64,
    pub batch_size:       usize,
    pub use_bits:         bool,
    pub seed:             u64,
}

/// Build the (train, eval) batch streams for a corpus.
/// The training stream reshuffles every pass; evaluation is ordered.
pub fn create_data_streams(settings: &DataSettings) -> Result<(SequenceDataset, SequenceDataset)> {
    let files   = CorpusLoader::new(&settings.corpus).load_all()?;
    let chunker = ByteChunker::new(settings.chunk_size, settings.use_bits);

    let sequences: Vec<Vec<u32>> = files
        .iter()
        .flat_map(|f| chunker.chunk(&f.bytes))
        .collect();
    tracing::info!(
        "Chunked corpus into {} sequences of {} tokens",
        sequences.len(),
        settings.chunk_size
    );

    let (train, eval) = split_train_eval(sequences, settings.split_percentage, settings.seed);
    let train = SequenceDataset::new(train, settings.batch_size, true);
    let eval  = SequenceDataset::new(eval, settings.batch_size, false);
    tracing::info!(
        "Train stream: {} batches, eval stream: {} batches",
        train.batch_count(),
        eval.batch_count()
    );
    Ok((train, eval))
}
