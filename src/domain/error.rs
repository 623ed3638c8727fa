// ============================================================
// Layer 3 — Training Errors
// ============================================================
// Every failure the training core can detect on its own.
//
//   Configuration violations — found before the first step
//   Consistency violations   — mismatched checkpoint pairs
//   Degenerate input         — empty streams or feature pools
//
// A missing checkpoint is NOT an error: it is a cold start
// and is only logged. I/O failures are reported through
// anyhow with file context instead of living here.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrainError {
    #[error("unsupported clustering algorithm '{name}' (expected one of: {supported})")]
    UnsupportedClusterAlgorithm { name: String, supported: String },

    #[error("nlayers ({0}) must be even: half the layers run before pooling, half after")]
    OddLayerCount(usize),

    #[error("d_model ({d_model}) must be divisible by compression_factor ({compression_factor})")]
    WidthNotDivisible { d_model: usize, compression_factor: usize },

    #[error("d_model ({d_model}) must be divisible by nhead ({nhead})")]
    HeadsNotDivisible { d_model: usize, nhead: usize },

    #[error("chunk_size ({chunk_size}) must be divisible by compression_factor ({compression_factor})")]
    SequenceNotDivisible { chunk_size: usize, compression_factor: usize },

    #[error("batch_size must be at least 1")]
    ZeroBatchSize,

    #[error("chunk_size must be at least 1")]
    ZeroChunkSize,

    #[error("num_latent_vectors must be at least 1 when VQ is enabled")]
    EmptyCodebook,

    #[error("max_checkpoints ({max}) would split a checkpoint set; keep at least {required}")]
    CheckpointLimitTooSmall { max: usize, required: usize },

    #[error("chunk_size ({0}) must be a multiple of 8 when encoding bits")]
    BitChunkNotByteAligned(usize),

    #[error("ntokens ({ntokens}) cannot represent the {required} input token values")]
    AlphabetTooSmall { ntokens: usize, required: usize },

    #[error("encoder checkpoint is at step {encoder} but decoder checkpoint is at step {decoder}")]
    CheckpointStepMismatch { encoder: usize, decoder: usize },

    #[error("evaluation stream yielded no batches; accuracy is undefined")]
    EmptyEvalStream,

    #[error("training stream yielded no batches")]
    EmptyTrainStream,

    #[error("no feature vectors were gathered for clustering (max_gather_steps = {0})")]
    EmptyFeaturePool(usize),

    #[error("gathered {pool} feature vectors but the codebook needs {vocab_size}")]
    FeaturePoolTooSmall { pool: usize, vocab_size: usize },

    #[error("restore directory '{0}' names neither a continuous nor a discrete checkpoint set")]
    UnrecognizedRestoreDir(String),
}
