// ============================================================
// Layer 2 — EvaluateUseCase
// ============================================================
// Scores a saved checkpoint set without training:
//
//   Step 1: Infer the phase from the directory name
//   Step 2: Rebuild the architecture from train_config.json
//   Step 3: Load the matched encoder / decoder pair
//   Step 4: Run the Evaluator over the eval stream
//
// The model is built on the inference backend directly, so no
// autodiff graph is ever recorded and dropout is inactive.

use anyhow::{bail, Result};
use burn::tensor::backend::AutodiffBackend;
use std::path::PathBuf;

use crate::application::train_use_case::TrainConfig;
use crate::data::create_data_streams;
use crate::domain::{
    error::TrainError,
    phase::{ModelRole, Phase},
};
use crate::infra::checkpoint::{restore_phase, CheckpointManager};
use crate::ml::{
    default_device,
    evaluator::EvalReport,
    model::{Autoencoder, Codebook},
    TrainBackend,
};

type InferenceBackend = <TrainBackend as AutodiffBackend>::InnerBackend;

pub struct EvaluateUseCase {
    restore_dir: PathBuf,
    /// Overrides the corpus recorded at training time
    corpus:      Option<String>,
    num_evals:   Option<usize>,
}

impl EvaluateUseCase {
    pub fn new(restore_dir: impl Into<PathBuf>, corpus: Option<String>, num_evals: Option<usize>) -> Self {
        Self { restore_dir: restore_dir.into(), corpus, num_evals }
    }

    pub fn execute(&self) -> Result<EvalReport> {
        // ── Step 1: Phase ─────────────────────────────────────────────────────
        let phase = restore_phase(&self.restore_dir)?;
        if !self.restore_dir.is_dir() {
            bail!("Checkpoint directory '{}' does not exist", self.restore_dir.display());
        }
        let manager = CheckpointManager::new(&self.restore_dir)?;

        // ── Step 2: Architecture ──────────────────────────────────────────────
        let mut cfg: TrainConfig = manager.load_config()?;
        if let Some(corpus) = &self.corpus {
            cfg.corpus = corpus.clone();
        }
        if let Some(num_evals) = self.num_evals {
            cfg.num_evals = num_evals;
        }
        cfg.validate()?;

        let (_, eval) = create_data_streams(&cfg.data_settings())?;
        let device    = default_device();

        // ── Step 3: Weights ───────────────────────────────────────────────────
        let model_cfg = cfg.model_config();
        let mut model: Autoencoder<InferenceBackend> = model_cfg.init(&device);
        if phase == Phase::Discrete {
            model = model.with_codebook(Codebook::zeros(cfg.num_latent_vectors, model_cfg.d_latent(), &device));
        }

        let (encoder, enc_step) = manager.load(ModelRole::Encoder, model.encoder, &device)?;
        let (decoder, dec_step) = manager.load(ModelRole::Decoder, model.decoder, &device)?;
        if enc_step != dec_step {
            return Err(TrainError::CheckpointStepMismatch { encoder: enc_step, decoder: dec_step }.into());
        }
        if enc_step == 0 {
            bail!("No encoder/decoder checkpoints in '{}'", self.restore_dir.display());
        }
        tracing::info!("Evaluating {} checkpoint at step {}", phase, enc_step);

        // ── Step 4: Evaluate ──────────────────────────────────────────────────
        let model = Autoencoder { encoder, decoder };
        cfg.evaluator().evaluate(&model, &eval, &device)
    }
}
