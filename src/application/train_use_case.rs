// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Runs one training job end to end:
//
//   Step 1: Validate the configuration    (fail before any tensor)
//   Step 2: Build train / eval streams     (Layer 4 - data)
//   Step 3: Resolve the device once        (Layer 5 - ml)
//   Step 4: Open checkpoint dirs, save cfg (Layer 6 - infra)
//   Step 5: Build the trainer, restore     (Layer 5 - ml)
//   Step 6: Run the phase state machine    (Layer 5 - ml)

use anyhow::Result;
use burn::optim::AdamConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::data::{create_data_streams, DataSettings};
use crate::domain::{error::TrainError, phase::ModelRole};
use crate::infra::{checkpoint::PhaseCheckpoints, metrics::CsvMetricSink};
use crate::ml::{
    codebook_init::CodebookInitializer,
    default_device,
    evaluator::Evaluator,
    kmeans::ClusterAlgorithm,
    loss::{DiversityPhase, LossComposer, DEFAULT_DIVERSITY_SUBSAMPLE},
    model::{Autoencoder, AutoencoderConfig},
    trainer::{Trainer, TrainerSettings, TrainingReport},
    TrainBackend,
};

// ─── Training Configuration ──────────────────────────────────────────────────
// Every hyperparameter of a run, flat. Saved as train_config.json
// next to the checkpoints so `evaluate` can rebuild the model.
// Missing JSON fields fall back to the debug preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    // data
    pub corpus:              String,
    pub chunk_size:          usize,
    pub split_percentage:    f64,
    pub batch_size:          usize,
    pub use_bits:            bool,
    pub seed:                u64,

    // optimisation
    pub lr:                  f64,
    pub max_grad_norm:       f64,
    pub diversity_weight:    f64,
    pub diversity_subsample: usize,
    pub diversity_phase:     DiversityPhase,

    // model
    pub ntokens:             usize,
    pub d_model:             usize,
    pub d_hid:               usize,
    pub nlayers:             usize,
    pub nhead:               usize,
    pub dropout:             f64,
    pub compression_factor:  usize,

    // vector quantisation
    pub use_vq:              bool,
    /// Codebook size
    pub num_latent_vectors:  usize,
    pub steps_before_vq:     usize,
    pub kmeans_gather_steps: usize,
    pub kmeans_steps:        usize,
    /// "minibatch" or "tensor"
    pub kmeans_algo:         String,

    // schedule
    pub eval_every:          usize,
    pub discrete_cycles:     usize,
    pub num_evals:           usize,
    pub samples_to_print:    usize,
    pub log_interval:        usize,

    // checkpoints
    pub run_id:              String,
    pub checkpoint_root:     String,
    pub max_checkpoints:     Option<usize>,
    pub restore_dir:         Option<String>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self::debug()
    }
}

impl TrainConfig {
    /// Small model, short continuous phase, host k-means.
    pub fn debug() -> Self {
        Self {
            corpus:              "data/corpus".to_string(),
            chunk_size:          120,
            split_percentage:    0.8,
            batch_size:          32,
            use_bits:            false,
            seed:                42,

            lr:                  1e-3,
            max_grad_norm:       0.5,
            diversity_weight:    1.0,
            diversity_subsample: DEFAULT_DIVERSITY_SUBSAMPLE,
            diversity_phase:     DiversityPhase::Quantized,

            ntokens:             256,
            d_model:             300,
            d_hid:               512,
            nlayers:             4,
            nhead:               4,
            dropout:             0.2,
            compression_factor:  4,

            use_vq:              true,
            num_latent_vectors:  8000,
            steps_before_vq:     500,
            kmeans_gather_steps: 25,
            kmeans_steps:        25,
            kmeans_algo:         ClusterAlgorithm::MiniBatch.name().to_string(),

            eval_every:          100,
            discrete_cycles:     100,
            num_evals:           1,
            samples_to_print:    1,
            log_interval:        1,

            run_id:              "local_run".to_string(),
            checkpoint_root:     "checkpoints".to_string(),
            max_checkpoints:     None,
            restore_dir:         None,
        }
    }

    /// Full-size run: 1 KiB chunks, 24k codebook, device k-means.
    pub fn full() -> Self {
        Self {
            chunk_size:          1024,
            batch_size:          128,
            lr:                  1e-4,
            diversity_weight:    50.0,
            d_model:             512,
            num_latent_vectors:  24_000,
            compression_factor:  8,
            steps_before_vq:     2000,
            kmeans_gather_steps: 500,
            kmeans_steps:        20,
            kmeans_algo:         ClusterAlgorithm::Tensor.name().to_string(),
            eval_every:          1000,
            log_interval:        10,
            ..Self::debug()
        }
    }

    /// Reject configurations that cannot train, before any tensor exists.
    pub fn validate(&self) -> Result<(), TrainError> {
        if self.batch_size == 0 {
            return Err(TrainError::ZeroBatchSize);
        }
        if self.chunk_size == 0 {
            return Err(TrainError::ZeroChunkSize);
        }
        if self.use_vq && self.num_latent_vectors == 0 {
            return Err(TrainError::EmptyCodebook);
        }
        // Encoder, decoder and optimizer of one step are pruned as separate files
        let required = ModelRole::ALL.len();
        if let Some(max) = self.max_checkpoints.filter(|&max| max < required) {
            return Err(TrainError::CheckpointLimitTooSmall { max, required });
        }
        self.model_config().validate()?;
        self.cluster_algorithm()?;
        if self.use_bits && self.chunk_size % 8 != 0 {
            return Err(TrainError::BitChunkNotByteAligned(self.chunk_size));
        }
        let required = if self.use_bits { 2 } else { 256 };
        if self.ntokens < required {
            return Err(TrainError::AlphabetTooSmall { ntokens: self.ntokens, required });
        }
        Ok(())
    }

    pub fn cluster_algorithm(&self) -> Result<ClusterAlgorithm, TrainError> {
        self.kmeans_algo.parse()
    }

    pub fn model_config(&self) -> AutoencoderConfig {
        AutoencoderConfig::new(
            self.ntokens, self.d_model, self.d_hid, self.nlayers,
            self.nhead, self.dropout, self.chunk_size, self.compression_factor,
        )
    }

    pub fn data_settings(&self) -> DataSettings {
        DataSettings {
            corpus:           self.corpus.clone(),
            chunk_size:       self.chunk_size,
            split_percentage: self.split_percentage,
            batch_size:       self.batch_size,
            use_bits:         self.use_bits,
            seed:             self.seed,
        }
    }

    pub fn evaluator(&self) -> Evaluator {
        Evaluator {
            num_evals:         self.num_evals,
            print_predictions: self.samples_to_print > 0,
            samples_to_print:  self.samples_to_print,
        }
    }

    pub fn trainer_settings(&self) -> Result<TrainerSettings, TrainError> {
        Ok(TrainerSettings {
            learning_rate:   self.lr,
            steps_before_vq: self.steps_before_vq,
            use_vq:          self.use_vq,
            eval_every:      self.eval_every,
            discrete_cycles: self.discrete_cycles,
            max_grad_norm:   self.max_grad_norm,
            log_interval:    self.log_interval,
            max_checkpoints: self.max_checkpoints,
            composer: LossComposer::new(self.diversity_weight, self.diversity_subsample, self.diversity_phase),
            codebook_init: CodebookInitializer {
                algorithm:        self.cluster_algorithm()?,
                vocab_size:       self.num_latent_vectors,
                max_gather_steps: self.kmeans_gather_steps,
                max_kmeans_steps: self.kmeans_steps,
            },
            evaluator: self.evaluator(),
        })
    }

    pub fn metrics_dir(&self) -> PathBuf {
        Path::new(&self.checkpoint_root).join(format!("{}_metrics", self.run_id))
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<TrainingReport> {
        let cfg = &self.config;

        // ── Step 1: Configuration violations are fatal up front ───────────────
        cfg.validate()?;
        let settings = cfg.trainer_settings()?;

        // ── Step 2: Data streams ──────────────────────────────────────────────
        tracing::info!("Loading corpus from '{}'", cfg.corpus);
        let (train, eval) = create_data_streams(&cfg.data_settings())?;

        // ── Step 3: One device for the whole run ──────────────────────────────
        let device = default_device();

        // ── Step 4: Checkpoint dirs + config for `evaluate` ───────────────────
        let checkpoints = PhaseCheckpoints::open(&cfg.checkpoint_root, &cfg.run_id)?;
        checkpoints.continuous.save_config(cfg)?;
        checkpoints.discrete.save_config(cfg)?;
        let sink = CsvMetricSink::new(cfg.metrics_dir())?;
        tracing::info!("Writing metrics to '{}'", sink.csv_path().display());

        // ── Step 5: Trainer (Adam over encoder + decoder + codebook) ──────────
        let optimizer = AdamConfig::new()
            .with_epsilon(1e-8)
            .init::<TrainBackend, Autoencoder<TrainBackend>>();
        let mut trainer = Trainer::new(&cfg.model_config(), settings, checkpoints, optimizer, device)
            .with_sink(Box::new(sink));
        if let Some(dir) = &cfg.restore_dir {
            trainer = trainer.restore(Path::new(dir))?;
        }

        // ── Step 6: Continuous → CodebookInit → Discrete ──────────────────────
        let report = trainer.run(&train, &eval)?;
        if let Some(last) = report.cycles.last() {
            tracing::info!(
                "Final discrete evaluation: loss {:.4}, accuracy {:.2}%",
                last.eval.mean_loss, last.eval.accuracy_percent
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        assert_eq!(TrainConfig::debug().validate(), Ok(()));
        assert_eq!(TrainConfig::full().validate(), Ok(()));
        assert_eq!(TrainConfig::default(), TrainConfig::debug());
    }

    #[test]
    fn test_unknown_cluster_algorithm_is_rejected() {
        let cfg = TrainConfig { kmeans_algo: "sklearn".into(), ..TrainConfig::debug() };
        assert!(matches!(
            cfg.validate(),
            Err(TrainError::UnsupportedClusterAlgorithm { ref name, .. }) if name == "sklearn"
        ));
    }

    #[test]
    fn test_architecture_violations_are_rejected() {
        let cfg = TrainConfig { nlayers: 3, ..TrainConfig::debug() };
        assert_eq!(cfg.validate(), Err(TrainError::OddLayerCount(3)));

        let cfg = TrainConfig { compression_factor: 7, ..TrainConfig::debug() };
        assert!(matches!(cfg.validate(), Err(TrainError::WidthNotDivisible { d_model: 300, compression_factor: 7 })));
    }

    #[test]
    fn test_bit_mode_constraints() {
        let cfg = TrainConfig { use_bits: true, chunk_size: 20, compression_factor: 4, ..TrainConfig::debug() };
        assert_eq!(cfg.validate(), Err(TrainError::BitChunkNotByteAligned(20)));

        let cfg = TrainConfig { use_bits: true, chunk_size: 64, ntokens: 2, ..TrainConfig::debug() };
        assert_eq!(cfg.validate(), Ok(()));

        let cfg = TrainConfig { ntokens: 2, ..TrainConfig::debug() };
        assert_eq!(cfg.validate(), Err(TrainError::AlphabetTooSmall { ntokens: 2, required: 256 }));
    }

    #[test]
    fn test_zero_sizes_are_rejected() {
        let cfg = TrainConfig { batch_size: 0, ..TrainConfig::debug() };
        assert_eq!(cfg.validate(), Err(TrainError::ZeroBatchSize));

        let cfg = TrainConfig { chunk_size: 0, ..TrainConfig::debug() };
        assert_eq!(cfg.validate(), Err(TrainError::ZeroChunkSize));

        let cfg = TrainConfig { num_latent_vectors: 0, ..TrainConfig::debug() };
        assert_eq!(cfg.validate(), Err(TrainError::EmptyCodebook));

        // Without VQ the codebook is never built
        let cfg = TrainConfig { num_latent_vectors: 0, use_vq: false, ..TrainConfig::debug() };
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn test_checkpoint_limit_keeps_whole_sets() {
        let cfg = TrainConfig { max_checkpoints: Some(2), ..TrainConfig::debug() };
        assert_eq!(cfg.validate(), Err(TrainError::CheckpointLimitTooSmall { max: 2, required: 3 }));

        let cfg = TrainConfig { max_checkpoints: Some(3), ..TrainConfig::debug() };
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn test_partial_json_falls_back_to_debug_preset() {
        let cfg: TrainConfig = serde_json::from_str(
            r#"{ "lr": 0.01, "kmeans_algo": "tensor", "diversity_phase": "continuous" }"#,
        ).unwrap();
        assert_eq!(cfg.lr, 0.01);
        assert_eq!(cfg.cluster_algorithm(), Ok(ClusterAlgorithm::Tensor));
        assert_eq!(cfg.diversity_phase, DiversityPhase::Continuous);
        assert_eq!(cfg.d_model, TrainConfig::debug().d_model);
    }

    #[test]
    fn test_derived_settings() {
        let cfg = TrainConfig::full();
        let model = cfg.model_config();
        assert_eq!(model.max_len, 1024);
        assert_eq!(model.d_latent(), 64);

        let settings = cfg.trainer_settings().unwrap();
        assert_eq!(settings.codebook_init.vocab_size, 24_000);
        assert_eq!(settings.codebook_init.algorithm, ClusterAlgorithm::Tensor);
        assert_eq!(settings.evaluator.num_evals, 1);
        assert!(cfg.metrics_dir().ends_with("local_run_metrics"));
    }
}
