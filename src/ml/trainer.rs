// ============================================================
// Layer 5 — Training Orchestrator
// ============================================================
// Drives one run through the phase state machine:
//
//   Continuous    train `steps_before_vq - step` steps with the
//                 encoder unquantised, checkpoint, evaluate;
//                 skipped entirely once step >= steps_before_vq
//   CodebookInit  cluster encoder outputs into `vocab_size`
//                 centroids and install them (once)
//   Discrete      `discrete_cycles` × (train `eval_every`
//                 steps, evaluate, checkpoint, prune)
//
// A restore directory short-circuits the machine: continuous
// snapshots resume Continuous at their step, discrete
// snapshots jump straight into the Discrete loop.
//
// One training step:
//   forward → LossComposer → backward → global-norm clip
//   → Adam step
//
// The orchestrator is the only owner of the trainable model.
// The evaluator and the codebook initializer receive an
// inference copy from `valid()`.

use anyhow::Result;
use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::path::Path;

use crate::data::batcher::TokenBatcher;
use crate::domain::{
    batch::{format_tokens, TokenBatch},
    error::TrainError,
    loss::LossRecord,
    phase::{ModelRole, Phase},
    traits::{BatchStream, MetricSink},
};
use crate::infra::checkpoint::{restore_phase, CheckpointManager, PhaseCheckpoints};
use crate::ml::{
    clip::clip_grad_norm,
    codebook_init::CodebookInitializer,
    evaluator::{EvalReport, Evaluator},
    loss::LossComposer,
    model::{Autoencoder, AutoencoderConfig, AutoencoderOutput, Codebook, EncoderOutput, VqMode},
};

/// Steps between logged ground-truth / reconstruction samples.
const SAMPLE_LOG_EVERY: usize = 100;

#[derive(Debug, Clone)]
pub struct TrainerSettings {
    pub learning_rate:   f64,
    /// Global step at which the codebook is built
    pub steps_before_vq: usize,
    /// When false the run ends after the continuous phase
    pub use_vq:          bool,
    /// Training steps per discrete cycle
    pub eval_every:      usize,
    pub discrete_cycles: usize,
    pub max_grad_norm:   f64,
    pub log_interval:    usize,
    /// Artifact limit per checkpoint directory; None keeps everything
    pub max_checkpoints: Option<usize>,
    pub composer:        LossComposer,
    pub codebook_init:   CodebookInitializer,
    pub evaluator:       Evaluator,
}

/// One finished discrete cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Global step after the cycle
    pub step:      usize,
    pub mean_loss: LossRecord,
    pub eval:      EvalReport,
}

#[derive(Debug, Clone, Default)]
pub struct TrainingReport {
    pub final_step:      usize,
    /// Absent when the continuous phase was skipped on restore
    pub continuous_eval: Option<EvalReport>,
    pub cycles:          Vec<CycleReport>,
}

pub struct Trainer<B: AutodiffBackend, O: Optimizer<Autoencoder<B>, B>> {
    settings:    TrainerSettings,
    d_latent:    usize,
    device:      B::Device,
    batcher:     TokenBatcher<B>,
    model:       Autoencoder<B>,
    optimizer:   O,
    checkpoints: PhaseCheckpoints,
    sink:        Option<Box<dyn MetricSink>>,
    phase:       Phase,
    /// Completed optimizer steps
    step:        usize,
}

impl<B: AutodiffBackend, O: Optimizer<Autoencoder<B>, B>> Trainer<B, O> {
    pub fn new(
        model_config: &AutoencoderConfig,
        settings:     TrainerSettings,
        checkpoints:  PhaseCheckpoints,
        optimizer:    O,
        device:       B::Device,
    ) -> Self {
        let model = model_config.init::<B>(&device);
        tracing::info!(
            "Model ready: {} layers, d_model={}, {} latent vectors of width {}",
            model_config.nlayers,
            model_config.d_model,
            model_config.latent_len(),
            model_config.d_latent()
        );
        Self {
            settings,
            d_latent: model_config.d_latent(),
            batcher: TokenBatcher::new(device.clone()),
            device,
            model,
            optimizer,
            checkpoints,
            sink: None,
            phase: Phase::Continuous,
            step: 0,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn MetricSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn phase(&self) -> Phase { self.phase }

    pub fn step(&self) -> usize { self.step }

    pub fn model(&self) -> &Autoencoder<B> { &self.model }

    // ─── Restore ──────────────────────────────────────────────────────────────

    /// Resume from a continuous or discrete checkpoint directory.
    ///
    /// Encoder and decoder must carry the same step. A directory with
    /// no artifacts is a cold start and leaves the trainer untouched.
    pub fn restore(mut self, dir: &Path) -> Result<Self> {
        let phase   = restore_phase(dir)?;
        let manager = CheckpointManager::new(dir)?;

        let mut model = self.model.clone();
        if phase == Phase::Discrete {
            // Shape placeholder; the checkpoint overwrites the values
            let vocab_size = self.settings.codebook_init.vocab_size;
            model = model.with_codebook(Codebook::zeros(vocab_size, self.d_latent, &self.device));
        }

        let (encoder, enc_step) = manager.load(ModelRole::Encoder, model.encoder, &self.device)?;
        let (decoder, dec_step) = manager.load(ModelRole::Decoder, model.decoder, &self.device)?;
        if enc_step != dec_step {
            return Err(TrainError::CheckpointStepMismatch { encoder: enc_step, decoder: dec_step }.into());
        }
        if enc_step == 0 {
            tracing::info!("Nothing to restore in {}; training from scratch", dir.display());
            return Ok(self);
        }

        let (optimizer, restored) =
            manager.load_optimizer::<B, Autoencoder<B>, O>(self.optimizer, enc_step, &self.device)?;
        if !restored {
            tracing::warn!("No optimizer state at step {}; Adam moments restart from zero", enc_step);
        }

        self.model     = Autoencoder { encoder, decoder };
        self.optimizer = optimizer;
        self.phase     = phase;
        self.step      = enc_step;
        tracing::info!("Resuming {} training at step {}", phase, enc_step);
        Ok(self)
    }

    // ─── State machine ────────────────────────────────────────────────────────

    pub fn run(&mut self, train: &dyn BatchStream, eval: &dyn BatchStream) -> Result<TrainingReport> {
        let mut report = TrainingReport::default();

        if self.phase == Phase::Continuous {
            let target = self.settings.steps_before_vq;
            if self.step < target {
                tracing::info!("Phase: continuous training, steps {}..{}", self.step, target);
                let records = self.train_steps(train, target - self.step)?;
                log_mean("Continuous", self.step, &LossRecord::mean(&records));
                self.checkpoint(Phase::Continuous)?;
                report.continuous_eval = Some(self.evaluate(eval)?);
            } else {
                tracing::info!("Step {} already past steps_before_vq={}, skipping continuous phase", self.step, target);
            }

            if !self.settings.use_vq {
                tracing::info!("VQ disabled; stopping after the continuous phase");
                report.final_step = self.step;
                return Ok(report);
            }
            self.phase = Phase::CodebookInit;
        }

        if self.phase == Phase::CodebookInit {
            self.install_codebook(train)?;
            self.phase = Phase::Discrete;
        }

        for cycle in 1..=self.settings.discrete_cycles {
            tracing::info!("Discrete cycle {}/{} from step {}", cycle, self.settings.discrete_cycles, self.step);
            let records = self.train_steps(train, self.settings.eval_every)?;
            let mean    = LossRecord::mean(&records);
            log_mean("Discrete", self.step, &mean);

            let eval_report = self.evaluate(eval)?;
            self.checkpoint(Phase::Discrete)?;
            if let Some(max) = self.settings.max_checkpoints {
                if let Err(e) = self.checkpoints.discrete.prune(max) {
                    tracing::warn!("Checkpoint pruning failed: {:#}", e);
                }
            }
            report.cycles.push(CycleReport { step: self.step, mean_loss: mean, eval: eval_report });
        }

        tracing::info!("Training complete at step {}", self.step);
        report.final_step = self.step;
        Ok(report)
    }

    fn install_codebook(&mut self, train: &dyn BatchStream) -> Result<()> {
        tracing::info!("Phase: codebook initialisation at step {}", self.step);
        let codebook = self
            .settings
            .codebook_init
            .initialize::<B>(&self.model.encoder.valid(), train, &self.device)?;
        self.model = self.model.clone().with_codebook(codebook);
        debug_assert_eq!(self.model.vq_mode(), VqMode::Quantized);
        tracing::info!("Codebook installed; encoder is now quantised");
        Ok(())
    }

    // ─── Training steps ───────────────────────────────────────────────────────

    /// Run exactly `steps` optimizer steps, cycling the stream as needed.
    pub fn train_steps(&mut self, stream: &dyn BatchStream, steps: usize) -> Result<Vec<LossRecord>> {
        let mut records = Vec::with_capacity(steps);
        let mut batches = stream.batches();

        while records.len() < steps {
            let batch = match batches.next() {
                Some(batch) => batch,
                None => {
                    batches = stream.batches();
                    batches.next().ok_or(TrainError::EmptyTrainStream)?
                }
            };
            records.push(self.train_step(&batch));
        }
        Ok(records)
    }

    fn train_step(&mut self, batch: &TokenBatch) -> LossRecord {
        let targets  = self.batcher.batch(batch);
        let output   = self.model.forward(targets.clone());
        let composed = self.settings.composer.compose(&output.latent, output.logits.clone(), targets);
        let record   = composed.record;

        if self.step % SAMPLE_LOG_EVERY == 0 {
            log_sample(self.step, batch, &output);
        }

        let grads = GradientsParams::from_grads(composed.total.backward(), &self.model);
        let (grads, grad_norm) = clip_grad_norm::<B, _>(&self.model, grads, self.settings.max_grad_norm);
        self.model = self.optimizer.step(self.settings.learning_rate, self.model.clone(), grads);

        if self.step % self.settings.log_interval.max(1) == 0 {
            tracing::info!(
                "Step {} | loss={:.4} recon={:.4} vq={:.4} commit={:.4} diversity={:.4} | grad_norm={:.3}",
                self.step,
                record.total(),
                record.reconstruction,
                record.vq,
                record.commitment,
                record.diversity,
                grad_norm
            );
        }

        let mut scalars = record.scalars("train");
        scalars.push(("grad_norm".to_string(), grad_norm));
        scalars.push(("vq_enabled".to_string(), f64::from(u8::from(output.latent.is_quantized()))));
        self.emit(&scalars);

        self.step += 1;
        record
    }

    fn evaluate(&mut self, eval: &dyn BatchStream) -> Result<EvalReport> {
        let report = self.settings.evaluator.evaluate(&self.model.valid(), eval, &self.device)?;
        self.emit(&[
            ("eval_loss".to_string(), report.mean_loss),
            ("eval_accuracy".to_string(), report.accuracy_percent),
        ]);
        Ok(report)
    }

    fn checkpoint(&self, phase: Phase) -> Result<()> {
        let manager = self.checkpoints.for_phase(phase);
        manager.save(&self.model.encoder, &self.model.decoder, self.step)?;
        manager.save_optimizer::<B, Autoencoder<B>, O>(&self.optimizer, self.step)
    }

    fn emit(&mut self, scalars: &[(String, f64)]) {
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.record(self.step, scalars) {
                tracing::warn!("Metric sink rejected step {}: {:#}", self.step, e);
            }
        }
    }
}

fn log_mean(phase: &str, step: usize, mean: &LossRecord) {
    tracing::info!(
        "{} mean through step {}: recon={:.4} vq={:.4} commit={:.4} diversity={:.4}",
        phase, step, mean.reconstruction, mean.vq, mean.commitment, mean.diversity
    );
}

/// First example of the batch: input, latent codes (if quantised), reconstruction.
fn log_sample<B: Backend>(step: usize, batch: &TokenBatch, output: &AutoencoderOutput<B>) {
    let [_, seq_len, ntokens] = output.logits.dims();
    let predicted = output
        .logits
        .clone()
        .slice([0..1, 0..seq_len, 0..ntokens])
        .argmax(2)
        .flatten::<1>(0, 2)
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>();
    let Ok(predicted) = predicted else { return };
    let predicted: Vec<u32> = predicted.into_iter().map(|t| t as u32).collect();

    tracing::debug!("Step {} ground truth:    {}", step, format_tokens(batch.row(0)));
    if let EncoderOutput::Quantized(q) = &output.latent {
        let [_, latent_len] = q.codes.dims();
        let codes = q
            .codes
            .clone()
            .slice([0..1, 0..latent_len])
            .flatten::<1>(0, 1)
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>();
        if let Ok(codes) = codes {
            let codes: Vec<u32> = codes.into_iter().map(|c| c as u32).collect();
            tracing::debug!("Step {} latent codes:    {}", step, format_tokens(&codes));
        }
    }
    tracing::debug!("Step {} reconstruction:  {}", step, format_tokens(&predicted));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::kmeans::ClusterAlgorithm;
    use crate::ml::loss::{DiversityPhase, DEFAULT_DIVERSITY_SUBSAMPLE};
    use crate::ml::testing::{patterned_stream, tiny_model_config, zero_stream, TestBackend};
    use burn::optim::AdamConfig;
    use std::{cell::RefCell, rc::Rc};

    /// Keeps every `vq_enabled` value it is given, keyed by step.
    #[derive(Clone, Default)]
    struct VqModeLog(Rc<RefCell<Vec<(usize, f64)>>>);

    impl MetricSink for VqModeLog {
        fn record(&mut self, step: usize, scalars: &[(String, f64)]) -> Result<()> {
            for (key, value) in scalars {
                if key == "vq_enabled" {
                    self.0.borrow_mut().push((step, *value));
                }
            }
            Ok(())
        }
    }

    fn settings(steps_before_vq: usize, eval_every: usize, discrete_cycles: usize) -> TrainerSettings {
        TrainerSettings {
            learning_rate: 3e-3,
            steps_before_vq,
            use_vq: true,
            eval_every,
            discrete_cycles,
            max_grad_norm: 0.5,
            log_interval: 10,
            max_checkpoints: None,
            composer: LossComposer::new(0.1, DEFAULT_DIVERSITY_SUBSAMPLE, DiversityPhase::Quantized),
            codebook_init: CodebookInitializer {
                algorithm:        ClusterAlgorithm::MiniBatch,
                vocab_size:       4,
                max_gather_steps: 2,
                max_kmeans_steps: 5,
            },
            evaluator: Evaluator { num_evals: 1, print_predictions: false, samples_to_print: 0 },
        }
    }

    fn trainer(
        root:     &Path,
        settings: TrainerSettings,
    ) -> Trainer<TestBackend, impl Optimizer<Autoencoder<TestBackend>, TestBackend>> {
        let checkpoints = PhaseCheckpoints::open(root, "test").unwrap();
        let optimizer   = AdamConfig::new()
            .with_epsilon(1e-8)
            .init::<TestBackend, Autoencoder<TestBackend>>();
        Trainer::new(&tiny_model_config(), settings, checkpoints, optimizer, Default::default())
    }

    fn restore_err<B: AutodiffBackend, O: Optimizer<Autoencoder<B>, B>>(
        trainer: Trainer<B, O>,
        dir:     &Path,
    ) -> anyhow::Error {
        match trainer.restore(dir) {
            Ok(_)  => panic!("restore of {} should fail", dir.display()),
            Err(e) => e,
        }
    }

    #[test]
    fn test_continuous_training_lowers_reconstruction_loss() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(dir.path(), settings(50, 1, 1));

        let records = trainer.train_steps(&zero_stream(5), 50).unwrap();
        assert_eq!(records.len(), 50);
        assert_eq!(trainer.step(), 50);
        assert!(records[49].reconstruction < records[0].reconstruction);
        // Nothing quantised yet, so the VQ terms are exact zeros
        assert!(records.iter().all(|r| r.vq == 0.0 && r.commitment == 0.0 && r.diversity == 0.0));
    }

    #[test]
    fn test_accuracy_approaches_full_on_constant_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(200, 1, 1);
        settings.use_vq = false;
        let mut trainer = trainer(dir.path(), settings);

        let report = trainer.run(&zero_stream(5), &zero_stream(2)).unwrap();
        let eval   = report.continuous_eval.unwrap();
        assert!(eval.accuracy_percent > 99.0, "accuracy was {}", eval.accuracy_percent);
        assert!(report.cycles.is_empty());
        assert_eq!(report.final_step, 200);
    }

    #[test]
    fn test_phase_transition_happens_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = VqModeLog::default();
        let mut trainer = trainer(dir.path(), settings(6, 3, 2)).with_sink(Box::new(log.clone()));

        let report = trainer.run(&patterned_stream(3), &patterned_stream(1)).unwrap();
        assert_eq!(report.final_step, 12);
        assert_eq!(report.cycles.len(), 2);
        assert_eq!(trainer.phase(), Phase::Discrete);
        assert_eq!(trainer.model().vq_mode(), VqMode::Quantized);

        // Quantised cycles pay the codebook terms and, by default, diversity
        for cycle in &report.cycles {
            assert!(cycle.mean_loss.vq > 0.0, "vq at step {}", cycle.step);
            assert!(cycle.mean_loss.commitment > 0.0, "commitment at step {}", cycle.step);
            assert!(cycle.mean_loss.diversity > 0.0, "diversity at step {}", cycle.step);
        }

        let modes = log.0.borrow();
        assert_eq!(modes.len(), 12);
        for &(step, enabled) in modes.iter() {
            let expected = if step < 6 { 0.0 } else { 1.0 };
            assert_eq!(enabled, expected, "step {step}");
        }
    }

    #[test]
    fn test_checkpoints_written_at_phase_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(dir.path(), settings(4, 2, 2));
        trainer.run(&patterned_stream(2), &patterned_stream(1)).unwrap();

        let continuous = CheckpointManager::new(dir.path().join("test_continuous_checkpoints")).unwrap();
        let discrete   = CheckpointManager::new(dir.path().join("test_discrete_checkpoints")).unwrap();
        assert_eq!(continuous.latest(ModelRole::Encoder).unwrap().map(|id| id.step), Some(4));
        assert_eq!(discrete.latest(ModelRole::Decoder).unwrap().map(|id| id.step), Some(8));
        assert_eq!(discrete.latest(ModelRole::Optimizer).unwrap().map(|id| id.step), Some(8));
    }

    #[test]
    fn test_pruning_bounds_discrete_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(2, 1, 4);
        settings.max_checkpoints = Some(3);
        let mut trainer = trainer(dir.path(), settings);
        trainer.run(&patterned_stream(2), &patterned_stream(1)).unwrap();

        let discrete = CheckpointManager::new(dir.path().join("test_discrete_checkpoints")).unwrap();
        let artifacts = discrete.artifacts().unwrap();
        assert_eq!(artifacts.len(), 3);
        assert!(artifacts.iter().all(|(id, _)| id.step == 6));
    }

    #[test]
    fn test_mismatched_restore_steps_abort() {
        let dir     = tempfile::tempdir().unwrap();
        let ckpt    = dir.path().join("test_continuous_checkpoints");
        let manager = CheckpointManager::new(&ckpt).unwrap();
        let model: Autoencoder<TestBackend> = tiny_model_config().init(&Default::default());
        manager.save_module(ModelRole::Encoder, &model.encoder, 5).unwrap();
        manager.save_module(ModelRole::Decoder, &model.decoder, 7).unwrap();

        let err = restore_err(trainer(dir.path(), settings(10, 1, 1)), &ckpt);
        assert_eq!(
            err.downcast_ref::<TrainError>(),
            Some(&TrainError::CheckpointStepMismatch { encoder: 5, decoder: 7 })
        );
    }

    #[test]
    fn test_unrecognized_restore_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = restore_err(trainer(dir.path(), settings(10, 1, 1)), &dir.path().join("weights"));
        assert!(matches!(err.downcast_ref::<TrainError>(), Some(TrainError::UnrecognizedRestoreDir(_))));
    }

    #[test]
    fn test_restore_continuous_resumes_at_saved_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = trainer(dir.path(), settings(4, 1, 1));
        first.train_steps(&zero_stream(2), 4).unwrap();
        first.checkpoint(Phase::Continuous).unwrap();

        let ckpt = dir.path().join("test_continuous_checkpoints");
        let mut resumed = trainer(dir.path(), settings(6, 1, 1)).restore(&ckpt).unwrap();
        assert_eq!(resumed.step(), 4);
        assert_eq!(resumed.phase(), Phase::Continuous);
        assert_eq!(resumed.model().vq_mode(), VqMode::Continuous);

        let mut s = settings(6, 1, 1);
        s.use_vq = false;
        resumed.settings = s;
        let report = resumed.run(&zero_stream(2), &zero_stream(1)).unwrap();
        assert_eq!(report.final_step, 6);
    }

    #[test]
    fn test_restore_past_steps_before_vq_skips_continuous_phase() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = trainer(dir.path(), settings(6, 1, 1));
        first.train_steps(&patterned_stream(2), 6).unwrap();
        first.checkpoint(Phase::Continuous).unwrap();

        let ckpt = dir.path().join("test_continuous_checkpoints");
        let mut resumed = trainer(dir.path(), settings(4, 2, 1)).restore(&ckpt).unwrap();
        assert_eq!(resumed.step(), 6);
        assert_eq!(resumed.phase(), Phase::Continuous);

        let report = resumed.run(&patterned_stream(2), &patterned_stream(1)).unwrap();
        assert!(report.continuous_eval.is_none());
        assert_eq!(report.cycles.len(), 1);
        assert_eq!(report.final_step, 8);
        assert_eq!(resumed.model().vq_mode(), VqMode::Quantized);
    }

    #[test]
    fn test_restore_discrete_skips_codebook_init() {
        let dir = tempfile::tempdir().unwrap();
        trainer(dir.path(), settings(4, 2, 1))
            .run(&patterned_stream(2), &patterned_stream(1))
            .unwrap();

        let ckpt = dir.path().join("test_discrete_checkpoints");
        let mut resumed = trainer(dir.path(), settings(4, 2, 1)).restore(&ckpt).unwrap();
        assert_eq!(resumed.step(), 6);
        assert_eq!(resumed.phase(), Phase::Discrete);
        assert_eq!(resumed.model().vq_mode(), VqMode::Quantized);

        let report = resumed.run(&patterned_stream(2), &patterned_stream(1)).unwrap();
        assert!(report.continuous_eval.is_none());
        assert_eq!(report.final_step, 8);
    }

    #[test]
    fn test_restore_from_empty_dir_is_a_cold_start() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = dir.path().join("other_discrete_checkpoints");
        let trainer = trainer(dir.path(), settings(4, 1, 1)).restore(&ckpt).unwrap();
        assert_eq!(trainer.step(), 0);
        assert_eq!(trainer.phase(), Phase::Continuous);
        assert_eq!(trainer.model().vq_mode(), VqMode::Continuous);
    }

    #[test]
    fn test_empty_train_stream_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(dir.path(), settings(4, 1, 1));
        let empty = crate::data::dataset::SequenceDataset::new(Vec::new(), 4, false);

        let err = trainer.train_steps(&empty, 1).unwrap_err();
        assert_eq!(err.downcast_ref::<TrainError>(), Some(&TrainError::EmptyTrainStream));
    }
}
