// ============================================================
// Layer 5 — Evaluator
// ============================================================
// Forward-only passes over the evaluation stream.
//
// The evaluator receives an inference copy of the model
// (Autoencoder::valid(): inner backend, dropout disabled), so
// it can neither build a graph nor touch the parameters the
// trainer is updating. The trainer's own model is untouched
// and stays in training mode.
//
// Per batch: reconstruction cross-entropy and token accuracy
// (argmax over the logits vs. the input tokens). Results are
// averaged over at most `num_evals` batches.

use anyhow::{anyhow, Result};
use burn::prelude::*;

use crate::data::batcher::TokenBatcher;
use crate::domain::{
    batch::{format_tokens, TokenBatch},
    error::TrainError,
    traits::BatchStream,
};
use crate::ml::{loss::reconstruction_loss, model::Autoencoder};

#[derive(Debug, Clone, PartialEq)]
pub struct EvalReport {
    pub mean_loss:        f64,
    /// Correct tokens / all tokens, in percent
    pub accuracy_percent: f64,
    pub batches:          usize,
    /// Ground-truth / prediction pairs, if requested
    pub samples:          Vec<PredictionSample>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionSample {
    pub ground_truth: String,
    pub prediction:   String,
}

#[derive(Debug, Clone)]
pub struct Evaluator {
    pub num_evals:         usize,
    pub print_predictions: bool,
    /// Bounds both the batches and the rows per batch that are printed
    pub samples_to_print:  usize,
}

impl Evaluator {
    pub fn new(num_evals: usize) -> Self {
        Self { num_evals, print_predictions: true, samples_to_print: 1 }
    }

    pub fn evaluate<B: Backend>(
        &self,
        model:  &Autoencoder<B>,
        stream: &dyn BatchStream,
        device: &B::Device,
    ) -> Result<EvalReport> {
        let batcher = TokenBatcher::<B>::new(device.clone());

        let mut loss_sum      = 0.0f64;
        let mut batches       = 0usize;
        let mut correct       = 0usize;
        let mut total_tokens  = 0usize;
        let mut samples       = Vec::new();

        for (batch_idx, batch) in stream.batches().take(self.num_evals).enumerate() {
            let targets = batcher.batch(&batch);
            let output  = model.forward(targets.clone());

            let [batch_size, seq_len, ntokens] = output.logits.dims();
            loss_sum += reconstruction_loss(output.logits.clone(), targets.clone())
                .into_scalar()
                .elem::<f64>();

            let logits_flat  = output.logits.reshape([batch_size * seq_len, ntokens]);
            let targets_flat = targets.reshape([batch_size * seq_len]);

            let predicted = logits_flat.argmax(1).flatten::<1>(0, 1);
            let hits: i64 = predicted
                .clone()
                .equal(targets_flat)
                .int()
                .sum()
                .into_scalar()
                .elem::<i64>();
            correct      += hits as usize;
            total_tokens += batch_size * seq_len;
            batches      += 1;

            if self.print_predictions && batch_idx < self.samples_to_print {
                let predicted: Vec<i64> = predicted
                    .into_data()
                    .convert::<i64>()
                    .to_vec::<i64>()
                    .map_err(|e| anyhow!("Cannot read predictions: {e:?}"))?;
                samples.extend(self.diagnostics(batch_idx, &batch, &predicted));
            }
        }

        if batches == 0 || total_tokens == 0 {
            return Err(TrainError::EmptyEvalStream.into());
        }

        let report = EvalReport {
            mean_loss:        loss_sum / batches as f64,
            accuracy_percent: correct as f64 / total_tokens as f64 * 100.0,
            batches,
            samples,
        };
        tracing::info!(
            "Evaluation - Loss: {:.4}, Accuracy: {:.2}%",
            report.mean_loss, report.accuracy_percent
        );
        Ok(report)
    }

    fn diagnostics(&self, batch_idx: usize, batch: &TokenBatch, predicted: &[i64]) -> Vec<PredictionSample> {
        let seq_len = batch.seq_len();
        (0..batch.batch_size().min(self.samples_to_print))
            .map(|row| {
                let prediction: Vec<u32> = predicted[row * seq_len..(row + 1) * seq_len]
                    .iter()
                    .map(|&p| p as u32)
                    .collect();
                let sample = PredictionSample {
                    ground_truth: format_tokens(batch.row(row)),
                    prediction:   format_tokens(&prediction),
                };
                tracing::info!("Batch {} Ground Truth: {}", batch_idx, sample.ground_truth);
                tracing::info!("Batch {} Prediction:   {}", batch_idx, sample.prediction);
                sample
            })
            .collect()
    }
}
