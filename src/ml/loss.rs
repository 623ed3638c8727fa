// ============================================================
// Layer 5 — Loss Composer
// ============================================================
// Builds the scalar that gets backpropagated each step:
//
//   total = reconstruction + vq + commitment + diversity
//
//   reconstruction  CE(logits, tokens), always on
//   vq              MSE(hard, sg(soft))  — moves centroids
//   commitment      MSE(soft, sg(hard))  — moves the encoder
//   diversity       weight * pairwise cosine penalty
//
// sg(·) is a stop-gradient (Tensor::detach). vq and
// commitment only exist once the encoder is quantised; they
// are exact zeros while it is continuous. The diversity term
// is active in exactly one phase, chosen by DiversityPhase.

use burn::{
    nn::loss::{CrossEntropyLossConfig, MseLoss, Reduction},
    prelude::*,
    tensor::activation::relu,
};
use serde::{Deserialize, Serialize};

use crate::domain::loss::LossRecord;
use crate::ml::model::EncoderOutput;

/// Default cap on the vectors entering the O(n²) similarity matrix.
pub const DEFAULT_DIVERSITY_SUBSAMPLE: usize = 1000;

/// Which encoder mode pays the diversity penalty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiversityPhase {
    /// Spread the continuous latents out before clustering
    Continuous,
    /// Penalise the soft latents of the quantised encoder
    Quantized,
}

/// The differentiable total plus its four host-side scalars.
pub struct ComposedLoss<B: Backend> {
    pub total:  Tensor<B, 1>,
    pub record: LossRecord,
}

#[derive(Debug, Clone)]
pub struct LossComposer {
    pub diversity_weight:    f64,
    pub diversity_subsample: usize,
    pub diversity_phase:     DiversityPhase,
}

impl LossComposer {
    pub fn new(diversity_weight: f64, diversity_subsample: usize, diversity_phase: DiversityPhase) -> Self {
        Self { diversity_weight, diversity_subsample, diversity_phase }
    }

    fn diversity_applies<B: Backend>(&self, latent: &EncoderOutput<B>) -> bool {
        match self.diversity_phase {
            DiversityPhase::Continuous => !latent.is_quantized(),
            DiversityPhase::Quantized  => latent.is_quantized(),
        }
    }

    pub fn compose<B: Backend>(
        &self,
        latent:  &EncoderOutput<B>,
        logits:  Tensor<B, 3>,
        targets: Tensor<B, 2, Int>,
    ) -> ComposedLoss<B> {
        let device = logits.device();
        let recon  = reconstruction_loss(logits, targets);

        let (vq, commit) = match latent {
            EncoderOutput::Quantized(q) => {
                let mse = MseLoss::new();
                (
                    mse.forward(q.hard.clone(), q.soft.clone().detach(), Reduction::Mean),
                    mse.forward(q.soft.clone(), q.hard.clone().detach(), Reduction::Mean),
                )
            }
            EncoderOutput::Continuous(_) => (
                Tensor::<B, 1>::zeros([1], &device),
                Tensor::<B, 1>::zeros([1], &device),
            ),
        };

        let diversity = if self.diversity_applies(latent) {
            diversity_loss(latent.soft(), self.diversity_subsample).mul_scalar(self.diversity_weight)
        } else {
            Tensor::<B, 1>::zeros([1], &device)
        };

        let record = LossRecord {
            reconstruction: scalar(&recon),
            vq:             scalar(&vq),
            commitment:     scalar(&commit),
            diversity:      scalar(&diversity),
        };
        ComposedLoss { total: recon + vq + commit + diversity, record }
    }
}

/// Cross-entropy between flattened logits [b*s, ntokens] and targets [b*s].
pub fn reconstruction_loss<B: Backend>(logits: Tensor<B, 3>, targets: Tensor<B, 2, Int>) -> Tensor<B, 1> {
    let [batch_size, seq_len, ntokens] = logits.dims();
    CrossEntropyLossConfig::new()
        .init(&logits.device())
        .forward(
            logits.reshape([batch_size * seq_len, ntokens]),
            targets.reshape([batch_size * seq_len]),
        )
}

/// Mean positive off-diagonal cosine similarity of the latent vectors.
///
/// vectors: [batch, seq, dim]. All batch*seq vectors are pooled;
/// if there are more than `subsample_size`, a uniform random subset of
/// that size is drawn without replacement. Negative similarities are
/// clipped to zero, so only similar pairs are penalised. The result
/// is in [0, 1] and is 0 when fewer than two vectors remain.
pub fn diversity_loss<B: Backend>(vectors: Tensor<B, 3>, subsample_size: usize) -> Tensor<B, 1> {
    let [batch_size, seq_len, dim] = vectors.dims();
    let device = vectors.device();
    let total  = batch_size * seq_len;

    let mut pool = vectors.reshape([total, dim]);
    if total > subsample_size {
        let picked: Vec<i32> = rand::seq::index::sample(&mut rand::thread_rng(), total, subsample_size)
            .into_iter()
            .map(|i| i as i32)
            .collect();
        pool = pool.select(0, Tensor::<B, 1, Int>::from_ints(picked.as_slice(), &device));
    }

    let n = pool.dims()[0];
    if n < 2 {
        return Tensor::zeros([1], &device);
    }

    // x / max(||x||, 1e-12)
    let norms = pool.clone().powf_scalar(2.0).sum_dim(1).clamp_min(1e-24).sqrt();
    let unit  = pool / norms;
    let similarity = unit.clone().matmul(unit.transpose());

    let idx  = Tensor::<B, 1, Int>::arange(0..n as i64, &device);
    let rows = idx.clone().reshape([n, 1]).expand([n, n]);
    let cols = idx.reshape([1, n]).expand([n, n]);
    let off_diagonal = similarity.mask_fill(rows.equal(cols), 0.0);

    relu(off_diagonal).sum().div_scalar((n * (n - 1)) as f64)
}

fn scalar<B: Backend>(t: &Tensor<B, 1>) -> f64 {
    t.clone().into_scalar().elem::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::Codebook;
    use crate::ml::testing::TestBackend;

    fn vectors(values: Vec<f32>, shape: [usize; 3]) -> Tensor<TestBackend, 3> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    fn value(t: Tensor<TestBackend, 1>) -> f64 {
        t.into_scalar().elem::<f64>()
    }

    #[test]
    fn test_orthogonal_vectors_have_zero_diversity_loss() {
        let v = vectors(vec![1.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 3.0], [1, 3, 3]);
        assert!(value(diversity_loss(v, 1000)).abs() < 1e-6);
    }

    #[test]
    fn test_opposite_vectors_have_zero_diversity_loss() {
        let v = vectors(vec![1.0, 1.0, -1.0, -1.0], [2, 1, 2]);
        assert!(value(diversity_loss(v, 1000)).abs() < 1e-6);
    }

    #[test]
    fn test_identical_vectors_are_penalised() {
        let v = vectors(vec![0.3, 0.4, 0.3, 0.4, 0.3, 0.4, 0.3, 0.4], [2, 2, 2]);
        let loss = value(diversity_loss(v, 1000));
        assert!(loss > 0.0);
        assert!((loss - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_diversity_loss_is_never_negative() {
        let v: Tensor<TestBackend, 3> = Tensor::random(
            [4, 16, 8],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &Default::default(),
        );
        assert!(value(diversity_loss(v, 1000)) >= 0.0);
    }

    #[test]
    fn test_subsampling_bounds_the_pool() {
        // 2000 identical vectors, only 50 enter the similarity matrix
        let v = vectors(vec![1.0; 2000 * 2], [20, 100, 2]);
        let loss = value(diversity_loss(v, 50));
        assert!((loss - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_single_vector_has_zero_diversity_loss() {
        let v = vectors(vec![1.0, 2.0], [1, 1, 2]);
        assert_eq!(value(diversity_loss(v, 1000)), 0.0);
    }

    #[test]
    fn test_vq_terms_are_zero_while_continuous() {
        let composer = LossComposer::new(1.0, 1000, DiversityPhase::Quantized);
        let device   = Default::default();
        let latent   = EncoderOutput::Continuous(vectors(vec![1.0; 8], [1, 4, 2]));
        let logits   = Tensor::<TestBackend, 3>::zeros([1, 8, 4], &device);
        let targets  = Tensor::<TestBackend, 2, Int>::zeros([1, 8], &device);

        let out = composer.compose(&latent, logits, targets);
        assert_eq!(out.record.vq, 0.0);
        assert_eq!(out.record.commitment, 0.0);
        assert_eq!(out.record.diversity, 0.0);
        // Uniform logits over 4 classes
        assert!((out.record.reconstruction - 4f64.ln()).abs() < 1e-5);
        assert!((value(out.total) - out.record.total()).abs() < 1e-5);
    }

    #[test]
    fn test_diversity_can_target_the_continuous_phase() {
        let composer = LossComposer::new(2.0, 1000, DiversityPhase::Continuous);
        let device   = Default::default();
        let latent   = EncoderOutput::Continuous(vectors(vec![1.0; 8], [1, 4, 2]));
        let logits   = Tensor::<TestBackend, 3>::zeros([1, 8, 4], &device);
        let targets  = Tensor::<TestBackend, 2, Int>::zeros([1, 8], &device);

        let out = composer.compose(&latent, logits, targets);
        assert_eq!(out.record.vq, 0.0);
        // Four identical vectors, weighted by 2
        assert!((out.record.diversity - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_diversity_applies_to_quantized_latents_by_default() {
        let composer = LossComposer::new(3.0, 1000, DiversityPhase::Quantized);
        let device   = Default::default();
        let codebook = Codebook::<TestBackend>::from_tensor(Tensor::from_data(
            TensorData::new(vec![0.0f32, 0.0, 1.0, 1.0], [2, 2]),
            &device,
        ));
        // Four identical soft latents, all snapping to [1, 1]
        let latent  = EncoderOutput::Quantized(codebook.quantize(vectors(vec![0.8; 8], [1, 4, 2])));
        let logits  = Tensor::<TestBackend, 3>::zeros([1, 8, 4], &device);
        let targets = Tensor::<TestBackend, 2, Int>::zeros([1, 8], &device);

        let out = composer.compose(&latent, logits, targets);
        assert!((out.record.diversity - 3.0).abs() < 1e-5);
        assert!((out.record.vq - 0.04).abs() < 1e-6);
        assert!((value(out.total) - out.record.total()).abs() < 1e-4);
    }

    #[test]
    fn test_quantized_losses_are_symmetric() {
        let composer = LossComposer::new(1.0, 1000, DiversityPhase::Continuous);
        let device   = Default::default();
        let codebook = Codebook::<TestBackend>::from_tensor(Tensor::from_data(
            TensorData::new(vec![0.0f32, 0.0, 1.0, 1.0], [2, 2]),
            &device,
        ));
        let latent  = EncoderOutput::Quantized(codebook.quantize(vectors(vec![0.2, 0.0, 1.0, 0.6], [1, 2, 2])));
        let logits  = Tensor::<TestBackend, 3>::zeros([1, 4, 3], &device);
        let targets = Tensor::<TestBackend, 2, Int>::zeros([1, 4], &device);

        let out = composer.compose(&latent, logits, targets);
        // Squared errors 0.04 and 0.16 over four elements
        assert!((out.record.vq - 0.05).abs() < 1e-6);
        assert!((out.record.commitment - out.record.vq).abs() < 1e-9);
        assert_eq!(out.record.diversity, 0.0);
    }
}
