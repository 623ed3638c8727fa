// ============================================================
// Layer 5 — Codebook Initializer
// ============================================================
// Builds the discrete codebook once, between the continuous
// and discrete phases:
//
//   1. Run the continuous encoder (inference copy, no autodiff)
//      over at most `max_gather_steps` training batches
//   2. Flatten every batch's [batch, latent_len, d_latent]
//      output into a host-side pool of d_latent vectors
//   3. Cluster the pool into exactly `vocab_size` centroids
//   4. Place the centroids on the training device
//
// The initializer only reads the encoder. Installing the
// codebook and switching the encoder to quantised mode is
// the orchestrator's job.

use anyhow::{anyhow, Result};
use burn::prelude::*;
use std::time::Instant;

use crate::data::batcher::TokenBatcher;
use crate::domain::{error::TrainError, traits::BatchStream};
use crate::ml::{
    kmeans::{minibatch_kmeans, tensor_kmeans, ClusterAlgorithm, FeaturePool, KMeansSettings},
    model::{Codebook, Encoder},
};

#[derive(Debug, Clone)]
pub struct CodebookInitializer {
    pub algorithm:        ClusterAlgorithm,
    /// Number of centroids to produce
    pub vocab_size:       usize,
    /// Batches run through the encoder to gather features
    pub max_gather_steps: usize,
    /// Clustering iteration cap
    pub max_kmeans_steps: usize,
}

impl CodebookInitializer {
    /// Encode up to `max_gather_steps` batches and pool their latent vectors.
    ///
    /// `encoder` must be an inference copy (e.g. from `valid()`); its
    /// codebook, if any, is ignored and the continuous output is used.
    pub fn gather<B: Backend>(
        &self,
        encoder: &Encoder<B>,
        stream:  &dyn BatchStream,
        device:  &B::Device,
    ) -> Result<FeaturePool> {
        let batcher = TokenBatcher::<B>::new(device.clone());
        let mut pool: Option<FeaturePool> = None;

        for batch in stream.batches().take(self.max_gather_steps) {
            let latents = encoder.encode_continuous(batcher.batch(&batch));
            let [b, n, dim] = latents.dims();
            let values: Vec<f32> = latents
                .reshape([b * n, dim])
                .into_data()
                .convert::<f32>()
                .to_vec::<f32>()
                .map_err(|e| anyhow!("Cannot read encoder output: {e:?}"))?;
            pool.get_or_insert_with(|| FeaturePool::new(dim)).extend(&values);
        }

        let pool = pool
            .filter(|p| !p.is_empty())
            .ok_or(TrainError::EmptyFeaturePool(self.max_gather_steps))?;
        tracing::info!("Gathered {} feature vectors of width {}", pool.len(), pool.dim());
        Ok(pool)
    }

    /// Cluster a feature pool into a `vocab_size` codebook on `device`.
    pub fn cluster<B: Backend>(&self, pool: &FeaturePool, device: &B::Device) -> Result<Codebook<B>> {
        if self.vocab_size == 0 {
            return Err(TrainError::EmptyCodebook.into());
        }
        if pool.is_empty() {
            return Err(TrainError::EmptyFeaturePool(self.max_gather_steps).into());
        }
        if pool.len() < self.vocab_size {
            return Err(TrainError::FeaturePoolTooSmall { pool: pool.len(), vocab_size: self.vocab_size }.into());
        }

        let settings = KMeansSettings::for_algorithm(
            self.algorithm, self.vocab_size, self.max_kmeans_steps, pool.len(),
        );
        tracing::info!(
            "Running {} k-means on {} vectors with {} centroids...",
            self.algorithm, pool.len(), self.vocab_size
        );

        let start = Instant::now();
        let centroids = match self.algorithm {
            ClusterAlgorithm::MiniBatch => {
                let values = minibatch_kmeans(pool, &settings);
                Tensor::<B, 2>::from_data(TensorData::new(values, [self.vocab_size, pool.dim()]), device)
            }
            ClusterAlgorithm::Tensor => tensor_kmeans::<B>(pool, &settings, device),
        };
        tracing::info!("KMeans took {:.2} seconds.", start.elapsed().as_secs_f64());

        Ok(Codebook::from_tensor(centroids))
    }

    /// gather + cluster.
    pub fn initialize<B: Backend>(
        &self,
        encoder:         &Encoder<B::InnerBackend>,
        stream:          &dyn BatchStream,
        device:          &B::Device,
    ) -> Result<Codebook<B>>
    where
        B: burn::tensor::backend::AutodiffBackend,
    {
        let pool = self.gather::<B::InnerBackend>(encoder, stream, device)?;
        self.cluster::<B>(&pool, device)
    }
}
