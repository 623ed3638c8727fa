// ============================================================
// Layer 5 — ML Layer (Burn)
// ============================================================
// All tensor code lives here. The domain and data layers
// hand in host-side batches; this layer turns them into
// device tensors, trains, clusters and evaluates.
//
//   model.rs         — encoder / decoder pair and the codebook
//                      (opaque to the training core: a forward
//                      pass, a VQ mode, an injectable codebook)
//   loss.rs          — Loss Composer: reconstruction, vq,
//                      commitment and diversity terms
//   kmeans.rs        — k-means++ seeding, host mini-batch and
//                      device Lloyd variants
//   codebook_init.rs — Codebook Initializer: gather encoder
//                      features, cluster to `vocab_size`
//   evaluator.rs     — forward-only loss / accuracy passes
//   clip.rs          — global-norm gradient clipping
//   trainer.rs       — Training Orchestrator (phase machine)
//
// Backend selection happens once, here. Everything else is
// generic over `B: Backend` / `B: AutodiffBackend`.

use burn::prelude::Backend;

pub mod model;
pub mod loss;
pub mod kmeans;
pub mod codebook_init;
pub mod evaluator;
pub mod clip;
pub mod trainer;

#[cfg(test)]
pub(crate) mod testing;

/// Backend used for training runs.
#[cfg(feature = "wgpu")]
pub type TrainBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

#[cfg(not(feature = "wgpu"))]
pub type TrainBackend = burn::backend::Autodiff<burn::backend::NdArray>;

/// The single device every tensor of a run is placed on.
pub fn default_device() -> <TrainBackend as Backend>::Device {
    let device = <TrainBackend as Backend>::Device::default();
    tracing::info!("Using device: {:?}", device);
    device
}
