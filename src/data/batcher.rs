// ============================================================
// Layer 4 — Token Batcher
// ============================================================
// Moves a host-side TokenBatch onto a Burn device as an Int
// tensor of shape [batch_size, seq_len].
//
// The batcher holds the device it was built for. The process
// resolves its device once (ml::default_device) and every
// batcher, model and codebook is created on that device, so
// no tensor ever needs to move between devices afterwards.
//
// B is generic: the trainer batches for the autodiff backend,
// the evaluator and codebook initialiser batch for its inner
// (inference-only) backend.

use burn::prelude::*;

use crate::domain::batch::TokenBatch;

#[derive(Clone, Debug)]
pub struct TokenBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> TokenBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    /// [batch_size, seq_len] Int tensor, row-major like the batch itself.
    pub fn batch(&self, batch: &TokenBatch) -> Tensor<B, 2, Int> {
        // Burn Int tensors are built from i32 and converted to the
        // backend's own int element type
        let flat: Vec<i32> = batch.tokens().iter().map(|&t| t as i32).collect();
        Tensor::<B, 1, Int>::from_ints(flat.as_slice(), &self.device)
            .reshape(batch.shape())
    }
}
