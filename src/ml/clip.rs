//! Global-norm gradient clipping across every parameter of a module.
//!
//! Burn's built-in `GradientClipping` works per parameter tensor. The
//! autoencoder is clipped as a whole: one L2 norm over all gradients of
//! encoder, codebook and decoder together, and one shared scale factor.

use burn::{
    module::{Module, ModuleVisitor, Param},
    optim::GradientsParams,
    prelude::*,
    tensor::backend::AutodiffBackend,
};

struct SquaredNorm<'a> {
    grads: &'a GradientsParams,
    total: f64,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for SquaredNorm<'_> {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(param.id) {
            self.total += grad.powf_scalar(2.0).sum().into_scalar().elem::<f64>();
        }
    }
}

struct Rescale<'a> {
    grads: &'a mut GradientsParams,
    scale: f64,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for Rescale<'_> {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(param.id) {
            self.grads.register::<B::InnerBackend, D>(param.id, grad.mul_scalar(self.scale));
        }
    }
}

/// L2 norm over all of `module`'s gradients.
pub fn global_grad_norm<B: AutodiffBackend, M: Module<B>>(module: &M, grads: &GradientsParams) -> f64 {
    let mut visitor = SquaredNorm { grads, total: 0.0 };
    module.visit(&mut visitor);
    visitor.total.sqrt()
}

/// Scale all gradients so their joint norm is at most `max_norm`.
/// Returns the norm before clipping.
pub fn clip_grad_norm<B: AutodiffBackend, M: Module<B>>(
    module:   &M,
    mut grads: GradientsParams,
    max_norm: f64,
) -> (GradientsParams, f64) {
    let norm = global_grad_norm::<B, M>(module, &grads);
    if norm > max_norm {
        let mut visitor = Rescale { grads: &mut grads, scale: max_norm / (norm + 1e-6) };
        module.visit(&mut visitor);
    }
    (grads, norm)
}
