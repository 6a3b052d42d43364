//! Gradient clipping by the norm of all parameter gradients taken together.
//!
//! burn's `GradientClippingConfig::Norm` clips each parameter tensor on its
//! own; the trajectory losses need a single global norm so the relative scale
//! of the NLL and KL gradients is preserved.

use burn::module::{AutodiffModule, ModuleVisitor, ParamId};
use burn::optim::GradientsParams;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};

const EPSILON: f32 = 1e-6;

/// Factor applied to every gradient so the global norm does not exceed `max_norm`.
pub fn clip_coefficient(total_norm: f32, max_norm: f32) -> f32 {
    if total_norm.is_finite() && total_norm > max_norm {
        max_norm / (total_norm + EPSILON)
    } else {
        1.0
    }
}

fn squared_norm<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> f64 {
    let sum: f32 = (tensor.clone() * tensor).sum().into_scalar().elem();
    sum as f64
}

struct NormAccumulator<'a> {
    grads: &'a GradientsParams,
    squared: f64,
}

impl<'a, B: AutodiffBackend> ModuleVisitor<B> for NormAccumulator<'a> {
    fn visit_float<const D: usize>(&mut self, id: &ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            self.squared += squared_norm(grad);
        }
    }
}

struct GradientScaler<'a> {
    grads: &'a mut GradientsParams,
    scale: f32,
}

impl<'a, B: AutodiffBackend> ModuleVisitor<B> for GradientScaler<'a> {
    fn visit_float<const D: usize>(&mut self, id: &ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads.register(id.clone(), grad * self.scale);
        }
    }
}

/// Norm of every gradient in `grads` belonging to a parameter of `module`.
pub fn global_grad_norm<B: AutodiffBackend, M: AutodiffModule<B>>(
    module: &M,
    grads: &GradientsParams,
) -> f32 {
    let mut acc = NormAccumulator {
        grads,
        squared: 0.0,
    };
    module.visit(&mut acc);
    acc.squared.sqrt() as f32
}

/// Clips `grads` in place by their global norm. Returns the gradients and the
/// norm measured before clipping.
pub fn clip_grad_norm<B: AutodiffBackend, M: AutodiffModule<B>>(
    module: &M,
    mut grads: GradientsParams,
    max_norm: f32,
) -> (GradientsParams, f32) {
    let total = global_grad_norm(module, &grads);
    if !total.is_finite() {
        tracing::warn!("gradient norm is {total}, leaving gradients unclipped");
    }

    let scale = clip_coefficient(total, max_norm);
    if scale < 1.0 {
        let mut scaler = GradientScaler {
            grads: &mut grads,
            scale,
        };
        module.visit(&mut scaler);
    }

    (grads, total)
}
