//! Masked losses over padded trajectory batches.
//!
//! Every function normalizes by the number of valid entries of its mask, so
//! padded timesteps contribute to neither numerator nor denominator. Values
//! stored at padded positions are zeroed before any arithmetic and never reach
//! the result or its gradient.

use burn::tensor::{backend::Backend, ElementConversion, Tensor};

use crate::error::LossError;

/// Smallest standard deviation fed to the bivariate Gaussian.
pub const SIGMA_FLOOR: f32 = 1e-3;
/// Correlation is clamped to `[-RHO_LIMIT, RHO_LIMIT]`.
pub const RHO_LIMIT: f32 = 0.999;
/// Number of per-timestep distribution parameters: mu_x, mu_y, sigma_x, sigma_y, rho.
pub const NLL_PARAMS: usize = 5;

const LOG_TWO_PI: f32 = 1.837_877;

fn expect_dims<const D: usize>(
    op: &'static str,
    expected: [usize; D],
    got: [usize; D],
) -> Result<(), LossError> {
    if expected == got {
        Ok(())
    } else {
        Err(LossError::ShapeMismatch {
            op,
            expected: expected.to_vec(),
            got: got.to_vec(),
        })
    }
}

fn valid_count<B: Backend, const D: usize>(
    op: &'static str,
    mask: &Tensor<B, D>,
) -> Result<f32, LossError> {
    let count: f32 = mask.clone().sum().into_scalar().elem();
    if count > 0.0 {
        Ok(count)
    } else {
        Err(LossError::DegenerateBatch { op })
    }
}

/// First two channels of a `[N, T, C]` prediction, checked against a `[N, T, 2]` target.
fn positions<B: Backend>(
    op: &'static str,
    pred: Tensor<B, 3>,
    target: &Tensor<B, 3>,
) -> Result<Tensor<B, 3>, LossError> {
    let [n, t, c] = pred.dims();
    let [tn, tt, tc] = target.dims();
    if c < 2 || tc != 2 || n != tn || t != tt {
        return Err(LossError::ShapeMismatch {
            op,
            expected: vec![tn, tt, 2],
            got: vec![n, t, c],
        });
    }

    Ok(pred.slice([0..n, 0..t, 0..2]))
}

/// Zeroes every channel of `values` at timesteps where `step_mask` ([N, T, 1]) is 0.
fn zero_padded<B: Backend>(values: Tensor<B, 3>, step_mask: Tensor<B, 3>) -> Tensor<B, 3> {
    let [_, _, channels] = values.dims();
    let padded = step_mask.repeat(2, channels).equal_elem(0.0);
    values.mask_fill(padded, 0.0)
}

fn step_mask<B: Backend>(mask: &Tensor<B, 3>) -> Tensor<B, 3> {
    let [n, t, _] = mask.dims();
    mask.clone().slice([0..n, 0..t, 0..1])
}

/// Squared Euclidean distance between the predicted positions and the target,
/// averaged over valid (scene, timestep) pairs. The 2-channel `mask` counts each
/// pair twice in both numerator and denominator.
///
/// `pred` is `[N, T, C]` with `C >= 2` (only the position channels are scored),
/// `target` and `mask` are `[N, T, 2]`.
pub fn masked_mse<B: Backend>(
    pred: Tensor<B, 3>,
    target: Tensor<B, 3>,
    mask: Tensor<B, 3>,
) -> Result<Tensor<B, 1>, LossError> {
    let pred = positions("masked_mse", pred, &target)?;
    expect_dims("masked_mse", target.dims(), mask.dims())?;
    let count = valid_count("masked_mse", &mask)?;

    let padded = mask.clone().equal_elem(0.0);
    let pred = pred.mask_fill(padded.clone(), 0.0);
    let target = target.mask_fill(padded, 0.0);

    let diff = pred - target;
    let err = (diff.clone() * diff).sum_dim(2) * mask;

    Ok(err.sum() / count)
}

/// [`masked_mse`] for a single timestep: `pred`, `target` and `mask` are `[N, 2]`.
pub fn masked_dest_mse<B: Backend>(
    pred: Tensor<B, 2>,
    target: Tensor<B, 2>,
    mask: Tensor<B, 2>,
) -> Result<Tensor<B, 1>, LossError> {
    expect_dims("masked_dest_mse", target.dims(), pred.dims())?;
    expect_dims("masked_dest_mse", target.dims(), mask.dims())?;
    let count = valid_count("masked_dest_mse", &mask)?;

    let padded = mask.clone().equal_elem(0.0);
    let pred = pred.mask_fill(padded.clone(), 0.0);
    let target = target.mask_fill(padded, 0.0);

    let diff = pred - target;
    let err = (diff.clone() * diff).sum_dim(1) * mask;

    Ok(err.sum() / count)
}

/// Per-timestep bivariate Gaussian negative log-likelihood, `[N, T, 1]`.
fn bivariate_nll<B: Backend>(pred: Tensor<B, 3>, target: Tensor<B, 3>) -> Tensor<B, 3> {
    let [n, t, _] = pred.dims();
    let channel = |i: usize| pred.clone().slice([0..n, 0..t, i..i + 1]);

    let mu_x = channel(0);
    let mu_y = channel(1);
    let sigma_x = channel(2).clamp_min(SIGMA_FLOOR);
    let sigma_y = channel(3).clamp_min(SIGMA_FLOOR);
    let rho = channel(4).clamp(-RHO_LIMIT, RHO_LIMIT);

    let x = target.clone().slice([0..n, 0..t, 0..1]);
    let y = target.slice([0..n, 0..t, 1..2]);

    let dx = (x - mu_x) / sigma_x.clone();
    let dy = (y - mu_y) / sigma_y.clone();
    let one_minus_rho2 = rho.clone().neg() * rho.clone() + 1.0;

    let z = dx.clone() * dx.clone() + dy.clone() * dy.clone() - dx * dy * rho * 2.0;
    let quadratic = z / (one_minus_rho2.clone() * 2.0);
    let log_norm = sigma_x.log() + sigma_y.log() + one_minus_rho2.log() * 0.5;

    quadratic + log_norm + LOG_TWO_PI
}

fn checked_nll_inputs<B: Backend>(
    op: &'static str,
    pred: &Tensor<B, 3>,
    target: &Tensor<B, 3>,
    mask: &Tensor<B, 3>,
) -> Result<(), LossError> {
    let [n, t, c] = pred.dims();
    expect_dims(op, [n, t, NLL_PARAMS], [n, t, c])?;
    expect_dims(op, [n, t, 2], target.dims())?;
    expect_dims(op, [n, t, 2], mask.dims())
}

/// Negative log-likelihood of `target` under the per-timestep bivariate Gaussian
/// described by `pred` (`[N, T, 5]`: mu_x, mu_y, sigma_x, sigma_y, rho, with
/// standard deviations rather than variances). Normalized like [`masked_mse`].
pub fn masked_nll<B: Backend>(
    pred: Tensor<B, 3>,
    target: Tensor<B, 3>,
    mask: Tensor<B, 3>,
) -> Result<Tensor<B, 1>, LossError> {
    checked_nll_inputs("masked_nll", &pred, &target, &mask)?;
    let count = valid_count("masked_nll", &mask)?;

    let steps = step_mask(&mask);
    let pred = zero_padded(pred, steps.clone());
    let target = zero_padded(target, steps);

    let nll = bivariate_nll(pred, target) * mask;

    Ok(nll.sum() / count)
}

/// Result of [`masked_nll_eval`].
#[derive(Debug, Clone)]
pub enum NllReport<B: Backend> {
    /// Average over every valid (scene, timestep).
    Mean(Tensor<B, 1>),
    /// Per-timestep sums over the batch together with the number of valid scenes.
    PerStep {
        sums: Tensor<B, 1>,
        counts: Tensor<B, 1>,
    },
}

impl<B: Backend> NllReport<B> {
    /// Single scalar over the whole report.
    pub fn mean(self) -> Tensor<B, 1> {
        match self {
            NllReport::Mean(mean) => mean,
            NllReport::PerStep { sums, counts } => sums.sum() / counts.sum().clamp_min(1.0),
        }
    }

    /// Per-timestep average, `None` for an already time-averaged report.
    pub fn per_step_mean(self) -> Option<Tensor<B, 1>> {
        match self {
            NllReport::Mean(_) => None,
            NllReport::PerStep { sums, counts } => Some(sums / counts.clamp_min(1.0)),
        }
    }
}

/// Evaluation-only negative log-likelihood.
///
/// With `avg_along_time` the result is a single average; otherwise per-timestep
/// sums and counts are returned so callers can accumulate them across batches.
pub fn masked_nll_eval<B: Backend>(
    pred: Tensor<B, 3>,
    target: Tensor<B, 3>,
    mask: Tensor<B, 3>,
    avg_along_time: bool,
) -> Result<NllReport<B>, LossError> {
    checked_nll_inputs("masked_nll_eval", &pred, &target, &mask)?;

    let [_, t, _] = pred.dims();
    let steps = step_mask(&mask);
    let pred = zero_padded(pred.detach(), steps.clone());
    let target = zero_padded(target, steps.clone());

    let nll = bivariate_nll(pred, target) * steps.clone();

    if avg_along_time {
        let count = valid_count("masked_nll_eval", &steps)?;
        Ok(NllReport::Mean(nll.sum() / count))
    } else {
        Ok(NllReport::PerStep {
            sums: nll.sum_dim(0).reshape([t]),
            counts: steps.sum_dim(0).reshape([t]),
        })
    }
}

/// Closed-form `KL(N(mu, exp(logvar)) || N(0, I))`, summed over the latent
/// dimension and averaged over the batch. Both inputs are `[N, Z]`.
pub fn kl_divergence<B: Backend>(
    mu: Tensor<B, 2>,
    logvar: Tensor<B, 2>,
) -> Result<Tensor<B, 1>, LossError> {
    expect_dims("kl_divergence", mu.dims(), logvar.dims())?;
    let [n, z] = mu.dims();
    if n == 0 || z == 0 {
        return Err(LossError::DegenerateBatch { op: "kl_divergence" });
    }

    let terms = logvar.clone().exp() + mu.clone() * mu - 1.0 - logvar;

    Ok(terms.sum_dim(1).mean() * 0.5)
}
