use burn::tensor::{backend::Backend, Tensor};

/// Exponential linear unit, `alpha * (exp(x) - 1)` for non-positive inputs.
pub fn elu<B: Backend, const D: usize>(x: Tensor<B, D>, alpha: f32) -> Tensor<B, D> {
    let negative = x.clone().lower_equal_elem(0.0);
    let value = (x.clone().exp() - 1.0) * alpha;

    x.mask_where(negative, value)
}

/// Maps raw decoder output `[N, T, 5]` to bivariate Gaussian parameters:
/// means unchanged, positive standard deviations, correlation in (-1, 1).
pub fn bivariate_params<B: Backend>(raw: Tensor<B, 3>) -> Tensor<B, 3> {
    let [n, t, _] = raw.dims();

    let mu = raw.clone().slice([0..n, 0..t, 0..2]);
    let sigma = raw.clone().slice([0..n, 0..t, 2..4]).exp();
    let rho = raw.slice([0..n, 0..t, 4..5]).tanh();

    Tensor::cat(vec![mu, sigma, rho], 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn elu_keeps_positive_inputs() {
        let x = Tensor::<TestBackend, 1>::from_floats([-1.0, 0.0, 2.0]);

        let y = elu(x, 1.0).into_data().convert::<f32>().value;

        assert!((y[0] - ((-1.0f32).exp() - 1.0)).abs() < 1e-6);
        assert_eq!(y[1], 0.0);
        assert_eq!(y[2], 2.0);
    }

    #[test]
    fn bivariate_params_are_well_formed() {
        let raw = Tensor::<TestBackend, 3>::from_floats([[[1.0, -2.0, -30.0, 3.0, 50.0]]]);

        let p = bivariate_params(raw).into_data().convert::<f32>().value;

        assert_eq!(&p[..2], &[1.0, -2.0]);
        assert!(p[2] > 0.0 && p[3] > 0.0);
        assert!(p[4] <= 1.0 && p[4] > 0.99);
    }
}
