//! KL-divergence terms for the variational latent.
//!
//! The latent is a diagonal Gaussian parameterized by mean and log-variance.
//! Both closed forms below sum over every latent dimension and normalize by
//! the batch size, matching how the rest of the objective is scaled.

use burn::tensor::{backend::Backend, Tensor};

/// KL divergence from `N(mu, exp(logvar))` to the standard normal.
///
/// `-0.5 * sum(1 + logvar - mu^2 - exp(logvar)) / batch_size`.
pub fn kl_standard_normal<B: Backend, const D: usize>(
    mean: Tensor<B, D>,
    logvar: Tensor<B, D>,
    batch_size: usize,
) -> Tensor<B, 1> {
    if mean.dims() != logvar.dims() {
        panic!(
            "kl_standard_normal: mean {:?} and logvar {:?} shapes differ",
            mean.dims(),
            logvar.dims()
        );
    }
    let inner = logvar.clone() + 1.0 - mean.powf_scalar(2.0) - logvar.exp();
    inner.sum().mul_scalar(-0.5).div_scalar(batch_size as f64)
}

/// KL divergence between two diagonal Gaussians, `KL(N1 || N2)`.
///
/// With `(mean1, logvar1)` the posterior and `(mean2, logvar2)` the prior:
/// `0.5 * sum((logvar2 - logvar1 - 1) + (exp(logvar1) + (mean1 - mean2)^2) / exp(logvar2)) / batch_size`.
pub fn kl_gaussian<B: Backend, const D: usize>(
    mean1: Tensor<B, D>,
    logvar1: Tensor<B, D>,
    mean2: Tensor<B, D>,
    logvar2: Tensor<B, D>,
    batch_size: usize,
) -> Tensor<B, 1> {
    if mean1.dims() != logvar1.dims()
        || mean2.dims() != logvar2.dims()
        || mean1.dims() != mean2.dims()
    {
        panic!(
            "kl_gaussian: parameter shapes differ, mean1 {:?} logvar1 {:?} mean2 {:?} logvar2 {:?}",
            mean1.dims(),
            logvar1.dims(),
            mean2.dims(),
            logvar2.dims()
        );
    }
    let log_ratio = logvar2.clone() - logvar1.clone() - 1.0;
    let scaled = (logvar1.exp() + (mean1 - mean2).powf_scalar(2.0)) / logvar2.exp();
    (log_ratio + scaled)
        .sum()
        .mul_scalar(0.5)
        .div_scalar(batch_size as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{scalar_of, seeded_uniform, tensor_from_f32_vec};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn device() -> <TestBackend as Backend>::Device {
        Default::default()
    }

    #[test]
    fn standard_normal_params_give_zero() {
        let device = device();
        let mean = Tensor::<TestBackend, 2>::zeros([4, 8], &device);
        let logvar = Tensor::<TestBackend, 2>::zeros([4, 8], &device);
        assert!(scalar_of(kl_standard_normal(mean, logvar, 4)).abs() < 1e-6);
    }

    #[test]
    fn shifted_mean_matches_closed_form() {
        let device = device();
        // Single unit-variance dimension at mean 1: KL = 0.5 * mu^2 = 0.5.
        let mean = tensor_from_f32_vec::<TestBackend, 2>(&[1.0], &[1, 1], &device);
        let logvar = Tensor::<TestBackend, 2>::zeros([1, 1], &device);
        let kl = scalar_of(kl_standard_normal(mean, logvar, 1));
        assert!((kl - 0.5).abs() < 1e-6);
    }

    #[test]
    fn equal_gaussians_have_zero_divergence() {
        let device = device();
        let mean = seeded_uniform::<TestBackend, 2>(17, &[3, 16], &device);
        let logvar = seeded_uniform::<TestBackend, 2>(18, &[3, 16], &device);
        let kl = scalar_of(kl_gaussian(
            mean.clone(),
            logvar.clone(),
            mean,
            logvar,
            3,
        ));
        assert!(kl.abs() < 1e-5);
    }

    #[test]
    fn gaussian_divergence_matches_hand_value() {
        let device = device();
        // mu1=1, mu2=0, both unit variance:
        // 0.5 * ((0 - 0 - 1) + (1 + 1) / 1) = 0.5.
        let mean1 = tensor_from_f32_vec::<TestBackend, 2>(&[1.0], &[1, 1], &device);
        let zeros = Tensor::<TestBackend, 2>::zeros([1, 1], &device);
        let kl = scalar_of(kl_gaussian(
            mean1,
            zeros.clone(),
            zeros.clone(),
            zeros,
            1,
        ));
        assert!((kl - 0.5).abs() < 1e-6);
    }

    #[test]
    fn divergence_scales_inversely_with_batch() {
        let device = device();
        let mean = seeded_uniform::<TestBackend, 2>(9, &[2, 4], &device);
        let logvar = Tensor::<TestBackend, 2>::zeros([2, 4], &device);
        let kl_b1 = scalar_of(kl_standard_normal(mean.clone(), logvar.clone(), 1));
        let kl_b2 = scalar_of(kl_standard_normal(mean, logvar, 2));
        assert!((kl_b1 - 2.0 * kl_b2).abs() < 1e-6);
    }
}
