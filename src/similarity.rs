//! Photometric similarity terms: SSIM, blended SSIM/L1 and masked L1
//! reconstruction.

use burn::tensor::{backend::Backend, module::avg_pool2d, Tensor};

const SSIM_C1: f64 = 0.01 * 0.01;
const SSIM_C2: f64 = 0.03 * 0.03;

/// Structural dissimilarity between two image batches.
///
/// Local statistics come from 3x3 average pooling with stride 1 and no
/// padding, so the comparison ignores a one-pixel border. The result is
/// `mean(clamp((1 - SSIM) / 2, 0, 1))`: 0 for identical inputs, at most 1.
///
/// # Panics
///
/// Panics when the shapes differ or the spatial extent is below 3x3.
pub fn ssim<B: Backend>(x: Tensor<B, 4>, y: Tensor<B, 4>) -> Tensor<B, 1> {
    if x.dims() != y.dims() {
        panic!(
            "ssim: input shapes differ, {:?} vs {:?}",
            x.dims(),
            y.dims()
        );
    }
    let [_, _, h, w] = x.dims();
    if h < 3 || w < 3 {
        panic!("ssim: spatial extent {h}x{w} too small for the 3x3 pooling window");
    }

    let pool = |t: Tensor<B, 4>| avg_pool2d(t, [3, 3], [1, 1], [0, 0], true);

    let mu_x = pool(x.clone());
    let mu_y = pool(y.clone());

    let sigma_x = pool(x.clone().powf_scalar(2.0)) - mu_x.clone().powf_scalar(2.0);
    let sigma_y = pool(y.clone().powf_scalar(2.0)) - mu_y.clone().powf_scalar(2.0);
    let sigma_xy = pool(x * y) - mu_x.clone() * mu_y.clone();

    let numerator = (mu_x.clone() * mu_y.clone() * 2.0 + SSIM_C1) * (sigma_xy * 2.0 + SSIM_C2);
    let denominator = (mu_x.powf_scalar(2.0) + mu_y.powf_scalar(2.0) + SSIM_C1)
        * (sigma_x + sigma_y + SSIM_C2);

    ((-numerator / denominator + 1.0) / 2.0).clamp(0.0, 1.0).mean()
}

/// Blended photometric distance over a clip, summed across time.
///
/// Both clips are `[batch, time, channel, height, width]`. Each frame pair
/// contributes `alpha * ssim + (1 - alpha) * L1`; `alpha` close to 1 leans on
/// structure, close to 0 on raw intensity.
pub fn image_similarity<B: Backend>(
    x: Tensor<B, 5>,
    y: Tensor<B, 5>,
    alpha: f64,
) -> Tensor<B, 1> {
    if x.dims() != y.dims() {
        panic!(
            "image_similarity: input shapes differ, {:?} vs {:?}",
            x.dims(),
            y.dims()
        );
    }
    let [_, t, _, _, _] = x.dims();

    let mut loss: Option<Tensor<B, 1>> = None;
    for step in 0..t {
        let xs = x.clone().slice_dim(1, step..step + 1).squeeze::<4>(1);
        let ys = y.clone().slice_dim(1, step..step + 1).squeeze::<4>(1);
        let l1 = (xs.clone() - ys.clone()).abs().mean();
        let term = ssim(xs, ys).mul_scalar(alpha) + l1.mul_scalar(1.0 - alpha);
        loss = Some(match loss {
            Some(acc) => acc + term,
            None => term,
        });
    }
    loss.expect("image_similarity: clips must contain at least one frame")
}

/// Mean absolute reconstruction error over a clip, optionally masked.
///
/// `x` and `y` are `[batch, time, channel, height, width]`; the mask, when
/// given, is `[batch, time, height, width]` and multiplies both operands
/// (broadcast over channel) so occluded pixels drop out of the comparison
/// symmetrically.
pub fn reconstruction<B: Backend>(
    x: Tensor<B, 5>,
    y: Tensor<B, 5>,
    mask: Option<Tensor<B, 4>>,
) -> Tensor<B, 1> {
    if x.dims() != y.dims() {
        panic!(
            "reconstruction: input shapes differ, {:?} vs {:?}",
            x.dims(),
            y.dims()
        );
    }
    let (x, y) = match mask {
        Some(mask) => {
            let [b, t, _, h, w] = x.dims();
            let [mb, mt, mh, mw] = mask.dims();
            if mb != b || mt != t || mh != h || mw != w {
                panic!(
                    "reconstruction: mask {:?} does not cover clip {:?}",
                    [mb, mt, mh, mw],
                    x.dims()
                );
            }
            let mask = mask.unsqueeze_dim::<5>(2);
            (x * mask.clone(), y * mask)
        }
        None => (x, y),
    };
    (x - y).abs().mean()
}
