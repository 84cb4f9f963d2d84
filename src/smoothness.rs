//! Optical-flow smoothness regularizers.
//!
//! Two complementary assumptions are implemented:
//! - [`windowed_flow_smoothness`]: first-order local constancy (the
//!   Lucas-Kanade assumption). Flow differences to every neighbor in a small
//!   window are penalized, down-weighted where the image itself changes.
//! - [`edge_aware_gradient_smoothness`]: global smoothness (the Horn-Schunck
//!   assumption). L1 of the flow gradients, attenuated at image edges.
//!
//! Flow fields arrive normalized to [-1, 1] and images to [0, 1]; both terms
//! rescale them (flow by 128, image by 256) so the penalty operates in pixel
//! units.

use burn::tensor::{backend::Backend, Tensor};

/// Displacement normalization factor: flow values are fractions of 128 px.
const FLOW_SCALE: f64 = 128.0;
/// Intensity normalization factor: image values are fractions of 256.
const IMAGE_SCALE: f64 = 256.0;

/// Horizontal forward difference, `t[.., x] - t[.., x + 1]`.
///
/// Output is one column narrower than the input.
pub fn gradient_x<B: Backend>(t: Tensor<B, 4>) -> Tensor<B, 4> {
    let [b, c, h, w] = t.dims();
    t.clone().slice([0..b, 0..c, 0..h, 0..w - 1]) - t.slice([0..b, 0..c, 0..h, 1..w])
}

/// Vertical forward difference, `t[.., y, ..] - t[.., y + 1, ..]`.
///
/// Output is one row shorter than the input.
pub fn gradient_y<B: Backend>(t: Tensor<B, 4>) -> Tensor<B, 4> {
    let [b, c, h, w] = t.dims();
    t.clone().slice([0..b, 0..c, 0..h - 1, 0..w]) - t.slice([0..b, 0..c, 1..h, 0..w])
}

/// Windowed first-order smoothness over the leading `steps` time slices.
///
/// `flow` is `[batch, 2, time, height, width]`, `frames` is
/// `[batch, time, channel, height, width]`. Per step the squared flow
/// difference between the window center and each neighbor is weighted by
/// `exp(-alpha * squared image difference - squared spatial distance)` and
/// averaged over `batch * height * width`. Neighbors sharing a row or column
/// with the center are skipped; only offsets displaced on both axes
/// contribute.
///
/// # Panics
///
/// Panics when `window` is even or smaller than 3, when the spatial extent
/// does not exceed `window`, or when `steps` exceeds the time extent.
pub fn windowed_flow_smoothness<B: Backend>(
    flow: Tensor<B, 5>,
    frames: Tensor<B, 5>,
    steps: usize,
    window: usize,
    alpha: f64,
) -> Tensor<B, 1> {
    let [_, _, flow_t, _, _] = flow.dims();
    let [_, frames_t, _, _, _] = frames.dims();
    if steps > flow_t || steps > frames_t {
        panic!(
            "windowed_flow_smoothness: {} steps requested but flow has {} and frames {}",
            steps, flow_t, frames_t
        );
    }

    let mut loss: Option<Tensor<B, 1>> = None;
    for step in 0..steps {
        let flow_step = flow.clone().slice_dim(2, step..step + 1).squeeze::<4>(2);
        let frame_step = frames.clone().slice_dim(1, step..step + 1).squeeze::<4>(1);
        let term = windowed_step(flow_step, frame_step, window, alpha);
        loss = Some(match loss {
            Some(acc) => acc + term,
            None => term,
        });
    }
    loss.expect("windowed_flow_smoothness: steps must be >= 1")
}

fn windowed_step<B: Backend>(
    flow: Tensor<B, 4>,
    image: Tensor<B, 4>,
    window: usize,
    alpha: f64,
) -> Tensor<B, 1> {
    if window < 3 || window % 2 == 0 {
        panic!("windowed_flow_smoothness: window must be odd and >= 3, got {window}");
    }
    let [bs, ch, h, w] = image.dims();
    let [fb, fc, fh, fw] = flow.dims();
    if fb != bs || fh != h || fw != w {
        panic!(
            "windowed_flow_smoothness: flow {:?} and image {:?} disagree spatially",
            [fb, fc, fh, fw],
            [bs, ch, h, w]
        );
    }
    if h <= window || w <= window {
        panic!("windowed_flow_smoothness: spatial extent {h}x{w} too small for window {window}");
    }

    let flow = flow.mul_scalar(FLOW_SCALE);
    let image = image.mul_scalar(IMAGE_SCALE);
    let center = (window - 1) / 2;

    let flow_center = flow
        .clone()
        .slice([0..bs, 0..2, center..h - center, center..w - center]);
    let image_center = image
        .clone()
        .slice([0..bs, 0..ch, center..h - center, center..w - center]);

    let mut terms: Vec<Tensor<B, 4>> = Vec::with_capacity((window - 1) * (window - 1));
    for i in 0..window {
        if i == center {
            continue;
        }
        for j in 0..window {
            if j == center {
                continue;
            }
            let flow_offset = flow.clone().slice([
                0..bs,
                0..2,
                i..h - (window - i - 1),
                j..w - (window - j - 1),
            ]);
            let image_offset = image.clone().slice([
                0..bs,
                0..ch,
                i..h - (window - i - 1),
                j..w - (window - j - 1),
            ]);

            let flow_sub = (flow_center.clone() - flow_offset)
                .powf_scalar(2.0)
                .sum_dim(1);
            let image_sub = (image_center.clone() - image_offset)
                .powf_scalar(2.0)
                .sum_dim(1);

            let di = i as isize - center as isize;
            let dj = j as isize - center as isize;
            let distance_sq = (di * di + dj * dj) as f64;

            let weight = image_sub.mul_scalar(-alpha).sub_scalar(distance_sq).exp();
            terms.push(flow_sub * weight);
        }
    }

    Tensor::cat(terms, 1)
        .sum()
        .div_scalar((bs * h * w) as f64)
}

/// Edge-aware global smoothness over the leading `steps` time slices.
///
/// L1 of the flow spatial gradients, each pixel down-weighted by
/// `exp(-mean(|image gradient|))` across channels so motion boundaries that
/// coincide with image edges go unpunished. Shapes as in
/// [`windowed_flow_smoothness`].
pub fn edge_aware_gradient_smoothness<B: Backend>(
    flow: Tensor<B, 5>,
    frames: Tensor<B, 5>,
    steps: usize,
) -> Tensor<B, 1> {
    let [_, _, flow_t, _, _] = flow.dims();
    let [_, frames_t, _, _, _] = frames.dims();
    if steps > flow_t || steps > frames_t {
        panic!(
            "edge_aware_gradient_smoothness: {} steps requested but flow has {} and frames {}",
            steps, flow_t, frames_t
        );
    }

    let mut loss: Option<Tensor<B, 1>> = None;
    for step in 0..steps {
        let flow_step = flow.clone().slice_dim(2, step..step + 1).squeeze::<4>(2);
        let frame_step = frames.clone().slice_dim(1, step..step + 1).squeeze::<4>(1);
        let term = edge_aware_step(flow_step, frame_step);
        loss = Some(match loss {
            Some(acc) => acc + term,
            None => term,
        });
    }
    loss.expect("edge_aware_gradient_smoothness: steps must be >= 1")
}

fn edge_aware_step<B: Backend>(flow: Tensor<B, 4>, image: Tensor<B, 4>) -> Tensor<B, 1> {
    let flow = flow.mul_scalar(FLOW_SCALE);
    let image = image.mul_scalar(IMAGE_SCALE);

    let flow_grad_x = gradient_x(flow.clone());
    let flow_grad_y = gradient_y(flow);
    let weight_x = gradient_x(image.clone()).abs().mean_dim(1).neg().exp();
    let weight_y = gradient_y(image).abs().mean_dim(1).neg().exp();

    let loss_x = (flow_grad_x * weight_x).abs().mean();
    let loss_y = (flow_grad_y * weight_y).abs().mean();
    loss_x + loss_y
}

/// L1 distance between the absolute spatial gradients of two images.
///
/// Matches edge strength without caring about edge polarity; used as an
/// auxiliary sharpness term on predicted frames.
pub fn image_gradient_loss<B: Backend>(input: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 1> {
    if input.dims() != target.dims() {
        panic!(
            "image_gradient_loss: input {:?} and target {:?} shapes differ",
            input.dims(),
            target.dims()
        );
    }
    let gx = (gradient_x(target.clone()).abs() - gradient_x(input.clone()).abs())
        .abs()
        .mean();
    let gy = (gradient_y(target).abs() - gradient_y(input).abs())
        .abs()
        .mean();
    gx + gy
}
