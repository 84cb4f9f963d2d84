//! Forward-backward flow consistency and occlusion handling.
//!
//! A forward flow field and a backward flow field describing the same motion
//! must agree wherever nothing is occluded: the backward field sampled at the
//! forward-displaced position should reproduce the forward field, and vice
//! versa. [`flow_consistency`] penalizes the disagreement, optionally gated
//! by occlusion masks. The masks themselves either come from a network
//! (regularized by [`mask_regularization`]) or from the threshold check in
//! [`occlusion_masks`].

use burn::tensor::{backend::Backend, Tensor};

use crate::warp::FlowWarp;

/// Forward-backward consistency penalty over the leading `steps` time slices.
///
/// `flow` and `flow_back` are `[batch, 2, time, height, width]`. Per step:
/// the forward field warped by the negated backward field must match the
/// backward field, and the backward field warped by the forward field must
/// match the forward field. `masks` is `(mask_fw, mask_bw)`, each
/// `[batch, time, height, width]`; when given, each residual is gated by the
/// mask of the direction it is compared against.
pub fn flow_consistency<B: Backend, W: FlowWarp<B>>(
    warper: &W,
    flow: Tensor<B, 5>,
    flow_back: Tensor<B, 5>,
    masks: Option<(Tensor<B, 4>, Tensor<B, 4>)>,
    steps: usize,
) -> Tensor<B, 1> {
    if flow.dims() != flow_back.dims() {
        panic!(
            "flow_consistency: flow {:?} and flow_back {:?} shapes differ",
            flow.dims(),
            flow_back.dims()
        );
    }
    let [_, _, t, _, _] = flow.dims();
    if steps == 0 || steps > t {
        panic!("flow_consistency: {steps} steps requested but flow holds {t}");
    }

    let mut loss: Option<Tensor<B, 1>> = None;
    for step in 0..steps {
        let fwd = flow.clone().slice_dim(2, step..step + 1).squeeze::<4>(2);
        let bwd = flow_back
            .clone()
            .slice_dim(2, step..step + 1)
            .squeeze::<4>(2);

        let prev_residual = (warper.warp(fwd.clone(), bwd.clone().neg()) - bwd.clone()).abs();
        let next_residual = (warper.warp(bwd, fwd.clone()) - fwd).abs();

        let term = match &masks {
            Some((mask_fw, mask_bw)) => {
                let mask_fw_step = mask_fw.clone().slice_dim(1, step..step + 1);
                let mask_bw_step = mask_bw.clone().slice_dim(1, step..step + 1);
                (mask_bw_step * prev_residual).mean() + (mask_fw_step * next_residual).mean()
            }
            None => prev_residual.mean() + next_residual.mean(),
        };
        loss = Some(match loss {
            Some(acc) => acc + term,
            None => term,
        });
    }
    loss.expect("flow_consistency: steps must be >= 1")
}

/// Threshold-based occlusion estimate from the forward-backward check.
///
/// Returns `(mask_fw, mask_bw)`, each `[batch, time, height, width]` with 1
/// at pixels where the two fields agree and 0 where they do not. A pixel
/// counts as occluded when the squared consistency residual exceeds
/// `alpha1 * (squared magnitude of both fields) + alpha2`, so the tolerance
/// grows with the motion itself.
pub fn occlusion_masks<B: Backend, W: FlowWarp<B>>(
    warper: &W,
    flow: Tensor<B, 5>,
    flow_back: Tensor<B, 5>,
    alpha1: f64,
    alpha2: f64,
) -> (Tensor<B, 4>, Tensor<B, 4>) {
    if flow.dims() != flow_back.dims() {
        panic!(
            "occlusion_masks: flow {:?} and flow_back {:?} shapes differ",
            flow.dims(),
            flow_back.dims()
        );
    }
    let [_, _, t, _, _] = flow.dims();

    let mut fw_steps: Vec<Tensor<B, 3>> = Vec::with_capacity(t);
    let mut bw_steps: Vec<Tensor<B, 3>> = Vec::with_capacity(t);
    for step in 0..t {
        let fwd = flow.clone().slice_dim(2, step..step + 1).squeeze::<4>(2);
        let bwd = flow_back
            .clone()
            .slice_dim(2, step..step + 1)
            .squeeze::<4>(2);

        let cross_fw = warper.warp(bwd.clone(), fwd.clone());
        fw_steps.push(visible(cross_fw, fwd.clone(), alpha1, alpha2));

        let cross_bw = warper.warp(fwd, bwd.clone().neg());
        bw_steps.push(visible(cross_bw, bwd, alpha1, alpha2));
    }

    (
        Tensor::stack::<4>(fw_steps, 1),
        Tensor::stack::<4>(bw_steps, 1),
    )
}

/// 1 where `warped` and `reference` agree within the motion-scaled tolerance.
fn visible<B: Backend>(
    warped: Tensor<B, 4>,
    reference: Tensor<B, 4>,
    alpha1: f64,
    alpha2: f64,
) -> Tensor<B, 3> {
    let residual_sq = (warped.clone() - reference.clone())
        .powf_scalar(2.0)
        .sum_dim(1);
    let magnitude_sq = warped.powf_scalar(2.0).sum_dim(1) + reference.powf_scalar(2.0).sum_dim(1);
    let threshold = magnitude_sq.mul_scalar(alpha1).add_scalar(alpha2);
    residual_sq
        .greater(threshold)
        .bool_not()
        .float()
        .squeeze::<3>(1)
}

/// Penalty against the trivial all-occluded mask estimate.
///
/// `mean(1 - mask_bw) + mean(1 - mask_fw)`: zero for all-visible masks, 2 for
/// masks that hide everything.
pub fn mask_regularization<B: Backend>(
    mask_fw: Tensor<B, 4>,
    mask_bw: Tensor<B, 4>,
) -> Tensor<B, 1> {
    (mask_bw.neg() + 1.0).mean() + (mask_fw.neg() + 1.0).mean()
}

/// Validity mask that is 1 in the interior and 0 inside the padded border.
///
/// `pad_rows` and `pad_cols` are `[leading, trailing]` border widths. Shape
/// of the result is `[batch, height, width]`.
pub fn border_mask<B: Backend>(
    batch: usize,
    height: usize,
    width: usize,
    pad_rows: [usize; 2],
    pad_cols: [usize; 2],
    device: &B::Device,
) -> Tensor<B, 3> {
    let inner_h = height
        .checked_sub(pad_rows[0] + pad_rows[1])
        .unwrap_or_else(|| panic!("border_mask: row padding {pad_rows:?} exceeds height {height}"));
    let inner_w = width
        .checked_sub(pad_cols[0] + pad_cols[1])
        .unwrap_or_else(|| panic!("border_mask: col padding {pad_cols:?} exceeds width {width}"));

    let interior = Tensor::<B, 3>::ones([batch, inner_h, inner_w], device);
    Tensor::<B, 3>::zeros([batch, height, width], device).slice_assign(
        [
            0..batch,
            pad_rows[0]..pad_rows[0] + inner_h,
            pad_cols[0]..pad_cols[0] + inner_w,
        ],
        interior,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{scalar_of, seeded_uniform};
    use crate::warp::IdentityWarp;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn device() -> <TestBackend as Backend>::Device {
        Default::default()
    }

    #[test]
    fn agreeing_fields_have_zero_residual() {
        let device = device();
        let flow = seeded_uniform::<TestBackend, 5>(41, &[2, 2, 3, 4, 4], &device);
        let loss = flow_consistency(&IdentityWarp, flow.clone(), flow, None, 3);
        assert!(scalar_of(loss).abs() < 1e-6);
    }

    #[test]
    fn all_ones_masks_match_unmasked() {
        let device = device();
        let flow = seeded_uniform::<TestBackend, 5>(42, &[1, 2, 2, 4, 4], &device);
        let back = seeded_uniform::<TestBackend, 5>(43, &[1, 2, 2, 4, 4], &device);
        let ones = Tensor::<TestBackend, 4>::ones([1, 2, 4, 4], &device);

        let masked = scalar_of(flow_consistency(
            &IdentityWarp,
            flow.clone(),
            back.clone(),
            Some((ones.clone(), ones)),
            2,
        ));
        let unmasked = scalar_of(flow_consistency(&IdentityWarp, flow, back, None, 2));
        assert!((masked - unmasked).abs() < 1e-5);
    }

    #[test]
    fn zero_masks_silence_the_term() {
        let device = device();
        let flow = seeded_uniform::<TestBackend, 5>(44, &[1, 2, 2, 4, 4], &device);
        let back = seeded_uniform::<TestBackend, 5>(45, &[1, 2, 2, 4, 4], &device);
        let zeros = Tensor::<TestBackend, 4>::zeros([1, 2, 4, 4], &device);

        let loss = flow_consistency(
            &IdentityWarp,
            flow,
            back,
            Some((zeros.clone(), zeros)),
            2,
        );
        assert!(scalar_of(loss).abs() < 1e-7);
    }

    #[test]
    fn consistent_fields_are_fully_visible() {
        let device = device();
        let flow = seeded_uniform::<TestBackend, 5>(46, &[1, 2, 2, 4, 4], &device);
        let (mask_fw, mask_bw) = occlusion_masks(&IdentityWarp, flow.clone(), flow, 0.01, 0.5);

        assert_eq!(mask_fw.dims(), [1, 2, 4, 4]);
        assert!((scalar_of(mask_fw.mean()) - 1.0).abs() < 1e-6);
        assert!((scalar_of(mask_bw.mean()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn wildly_disagreeing_fields_are_occluded() {
        let device = device();
        let flow = Tensor::<TestBackend, 5>::ones([1, 2, 1, 4, 4], &device).mul_scalar(5.0);
        let back = flow.clone().neg();
        let (mask_fw, mask_bw) = occlusion_masks(&IdentityWarp, flow, back, 0.01, 0.5);

        assert!(scalar_of(mask_fw.mean()).abs() < 1e-6);
        assert!(scalar_of(mask_bw.mean()).abs() < 1e-6);
    }

    #[test]
    fn mask_regularizer_spans_zero_to_two() {
        let device = device();
        let ones = Tensor::<TestBackend, 4>::ones([1, 2, 4, 4], &device);
        let zeros = Tensor::<TestBackend, 4>::zeros([1, 2, 4, 4], &device);

        assert!(scalar_of(mask_regularization(ones.clone(), ones.clone())).abs() < 1e-6);
        let max = scalar_of(mask_regularization(zeros.clone(), zeros));
        assert!((max - 2.0).abs() < 1e-6);
    }

    #[test]
    fn border_mask_zeroes_the_padding() {
        let device = device();
        let mask = border_mask::<TestBackend>(2, 6, 8, [1, 1], [2, 2], &device);
        assert_eq!(mask.dims(), [2, 6, 8]);
        // Interior is 4x4 per batch element.
        let total = scalar_of(mask.sum());
        assert!((total - 2.0 * 16.0).abs() < 1e-6);
    }
}
