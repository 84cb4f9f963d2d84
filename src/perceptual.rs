//! Perceptual (VGG feature) distance.
//!
//! The convolutional feature extractor is an external collaborator: callers
//! run predicted and ground-truth frames through their VGG and hand the
//! resulting feature pyramids to [`perceptual_loss`]. [`normalize_imagenet`]
//! prepares frames for that extractor.

use burn::tensor::{backend::Backend, Tensor};

/// Channel means of the ImageNet training set, the statistics VGG was
/// trained with.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// Channel standard deviations of the ImageNet training set.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Mean absolute feature distance summed over pyramid levels.
///
/// Each slice element is one VGG stage's activation for the whole batch.
/// Levels are compared with plain L1 and the per-level means are summed, so
/// deeper (smaller) maps are not drowned out by the early high-resolution
/// ones.
///
/// # Panics
///
/// Panics when the pyramids are empty or their lengths or per-level shapes
/// disagree.
pub fn perceptual_loss<B: Backend>(
    predicted: &[Tensor<B, 4>],
    target: &[Tensor<B, 4>],
) -> Tensor<B, 1> {
    if predicted.is_empty() {
        panic!("perceptual_loss: feature pyramids are empty");
    }
    if predicted.len() != target.len() {
        panic!(
            "perceptual_loss: {} predicted levels vs {} target levels",
            predicted.len(),
            target.len()
        );
    }

    let mut loss: Option<Tensor<B, 1>> = None;
    for (level, (pred, tgt)) in predicted.iter().zip(target.iter()).enumerate() {
        if pred.dims() != tgt.dims() {
            panic!(
                "perceptual_loss: level {} shapes differ, {:?} vs {:?}",
                level,
                pred.dims(),
                tgt.dims()
            );
        }
        let term = (tgt.clone() - pred.clone()).abs().mean();
        loss = Some(match loss {
            Some(acc) => acc + term,
            None => term,
        });
    }
    loss.expect("at least one pyramid level")
}

/// Normalize an RGB batch with ImageNet statistics, `(x - mean) / std`.
///
/// Input is `[batch, 3, height, width]` with values in [0, 1], the layout the
/// external VGG expects.
pub fn normalize_imagenet<B: Backend>(frames: Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, c, _, _] = frames.dims();
    if c != 3 {
        panic!("normalize_imagenet: expected 3 channels, got {c}");
    }
    let device = frames.device();
    let mean = Tensor::<B, 1>::from_floats(IMAGENET_MEAN.as_slice(), &device).reshape([1, 3, 1, 1]);
    let std = Tensor::<B, 1>::from_floats(IMAGENET_STD.as_slice(), &device).reshape([1, 3, 1, 1]);
    (frames - mean) / std
}
