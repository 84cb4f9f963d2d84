//! Seam for the flow-warping operator.
//!
//! Warping an image by an optical-flow field (bilinear grid sampling on a
//! GPU, usually) lives outside this crate; the loss terms only need a way to
//! call it. Training code injects its warper through [`FlowWarp`].

use burn::tensor::{backend::Backend, Tensor};

/// Warps an image by a dense displacement field.
///
/// `image` has shape `[batch, channel, height, width]` and `flow` has shape
/// `[batch, 2, height, width]` where the channel dimension holds the (dx, dy)
/// displacement in pixels. The result samples `image` at the displaced
/// positions and must stay differentiable with respect to both arguments.
pub trait FlowWarp<B: Backend> {
    fn warp(&self, image: Tensor<B, 4>, flow: Tensor<B, 4>) -> Tensor<B, 4>;
}

/// Warper that returns the image untouched, ignoring the flow.
///
/// Exists for unit tests and for debugging runs where the warping pathway
/// should be disabled without touching the objective wiring. With this warper
/// the consistency terms reduce to plain differences between the two flow
/// fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityWarp;

impl<B: Backend> FlowWarp<B> for IdentityWarp {
    fn warp(&self, image: Tensor<B, 4>, _flow: Tensor<B, 4>) -> Tensor<B, 4> {
        image
    }
}

impl<B: Backend, W: FlowWarp<B>> FlowWarp<B> for &W {
    fn warp(&self, image: Tensor<B, 4>, flow: Tensor<B, 4>) -> Tensor<B, 4> {
        (*self).warp(image, flow)
    }
}
