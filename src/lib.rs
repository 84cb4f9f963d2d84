//! flowvid-loss: composite training objective for flow-based video prediction.
//!
//! The crate is a library of differentiable loss terms used when training a
//! video-prediction / talking-head generation model: optical-flow smoothness
//! and forward-backward consistency, occlusion-mask regularization, SSIM and
//! L1 photometric terms, VGG-feature perceptual distance and KL divergence
//! between latent Gaussians. A thin aggregator combines the terms into one
//! weighted objective and exposes every term for logging.
//!
//! The tensor runtime is `burn`; the flow-warping operator is injected
//! through the [`warp::FlowWarp`] trait and the VGG feature extractor stays
//! outside the crate (callers pass pre-extracted feature maps).

pub mod consistency;
pub mod divergence;
pub mod objective;
pub mod perceptual;
pub mod similarity;
pub mod smoothness;
pub mod validation;
pub mod warp;

/// Test utilities for backend-aware tensor construction
///
/// Provides helper functions for creating tensors that work with Burn 0.18's
/// Into<TensorData> trait bounds using Vec<T> + .as_slice() pattern.
pub mod test_utils;

pub use objective::{
    CompositeObjective, LossBreakdown, LossSummary, ObjectiveConfig, ObjectiveInputs,
};
pub use warp::FlowWarp;
