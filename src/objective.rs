//! The composite objective: one weighted sum over every loss term, with the
//! per-term values kept around for logging.

use std::marker::PhantomData;

use burn::config::Config;
use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

use crate::consistency::{flow_consistency, mask_regularization};
use crate::divergence::kl_gaussian;
use crate::perceptual::perceptual_loss;
use crate::similarity::{image_similarity, reconstruction};
use crate::smoothness::windowed_flow_smoothness;
use crate::validation::validate_loss_term;
use crate::warp::FlowWarp;

/// Hyperparameters of the composite objective.
///
/// The per-term weights only shape the [`LossBreakdown::total`]; the
/// individual terms are reported unweighted, except for flow smoothness
/// which carries its traditional 0.01 scale directly (the term is reported
/// scaled, as trainers expect to read it).
#[derive(Config, Debug)]
pub struct ObjectiveConfig {
    /// Number of future frames the model predicts per clip.
    pub num_predicted_frames: usize,

    /// SSIM share of the photometric term; the L1 share is `1 - alpha`.
    #[config(default = 0.85)]
    pub alpha_recon_image: f64,

    /// Scale applied to the windowed flow-smoothness term.
    #[config(default = 0.01)]
    pub flow_smoothness_weight: f64,
    /// Neighborhood size of the windowed smoothness comparison. Odd, >= 3.
    #[config(default = 5)]
    pub smoothness_window: usize,
    /// Image-difference sensitivity of the smoothness weighting.
    #[config(default = 1.0)]
    pub smoothness_alpha: f64,
    /// How many leading time steps the smoothness term covers. Anchoring the
    /// field on the first predicted step is enough in practice and keeps the
    /// term cheap.
    #[config(default = 1)]
    pub smoothness_steps: usize,

    /// Relative tolerance of the occlusion threshold check.
    #[config(default = 0.01)]
    pub occlusion_alpha1: f64,
    /// Absolute tolerance of the occlusion threshold check.
    #[config(default = 0.5)]
    pub occlusion_alpha2: f64,

    #[config(default = 1.0)]
    pub consistency_weight: f64,
    #[config(default = 1.0)]
    pub kl_weight: f64,
    #[config(default = 1.0)]
    pub similarity_weight: f64,
    #[config(default = 1.0)]
    pub reconstruction_weight: f64,
    #[config(default = 1.0)]
    pub reconstruction_back_weight: f64,
    #[config(default = 1.0)]
    pub reconstruction_before_weight: f64,
    #[config(default = 1.0)]
    pub perceptual_weight: f64,
    #[config(default = 1.0)]
    pub mask_weight: f64,
}

/// Everything one forward pass of the objective consumes.
///
/// Layouts: clips are `[batch, time, channel, height, width]`, flows are
/// `[batch, 2, time, height, width]`, masks are `[batch, time, height,
/// width]` and Gaussian parameters are `[batch, latent]`. Feature pyramids
/// come from the external VGG, one tensor per stage.
#[derive(Debug, Clone)]
pub struct ObjectiveInputs<B: Backend> {
    /// Last observed frame, the prediction's starting point.
    pub first_frame: Tensor<B, 4>,
    /// Ground-truth future frames.
    pub target_frames: Tensor<B, 5>,
    /// Predicted future frames.
    pub predicted_frames: Tensor<B, 5>,
    /// Posterior Gaussian inferred from the video.
    pub posterior_mean: Tensor<B, 2>,
    pub posterior_logvar: Tensor<B, 2>,
    /// Prior Gaussian inferred from the driving signal.
    pub prior_mean: Tensor<B, 2>,
    pub prior_logvar: Tensor<B, 2>,
    /// Forward optical flow, first frame toward each predicted frame.
    pub flow: Tensor<B, 5>,
    /// Backward optical flow, each predicted frame toward the first.
    pub flow_back: Tensor<B, 5>,
    /// Estimated visibility masks, 1 where the forward warp is valid.
    pub mask_fw: Tensor<B, 4>,
    /// Estimated visibility masks for the backward warp.
    pub mask_bw: Tensor<B, 4>,
    /// VGG feature pyramid of the predicted frames.
    pub predicted_features: Vec<Tensor<B, 4>>,
    /// VGG feature pyramid of the ground-truth frames.
    pub target_features: Vec<Tensor<B, 4>>,
    /// Coarse prediction before the refinement network, when the model has
    /// one.
    pub predicted_before_refine: Option<Tensor<B, 5>>,
}

/// All loss terms of one forward pass, plus their weighted sum.
///
/// Every field is a scalar tensor on the training backend so the trainer can
/// backprop through `total` and log the rest.
#[derive(Debug, Clone)]
pub struct LossBreakdown<B: Backend> {
    pub flow_smoothness: Tensor<B, 1>,
    pub flow_consistency: Tensor<B, 1>,
    pub kl: Tensor<B, 1>,
    pub similarity: Tensor<B, 1>,
    pub reconstruction: Tensor<B, 1>,
    pub reconstruction_back: Tensor<B, 1>,
    pub reconstruction_before: Tensor<B, 1>,
    pub perceptual: Tensor<B, 1>,
    pub mask_regularization: Tensor<B, 1>,
    pub total: Tensor<B, 1>,
}

impl<B: Backend> LossBreakdown<B> {
    /// Term names and values in a stable order, for logging.
    pub fn named_terms(&self) -> Vec<(&'static str, Tensor<B, 1>)> {
        vec![
            ("flow_smoothness", self.flow_smoothness.clone()),
            ("flow_consistency", self.flow_consistency.clone()),
            ("kl", self.kl.clone()),
            ("similarity", self.similarity.clone()),
            ("reconstruction", self.reconstruction.clone()),
            ("reconstruction_back", self.reconstruction_back.clone()),
            ("reconstruction_before", self.reconstruction_before.clone()),
            ("perceptual", self.perceptual.clone()),
            ("mask_regularization", self.mask_regularization.clone()),
            ("total", self.total.clone()),
        ]
    }

    /// Host-side f32 copies of every term, for metric sinks that want plain
    /// numbers.
    pub fn scalars(&self) -> Vec<(&'static str, f32)> {
        self.named_terms()
            .into_iter()
            .map(|(name, term)| {
                let value = term.to_data().as_slice::<f32>().map(|s| s[0]).unwrap_or(f32::NAN);
                (name, value)
            })
            .collect()
    }

    /// Detach the breakdown into a serializable summary for metric logging.
    pub fn summary(&self) -> LossSummary {
        let mut scalars = self.scalars().into_iter();
        let mut next = || scalars.next().map(|(_, v)| v).unwrap_or(f32::NAN);
        LossSummary {
            flow_smoothness: next(),
            flow_consistency: next(),
            kl: next(),
            similarity: next(),
            reconstruction: next(),
            reconstruction_back: next(),
            reconstruction_before: next(),
            perceptual: next(),
            mask_regularization: next(),
            total: next(),
        }
    }
}

/// Plain-number snapshot of one [`LossBreakdown`], decoupled from the
/// backend so it can go straight into a metrics file or progress log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossSummary {
    pub flow_smoothness: f32,
    pub flow_consistency: f32,
    pub kl: f32,
    pub similarity: f32,
    pub reconstruction: f32,
    pub reconstruction_back: f32,
    pub reconstruction_before: f32,
    pub perceptual: f32,
    pub mask_regularization: f32,
    pub total: f32,
}

impl LossSummary {
    /// JSON form of the summary, one object per training step.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("a struct of f32 fields always serializes")
    }
}

/// Stateless evaluator of the full training objective.
///
/// Owns the hyperparameters and the injected flow warper; evaluation is pure
/// given the inputs.
#[derive(Debug)]
pub struct CompositeObjective<B: Backend, W: FlowWarp<B>> {
    config: ObjectiveConfig,
    warper: W,
    _backend: PhantomData<B>,
}

impl<B: Backend, W: FlowWarp<B>> CompositeObjective<B, W> {
    pub fn new(config: ObjectiveConfig, warper: W) -> Self {
        if config.smoothness_steps == 0 || config.num_predicted_frames == 0 {
            panic!("CompositeObjective: step counts must be >= 1");
        }
        Self {
            config,
            warper,
            _backend: PhantomData,
        }
    }

    pub fn config(&self) -> &ObjectiveConfig {
        &self.config
    }

    /// Evaluate every loss term for one batch.
    ///
    /// # Panics
    ///
    /// Panics with a diagnostic message when tensor shapes disagree or any
    /// term comes out NaN/infinite.
    pub fn forward(&self, inputs: ObjectiveInputs<B>) -> LossBreakdown<B> {
        let cfg = &self.config;
        let steps = cfg.num_predicted_frames;
        self.check_shapes(&inputs);

        let ObjectiveInputs {
            first_frame,
            target_frames,
            predicted_frames,
            posterior_mean,
            posterior_logvar,
            prior_mean,
            prior_logvar,
            flow,
            flow_back,
            mask_fw,
            mask_bw,
            predicted_features,
            target_features,
            predicted_before_refine,
        } = inputs;

        let device = target_frames.device();
        let [batch, _, _, _, _] = target_frames.dims();
        let first_clip = first_frame.unsqueeze_dim::<5>(1);

        // Flow smoothness: forward flow against the target clip, backward
        // flow against the single starting frame.
        let flow_smoothness = (windowed_flow_smoothness(
            flow.clone(),
            target_frames.clone(),
            cfg.smoothness_steps,
            cfg.smoothness_window,
            cfg.smoothness_alpha,
        ) + windowed_flow_smoothness(
            flow_back.clone(),
            first_clip.clone(),
            1,
            cfg.smoothness_window,
            cfg.smoothness_alpha,
        ))
        .mul_scalar(cfg.flow_smoothness_weight);

        let flow_consistency = flow_consistency(
            &self.warper,
            flow,
            flow_back.clone(),
            Some((mask_fw.clone(), mask_bw.clone())),
            steps,
        );

        let kl = kl_gaussian(
            posterior_mean,
            posterior_logvar,
            prior_mean,
            prior_logvar,
            batch,
        );

        let similarity = image_similarity(
            predicted_frames.clone(),
            target_frames.clone(),
            cfg.alpha_recon_image,
        );

        let reconstruction_term =
            reconstruction(predicted_frames, target_frames.clone(), None);

        // Warp each target frame back toward the start with the masked
        // backward flow; the result should reproduce the first frame
        // wherever the backward mask says the warp is valid.
        let mut warped_back: Vec<Tensor<B, 5>> = Vec::with_capacity(steps);
        for step in 0..steps {
            let target_step = target_frames
                .clone()
                .slice_dim(1, step..step + 1)
                .squeeze::<4>(1);
            let flow_back_step = flow_back
                .clone()
                .slice_dim(2, step..step + 1)
                .squeeze::<4>(2);
            let mask_bw_step = mask_bw.clone().slice_dim(1, step..step + 1);
            let warped = self
                .warper
                .warp(target_step, flow_back_step.neg() * mask_bw_step);
            warped_back.push(warped.unsqueeze_dim::<5>(1));
        }
        let previous_frames = Tensor::cat(warped_back, 1);
        let first_repeated = first_clip.repeat_dim(1, steps);
        let mask_bw_clip = mask_bw.clone().slice_dim(1, 0..steps);
        let reconstruction_back =
            reconstruction(previous_frames, first_repeated, Some(mask_bw_clip));

        let reconstruction_before = match predicted_before_refine {
            Some(coarse) => reconstruction(coarse, target_frames, Some(mask_fw.clone())),
            None => Tensor::zeros([1], &device),
        };

        let perceptual = perceptual_loss(&predicted_features, &target_features);

        let mask_regularization = mask_regularization(mask_fw, mask_bw);

        let total = flow_smoothness.clone()
            + flow_consistency.clone().mul_scalar(cfg.consistency_weight)
            + kl.clone().mul_scalar(cfg.kl_weight)
            + similarity.clone().mul_scalar(cfg.similarity_weight)
            + reconstruction_term
                .clone()
                .mul_scalar(cfg.reconstruction_weight)
            + reconstruction_back
                .clone()
                .mul_scalar(cfg.reconstruction_back_weight)
            + reconstruction_before
                .clone()
                .mul_scalar(cfg.reconstruction_before_weight)
            + perceptual.clone().mul_scalar(cfg.perceptual_weight)
            + mask_regularization.clone().mul_scalar(cfg.mask_weight);

        let breakdown = LossBreakdown {
            flow_smoothness,
            flow_consistency,
            kl,
            similarity,
            reconstruction: reconstruction_term,
            reconstruction_back,
            reconstruction_before,
            perceptual,
            mask_regularization,
            total,
        };
        for (name, term) in breakdown.named_terms() {
            validate_loss_term(&term, name);
        }
        breakdown
    }

    fn check_shapes(&self, inputs: &ObjectiveInputs<B>) {
        let [b, t, c, h, w] = inputs.target_frames.dims();
        let steps = self.config.num_predicted_frames;

        if inputs.predicted_frames.dims() != [b, t, c, h, w] {
            panic!(
                "SHAPE ERROR: predicted clip {:?} does not match target clip {:?}",
                inputs.predicted_frames.dims(),
                [b, t, c, h, w]
            );
        }
        if inputs.first_frame.dims() != [b, c, h, w] {
            panic!(
                "SHAPE ERROR: first frame {:?} does not match clip layout {:?}",
                inputs.first_frame.dims(),
                [b, c, h, w]
            );
        }
        let [fb, fc, ft, fh, fw] = inputs.flow.dims();
        if fb != b || fc != 2 || fh != h || fw != w {
            panic!(
                "SHAPE ERROR: flow {:?} does not match clip {:?} (expected [batch, 2, time, h, w])",
                inputs.flow.dims(),
                [b, t, c, h, w]
            );
        }
        if inputs.flow_back.dims() != inputs.flow.dims() {
            panic!(
                "SHAPE ERROR: backward flow {:?} does not match forward flow {:?}",
                inputs.flow_back.dims(),
                inputs.flow.dims()
            );
        }
        if ft < steps || t < steps {
            panic!(
                "SHAPE ERROR: {} predicted frames configured but flow holds {} and clip {}",
                steps, ft, t
            );
        }
        for (name, mask) in [("mask_fw", &inputs.mask_fw), ("mask_bw", &inputs.mask_bw)] {
            let [mb, mt, mh, mw] = mask.dims();
            if mb != b || mt < steps || mh != h || mw != w {
                panic!(
                    "SHAPE ERROR: {} {:?} does not cover {} steps of {:?}",
                    name,
                    [mb, mt, mh, mw],
                    steps,
                    [b, h, w]
                );
            }
        }
        if let Some(coarse) = &inputs.predicted_before_refine {
            if coarse.dims() != [b, t, c, h, w] {
                panic!(
                    "SHAPE ERROR: pre-refinement clip {:?} does not match target clip {:?}",
                    coarse.dims(),
                    [b, t, c, h, w]
                );
            }
        }
    }
}
