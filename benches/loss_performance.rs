use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use burn::tensor::{backend::Backend, Tensor};
use burn_ndarray::NdArray;

use flowvid_loss::similarity::ssim;
use flowvid_loss::smoothness::windowed_flow_smoothness;
use flowvid_loss::test_utils::seeded_uniform;
use flowvid_loss::warp::IdentityWarp;
use flowvid_loss::{CompositeObjective, ObjectiveConfig, ObjectiveInputs};

type BenchBackend = NdArray<f32>;

fn bench_inputs(
    side: usize,
    device: &<BenchBackend as Backend>::Device,
) -> ObjectiveInputs<BenchBackend> {
    let clip = [2, 4, 3, side, side];
    let flow = [2, 2, 4, side, side];
    ObjectiveInputs {
        first_frame: seeded_uniform::<BenchBackend, 4>(1, &[2, 3, side, side], device),
        target_frames: seeded_uniform::<BenchBackend, 5>(2, &clip, device),
        predicted_frames: seeded_uniform::<BenchBackend, 5>(3, &clip, device),
        posterior_mean: seeded_uniform::<BenchBackend, 2>(4, &[2, 32], device),
        posterior_logvar: Tensor::zeros([2, 32], device),
        prior_mean: seeded_uniform::<BenchBackend, 2>(5, &[2, 32], device),
        prior_logvar: Tensor::zeros([2, 32], device),
        flow: seeded_uniform::<BenchBackend, 5>(6, &flow, device).mul_scalar(0.05),
        flow_back: seeded_uniform::<BenchBackend, 5>(7, &flow, device).mul_scalar(0.05),
        mask_fw: Tensor::ones([2, 4, side, side], device),
        mask_bw: Tensor::ones([2, 4, side, side], device),
        predicted_features: vec![seeded_uniform::<BenchBackend, 4>(
            8,
            &[2, 64, side / 2, side / 2],
            device,
        )],
        target_features: vec![seeded_uniform::<BenchBackend, 4>(
            9,
            &[2, 64, side / 2, side / 2],
            device,
        )],
        predicted_before_refine: None,
    }
}

fn composite_forward(c: &mut Criterion) {
    let device = Default::default();
    let mut group = c.benchmark_group("composite_forward");
    group.measurement_time(Duration::from_secs(10));

    for side in [32usize, 64] {
        let objective = CompositeObjective::new(ObjectiveConfig::new(4), IdentityWarp);
        let inputs = bench_inputs(side, &device);
        group.bench_with_input(BenchmarkId::from_parameter(side), &side, |b, _| {
            b.iter(|| black_box(objective.forward(inputs.clone())));
        });
    }
    group.finish();
}

fn individual_terms(c: &mut Criterion) {
    let device = Default::default();

    let x = seeded_uniform::<BenchBackend, 4>(11, &[2, 3, 64, 64], &device);
    let y = seeded_uniform::<BenchBackend, 4>(12, &[2, 3, 64, 64], &device);
    c.bench_function("ssim_64x64", |b| {
        b.iter(|| black_box(ssim(x.clone(), y.clone())))
    });

    let flow = seeded_uniform::<BenchBackend, 5>(13, &[2, 2, 1, 64, 64], &device);
    let frames = seeded_uniform::<BenchBackend, 5>(14, &[2, 1, 3, 64, 64], &device);
    c.bench_function("windowed_smoothness_64x64", |b| {
        b.iter(|| {
            black_box(windowed_flow_smoothness(
                flow.clone(),
                frames.clone(),
                1,
                5,
                1.0,
            ))
        })
    });
}

criterion_group!(benches, composite_forward, individual_terms);
criterion_main!(benches);
