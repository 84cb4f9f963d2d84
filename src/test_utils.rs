// Test utilities for backend-aware tensor construction
//
// Helper functions for creating tensors that work with Burn 0.18's
// Into<TensorData> trait bounds. All functions use the Vec<T> + .as_slice()
// pattern to satisfy the API requirements.

use burn::tensor::{backend::Backend, Shape, Tensor};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Create an f32 tensor from a data slice with the given shape.
///
/// # Panics
///
/// Panics when the data length does not match the shape product.
pub fn tensor_from_f32_vec<B: Backend, const D: usize>(
    data: &[f32],
    shape: &[usize],
    device: &B::Device,
) -> Tensor<B, D> {
    let expected_size: usize = shape.iter().product();
    assert_eq!(
        data.len(),
        expected_size,
        "Data length {} doesn't match shape {:?} (expected {})",
        data.len(),
        shape,
        expected_size
    );

    let data_vec: Vec<f32> = data.to_vec();
    let flat_tensor = Tensor::<B, 1>::from_floats(data_vec.as_slice(), device);
    flat_tensor.reshape(Shape::from(shape))
}

/// Create a tensor of the given shape filled with seeded uniform values in [0, 1).
///
/// Deterministic per seed, so tests comparing terms across calls see the same
/// data every run.
pub fn seeded_uniform<B: Backend, const D: usize>(
    seed: u64,
    shape: &[usize],
    device: &B::Device,
) -> Tensor<B, D> {
    let mut rng = StdRng::seed_from_u64(seed);
    let len: usize = shape.iter().product();
    let data: Vec<f32> = (0..len).map(|_| rng.random::<f32>()).collect();
    tensor_from_f32_vec(&data, shape, device)
}

/// Read the single value out of a scalar tensor as f32.
pub fn scalar_of<B: Backend>(t: Tensor<B, 1>) -> f32 {
    t.to_data()
        .as_slice::<f32>()
        .expect("scalar tensor should hold f32 data")[0]
}
