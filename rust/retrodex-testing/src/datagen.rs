// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Data generation utilities for unit tests

use std::iter::repeat_with;
use std::ops::Range;

use arrow_array::types::ArrowPrimitiveType;
use arrow_array::{FixedSizeListArray, Float32Array, PrimitiveArray, UInt32Array};
use rand::distributions::uniform::SampleUniform;
use rand::{distributions::Uniform, prelude::Distribution, rngs::StdRng, Rng, SeedableRng};
use retrodex_arrow::FixedSizeListArrayExt;

/// Create a reproducible random float32 array in [0..1].
pub fn generate_random_array_with_seed(n: usize, seed: u64) -> Float32Array {
    let mut rng = StdRng::seed_from_u64(seed);
    Float32Array::from_iter_values(repeat_with(|| rng.gen::<f32>()).take(n))
}

/// Create a random primitive array where each element is uniformly distributed a
/// given range.
pub fn generate_random_array_with_range<T: ArrowPrimitiveType>(
    n: usize,
    range: Range<T::Native>,
    seed: u64,
) -> PrimitiveArray<T>
where
    T::Native: SampleUniform,
{
    let mut rng = StdRng::seed_from_u64(seed);
    let distribution = Uniform::new(range.start, range.end);
    PrimitiveArray::<T>::from_iter_values(repeat_with(|| distribution.sample(&mut rng)).take(n))
}

/// `rows` random vectors of width `dimension`, reproducible from `seed`.
pub fn generate_random_vectors(rows: usize, dimension: usize, seed: u64) -> FixedSizeListArray {
    let values = generate_random_array_with_seed(rows * dimension, seed);
    FixedSizeListArray::try_new_from_values(values, dimension as i32)
        .expect("Create fixed size list")
}

/// Vectors gathered around `num_clusters` well separated centers.
///
/// Row `i` belongs to cluster `i % num_clusters`; every coordinate is the
/// center's coordinate plus noise in `[-spread, spread)`.
pub fn generate_clustered_vectors(
    rows: usize,
    dimension: usize,
    num_clusters: usize,
    spread: f32,
    seed: u64,
) -> FixedSizeListArray {
    let mut rng = StdRng::seed_from_u64(seed);
    let centers = (0..num_clusters * dimension)
        .map(|_| rng.gen_range(-10.0_f32..10.0))
        .collect::<Vec<_>>();
    let noise = Uniform::new(-spread, spread);
    let mut values = Vec::with_capacity(rows * dimension);
    for i in 0..rows {
        let cluster = i % num_clusters;
        let center = &centers[cluster * dimension..(cluster + 1) * dimension];
        values.extend(center.iter().map(|c| c + noise.sample(&mut rng)));
    }
    FixedSizeListArray::try_new_from_values(Float32Array::from(values), dimension as i32)
        .expect("Create fixed size list")
}

/// Random cluster assignments in `0..num_partitions`.
pub fn generate_random_assignments(n: usize, num_partitions: u32, seed: u64) -> UInt32Array {
    generate_random_array_with_range::<arrow_array::types::UInt32Type>(n, 0..num_partitions, seed)
}
