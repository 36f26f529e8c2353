// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! L2 (Euclidean) distance.
//!

use std::iter::Sum;

use num_traits::real::Real;

/// Calculate the L2 distance between two vectors.
///
pub trait L2 {
    type Output;

    /// Calculate the (squared) L2 distance between two vectors.
    fn l2(&self, other: &Self) -> Self::Output;
}

/// Calculate the L2 distance between two vectors, using scalar operations.
///
/// Rely on compiler auto-vectorization.
#[inline]
fn l2_scalar<T: Real + Sum>(from: &[T], to: &[T]) -> T {
    from.iter()
        .zip(to.iter())
        .map(|(a, b)| a.sub(*b).powi(2))
        .sum::<T>()
}

impl L2 for [f32] {
    type Output = f32;

    #[inline]
    fn l2(&self, other: &[f32]) -> f32 {
        debug_assert_eq!(self.len(), other.len());
        // Eight independent accumulators so LLVM emits packed adds.
        let mut sums = [0.0_f32; 8];
        let chunks = self.len() / 8 * 8;
        for (a, b) in self[..chunks]
            .chunks_exact(8)
            .zip(other[..chunks].chunks_exact(8))
        {
            for ((sum, x), y) in sums.iter_mut().zip(a).zip(b) {
                let d = x - y;
                *sum += d * d;
            }
        }
        sums.iter().sum::<f32>() + l2_scalar(&self[chunks..], &other[chunks..])
    }
}

impl L2 for [f64] {
    type Output = f64;

    #[inline]
    fn l2(&self, other: &[f64]) -> f64 {
        l2_scalar(self, other)
    }
}

/// Compute L2 distance between two vectors.
#[inline]
pub fn l2_distance(from: &[f32], to: &[f32]) -> f32 {
    from.l2(to)
}

/// Compute L2 distance between a vector and a batch of vectors.
///
/// Parameters
///
/// - `from`: the vector to compute distance from.
/// - `to`: a flattened list of vectors to compute distance to.
/// - `dimension`: the dimension of the vectors.
pub fn l2_distance_batch<'a>(
    from: &'a [f32],
    to: &'a [f32],
    dimension: usize,
) -> impl Iterator<Item = f32> + 'a {
    debug_assert_eq!(from.len(), dimension);
    debug_assert_eq!(to.len() % dimension, 0);

    to.chunks_exact(dimension).map(move |v| from.l2(v))
}
