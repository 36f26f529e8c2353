// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Dot product.

use std::iter::Sum;

use num_traits::real::Real;

#[inline]
pub fn dot<T: Real + Sum>(from: &[T], to: &[T]) -> T {
    from.iter().zip(to.iter()).map(|(x, y)| x.mul(*y)).sum()
}

pub trait Dot {
    type Output;

    /// Dot product.
    fn dot(&self, other: &Self) -> Self::Output;
}

impl Dot for [f32] {
    type Output = f32;

    #[inline]
    fn dot(&self, other: &[f32]) -> f32 {
        debug_assert_eq!(self.len(), other.len());
        let mut sums = [0.0_f32; 8];
        let chunks = self.len() / 8 * 8;
        for (a, b) in self[..chunks]
            .chunks_exact(8)
            .zip(other[..chunks].chunks_exact(8))
        {
            for ((sum, x), y) in sums.iter_mut().zip(a).zip(b) {
                *sum += x * y;
            }
        }
        sums.iter().sum::<f32>() + dot(&self[chunks..], &other[chunks..])
    }
}

/// Dot distance: `1 - x·y`, so smaller is closer.
#[inline]
pub fn dot_distance(from: &[f32], to: &[f32]) -> f32 {
    1.0 - from.dot(to)
}

/// Dot distance between a vector and a flattened batch of vectors.
pub fn dot_distance_batch<'a>(
    from: &'a [f32],
    to: &'a [f32],
    dimension: usize,
) -> impl Iterator<Item = f32> + 'a {
    debug_assert_eq!(to.len() % dimension, 0);
    to.chunks_exact(dimension).map(move |v| dot_distance(from, v))
}
