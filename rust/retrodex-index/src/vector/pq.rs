// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Product Quantization
//!

use std::sync::Arc;

use arrow_array::Float32Array;
use rayon::prelude::*;
use retrodex_core::{Error, Result};
use retrodex_linalg::distance::{dot, l2_distance_batch};
use retrodex_linalg::kernels::argmin;
use snafu::location;

pub mod builder;
pub mod utils;

pub use builder::PQBuildParams;
use utils::{get_sub_vector_centroids, num_centroids};

/// Rows encoded by one rayon task.
const ENCODE_CHUNK_ROWS: usize = 512;

/// Product Quantization over `f32` vectors.
///
/// Every code is stored in one byte per sub-vector, so `num_bits` ranges
/// over `1..=8`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductQuantizer {
    /// The number of bits to represent a centroid.
    pub num_bits: u32,

    /// Number of sub-vectors.
    pub num_sub_vectors: usize,

    /// Vector dimension.
    pub dimension: usize,

    /// PQ codebook
    ///
    /// `[num_sub_vectors, num_centroids, sub_vector_width]` flattened `f32`.
    pub codebook: Arc<Float32Array>,
}

impl ProductQuantizer {
    /// Create a [`ProductQuantizer`] from a trained codebook.
    pub fn try_new(
        num_sub_vectors: usize,
        num_bits: u32,
        dimension: usize,
        codebook: Arc<Float32Array>,
    ) -> Result<Self> {
        if !(1..=8).contains(&num_bits) {
            return Err(Error::invalid_input(
                format!("PQ: num_bits must be in 1..=8, got {}", num_bits),
                location!(),
            ));
        }
        if num_sub_vectors == 0 || dimension % num_sub_vectors != 0 {
            return Err(Error::invalid_input(
                format!(
                    "PQ: dimension {} is not divisible by num_sub_vectors {}",
                    dimension, num_sub_vectors
                ),
                location!(),
            ));
        }
        let expected = Self::codebook_length(num_bits, num_sub_vectors) * (dimension / num_sub_vectors);
        if codebook.len() != expected {
            return Err(Error::Index {
                message: format!(
                    "PQ: codebook has {} values, expected {}",
                    codebook.len(),
                    expected
                ),
                location: location!(),
            });
        }
        Ok(Self {
            num_bits,
            num_sub_vectors,
            dimension,
            codebook,
        })
    }

    /// Number of centroids of every sub-quantizer.
    pub fn num_centroids(num_bits: u32) -> usize {
        num_centroids(num_bits)
    }

    /// Calculate codebook length.
    pub fn codebook_length(num_bits: u32, num_sub_vectors: usize) -> usize {
        Self::num_centroids(num_bits) * num_sub_vectors
    }

    pub fn sub_vector_width(&self) -> usize {
        self.dimension / self.num_sub_vectors
    }

    /// Get the centroids for one sub-vector.
    ///
    /// Returns a flatten `num_centroids * sub_vector_width` f32 array.
    pub fn centroids(&self, sub_vector_idx: usize) -> &[f32] {
        get_sub_vector_centroids(
            self.codebook.values(),
            self.dimension,
            self.num_bits,
            self.num_sub_vectors,
            sub_vector_idx,
        )
    }

    /// Encode flattened `[n, dimension]` vectors into `[n, num_sub_vectors]` codes.
    pub fn encode(&self, data: &[f32]) -> Result<Vec<u8>> {
        if data.len() % self.dimension != 0 {
            return Err(Error::invalid_input(
                format!(
                    "PQ: {} values do not form vectors of dimension {}",
                    data.len(),
                    self.dimension
                ),
                location!(),
            ));
        }
        let sub_vector_width = self.sub_vector_width();
        Ok(data
            .par_chunks(ENCODE_CHUNK_ROWS * self.dimension)
            .flat_map_iter(|tile| {
                tile.chunks_exact(sub_vector_width)
                    .enumerate()
                    .map(move |(i, sub_vec)| {
                        let centroids = self.centroids(i % self.num_sub_vectors);
                        argmin(l2_distance_batch(sub_vec, centroids, sub_vector_width))
                            .unwrap_or_default() as u8
                    })
            })
            .collect())
    }

    /// Reconstruct a vector from its PQ code.
    ///
    /// `code` must hold exactly one in-range centroid id per sub-vector.
    pub fn reconstruct(&self, code: &[u8]) -> Result<Vec<f32>> {
        if code.len() != self.num_sub_vectors {
            return Err(Error::invalid_input(
                format!(
                    "PQ code has {} entries, expected {}",
                    code.len(),
                    self.num_sub_vectors
                ),
                location!(),
            ));
        }
        let num_centroids = Self::num_centroids(self.num_bits);
        let sub_vector_width = self.sub_vector_width();
        let mut builder = Vec::with_capacity(self.dimension);
        for (i, sub_code) in code.iter().enumerate() {
            let sub_code = usize::from(*sub_code);
            if sub_code >= num_centroids {
                return Err(Error::invalid_input(
                    format!(
                        "PQ code {} of sub-vector {} is out of range for {} bits",
                        sub_code, i, self.num_bits
                    ),
                    location!(),
                ));
            }
            let start = sub_code * sub_vector_width;
            builder.extend_from_slice(&self.centroids(i)[start..start + sub_vector_width]);
        }
        Ok(builder)
    }

    /// Build the L2 distance table of `key` to every sub-vector centroid.
    ///
    /// Returns a flatten `[num_sub_vectors, num_centroids]` table.
    pub fn build_l2_distance_table(&self, key: &[f32]) -> Vec<f32> {
        let sub_vector_width = self.sub_vector_width();
        key.chunks_exact(sub_vector_width)
            .enumerate()
            .flat_map(|(i, sub_vec)| {
                l2_distance_batch(sub_vec, self.centroids(i), sub_vector_width)
            })
            .collect()
    }

    /// Build the inner product table of `key` with every sub-vector centroid.
    pub fn build_dot_table(&self, key: &[f32]) -> Vec<f32> {
        let sub_vector_width = self.sub_vector_width();
        key.chunks_exact(sub_vector_width)
            .enumerate()
            .flat_map(|(i, sub_vec)| {
                self.centroids(i)
                    .chunks_exact(sub_vector_width)
                    .map(move |c| dot(sub_vec, c))
            })
            .collect()
    }

    /// Sum the table entries selected by each code.
    pub fn compute_distances(&self, table: &[f32], codes: &[u8]) -> Vec<f32> {
        let num_centroids = Self::num_centroids(self.num_bits);
        codes
            .chunks_exact(self.num_sub_vectors)
            .map(|code| {
                code.iter()
                    .enumerate()
                    .map(|(i, c)| table[i * num_centroids + usize::from(*c)])
                    .sum::<f32>()
            })
            .collect()
    }

    /// True if both quantizers have the same shape.
    pub fn is_compatible(&self, other: &Self) -> bool {
        self.num_bits == other.num_bits
            && self.num_sub_vectors == other.num_sub_vectors
            && self.dimension == other.dimension
    }
}
