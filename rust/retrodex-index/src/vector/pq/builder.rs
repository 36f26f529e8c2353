// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Product Quantizer Builder
//!

use std::sync::Arc;

use arrow_array::Float32Array;
use log::info;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;
use retrodex_core::{Error, Result};
use retrodex_linalg::distance::DistanceType;
use retrodex_linalg::kmeans::KMeanInit;
use serde::{Deserialize, Serialize};
use snafu::location;

use super::utils::{divide_to_subvectors, num_centroids};
use super::ProductQuantizer;
use crate::vector::kmeans::train_kmeans;

/// Parameters for building product quantizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PQBuildParams {
    /// Number of sub-vectors to build PQ code
    pub num_sub_vectors: usize,

    /// The number of bits to present one PQ centroid.
    pub num_bits: u32,

    /// The max number of iterations for kmeans training.
    pub max_iters: u32,

    /// Sample rate to train PQ codebook.
    pub sample_rate: usize,

    pub seed: u64,
}

impl Default for PQBuildParams {
    fn default() -> Self {
        Self {
            num_sub_vectors: 16,
            num_bits: 8,
            max_iters: 50,
            sample_rate: 256,
            seed: 42,
        }
    }
}

impl PQBuildParams {
    pub fn new(num_sub_vectors: usize, num_bits: u32) -> Self {
        Self {
            num_sub_vectors,
            num_bits,
            ..Default::default()
        }
    }

    /// Rows needed to train one sub-quantizer.
    pub fn sample_size(&self) -> usize {
        self.sample_rate * num_centroids(self.num_bits)
    }

    /// Train a [`ProductQuantizer`] on flattened `[n, dimension]` vectors.
    ///
    /// Every sub-quantizer is trained independently, in parallel.
    pub fn build(&self, data: &[f32], dimension: usize) -> Result<ProductQuantizer> {
        const REDOS: usize = 1;

        if !(1..=8).contains(&self.num_bits) {
            return Err(Error::invalid_input(
                format!("PQ: num_bits must be in 1..=8, got {}", self.num_bits),
                location!(),
            ));
        }
        if self.num_sub_vectors == 0 || dimension % self.num_sub_vectors != 0 {
            return Err(Error::invalid_input(
                format!(
                    "PQ: dimension {} is not divisible by num_sub_vectors {}",
                    dimension, self.num_sub_vectors
                ),
                location!(),
            ));
        }

        let sub_vectors = divide_to_subvectors(data, dimension, self.num_sub_vectors);
        let num_centroids = num_centroids(self.num_bits);
        let sub_vector_dimension = dimension / self.num_sub_vectors;
        info!(
            "Training PQ: {} sub-vectors of width {}, {} centroids each",
            self.num_sub_vectors, sub_vector_dimension, num_centroids
        );

        // Sub-vectors are always clustered under L2, seeded at random.
        let d = sub_vectors
            .into_par_iter()
            .enumerate()
            .map(|(i, sub_vec)| {
                let rng = SmallRng::seed_from_u64(self.seed.wrapping_add(i as u64));
                train_kmeans(
                    &sub_vec,
                    sub_vector_dimension,
                    num_centroids,
                    self.max_iters,
                    REDOS,
                    rng,
                    DistanceType::L2,
                    self.sample_rate,
                    KMeanInit::Random,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let mut codebook_builder = Vec::with_capacity(num_centroids * dimension);
        for centroid in d.iter() {
            codebook_builder.extend_from_slice(centroid.values());
        }

        ProductQuantizer::try_new(
            self.num_sub_vectors,
            self.num_bits,
            dimension,
            Arc::new(Float32Array::from(codebook_builder)),
        )
    }
}
