// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Build and train an IVF-PQ quantizer.

use std::sync::Arc;

use arrow_array::{Array, FixedSizeListArray};
use log::info;
use rand::rngs::SmallRng;
use rand::seq::IteratorRandom;
use rand::SeedableRng;
use retrodex_arrow::FloatVectorsExt;
use retrodex_core::{Error, Result};
use retrodex_linalg::distance::DistanceType;
use retrodex_linalg::kmeans::{compute_partitions, KMeanInit};
use serde::{Deserialize, Serialize};
use snafu::location;
use tracing::instrument;

use super::IvfPqIndex;
use crate::vector::kmeans::train_kmeans;
use crate::vector::pq::PQBuildParams;

/// Parameters to train an IVF-PQ index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IvfPqBuildParams {
    /// Number of IVF lists (coarse centroids).
    #[serde(alias = "ncluster")]
    pub num_partitions: usize,

    /// Number of PQ sub-vectors.
    #[serde(alias = "pq_m")]
    pub num_sub_vectors: usize,

    /// Bits per PQ sub-code.
    #[serde(alias = "pq_nbits")]
    pub num_bits: u32,

    pub distance_type: DistanceType,

    /// Max number of KMeans iterations, for both IVF and PQ training.
    pub max_iters: u32,

    /// Training rows sampled per centroid. See Faiss.
    pub sample_rate: usize,

    /// Number of KMeans restarts for the coarse quantizer.
    pub redos: usize,

    pub seed: u64,
}

impl Default for IvfPqBuildParams {
    fn default() -> Self {
        Self {
            num_partitions: 256,
            num_sub_vectors: 16,
            num_bits: 8,
            distance_type: DistanceType::L2,
            max_iters: 50,
            sample_rate: 256,
            redos: 1,
            seed: 42,
        }
    }
}

impl IvfPqBuildParams {
    pub fn new(num_partitions: usize, num_sub_vectors: usize, num_bits: u32) -> Self {
        Self {
            num_partitions,
            num_sub_vectors,
            num_bits,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_partitions == 0 {
            return Err(Error::invalid_input(
                "num_partitions must be greater than zero",
                location!(),
            ));
        }
        if self.num_sub_vectors == 0 {
            return Err(Error::invalid_input(
                "num_sub_vectors must be greater than zero",
                location!(),
            ));
        }
        if !(1..=8).contains(&self.num_bits) {
            return Err(Error::invalid_input(
                format!("num_bits must be in 1..=8, got {}", self.num_bits),
                location!(),
            ));
        }
        if self.max_iters == 0 || self.sample_rate == 0 {
            return Err(Error::invalid_input(
                "max_iters and sample_rate must be greater than zero",
                location!(),
            ));
        }
        Ok(())
    }

    /// Check that vectors of `dimension` can be split into sub-vectors.
    pub fn validate_dimension(&self, dimension: usize) -> Result<()> {
        if dimension == 0 || dimension % self.num_sub_vectors != 0 {
            return Err(Error::invalid_input(
                format!(
                    "dimension {} is not divisible by num_sub_vectors {}",
                    dimension, self.num_sub_vectors
                ),
                location!(),
            ));
        }
        Ok(())
    }

    fn pq_params(&self) -> PQBuildParams {
        PQBuildParams {
            num_sub_vectors: self.num_sub_vectors,
            num_bits: self.num_bits,
            max_iters: self.max_iters,
            sample_rate: self.sample_rate,
            seed: self.seed,
        }
    }
}

/// Train the coarse quantizer and the residual PQ codebook.
///
/// Returns an [`IvfPqIndex`] with no vectors.
#[instrument(level = "debug", skip_all, fields(rows = data.len(), dim = data.dimension()))]
pub fn train_ivf_pq(data: &FixedSizeListArray, params: &IvfPqBuildParams) -> Result<IvfPqIndex> {
    params.validate()?;
    let dimension = data.dimension();
    params.validate_dimension(dimension)?;
    let values = data.flat_values()?;
    if let Some(v) = values.iter().find(|v| !v.is_finite()) {
        return Err(Error::invalid_input(
            format!("training data contains a non-finite value: {}", v),
            location!(),
        ));
    }

    let mut rng = SmallRng::seed_from_u64(params.seed);
    info!(
        "Training IVF: {} partitions over {} vectors of dimension {}",
        params.num_partitions,
        data.len(),
        dimension
    );
    let centroids = train_kmeans(
        values,
        dimension,
        params.num_partitions,
        params.max_iters,
        params.redos,
        &mut rng,
        params.distance_type,
        params.sample_rate,
        KMeanInit::KMeanPlusPlus,
    )?;

    // PQ is trained on residuals of a sample.
    let pq_params = params.pq_params();
    let num_rows = data.len();
    let sample_size = pq_params.sample_size();
    let mut rows = if num_rows > sample_size {
        (0..num_rows).choose_multiple(&mut rng, sample_size)
    } else {
        (0..num_rows).collect()
    };
    rows.sort_unstable();
    let mut sample = Vec::with_capacity(rows.len() * dimension);
    for row in rows {
        sample.extend_from_slice(&values[row * dimension..(row + 1) * dimension]);
    }
    let partitions = compute_partitions(
        centroids.values(),
        &sample,
        dimension,
        params.distance_type,
    );
    for (vector, part_id) in sample.chunks_exact_mut(dimension).zip(partitions) {
        let centroid =
            &centroids.values()[part_id as usize * dimension..(part_id as usize + 1) * dimension];
        vector
            .iter_mut()
            .zip(centroid)
            .for_each(|(v, c)| *v -= c);
    }
    info!(
        "Training PQ on {} residuals",
        sample.len() / dimension
    );
    let pq = pq_params.build(&sample, dimension)?;

    IvfPqIndex::try_new_empty(dimension, params.distance_type, Arc::new(centroids), pq)
}
