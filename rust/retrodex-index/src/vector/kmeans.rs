// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use arrow_array::{FixedSizeListArray, Float32Array};
use log::info;
use rand::{seq::IteratorRandom, Rng};
use retrodex_arrow::FixedSizeListArrayExt;
use retrodex_core::{Error, Result};
use retrodex_linalg::{
    distance::DistanceType,
    kmeans::{KMeanInit, KMeans, KMeansParams},
};
use snafu::location;

/// Train KMeans model and returns the centroids of each cluster.
///
/// At most `sample_rate * k` rows of `data` are used for training.
#[allow(clippy::too_many_arguments)]
pub fn train_kmeans(
    data: &[f32],
    dimension: usize,
    k: usize,
    max_iterations: u32,
    redos: usize,
    mut rng: impl Rng,
    distance_type: DistanceType,
    sample_rate: usize,
    init: KMeanInit,
) -> Result<Float32Array> {
    if dimension == 0 {
        return Err(Error::invalid_input(
            "KMeans: dimension must be greater than zero",
            location!(),
        ));
    }
    let num_rows = data.len() / dimension;
    if num_rows < k {
        return Err(Error::Index {
            message: format!(
                "KMeans: can not train {k} centroids with {num_rows} vectors, choose a smaller K (< {num_rows}) instead"
            ),
            location: location!(),
        });
    }
    // Only sample sample_rate * num_clusters. See Faiss
    let sample_size = sample_rate.saturating_mul(k);
    let sampled;
    let data = if num_rows > sample_size {
        info!(
            "Sample {} out of {} to train kmeans of {} dim, {} clusters",
            sample_size, num_rows, dimension, k,
        );
        let mut chosen = (0..num_rows).choose_multiple(&mut rng, sample_size);
        chosen.sort_unstable();
        let mut builder = Vec::with_capacity(sample_size * dimension);
        for idx in chosen {
            builder.extend_from_slice(&data[idx * dimension..(idx + 1) * dimension]);
        }
        sampled = builder;
        sampled.as_slice()
    } else {
        &data[..num_rows * dimension]
    };

    let params = KMeansParams {
        max_iters: max_iterations,
        distance_type,
        redos,
        init,
        seed: rng.gen(),
        ..Default::default()
    };
    let data = FixedSizeListArray::try_new_from_values(
        Float32Array::from(data.to_vec()),
        dimension as i32,
    )?;
    let model = KMeans::new_with_params(&data, k, &params)?;
    Ok(model.centroids.as_ref().clone())
}
