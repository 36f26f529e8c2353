// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! KMeans clustering over Arrow vectors.
//!
//! The coarse quantizer and every product-quantizer sub-space are trained
//! with this routine. Membership is computed in parallel with `rayon`.

use std::collections::HashSet;
use std::sync::Arc;

use arrow_array::{Array, FixedSizeListArray, Float32Array};
use arrow_schema::ArrowError;
use log::{info, warn};
use rand::distributions::{Distribution, WeightedIndex};
use rand::prelude::*;
use rand::rngs::SmallRng;
use rayon::prelude::*;
use retrodex_arrow::FloatVectorsExt;
use tracing::instrument;

use crate::distance::{dot_distance_batch, l2_distance_batch, DistanceType};
use crate::kernels::argmin_value_float;
use crate::Result;

/// Relative perturbation applied when an empty cluster is re-seeded by
/// splitting the largest one.
const SPLIT_EPS: f32 = 1.0 / 1024.0;

/// Rows handed to one rayon task when computing membership.
const CHUNK_SIZE: usize = 1024;

/// KMean initialization method.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum KMeanInit {
    Random,
    KMeanPlusPlus,
}

/// KMean Training Parameters
#[derive(Debug, Clone)]
pub struct KMeansParams {
    /// Max number of iterations.
    pub max_iters: u32,

    /// When the difference of mean distance to the centroids is less than this `tolerance`
    /// threshold, stop the training.
    pub tolerance: f32,

    /// Run kmeans multiple times and pick the best (balanced) one.
    pub redos: usize,

    /// Init methods.
    pub init: KMeanInit,

    /// The metric to calculate distance.
    pub distance_type: DistanceType,

    /// Seed of the random generator, so trainings are reproducible.
    pub seed: u64,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            max_iters: 50,
            tolerance: 1e-4,
            redos: 1,
            init: KMeanInit::Random,
            distance_type: DistanceType::L2,
            seed: 1234,
        }
    }
}

/// KMeans implementation for Apache Arrow Arrays.
#[derive(Debug, Clone)]
pub struct KMeans {
    /// Centroids for each of the k clusters.
    ///
    /// k * dimension.
    pub centroids: Arc<Float32Array>,

    /// Vector dimension.
    pub dimension: usize,

    /// The number of clusters
    pub k: usize,

    pub distance_type: DistanceType,
}

/// Cluster id and distance of every training vector.
pub struct KMeanMembership {
    dimension: usize,

    /// Cluster Id and distances for each vector.
    pub cluster_id_and_distances: Vec<(u32, f32)>,

    /// Number of centroids.
    k: usize,

    distance_type: DistanceType,
}

impl KMeanMembership {
    /// Reconstruct a KMeans model from the membership.
    ///
    /// Empty clusters are re-seeded by splitting the largest cluster in two.
    fn to_kmeans(&self, data: &[f32]) -> KMeans {
        let dimension = self.dimension;

        let mut cluster_cnts = vec![0_usize; self.k];
        let mut new_centroids = vec![0.0_f32; self.k * dimension];
        data.chunks_exact(dimension)
            .zip(self.cluster_id_and_distances.iter().map(|(c, _)| *c as usize))
            .for_each(|(vector, cluster_id)| {
                cluster_cnts[cluster_id] += 1;
                new_centroids[cluster_id * dimension..(cluster_id + 1) * dimension]
                    .iter_mut()
                    .zip(vector)
                    .for_each(|(acc, v)| *acc += v);
            });
        cluster_cnts.iter().enumerate().for_each(|(i, &cnt)| {
            if cnt > 0 {
                new_centroids[i * dimension..(i + 1) * dimension]
                    .iter_mut()
                    .for_each(|v| *v /= cnt as f32);
            }
        });

        for empty in 0..self.k {
            if cluster_cnts[empty] != 0 {
                continue;
            }
            let Some((largest, &largest_cnt)) =
                cluster_cnts.iter().enumerate().max_by_key(|(_, c)| **c)
            else {
                break;
            };
            if largest_cnt < 2 {
                warn!("KMeans: cluster {} is empty and cannot be split", empty);
                continue;
            }
            warn!(
                "KMeans: cluster {} is empty, splitting cluster {} ({} vectors)",
                empty, largest, largest_cnt
            );
            for d in 0..dimension {
                let value = new_centroids[largest * dimension + d];
                let (a, b) = if d % 2 == 0 {
                    (1.0 + SPLIT_EPS, 1.0 - SPLIT_EPS)
                } else {
                    (1.0 - SPLIT_EPS, 1.0 + SPLIT_EPS)
                };
                new_centroids[empty * dimension + d] = value * a;
                new_centroids[largest * dimension + d] = value * b;
            }
            cluster_cnts[empty] = largest_cnt / 2;
            cluster_cnts[largest] = largest_cnt - largest_cnt / 2;
        }

        KMeans {
            centroids: Arc::new(new_centroids.into()),
            dimension,
            k: self.k,
            distance_type: self.distance_type,
        }
    }

    fn distance_sum(&self) -> f64 {
        self.cluster_id_and_distances
            .iter()
            .map(|(_, d)| f64::from(*d))
            .sum()
    }

    /// Returns how many data points are here
    fn len(&self) -> usize {
        self.cluster_id_and_distances.len()
    }

    /// Histogram of the size of each cluster.
    pub fn histogram(&self) -> Vec<usize> {
        let mut hist: Vec<usize> = vec![0; self.k];
        for (cluster_id, _) in self.cluster_id_and_distances.iter() {
            hist[*cluster_id as usize] += 1;
        }
        hist
    }

    /// Std deviation of the histogram / cluster distribution.
    fn hist_stddev(&self) -> f32 {
        let mean: f32 = self.len() as f32 / self.k as f32;
        (self
            .histogram()
            .iter()
            .map(|c| (*c as f32 - mean).powi(2))
            .sum::<f32>()
            / self.len() as f32)
            .sqrt()
    }
}

/// Randomly pick `k` distinct rows as the initial centroids.
fn kmeans_random_init(
    data: &[f32],
    dimension: usize,
    k: usize,
    rng: &mut impl Rng,
    distance_type: DistanceType,
) -> KMeans {
    let chosen = (0..data.len() / dimension).choose_multiple(rng, k);
    let mut builder: Vec<f32> = Vec::with_capacity(k * dimension);
    for i in chosen {
        builder.extend_from_slice(&data[i * dimension..(i + 1) * dimension]);
    }
    KMeans::with_centroids(Arc::new(builder.into()), k, dimension, distance_type)
}

/// Initialize using kmean++, and returns the centroids of k clusters.
fn kmean_plusplus(
    data: &[f32],
    dimension: usize,
    k: usize,
    rng: &mut impl Rng,
    distance_type: DistanceType,
) -> KMeans {
    let num_rows = data.len() / dimension;
    let first_idx = rng.gen_range(0..num_rows);
    let mut centroids = data[first_idx * dimension..(first_idx + 1) * dimension].to_vec();

    let mut seen = HashSet::new();
    seen.insert(first_idx);

    for num_chosen in 1..k {
        let partial = KMeans::with_centroids(
            Arc::new(centroids.clone().into()),
            num_chosen,
            dimension,
            distance_type,
        );
        let membership = partial.compute_membership(data);
        let chosen = match WeightedIndex::new(
            membership
                .cluster_id_and_distances
                .iter()
                .enumerate()
                .map(|(i, (_, d))| if seen.contains(&i) { 0.0 } else { d.max(0.0) }),
        ) {
            Ok(weights) => weights.sample(rng),
            // Every remaining point sits on a centroid; fall back to a uniform pick.
            Err(_) => (0..num_rows)
                .filter(|i| !seen.contains(i))
                .choose(rng)
                .unwrap_or(first_idx),
        };
        seen.insert(chosen);
        centroids.extend_from_slice(&data[chosen * dimension..(chosen + 1) * dimension]);
    }
    KMeans::with_centroids(Arc::new(centroids.into()), k, dimension, distance_type)
}

impl KMeans {
    /// Create a [`KMeans`] with existing centroids.
    pub fn with_centroids(
        centroids: Arc<Float32Array>,
        k: usize,
        dimension: usize,
        distance_type: DistanceType,
    ) -> Self {
        Self {
            centroids,
            dimension,
            k,
            distance_type,
        }
    }

    /// Train a KMeans model on data with `k` clusters.
    pub fn new(data: &FixedSizeListArray, k: usize, max_iters: u32) -> Result<Self> {
        let params = KMeansParams {
            max_iters,
            ..Default::default()
        };
        Self::new_with_params(data, k, &params)
    }

    /// Train a [`KMeans`] model with full parameters.
    #[instrument(level = "debug", skip(data, params), fields(n = data.len()))]
    pub fn new_with_params(data: &FixedSizeListArray, k: usize, params: &KMeansParams) -> Result<Self> {
        let dimension = data.dimension();
        let n = data.len();
        if k == 0 {
            return Err(ArrowError::InvalidArgumentError(
                "KMeans: k must be greater than zero".to_string(),
            ));
        }
        if n < k {
            return Err(ArrowError::InvalidArgumentError(format!(
                "KMeans: training does not have sufficient data points: n({}) is smaller than k({})",
                n, k
            )));
        }
        let values = data.flat_values()?;
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ArrowError::InvalidArgumentError(
                "KMeans: training data contains NaN or infinite values".to_string(),
            ));
        }

        let mut rng = SmallRng::seed_from_u64(params.seed);
        let mut best_kmeans = None;
        let mut best_stddev = f32::MAX;

        for redo in 1..=params.redos.max(1) {
            let mut kmeans = match params.init {
                KMeanInit::Random => {
                    kmeans_random_init(values, dimension, k, &mut rng, params.distance_type)
                }
                KMeanInit::KMeanPlusPlus => {
                    kmean_plusplus(values, dimension, k, &mut rng, params.distance_type)
                }
            };

            let mut dist_sum = f64::MAX;
            let mut stddev = f32::MAX;
            let mut converged = false;
            for i in 1..=params.max_iters {
                if i % 10 == 0 {
                    info!(
                        "KMeans training: iteration {} / {}, redo={}",
                        i, params.max_iters, redo
                    );
                };
                let last_membership = kmeans.compute_membership(values);
                let last_dist_sum = last_membership.distance_sum();
                if !last_dist_sum.is_finite() {
                    return Err(ArrowError::ComputeError(format!(
                        "KMeans: distance diverged at iteration {}, redo={}",
                        i, redo
                    )));
                }
                stddev = last_membership.hist_stddev();
                kmeans = last_membership.to_kmeans(values);
                if last_dist_sum == 0.0
                    || ((dist_sum - last_dist_sum).abs() / last_dist_sum) < f64::from(params.tolerance)
                {
                    info!(
                        "KMeans training: converged at iteration {} / {}, redo={}",
                        i, params.max_iters, redo
                    );
                    converged = true;
                    break;
                }
                dist_sum = last_dist_sum;
            }
            if !converged {
                warn!(
                    "KMeans training: stopped after {} iterations without converging, redo={}",
                    params.max_iters, redo
                );
            }
            // Optimize for balanced clusters instead of minimal distance.
            if best_kmeans.is_none() || stddev < best_stddev {
                best_kmeans = Some(kmeans);
                best_stddev = stddev;
            }
        }

        best_kmeans.ok_or_else(|| {
            ArrowError::ComputeError("KMeans: no training round completed".to_string())
        })
    }

    /// Recompute the membership of each vector.
    ///
    /// Parameters:
    ///
    /// - *data*: a flattened `N * dimension` float32 slice.
    pub fn compute_membership(&self, data: &[f32]) -> KMeanMembership {
        let cluster_id_and_distances = compute_partitions_with_distances(
            self.centroids.values(),
            data,
            self.dimension,
            self.distance_type,
        );
        KMeanMembership {
            dimension: self.dimension,
            cluster_id_and_distances,
            k: self.k,
            distance_type: self.distance_type,
        }
    }
}

fn compute_partitions_with_distances(
    centroids: &[f32],
    data: &[f32],
    dimension: usize,
    distance_type: DistanceType,
) -> Vec<(u32, f32)> {
    data.par_chunks(CHUNK_SIZE * dimension)
        .flat_map_iter(|tile| {
            tile.chunks_exact(dimension).map(move |row| {
                let nearest = match distance_type {
                    DistanceType::L2 => {
                        argmin_value_float(l2_distance_batch(row, centroids, dimension))
                    }
                    DistanceType::Dot => {
                        argmin_value_float(dot_distance_batch(row, centroids, dimension))
                    }
                };
                nearest.unwrap_or((0, f32::INFINITY))
            })
        })
        .collect()
}

/// Assign every row of `data` to its nearest centroid.
///
/// Parameters
/// - *centroids*: flattened `k * dimension` centroids.
/// - *data*: flattened `n * dimension` vectors.
///
/// Returns `n` partition ids.
pub fn compute_partitions(
    centroids: &[f32],
    data: &[f32],
    dimension: usize,
    distance_type: DistanceType,
) -> Vec<u32> {
    compute_partitions_with_distances(centroids, data, dimension, distance_type)
        .into_iter()
        .map(|(c, _)| c)
        .collect()
}
