// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! IVF - Inverted File index with product-quantized residuals.

use std::sync::Arc;

use arrow_array::{Array, FixedSizeListArray, Float32Array, UInt32Array};
use object_store::path::Path;
use retrodex_arrow::FloatVectorsExt;
use retrodex_core::{Error, Result};
use retrodex_io::object_store::ObjectStore;
use retrodex_linalg::distance::{dot, DistanceType};
use snafu::location;

pub mod builder;
pub mod storage;

use super::pq::ProductQuantizer;
use super::Neighbor;
use crate::vector::distributed::scheduler::BatchRange;

/// Entries of one IVF bucket, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvertedList {
    /// Vector ids.
    pub ids: Vec<u64>,
    /// PQ codes, `num_sub_vectors` bytes per id.
    pub codes: Vec<u8>,
}

impl InvertedList {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Append the entries of `other` after the existing ones.
    pub fn append(&mut self, other: &Self) {
        self.ids.extend_from_slice(&other.ids);
        self.codes.extend_from_slice(&other.codes);
    }
}

/// An IVF-PQ index.
///
/// The coarse quantizer assigns each vector to one of `num_partitions`
/// lists; the residual to that list's centroid is compressed with a
/// [`ProductQuantizer`].
#[derive(Debug, Clone, PartialEq)]
pub struct IvfPqIndex {
    dimension: usize,

    distance_type: DistanceType,

    /// Coarse centroids, `[num_partitions, dimension]` flattened.
    centroids: Arc<Float32Array>,

    pq: ProductQuantizer,

    lists: Vec<InvertedList>,

    /// Number of vectors added so far, summed across merges.
    vector_count: u64,

    /// Merge-tree row that produced this index.
    row: Option<u32>,

    /// Input shards covered by this index.
    batch_range: Option<BatchRange>,
}

impl IvfPqIndex {
    /// Create an index with trained quantizers and no vectors.
    pub fn try_new_empty(
        dimension: usize,
        distance_type: DistanceType,
        centroids: Arc<Float32Array>,
        pq: ProductQuantizer,
    ) -> Result<Self> {
        if dimension == 0 || centroids.is_empty() || centroids.len() % dimension != 0 {
            return Err(Error::Index {
                message: format!(
                    "IVF: {} centroid values do not form vectors of dimension {}",
                    centroids.len(),
                    dimension
                ),
                location: location!(),
            });
        }
        if pq.dimension != dimension {
            return Err(Error::Index {
                message: format!(
                    "IVF: PQ dimension {} does not match index dimension {}",
                    pq.dimension, dimension
                ),
                location: location!(),
            });
        }
        let num_partitions = centroids.len() / dimension;
        Ok(Self {
            dimension,
            distance_type,
            centroids,
            pq,
            lists: vec![InvertedList::default(); num_partitions],
            vector_count: 0,
            row: None,
            batch_range: None,
        })
    }

    /// Load an index from `path`.
    pub async fn open(store: &ObjectStore, path: &Path) -> Result<Self> {
        storage::read_index(store, path).await
    }

    /// Write the index to `path`.
    pub async fn write(&self, store: &ObjectStore, path: &Path) -> Result<()> {
        storage::write_index(store, path, self).await
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn distance_type(&self) -> DistanceType {
        self.distance_type
    }

    pub fn num_partitions(&self) -> usize {
        self.lists.len()
    }

    /// Coarse centroids, flattened.
    pub fn centroids(&self) -> &Arc<Float32Array> {
        &self.centroids
    }

    pub fn centroid(&self, partition: usize) -> &[f32] {
        &self.centroids.values()[partition * self.dimension..(partition + 1) * self.dimension]
    }

    pub fn pq(&self) -> &ProductQuantizer {
        &self.pq
    }

    pub fn vector_count(&self) -> u64 {
        self.vector_count
    }

    pub fn list(&self, partition: usize) -> &InvertedList {
        &self.lists[partition]
    }

    /// Number of entries in every list.
    pub fn list_sizes(&self) -> Vec<usize> {
        self.lists.iter().map(|l| l.len()).collect()
    }

    pub fn row(&self) -> Option<u32> {
        self.row
    }

    pub fn batch_range(&self) -> Option<BatchRange> {
        self.batch_range
    }

    /// Record which merge-tree row and shard range this index covers.
    pub fn set_provenance(&mut self, row: u32, batch_range: BatchRange) {
        self.row = Some(row);
        self.batch_range = Some(batch_range);
    }

    /// A copy of this index with the same quantizers and no vectors.
    pub fn empty_like(&self) -> Self {
        Self {
            dimension: self.dimension,
            distance_type: self.distance_type,
            centroids: self.centroids.clone(),
            pq: self.pq.clone(),
            lists: vec![InvertedList::default(); self.num_partitions()],
            vector_count: 0,
            row: None,
            batch_range: None,
        }
    }

    /// Add vectors whose partitions were computed by the caller.
    ///
    /// Row `i` gets id `first_id + i` and is appended to list
    /// `partitions[i]`. Partitions are not recomputed.
    pub fn add_with_precomputed_partitions(
        &mut self,
        vectors: &FixedSizeListArray,
        partitions: &UInt32Array,
        first_id: u64,
    ) -> Result<()> {
        if vectors.dimension() != self.dimension {
            return Err(Error::invalid_input(
                format!(
                    "IVF: vectors have dimension {}, index expects {}",
                    vectors.dimension(),
                    self.dimension
                ),
                location!(),
            ));
        }
        if vectors.len() != partitions.len() {
            return Err(Error::invalid_input(
                format!(
                    "IVF: {} vectors but {} partition ids",
                    vectors.len(),
                    partitions.len()
                ),
                location!(),
            ));
        }
        if partitions.null_count() > 0 {
            return Err(Error::invalid_input(
                "IVF: partition ids must not contain nulls",
                location!(),
            ));
        }
        let num_partitions = self.num_partitions();
        if let Some(bad) = partitions
            .values()
            .iter()
            .find(|p| **p as usize >= num_partitions)
        {
            return Err(Error::invalid_input(
                format!(
                    "IVF: partition id {} out of range, index has {} partitions",
                    bad, num_partitions
                ),
                location!(),
            ));
        }

        let values = vectors.flat_values()?;
        let mut residuals = Vec::with_capacity(values.len());
        for (vector, part_id) in values
            .chunks_exact(self.dimension)
            .zip(partitions.values().iter())
        {
            let centroid = self.centroid(*part_id as usize);
            residuals.extend(vector.iter().zip(centroid).map(|(v, c)| v - c));
        }
        let codes = self.pq.encode(&residuals)?;

        let code_width = self.pq.num_sub_vectors;
        for ((i, part_id), code) in partitions
            .values()
            .iter()
            .enumerate()
            .zip(codes.chunks_exact(code_width))
        {
            let list = &mut self.lists[*part_id as usize];
            list.ids.push(first_id + i as u64);
            list.codes.extend_from_slice(code);
        }
        self.vector_count += vectors.len() as u64;
        Ok(())
    }

    /// Fails unless `other` was built from a quantizer of the same shape.
    pub fn check_compatible(&self, other: &Self) -> Result<()> {
        if self.dimension != other.dimension
            || self.num_partitions() != other.num_partitions()
            || self.distance_type != other.distance_type
            || !self.pq.is_compatible(&other.pq)
        {
            return Err(Error::Index {
                message: format!(
                    "IVF: incompatible indices: dim {} vs {}, partitions {} vs {}, \
                     sub-vectors {} vs {}, bits {} vs {}, distance {} vs {}",
                    self.dimension,
                    other.dimension,
                    self.num_partitions(),
                    other.num_partitions(),
                    self.pq.num_sub_vectors,
                    other.pq.num_sub_vectors,
                    self.pq.num_bits,
                    other.pq.num_bits,
                    self.distance_type,
                    other.distance_type
                ),
                location: location!(),
            });
        }
        Ok(())
    }

    /// Append every list of `other` to the matching list of `self`.
    ///
    /// Entries are copied as they are: codes are not re-encoded and ids are
    /// not de-duplicated.
    pub fn append(&mut self, other: &Self) -> Result<()> {
        self.check_compatible(other)?;
        for (list, other_list) in self.lists.iter_mut().zip(other.lists.iter()) {
            list.append(other_list);
        }
        self.vector_count += other.vector_count;
        Ok(())
    }

    /// Partitions to probe for `query`, nearest first.
    fn find_partitions(&self, query: &[f32], nprobes: usize) -> Vec<usize> {
        let distance = self.distance_type.func();
        let mut scored = self
            .centroids
            .values()
            .chunks_exact(self.dimension)
            .map(|c| distance(query, c))
            .enumerate()
            .collect::<Vec<_>>();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.into_iter().take(nprobes).map(|(i, _)| i).collect()
    }

    /// Search the `k` nearest neighbors of `query` among the `nprobes`
    /// nearest lists.
    ///
    /// Distances are approximated from the PQ codes. Results are sorted by
    /// distance, closest first.
    pub fn search(&self, query: &[f32], k: usize, nprobes: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(Error::invalid_input(
                format!(
                    "IVF: query has dimension {}, index expects {}",
                    query.len(),
                    self.dimension
                ),
                location!(),
            ));
        }
        if k == 0 {
            return Ok(vec![]);
        }
        let nprobes = nprobes.clamp(1, self.num_partitions());

        // The inner product table does not depend on the partition.
        let dot_table = match self.distance_type {
            DistanceType::Dot => Some(self.pq.build_dot_table(query)),
            DistanceType::L2 => None,
        };

        let mut candidates: Vec<Neighbor> = Vec::new();
        for partition in self.find_partitions(query, nprobes) {
            let list = &self.lists[partition];
            if list.is_empty() {
                continue;
            }
            let centroid = self.centroid(partition);
            let distances = match &dot_table {
                None => {
                    let residual = query
                        .iter()
                        .zip(centroid)
                        .map(|(q, c)| q - c)
                        .collect::<Vec<_>>();
                    let table = self.pq.build_l2_distance_table(&residual);
                    self.pq.compute_distances(&table, &list.codes)
                }
                Some(table) => {
                    let base = dot(query, centroid);
                    self.pq
                        .compute_distances(table, &list.codes)
                        .into_iter()
                        .map(|d| 1.0 - base - d)
                        .collect()
                }
            };
            candidates.extend(list.ids.iter().copied().zip(distances));
        }

        candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        candidates.truncate(k);
        Ok(candidates)
    }
}
