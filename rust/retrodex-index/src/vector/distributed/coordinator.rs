// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Drives one rank through the distributed IVF-PQ build.

use std::sync::Arc;

use log::{debug, info};
use object_store::path::Path;
use retrodex_core::{Error, Result};
use retrodex_io::object_store::ObjectStore;
use retrodex_io::shard::{read_row_counts, ShardDescriptor};
use snafu::location;
use tokio::sync::OnceCell;
use tracing::instrument;

use super::centroids::extract_centroids;
use super::communicator::Communicator;
use super::config::{DistributedBuildConfig, IdAssignment};
use super::index_merger::merge_partial_indices;
use super::layout::BuildLayout;
use super::partial::build_partial_index;
use super::scheduler::{MergeTask, MergeTree};
use super::trainer::train_empty_index;

/// Builds an IVF-PQ index across all ranks of a [`Communicator`].
///
/// Every rank runs the same calls in the same order. Ranks only meet at
/// barriers and otherwise communicate through files in the build directory.
pub struct DistributedIvfPqBuilder {
    config: DistributedBuildConfig,
    communicator: Arc<dyn Communicator>,
    store: Arc<ObjectStore>,
    layout: BuildLayout,
}

impl DistributedIvfPqBuilder {
    /// Build into `base` on `store`.
    ///
    /// The rank and world size of `communicator` must match `config`.
    pub fn try_new(
        config: DistributedBuildConfig,
        communicator: Arc<dyn Communicator>,
        store: Arc<ObjectStore>,
        base: Path,
    ) -> Result<Self> {
        config.validate()?;
        if communicator.rank() != config.rank || communicator.world_size() != config.world_size {
            return Err(Error::invalid_input(
                format!(
                    "communicator is rank {} of {}, config is rank {} of {}",
                    communicator.rank(),
                    communicator.world_size(),
                    config.rank,
                    config.world_size
                ),
                location!(),
            ));
        }
        Ok(Self {
            config,
            communicator,
            store,
            layout: BuildLayout::new(base),
        })
    }

    /// Open the store named by `config.build_dir`.
    ///
    /// A `memory://` build directory is private to the returned builder, so
    /// multi-rank builds in one process should share a store via
    /// [`Self::try_new`].
    pub fn from_config(
        config: DistributedBuildConfig,
        communicator: Arc<dyn Communicator>,
    ) -> Result<Self> {
        let (store, base) = ObjectStore::from_uri(&config.build_dir)?;
        Self::try_new(config, communicator, store, base)
    }

    pub fn config(&self) -> &DistributedBuildConfig {
        &self.config
    }

    pub fn layout(&self) -> &BuildLayout {
        &self.layout
    }

    pub fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    /// Train the empty index on rank 0 and extract its centroids.
    ///
    /// Returns the path of the centroid file, which every rank can read once
    /// this returns.
    #[instrument(level = "info", skip_all, fields(rank = self.config.rank))]
    pub async fn train(&self, training_files: &[Path]) -> Result<Path> {
        self.communicator.barrier().await;
        let empty_index = self.layout.empty_index_path();
        let centroids = self.layout.centroids_path();
        if self.config.rank == 0 {
            let outcome =
                train_empty_index(&self.store, training_files, &empty_index, &self.config.params)
                    .await?;
            debug!("Training step: {:?}", outcome);
            let outcome = extract_centroids(&self.store, &empty_index, &centroids).await?;
            debug!("Centroid step: {:?}", outcome);
        }
        self.communicator.barrier().await;
        Ok(centroids)
    }

    /// Id of the first vector of every shard.
    async fn first_ids(&self, shards: &[ShardDescriptor]) -> Result<Vec<u64>> {
        match self.config.id_assignment {
            IdAssignment::Local => Ok(vec![0; shards.len()]),
            IdAssignment::GlobalOffset => {
                let paths = shards.iter().map(|s| s.vectors.clone()).collect::<Vec<_>>();
                let counts = read_row_counts(&self.store, &paths).await?;
                Ok(counts
                    .iter()
                    .scan(0_u64, |offset, rows| {
                        let first = *offset;
                        *offset += rows;
                        Some(first)
                    })
                    .collect())
            }
        }
    }

    /// Encode every shard and merge the partial indices down to one.
    ///
    /// `shards[i]` is batch `i`. Must run after [`Self::train`]. Returns the
    /// path of the final index. Shard headers are only read for
    /// [`IdAssignment::GlobalOffset`] when a partial index is missing.
    #[instrument(level = "info", skip_all, fields(rank = self.config.rank, num_shards = shards.len()))]
    pub async fn add(&self, shards: &[ShardDescriptor]) -> Result<Path> {
        let tree = MergeTree::try_new(shards.len(), self.config.world_size)?;
        let num_batches = tree.num_batches();
        let first_ids = OnceCell::new();
        let empty_index = self.layout.empty_index_path();
        let rank = self.config.rank;

        for row in 0..tree.num_rows() {
            for task in tree.tasks(row, rank) {
                match task {
                    MergeTask::Build { batch_id, output } => {
                        let path = self.layout.partial_index_path(output, num_batches);
                        if self.store.exists(&path).await? {
                            info!("Partial index {} already exists, skipping", path);
                            continue;
                        }
                        let first_id = first_ids
                            .get_or_try_init(|| self.first_ids(shards))
                            .await?[batch_id];
                        build_partial_index(
                            &self.store,
                            &empty_index,
                            &shards[batch_id],
                            first_id,
                            batch_id,
                            &path,
                        )
                        .await?;
                    }
                    MergeTask::Merge { inputs, output } => {
                        let input_paths = inputs
                            .iter()
                            .map(|r| self.layout.partial_index_path(*r, num_batches))
                            .collect::<Vec<_>>();
                        let path = self.layout.partial_index_path(output, num_batches);
                        merge_partial_indices(
                            &self.store,
                            &empty_index,
                            &input_paths,
                            &path,
                            row,
                            output,
                        )
                        .await?;
                    }
                    MergeTask::CarryForward { range } => {
                        debug!("Row {}: carrying {} forward", row, range);
                    }
                }
            }
            info!("Rank {} finished row {} of {}", rank, row, tree.num_rows());
            self.communicator.barrier().await;
        }

        Ok(self
            .layout
            .partial_index_path(tree.final_range(), num_batches))
    }

    /// [`Self::train`] followed by [`Self::add`].
    pub async fn build(&self, training_files: &[Path], shards: &[ShardDescriptor]) -> Result<Path> {
        self.train(training_files).await?;
        self.add(shards).await
    }
}
