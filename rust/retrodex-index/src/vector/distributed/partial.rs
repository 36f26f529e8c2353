// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Encode one shard into a partial index.

use arrow_array::Array;
use log::info;
use object_store::path::Path;
use retrodex_core::Result;
use retrodex_io::object_store::ObjectStore;
use retrodex_io::shard::{read_shard, ShardDescriptor};
use tracing::instrument;

use super::scheduler::BatchRange;
use super::StepOutcome;
use crate::vector::ivf::IvfPqIndex;

/// Add the vectors of `shard` to a copy of the empty index and write it to
/// `output`.
///
/// Vectors keep the cluster ids stored next to them; row `i` of the shard
/// gets id `first_id + i`. The written index is tagged as row 0 of the merge
/// tree, covering only `batch_id`.
#[instrument(level = "info", skip_all, fields(batch_id = batch_id, output = %output))]
pub async fn build_partial_index(
    store: &ObjectStore,
    empty_index: &Path,
    shard: &ShardDescriptor,
    first_id: u64,
    batch_id: usize,
    output: &Path,
) -> Result<StepOutcome> {
    if store.exists(output).await? {
        info!("Partial index {} already exists, skipping", output);
        return Ok(StepOutcome::Skipped(output.clone()));
    }
    let (vectors, assignments) = read_shard(store, shard).await?;
    let mut index = IvfPqIndex::open(store, empty_index).await?;

    let num_rows = vectors.len();
    let index = tokio::task::spawn_blocking(move || {
        index.add_with_precomputed_partitions(&vectors, &assignments, first_id)?;
        index.set_provenance(0, BatchRange::single(batch_id));
        Result::Ok(index)
    })
    .await??;
    index.write(store, output).await?;
    info!(
        "Built partial index {} from shard {} ({} vectors)",
        output, batch_id, num_rows
    );
    Ok(StepOutcome::Created(output.clone()))
}
