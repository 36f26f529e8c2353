// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use arrow_array::FixedSizeListArray;
use log::info;
use object_store::path::Path;
use retrodex_arrow::FixedSizeListArrayExt;
use retrodex_core::Result;
use retrodex_io::object_store::ObjectStore;
use retrodex_io::shard::write_vectors;
use tracing::instrument;

use super::StepOutcome;
use crate::vector::ivf::IvfPqIndex;

/// Write the coarse centroids of `empty_index` as a flat `f32` file, one
/// row per partition. Callers assign shard vectors to clusters with it.
#[instrument(level = "info", skip_all, fields(output = %output))]
pub async fn extract_centroids(
    store: &ObjectStore,
    empty_index: &Path,
    output: &Path,
) -> Result<StepOutcome> {
    if store.exists(output).await? {
        info!("Centroids {} already exist, skipping", output);
        return Ok(StepOutcome::Skipped(output.clone()));
    }
    let index = IvfPqIndex::open(store, empty_index).await?;
    let centroids = FixedSizeListArray::try_new_from_values(
        index.centroids().as_ref().clone(),
        index.dimension() as i32,
    )?;
    write_vectors(store, output, &centroids).await?;
    info!(
        "Wrote {} centroids of dimension {} to {}",
        index.num_partitions(),
        index.dimension(),
        output
    );
    Ok(StepOutcome::Created(output.clone()))
}
