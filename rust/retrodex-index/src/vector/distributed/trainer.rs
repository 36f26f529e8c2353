// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Train the empty index shared by every worker.

use arrow_array::Array;
use log::info;
use object_store::path::Path;
use retrodex_core::Result;
use retrodex_io::object_store::ObjectStore;
use retrodex_io::shard::read_and_concat_vectors;
use tracing::instrument;

use super::StepOutcome;
use crate::vector::ivf::builder::{train_ivf_pq, IvfPqBuildParams};

/// Train the coarse quantizer and PQ codebook on the concatenation of
/// `training_files` and write the resulting empty index to `output`.
#[instrument(level = "info", skip_all, fields(output = %output, num_files = training_files.len()))]
pub async fn train_empty_index(
    store: &ObjectStore,
    training_files: &[Path],
    output: &Path,
    params: &IvfPqBuildParams,
) -> Result<StepOutcome> {
    if store.exists(output).await? {
        info!("Empty index {} already exists, skipping training", output);
        return Ok(StepOutcome::Skipped(output.clone()));
    }
    params.validate()?;

    let data = read_and_concat_vectors(store, training_files).await?;
    info!(
        "Training empty index on {} vectors from {} files",
        data.len(),
        training_files.len()
    );
    let params = params.clone();
    let index = tokio::task::spawn_blocking(move || train_ivf_pq(&data, &params)).await??;
    index.write(store, output).await?;
    info!(
        "Wrote empty index {} ({} partitions)",
        output,
        index.num_partitions()
    );
    Ok(StepOutcome::Created(output.clone()))
}
