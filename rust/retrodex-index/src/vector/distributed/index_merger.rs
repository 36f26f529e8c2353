// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Index merging for distributed vector index building

use log::info;
use object_store::path::Path;
use retrodex_core::{Error, Result};
use retrodex_io::object_store::ObjectStore;
use snafu::location;
use tracing::instrument;

use super::scheduler::BatchRange;
use super::StepOutcome;
use crate::vector::ivf::IvfPqIndex;

/// Concatenate the inverted lists of `inputs` into a copy of the empty index.
///
/// Inputs are appended in the given order, so list `p` of the output holds
/// list `p` of the first input followed by list `p` of the second, and so on.
/// Codes are copied as they are. Every input must share the quantizer of the
/// empty index. Inputs are opened one at a time, so at most one partial is
/// resident next to the growing output.
#[instrument(level = "info", skip_all, fields(row = row, range = %range, output = %output))]
pub async fn merge_partial_indices(
    store: &ObjectStore,
    empty_index: &Path,
    inputs: &[Path],
    output: &Path,
    row: u32,
    range: BatchRange,
) -> Result<StepOutcome> {
    if store.exists(output).await? {
        info!("Merged index {} already exists, skipping", output);
        return Ok(StepOutcome::Skipped(output.clone()));
    }
    if inputs.len() < 2 {
        return Err(Error::invalid_input(
            format!(
                "merging into {} needs at least two partial indices, got {}",
                output,
                inputs.len()
            ),
            location!(),
        ));
    }

    let mut merged = IvfPqIndex::open(store, empty_index).await?;
    for input in inputs {
        let partial = IvfPqIndex::open(store, input).await?;
        info!(
            "Appending {} ({} vectors) into {}",
            input,
            partial.vector_count(),
            output
        );
        merged.append(&partial)?;
    }
    merged.set_provenance(row, range);
    merged.write(store, output).await?;
    info!(
        "Wrote merged index {} with {} vectors",
        output,
        merged.vector_count()
    );
    Ok(StepOutcome::Created(output.clone()))
}
