// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Distributed vector index building
//!
//! Every step reads its inputs from, and writes its single output to, a
//! shared build directory. A step whose output already exists is skipped,
//! so a failed build can be resumed by running it again.

use object_store::path::Path;

pub mod centroids;
pub mod communicator;
pub mod config;
pub mod coordinator;
pub mod index_merger;
pub mod layout;
pub mod partial;
pub mod scheduler;
pub mod trainer;

pub use centroids::extract_centroids;
pub use communicator::{Communicator, LocalCommunicator};
pub use config::*;
pub use coordinator::DistributedIvfPqBuilder;
pub use index_merger::merge_partial_indices;
pub use layout::BuildLayout;
pub use partial::build_partial_index;
pub use scheduler::{BatchRange, MergeTask, MergeTree};
pub use trainer::train_empty_index;

/// Result of one build step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step ran and wrote its output.
    Created(Path),
    /// The output was already present; nothing was done.
    Skipped(Path),
}

impl StepOutcome {
    pub fn path(&self) -> &Path {
        match self {
            Self::Created(path) | Self::Skipped(path) => path,
        }
    }

    pub fn into_path(self) -> Path {
        match self {
            Self::Created(path) | Self::Skipped(path) => path,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}
