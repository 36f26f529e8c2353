// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Retrodex vector index.
//!
//! An IVF-PQ index ([`vector::ivf::IvfPqIndex`]) and the protocol that builds
//! it across many workers ([`vector::distributed`]): one rank trains the
//! quantizer, every rank encodes its share of the shards, and the partial
//! indices are merged pairwise along a binary tree until one index covers the
//! whole corpus.

pub mod vector;

pub use vector::distributed::{
    DistributedBuildConfig, DistributedIvfPqBuilder, IdAssignment, StepOutcome,
};
pub use vector::ivf::{builder::IvfPqBuildParams, IvfPqIndex};
