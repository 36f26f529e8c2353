// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Storage access for Retrodex.
//!
//! [`object_store::ObjectStore`] wraps the `object_store` crate so the same
//! build code runs against a local directory or an in-memory store.
//! [`shard`] holds the flat array files that carry embedding shards, their
//! cluster assignments and the extracted centroids.

pub mod object_store;
pub mod shard;
