// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Vector Index for Fast Approximate Nearest Neighbor (ANN) Search
//!

pub mod distributed;
pub mod ivf;
pub mod kmeans;
pub mod pq;

/// One search hit: the vector id and its distance to the query.
pub type Neighbor = (u64, f32);
