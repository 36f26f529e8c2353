// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Linear algebra for [Apache Arrow](https://docs.rs/arrow/latest/arrow/) vectors:
//! distances, argmin kernels and KMeans.

use arrow_schema::ArrowError;

pub mod distance;
pub mod kernels;
pub mod kmeans;

type Error = ArrowError;
pub type Result<T> = std::result::Result<T, Error>;
