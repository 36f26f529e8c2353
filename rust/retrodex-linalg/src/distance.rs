// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Distance metrics
//!
//! Only `f32` vectors are supported; the kernels are written so the compiler
//! can auto-vectorize them.

use arrow_schema::ArrowError;
use serde::{Deserialize, Serialize};

pub mod dot;
pub mod l2;

pub use dot::*;
pub use l2::*;

/// Distance metrics type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceType {
    #[default]
    L2,
    /// Dot Product
    Dot,
}

pub type DistanceFunc = fn(&[f32], &[f32]) -> f32;

impl DistanceType {
    /// Returns the distance function between two vectors.
    pub fn func(&self) -> DistanceFunc {
        match self {
            Self::L2 => l2_distance,
            Self::Dot => dot_distance,
        }
    }
}

impl std::fmt::Display for DistanceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::L2 => "l2",
                Self::Dot => "dot",
            }
        )
    }
}

impl TryFrom<&str> for DistanceType {
    type Error = ArrowError;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "l2" | "euclidean" => Ok(Self::L2),
            "dot" | "ip" => Ok(Self::Dot),
            _ => Err(ArrowError::InvalidArgumentError(format!(
                "Metric type '{s}' is not supported"
            ))),
        }
    }
}
