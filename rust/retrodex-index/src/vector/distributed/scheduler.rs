// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Binary-tree merge schedule.
//!
//! Shards are merged pairwise over `num_rows` rounds. At row `r`, the slot
//! `rank + column * world_size` covers the shards
//! `[2^r * slot, 2^r * (slot + 1) - 1]`, truncated to the last shard. Row 0
//! builds one partial index per shard; every later row merges the two halves
//! produced by the previous row. A range whose right half lies past the last
//! shard is carried forward unchanged.
//!
//! The schedule is a pure function of `(row, rank, column)`: every rank
//! computes its own work without talking to the others.

use std::fmt;

use retrodex_core::{Error, Result};
use serde::{Deserialize, Serialize};
use snafu::location;

/// Inclusive range of shard (batch) ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchRange {
    pub start: usize,
    pub end: usize,
}

impl BatchRange {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn single(batch_id: usize) -> Self {
        Self::new(batch_id, batch_id)
    }

    /// Number of shards covered.
    pub fn num_batches(&self) -> usize {
        self.end - self.start + 1
    }
}

impl fmt::Display for BatchRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Work assigned to one `(row, rank, column)` coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeTask {
    /// Row 0: encode one shard into a partial index.
    Build { batch_id: usize, output: BatchRange },
    /// Concatenate two partial indices.
    Merge {
        inputs: [BatchRange; 2],
        output: BatchRange,
    },
    /// Only the left half exists; its index already covers the output range.
    CarryForward { range: BatchRange },
}

impl MergeTask {
    /// The range covered once this task is done.
    pub fn output(&self) -> BatchRange {
        match self {
            Self::Build { output, .. } | Self::Merge { output, .. } => *output,
            Self::CarryForward { range } => *range,
        }
    }
}

/// Merge schedule for `num_batches` shards over `world_size` ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeTree {
    num_batches: usize,
    world_size: usize,
}

impl MergeTree {
    pub fn try_new(num_batches: usize, world_size: usize) -> Result<Self> {
        if num_batches == 0 || world_size == 0 {
            return Err(Error::invalid_input(
                format!(
                    "merge tree needs at least one batch and one rank, got {} batches and {} ranks",
                    num_batches, world_size
                ),
                location!(),
            ));
        }
        Ok(Self {
            num_batches,
            world_size,
        })
    }

    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// `ceil(log2(num_batches)) + 1`.
    pub fn num_rows(&self) -> u32 {
        let ceil_log2 = if self.num_batches <= 1 {
            0
        } else {
            usize::BITS - (self.num_batches - 1).leading_zeros()
        };
        ceil_log2 + 1
    }

    /// Columns each rank walks at `row`.
    pub fn num_columns(&self, row: u32) -> usize {
        let span = 1_usize
            .checked_shl(row)
            .and_then(|s| s.checked_mul(self.world_size))
            .unwrap_or(usize::MAX);
        self.num_batches.div_ceil(span)
    }

    /// The range `[start, end]` truncated to the existing shards.
    fn clamp(&self, start: usize, end: usize) -> Option<BatchRange> {
        (start < self.num_batches)
            .then(|| BatchRange::new(start, end.min(self.num_batches - 1)))
    }

    /// Shards covered by the output at `(row, rank, column)`, if any.
    pub fn output_range(&self, row: u32, rank: usize, column: usize) -> Option<BatchRange> {
        let span = 1_usize.checked_shl(row)?;
        let slot = column.checked_mul(self.world_size)?.checked_add(rank)?;
        let start = span.checked_mul(slot)?;
        self.clamp(start, start.saturating_add(span - 1))
    }

    /// Work for `(row, rank, column)`, or `None` past the last shard.
    pub fn task(&self, row: u32, rank: usize, column: usize) -> Option<MergeTask> {
        let output = self.output_range(row, rank, column)?;
        if row == 0 {
            return Some(MergeTask::Build {
                batch_id: output.start,
                output,
            });
        }
        let half = 1_usize << (row - 1);
        let start = output.start;
        let left = self.clamp(start, start.saturating_add(half - 1))?;
        match self.clamp(start.saturating_add(half), start.saturating_add(2 * half - 1)) {
            Some(right) => Some(MergeTask::Merge {
                inputs: [left, right],
                output,
            }),
            None => Some(MergeTask::CarryForward { range: left }),
        }
    }

    /// All work of `rank` at `row`, in column order.
    pub fn tasks(&self, row: u32, rank: usize) -> impl Iterator<Item = MergeTask> + '_ {
        (0..self.num_columns(row)).filter_map(move |column| self.task(row, rank, column))
    }

    /// The range covered by the final index.
    pub fn final_range(&self) -> BatchRange {
        BatchRange::new(0, self.num_batches - 1)
    }
}
