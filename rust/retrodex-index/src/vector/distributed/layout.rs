// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! File names inside a build directory.

use object_store::path::Path;

use super::scheduler::BatchRange;

/// The trained index with no vectors.
pub const EMPTY_INDEX_FILE: &str = "empty.ivfpq";

/// Coarse centroids extracted from the empty index.
pub const CENTROIDS_FILE: &str = "train_centroids.flat";

/// Digits used for each number in a partial index name: `ceil(log10(n)) + 1`.
pub fn pad_width(num_batches: usize) -> usize {
    let mut digits = 0;
    let mut power: u128 = 1;
    while power < num_batches as u128 {
        power *= 10;
        digits += 1;
    }
    digits + 1
}

/// Paths of every artifact in one build directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
    base: Path,
}

impl BuildLayout {
    pub fn new(base: Path) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn empty_index_path(&self) -> Path {
        self.base.child(EMPTY_INDEX_FILE)
    }

    pub fn centroids_path(&self) -> Path {
        self.base.child(CENTROIDS_FILE)
    }

    /// Path of the partial index covering `range` out of `num_batches` shards.
    ///
    /// The merge-tree row is not part of the name, so a range carried
    /// forward keeps its path.
    pub fn partial_index_path(&self, range: BatchRange, num_batches: usize) -> Path {
        let width = pad_width(num_batches);
        self.base.child(format!(
            "partial_{:0width$}_{:0width$}-{:0width$}.ivfpq",
            range.num_batches(),
            range.start,
            range.end,
            width = width
        ))
    }
}
