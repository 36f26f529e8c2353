// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Configuration for distributed index building

use retrodex_core::{Error, Result};
use serde::{Deserialize, Serialize};
use snafu::location;

use crate::vector::ivf::builder::IvfPqBuildParams;

/// Environment variable holding the rank of this worker.
pub const RANK_ENV: &str = "RANK";

/// Environment variable holding the number of workers.
pub const WORLD_SIZE_ENV: &str = "WORLD_SIZE";

/// How vector ids are numbered when a shard is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdAssignment {
    /// Every shard numbers its vectors `0..n`. Ids repeat across shards.
    #[default]
    Local,
    /// Shard `i` starts at the total row count of shards `0..i`, so ids are
    /// unique across the corpus.
    GlobalOffset,
}

/// Configuration of one worker in a distributed build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedBuildConfig {
    pub rank: usize,

    pub world_size: usize,

    /// URI of the directory holding every build artifact.
    pub build_dir: String,

    #[serde(default)]
    pub id_assignment: IdAssignment,

    #[serde(default)]
    pub params: IvfPqBuildParams,
}

impl DistributedBuildConfig {
    pub fn new(
        rank: usize,
        world_size: usize,
        build_dir: impl Into<String>,
        params: IvfPqBuildParams,
    ) -> Self {
        Self {
            rank,
            world_size,
            build_dir: build_dir.into(),
            id_assignment: IdAssignment::default(),
            params,
        }
    }

    pub fn with_id_assignment(mut self, id_assignment: IdAssignment) -> Self {
        self.id_assignment = id_assignment;
        self
    }

    /// Read rank and world size from `RANK` / `WORLD_SIZE`.
    ///
    /// A missing variable means a single-process build (rank 0 of 1).
    pub fn from_env(build_dir: impl Into<String>, params: IvfPqBuildParams) -> Result<Self> {
        let rank = read_env_usize(RANK_ENV)?.unwrap_or(0);
        let world_size = read_env_usize(WORLD_SIZE_ENV)?.unwrap_or(1);
        let config = Self::new(rank, world_size, build_dir, params);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.world_size == 0 {
            return Err(Error::invalid_input(
                "world_size must be greater than zero",
                location!(),
            ));
        }
        if self.rank >= self.world_size {
            return Err(Error::invalid_input(
                format!(
                    "rank {} is out of range for world_size {}",
                    self.rank, self.world_size
                ),
                location!(),
            ));
        }
        if self.build_dir.is_empty() {
            return Err(Error::invalid_input(
                "build_dir must not be empty",
                location!(),
            ));
        }
        self.params.validate()
    }
}

fn read_env_usize(key: &str) -> Result<Option<usize>> {
    match std::env::var(key) {
        Ok(value) => value.trim().parse::<usize>().map(Some).map_err(|e| {
            Error::invalid_input(
                format!("{} must be a non-negative integer, got '{}': {}", key, value, e),
                location!(),
            )
        }),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(Error::invalid_input(
            format!("{} is not valid unicode: {}", key, e),
            location!(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use retrodex_testing::util::EnvVarGuard;

    #[test]
    fn test_validate() {
        let params = IvfPqBuildParams::new(16, 4, 8);
        DistributedBuildConfig::new(1, 2, "memory://build", params.clone())
            .validate()
            .unwrap();
        assert!(DistributedBuildConfig::new(2, 2, "memory://build", params.clone())
            .validate()
            .is_err());
        assert!(DistributedBuildConfig::new(0, 0, "memory://build", params.clone())
            .validate()
            .is_err());
        assert!(DistributedBuildConfig::new(0, 1, "", params).validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: DistributedBuildConfig = serde_json::from_str(
            r#"{"rank": 0, "world_size": 4, "build_dir": "/tmp/build",
                "id_assignment": "global_offset", "params": {"ncluster": 16}}"#,
        )
        .unwrap();
        assert_eq!(config.id_assignment, IdAssignment::GlobalOffset);
        assert_eq!(config.params.num_partitions, 16);
        assert_eq!(config.params.num_bits, 8);
    }

    // Environment variables are process-wide, so every env case lives in one test.
    #[test]
    fn test_from_env() {
        let params = IvfPqBuildParams::new(16, 4, 8);
        {
            let _rank = EnvVarGuard::unset(RANK_ENV);
            let _world = EnvVarGuard::unset(WORLD_SIZE_ENV);
            let config = DistributedBuildConfig::from_env("build", params.clone()).unwrap();
            assert_eq!((config.rank, config.world_size), (0, 1));
        }
        {
            let _rank = EnvVarGuard::new(RANK_ENV, "3");
            let _world = EnvVarGuard::new(WORLD_SIZE_ENV, "8");
            let config = DistributedBuildConfig::from_env("build", params.clone()).unwrap();
            assert_eq!((config.rank, config.world_size), (3, 8));
        }
        {
            let _rank = EnvVarGuard::new(RANK_ENV, "8");
            let _world = EnvVarGuard::new(WORLD_SIZE_ENV, "8");
            assert!(DistributedBuildConfig::from_env("build", params.clone()).is_err());
        }
        {
            let _rank = EnvVarGuard::new(RANK_ENV, "zero");
            assert!(DistributedBuildConfig::from_env("build", params).is_err());
        }
    }
}
