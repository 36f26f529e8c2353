// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! End-to-end builds through `DistributedIvfPqBuilder`.

use std::sync::Arc;

use arrow_array::{Array, FixedSizeListArray, UInt32Array};
use object_store::path::Path;
use retrodex_arrow::FloatVectorsExt;
use retrodex_core::utils::tempfile::TempStrDir;
use retrodex_index::vector::distributed::{BuildLayout, LocalCommunicator, StepOutcome};
use retrodex_index::{
    DistributedBuildConfig, DistributedIvfPqBuilder, IdAssignment, IvfPqBuildParams, IvfPqIndex,
};
use retrodex_io::object_store::ObjectStore;
use retrodex_io::shard::{read_vectors, write_assignments, write_vectors, ShardDescriptor};
use retrodex_linalg::distance::DistanceType;
use retrodex_linalg::kmeans::compute_partitions;
use retrodex_testing::datagen::{generate_clustered_vectors, generate_random_assignments};
use test_log::test;

const NEAREST: Clustering = Clustering::Nearest(DistanceType::L2);

fn small_params() -> IvfPqBuildParams {
    IvfPqBuildParams {
        max_iters: 10,
        ..IvfPqBuildParams::new(4, 2, 4)
    }
}

/// Write `data` as one vector file per entry of `rows_per_shard`.
async fn write_shard_vectors(
    store: &ObjectStore,
    base: &Path,
    data: &FixedSizeListArray,
    rows_per_shard: &[usize],
) -> Vec<ShardDescriptor> {
    let mut offset = 0;
    let mut shards = Vec::with_capacity(rows_per_shard.len());
    for (i, rows) in rows_per_shard.iter().enumerate() {
        let shard = ShardDescriptor::new(
            base.child(format!("shard_{}.flat", i)),
            base.child(format!("shard_{}.assign", i)),
        );
        write_vectors(store, &shard.vectors, &data.slice(offset, *rows))
            .await
            .unwrap();
        offset += rows;
        shards.push(shard);
    }
    shards
}

/// How the external clustering step assigns shard vectors to lists.
#[derive(Debug, Clone, Copy)]
enum Clustering {
    Nearest(DistanceType),
    Random,
}

/// Write the cluster ids of every shard in `shards`.
async fn assign_shards(
    store: &ObjectStore,
    centroids: &Path,
    shards: &[&ShardDescriptor],
    clustering: Clustering,
) {
    let centroids = read_vectors(store, centroids).await.unwrap();
    for (seed, shard) in shards.iter().enumerate() {
        let vectors = read_vectors(store, &shard.vectors).await.unwrap();
        let partitions = match clustering {
            Clustering::Nearest(distance_type) => UInt32Array::from(compute_partitions(
                centroids.flat_values().unwrap(),
                vectors.flat_values().unwrap(),
                vectors.dimension(),
                distance_type,
            )),
            Clustering::Random => {
                generate_random_assignments(vectors.len(), centroids.len() as u32, seed as u64)
            }
        };
        write_assignments(store, &shard.assignments, &partitions)
            .await
            .unwrap();
    }
}

/// Run a whole build with `world_size` ranks in this process.
async fn build_with_ranks(
    store: Arc<ObjectStore>,
    base: Path,
    world_size: usize,
    params: IvfPqBuildParams,
    id_assignment: IdAssignment,
    clustering: Clustering,
    shards: Vec<ShardDescriptor>,
) -> Path {
    let training = shards.iter().map(|s| s.vectors.clone()).collect::<Vec<_>>();
    let shards = Arc::new(shards);
    let training = Arc::new(training);
    let handles = LocalCommunicator::new_group(world_size)
        .into_iter()
        .map(|communicator| {
            let config = DistributedBuildConfig::new(
                communicator.rank(),
                world_size,
                "unused",
                params.clone(),
            )
            .with_id_assignment(id_assignment);
            let store = store.clone();
            let base = base.clone();
            let shards = shards.clone();
            let training = training.clone();
            tokio::spawn(async move {
                let rank = communicator.rank();
                let builder =
                    DistributedIvfPqBuilder::try_new(config, communicator, store.clone(), base)
                        .unwrap();
                let centroids = builder.train(&training).await.unwrap();
                // Each rank clusters the shards it encodes at row 0.
                let mine = shards
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| i % world_size == rank)
                    .map(|(_, s)| s)
                    .collect::<Vec<_>>();
                assign_shards(&store, &centroids, &mine, clustering).await;
                builder.add(&shards).await.unwrap()
            })
        })
        .collect::<Vec<_>>();

    let mut finals = Vec::with_capacity(world_size);
    for handle in handles {
        finals.push(handle.await.unwrap());
    }
    assert!(
        finals.windows(2).all(|w| w[0] == w[1]),
        "ranks disagree on the final index: {:?}",
        finals
    );
    finals.swap_remove(0)
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_end_to_end_single_rank() {
    let store = Arc::new(ObjectStore::memory());
    let base = Path::from("builds/ivfpq");
    let data = generate_clustered_vectors(4000, 32, 16, 1.0, 42);
    let shards =
        write_shard_vectors(&store, &Path::from("input"), &data, &[1000, 1000, 1000, 1000]).await;
    let params = IvfPqBuildParams {
        max_iters: 10,
        ..IvfPqBuildParams::new(16, 4, 8)
    };

    let final_path = build_with_ranks(
        store.clone(),
        base.clone(),
        1,
        params,
        IdAssignment::Local,
        Clustering::Random,
        shards.clone(),
    )
    .await;
    assert_eq!(final_path, Path::from("builds/ivfpq/partial_04_00-03.ivfpq"));

    let index = IvfPqIndex::open(&store, &final_path).await.unwrap();
    assert_eq!(index.vector_count(), 4000);
    assert_eq!(index.num_partitions(), 16);
    assert_eq!(index.list_sizes().iter().sum::<usize>(), 4000);
    assert_eq!(index.row(), Some(2));
    assert_eq!(
        index.batch_range().map(|r| (r.start, r.end)),
        Some((0, 3))
    );

    // Lists follow the cluster ids given next to each shard.
    let mut expected = vec![0; 16];
    for shard in &shards {
        let assignments = retrodex_io::shard::read_assignments(&store, &shard.assignments)
            .await
            .unwrap();
        assignments
            .values()
            .iter()
            .for_each(|p| expected[*p as usize] += 1);
    }
    assert_eq!(index.list_sizes(), expected);
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_five_shards_carry_forward() {
    let store = Arc::new(ObjectStore::memory());
    let base = Path::from("build");
    let data = generate_clustered_vectors(500, 8, 4, 0.5, 7);
    let shards = write_shard_vectors(&store, &Path::from("input"), &data, &[100; 5]).await;

    let final_path = build_with_ranks(
        store.clone(),
        base.clone(),
        1,
        small_params(),
        IdAssignment::Local,
        NEAREST,
        shards,
    )
    .await;
    assert_eq!(final_path, Path::from("build/partial_05_00-04.ivfpq"));
    let index = IvfPqIndex::open(&store, &final_path).await.unwrap();
    assert_eq!(index.vector_count(), 500);
    assert_eq!(index.row(), Some(3));

    let mut files = store.read_dir(&base).await.unwrap();
    files.sort();
    assert_eq!(
        files,
        vec![
            "empty.ivfpq",
            "partial_01_00-00.ivfpq",
            "partial_01_01-01.ivfpq",
            "partial_01_02-02.ivfpq",
            "partial_01_03-03.ivfpq",
            "partial_01_04-04.ivfpq",
            "partial_02_00-01.ivfpq",
            "partial_02_02-03.ivfpq",
            "partial_04_00-03.ivfpq",
            "partial_05_00-04.ivfpq",
            "train_centroids.flat",
        ]
    );
    // The carried shard is still tagged with the row that produced it.
    let carried = IvfPqIndex::open(&store, &base.child("partial_01_04-04.ivfpq"))
        .await
        .unwrap();
    assert_eq!(carried.row(), Some(0));
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_world_size_does_not_change_result() {
    let data = generate_clustered_vectors(700, 8, 4, 0.5, 11);
    let rows = [100; 7];

    let mut results = Vec::new();
    for world_size in [1, 2, 3] {
        let store = Arc::new(ObjectStore::memory());
        let base = Path::from("build");
        let shards = write_shard_vectors(&store, &Path::from("input"), &data, &rows).await;
        let final_path = build_with_ranks(
            store.clone(),
            base,
            world_size,
            small_params(),
            IdAssignment::Local,
            NEAREST,
            shards,
        )
        .await;
        assert_eq!(final_path, Path::from("build/partial_07_00-06.ivfpq"));
        results.push(store.read_one_all(&final_path).await.unwrap());
    }
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0], results[2]);
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_local_filesystem_build_is_idempotent() {
    let build_dir = TempStrDir::default();
    let data = generate_clustered_vectors(300, 8, 4, 0.5, 3);
    let params = small_params();

    let config = DistributedBuildConfig::new(0, 1, build_dir.as_str(), params.clone());
    let builder =
        DistributedIvfPqBuilder::from_config(config.clone(), LocalCommunicator::single()).unwrap();
    let store = builder.store().clone();
    let base = builder.layout().base().clone();
    let shards = write_shard_vectors(&store, &base.child("input"), &data, &[100, 100, 100]).await;
    let training = shards.iter().map(|s| s.vectors.clone()).collect::<Vec<_>>();

    let centroids = builder.train(&training).await.unwrap();
    assert_eq!(centroids, BuildLayout::new(base.clone()).centroids_path());
    assert!(std::path::Path::new(build_dir.as_str())
        .join("train_centroids.flat")
        .is_file());
    assign_shards(
        &store,
        &centroids,
        &shards.iter().collect::<Vec<_>>(),
        Clustering::Nearest(params.distance_type),
    )
    .await;
    let final_path = builder.add(&shards).await.unwrap();
    let first = store.read_one_all(&final_path).await.unwrap();

    // A second run, even from a fresh builder, finds every output in place.
    let builder = DistributedIvfPqBuilder::from_config(config, LocalCommunicator::single()).unwrap();
    let again = builder.build(&training, &shards).await.unwrap();
    assert_eq!(again, final_path);
    assert_eq!(store.read_one_all(&again).await.unwrap(), first);

    let layout = builder.layout();
    let outcome = retrodex_index::vector::distributed::train_empty_index(
        &store,
        &training,
        &layout.empty_index_path(),
        &params,
    )
    .await
    .unwrap();
    assert!(matches!(outcome, StepOutcome::Skipped(_)));
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_global_offset_ids_are_unique() {
    let store = Arc::new(ObjectStore::memory());
    let data = generate_clustered_vectors(310, 8, 4, 0.5, 5);
    let rows = [50, 120, 90, 50];
    let shards = write_shard_vectors(&store, &Path::from("input"), &data, &rows).await;

    let final_path = build_with_ranks(
        store.clone(),
        Path::from("build"),
        2,
        small_params(),
        IdAssignment::GlobalOffset,
        NEAREST,
        shards,
    )
    .await;
    let index = IvfPqIndex::open(&store, &final_path).await.unwrap();
    let mut ids = (0..index.num_partitions())
        .flat_map(|p| index.list(p).ids.clone())
        .collect::<Vec<_>>();
    ids.sort_unstable();
    assert_eq!(ids, (0..310).collect::<Vec<u64>>());
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_resumed_global_offset_build_skips_shard_headers() {
    let store = Arc::new(ObjectStore::memory());
    let base = Path::from("build");
    let data = generate_clustered_vectors(240, 8, 4, 0.5, 11);
    let shards = write_shard_vectors(&store, &Path::from("input"), &data, &[60, 100, 80]).await;
    let training = shards.iter().map(|s| s.vectors.clone()).collect::<Vec<_>>();

    let final_path = build_with_ranks(
        store.clone(),
        base.clone(),
        1,
        small_params(),
        IdAssignment::GlobalOffset,
        NEAREST,
        shards.clone(),
    )
    .await;
    let expected = store.read_one_all(&final_path).await.unwrap();

    // Only the build directory survives. The shard inputs are gone.
    let resumed = Arc::new(ObjectStore::memory());
    for name in store.read_dir(&base).await.unwrap() {
        let path = base.child(name.as_str());
        resumed
            .put(&path, store.read_one_all(&path).await.unwrap())
            .await
            .unwrap();
    }
    assert!(!resumed.exists(&shards[0].vectors).await.unwrap());

    let config = DistributedBuildConfig::new(0, 1, "unused", small_params())
        .with_id_assignment(IdAssignment::GlobalOffset);
    let builder =
        DistributedIvfPqBuilder::try_new(config, LocalCommunicator::single(), resumed.clone(), base)
            .unwrap();
    let again = builder.build(&training, &shards).await.unwrap();
    assert_eq!(again, final_path);
    assert_eq!(resumed.read_one_all(&again).await.unwrap(), expected);
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_local_ids_repeat_per_shard() {
    let store = Arc::new(ObjectStore::memory());
    let data = generate_clustered_vectors(200, 8, 4, 0.5, 5);
    let shards = write_shard_vectors(&store, &Path::from("input"), &data, &[100, 100]).await;

    let final_path = build_with_ranks(
        store.clone(),
        Path::from("build"),
        2,
        small_params(),
        IdAssignment::Local,
        NEAREST,
        shards,
    )
    .await;
    let index = IvfPqIndex::open(&store, &final_path).await.unwrap();
    let mut ids = (0..index.num_partitions())
        .flat_map(|p| index.list(p).ids.clone())
        .collect::<Vec<_>>();
    ids.sort_unstable();
    let expected = (0..100_u64).flat_map(|i| [i, i]).collect::<Vec<_>>();
    assert_eq!(ids, expected);
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_search_finds_inserted_vectors() {
    let store = Arc::new(ObjectStore::memory());
    let data = generate_clustered_vectors(800, 16, 8, 0.05, 21);
    let shards = write_shard_vectors(&store, &Path::from("input"), &data, &[200; 4]).await;
    let params = IvfPqBuildParams {
        max_iters: 20,
        ..IvfPqBuildParams::new(8, 4, 6)
    };

    let final_path = build_with_ranks(
        store.clone(),
        Path::from("build"),
        2,
        params,
        IdAssignment::GlobalOffset,
        NEAREST,
        shards,
    )
    .await;
    let index = IvfPqIndex::open(&store, &final_path).await.unwrap();

    let values = data.flat_values().unwrap();
    for row in [0_usize, 137, 402, 799] {
        let query = &values[row * 16..(row + 1) * 16];
        let neighbors = index.search(query, 10, 2).unwrap();
        assert_eq!(neighbors.len(), 10);
        assert!(neighbors.windows(2).all(|w| w[0].1 <= w[1].1));
        // Rows of the same tight cluster are indistinguishable after PQ, so
        // only the cluster of each hit is checked.
        assert!(
            neighbors.iter().all(|(id, _)| *id as usize % 8 == row % 8),
            "row {}: {:?}",
            row,
            neighbors
        );
    }
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_missing_assignments_fail_the_build() {
    let store = Arc::new(ObjectStore::memory());
    let data = generate_clustered_vectors(100, 8, 4, 0.5, 5);
    let shards = write_shard_vectors(&store, &Path::from("input"), &data, &[100]).await;
    let training = vec![shards[0].vectors.clone()];

    let config = DistributedBuildConfig::new(0, 1, "unused", small_params());
    let builder = DistributedIvfPqBuilder::try_new(
        config,
        LocalCommunicator::single(),
        store.clone(),
        Path::from("build"),
    )
    .unwrap();
    builder.train(&training).await.unwrap();
    assert!(builder.add(&shards).await.is_err());
    assert!(!store
        .exists(&Path::from("build/partial_1_0-0.ivfpq"))
        .await
        .unwrap());
}
