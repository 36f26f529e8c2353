// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Minimal communicator abstraction for distributed index building

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Barrier;

/// Collectives needed by the distributed build: ranks only meet at barriers.
#[async_trait]
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;
    fn world_size(&self) -> usize;

    /// Barrier across all workers
    async fn barrier(&self);
}

/// Local multi-worker communicator for tests / single-process simulation
pub struct LocalCommunicator {
    rank: usize,
    world: usize,
    barrier: Arc<Barrier>,
}

impl LocalCommunicator {
    /// One communicator per rank, all sharing the same barrier.
    pub fn new_group(world: usize) -> Vec<Arc<dyn Communicator>> {
        let barrier = Arc::new(Barrier::new(world.max(1)));
        (0..world)
            .map(|r| {
                Arc::new(Self {
                    rank: r,
                    world,
                    barrier: barrier.clone(),
                }) as Arc<dyn Communicator>
            })
            .collect()
    }

    /// A group of one.
    pub fn single() -> Arc<dyn Communicator> {
        Arc::new(Self {
            rank: 0,
            world: 1,
            barrier: Arc::new(Barrier::new(1)),
        })
    }
}

#[async_trait]
impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world
    }

    async fn barrier(&self) {
        self.barrier.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_barrier_waits_for_all_ranks() {
        let group = LocalCommunicator::new_group(3);
        let arrived = Arc::new(AtomicUsize::new(0));
        let handles = group
            .into_iter()
            .map(|comm| {
                let arrived = arrived.clone();
                tokio::spawn(async move {
                    arrived.fetch_add(1, Ordering::SeqCst);
                    comm.barrier().await;
                    // Everyone arrived before anyone left.
                    assert_eq!(arrived.load(Ordering::SeqCst), 3);
                    comm.barrier().await;
                    comm.rank()
                })
            })
            .collect::<Vec<_>>();
        let mut ranks = Vec::new();
        for handle in handles {
            ranks.push(handle.await.unwrap());
        }
        assert_eq!(ranks, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_single() {
        let comm = LocalCommunicator::single();
        assert_eq!((comm.rank(), comm.world_size()), (0, 1));
        comm.barrier().await;
    }
}
