//! # Partitioner
//!
//! Key-hash routing of records between parallel tasks.
//!
//! The hash uses fixed seeds, so a key maps to the same subtask in every
//! process. Restoring a checkpoint relies on this: keyed state snapshotted by
//! subtask `i` must receive the same keys after a restart.

use std::hash::{BuildHasher, Hash, Hasher};
use std::marker::PhantomData;

use ahash::RandomState;

use crate::join::JoinOutput;
use crate::types::InputEvent;

const SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

/// Trait for partitioning data across parallel instances.
pub trait Partitioner<T>: Send + Sync {
    /// Determine which partition (0..num_partitions) this value should go to.
    fn partition(&self, value: &T, num_partitions: usize) -> usize;
}

/// Stable hash of `key` into `0..num_partitions`.
pub fn hash_partition<K: Hash + ?Sized>(key: &K, num_partitions: usize) -> usize {
    let mut hasher = RandomState::with_seeds(SEEDS[0], SEEDS[1], SEEDS[2], SEEDS[3]).build_hasher();
    key.hash(&mut hasher);
    (hasher.finish() % num_partitions as u64) as usize
}

/// Hash-based partitioner using a key selector function.
pub struct HashPartitioner<K, F> {
    key_selector: F,
    _phantom: PhantomData<fn() -> K>,
}

impl<K, F> HashPartitioner<K, F> {
    pub fn new(key_selector: F) -> Self {
        Self {
            key_selector,
            _phantom: PhantomData,
        }
    }
}

impl<K, T, F> Partitioner<T> for HashPartitioner<K, F>
where
    K: Hash,
    F: Fn(&T) -> K + Send + Sync,
{
    fn partition(&self, value: &T, num_partitions: usize) -> usize {
        hash_partition(&(self.key_selector)(value), num_partitions)
    }
}

/// Routes input events to join tasks by the impression id they carry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImpressionKeyPartitioner;

impl Partitioner<InputEvent> for ImpressionKeyPartitioner {
    fn partition(&self, value: &InputEvent, num_partitions: usize) -> usize {
        hash_partition(value.impression_id(), num_partitions)
    }
}

/// Routes join output to aggregate tasks by campaign.
#[derive(Debug, Clone, Copy, Default)]
pub struct CampaignKeyPartitioner;

impl Partitioner<JoinOutput> for CampaignKeyPartitioner {
    fn partition(&self, value: &JoinOutput, num_partitions: usize) -> usize {
        hash_partition(value.campaign_id(), num_partitions)
    }
}
