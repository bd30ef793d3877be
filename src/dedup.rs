//! Deduplication index
//!
//! A sharded concurrent set of every entry ever accepted into the master list.
//! Shards are selected by the top bits of the entry hash, so racing workers only
//! contend when their entries land in the same partition.
//!
//! Two storage strategies:
//! - Fingerprint: 128 bits per entry, the default for very large lists
//! - Exact: the normalized string itself, never confuses two entries

use crate::cli::{CasePolicy, DedupStrategy};

use ahash::RandomState;
use hashbrown::HashSet;
use std::borrow::Cow;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::RwLock;

// Fixed seeds keep fingerprints stable within and across runs
const PRIMARY_SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];
const SECONDARY_SEEDS: [u64; 4] = [
    0x4528_21e6_38d0_1377,
    0xbe54_66cf_34e9_0c6c,
    0xc0ac_29b7_c97c_50dd,
    0x3f84_d5b5_b547_0917,
];

/// Trim a raw line and apply the case policy. `None` for blank lines.
pub fn normalize(line: &str, policy: CasePolicy) -> Option<Cow<'_, str>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    match policy {
        CasePolicy::Preserve => Some(Cow::Borrowed(trimmed)),
        CasePolicy::Lower => {
            if trimmed.chars().any(char::is_uppercase) {
                Some(Cow::Owned(trimmed.to_lowercase()))
            } else {
                Some(Cow::Borrowed(trimmed))
            }
        }
    }
}

/// Trait for deduplication implementations
pub trait Deduplicator: Send + Sync {
    /// Atomic check-and-insert.
    /// Returns true if the entry was not present before (and is now recorded).
    fn try_add(&self, entry: &str) -> bool;

    /// Check if an entry exists without adding it
    fn contains(&self, entry: &str) -> bool;

    /// Get the number of unique entries
    fn len(&self) -> usize;

    /// Check if empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all entries
    fn clear(&self);

    /// Get approximate memory usage in bytes
    fn memory_usage(&self) -> usize;
}

/// Hashing shared by both strategies: the shard index comes from the top bits
/// of the primary hash.
struct ShardHasher {
    primary: RandomState,
    secondary: RandomState,
    shard_bits: u32,
}

impl ShardHasher {
    fn new(num_shards: usize) -> Self {
        Self {
            primary: RandomState::with_seeds(
                PRIMARY_SEEDS[0],
                PRIMARY_SEEDS[1],
                PRIMARY_SEEDS[2],
                PRIMARY_SEEDS[3],
            ),
            secondary: RandomState::with_seeds(
                SECONDARY_SEEDS[0],
                SECONDARY_SEEDS[1],
                SECONDARY_SEEDS[2],
                SECONDARY_SEEDS[3],
            ),
            shard_bits: num_shards.trailing_zeros(),
        }
    }

    fn primary(&self, entry: &str) -> u64 {
        let mut hasher = self.primary.build_hasher();
        entry.hash(&mut hasher);
        hasher.finish()
    }

    fn fingerprint(&self, entry: &str) -> (u64, u128) {
        let high = self.primary(entry);
        let mut hasher = self.secondary.build_hasher();
        entry.hash(&mut hasher);
        let low = hasher.finish();
        (high, ((high as u128) << 64) | low as u128)
    }

    fn shard_of(&self, hash: u64) -> usize {
        if self.shard_bits == 0 {
            0
        } else {
            (hash >> (64 - self.shard_bits)) as usize
        }
    }
}

/// Round a requested shard count to a power of two, at least 1
fn shard_count(requested: usize) -> usize {
    requested.max(1).next_power_of_two()
}

/// Sharded set of 128-bit entry fingerprints
pub struct FingerprintIndex {
    shards: Vec<RwLock<HashSet<u128, RandomState>>>,
    hasher: ShardHasher,
}

impl FingerprintIndex {
    pub fn new(num_shards: usize) -> Self {
        Self::with_capacity(num_shards, 0)
    }

    pub fn with_capacity(num_shards: usize, capacity_per_shard: usize) -> Self {
        let num_shards = shard_count(num_shards);
        let shards = (0..num_shards)
            .map(|_| RwLock::new(HashSet::with_capacity_and_hasher(capacity_per_shard, RandomState::new())))
            .collect();

        Self {
            shards,
            hasher: ShardHasher::new(num_shards),
        }
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }
}

impl Deduplicator for FingerprintIndex {
    fn try_add(&self, entry: &str) -> bool {
        let (hash, fingerprint) = self.hasher.fingerprint(entry);
        let mut shard = self.shards[self.hasher.shard_of(hash)]
            .write()
            .unwrap_or_else(|e| e.into_inner());
        shard.insert(fingerprint)
    }

    fn contains(&self, entry: &str) -> bool {
        let (hash, fingerprint) = self.hasher.fingerprint(entry);
        let shard = self.shards[self.hasher.shard_of(hash)]
            .read()
            .unwrap_or_else(|e| e.into_inner());
        shard.contains(&fingerprint)
    }

    fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }

    fn clear(&self) {
        for shard in &self.shards {
            shard.write().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }

    fn memory_usage(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(|e| e.into_inner()).capacity() * 17)
            .sum()
    }
}

/// Sharded set of normalized entries
pub struct ExactIndex {
    shards: Vec<RwLock<HashSet<String, RandomState>>>,
    hasher: ShardHasher,
}

impl ExactIndex {
    pub fn new(num_shards: usize) -> Self {
        Self::with_capacity(num_shards, 0)
    }

    pub fn with_capacity(num_shards: usize, capacity_per_shard: usize) -> Self {
        let num_shards = shard_count(num_shards);
        let shards = (0..num_shards)
            .map(|_| RwLock::new(HashSet::with_capacity_and_hasher(capacity_per_shard, RandomState::new())))
            .collect();

        Self {
            shards,
            hasher: ShardHasher::new(num_shards),
        }
    }
}

impl Deduplicator for ExactIndex {
    fn try_add(&self, entry: &str) -> bool {
        let idx = self.hasher.shard_of(self.hasher.primary(entry));
        let mut shard = self.shards[idx].write().unwrap_or_else(|e| e.into_inner());
        if shard.contains(entry) {
            return false;
        }
        shard.insert(entry.to_string())
    }

    fn contains(&self, entry: &str) -> bool {
        let idx = self.hasher.shard_of(self.hasher.primary(entry));
        let shard = self.shards[idx].read().unwrap_or_else(|e| e.into_inner());
        shard.contains(entry)
    }

    fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }

    fn clear(&self) {
        for shard in &self.shards {
            shard.write().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }

    fn memory_usage(&self) -> usize {
        self.shards
            .iter()
            .map(|s| {
                let set = s.read().unwrap_or_else(|e| e.into_inner());
                set.len() * 64 + set.capacity() * 8
            })
            .sum()
    }
}

/// Factory for creating the index based on configuration
pub fn create_index(strategy: DedupStrategy, expected_entries: usize) -> Box<dyn Deduplicator> {
    let num_shards = shard_count(num_cpus::get() * 4);
    let capacity_per_shard = expected_entries / num_shards;

    match strategy {
        DedupStrategy::Fingerprint => {
            Box::new(FingerprintIndex::with_capacity(num_shards, capacity_per_shard))
        }
        DedupStrategy::Exact => Box::new(ExactIndex::with_capacity(num_shards, capacity_per_shard)),
    }
}
