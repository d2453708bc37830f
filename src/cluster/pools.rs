//! Pool Lookup - series name → owning pool
//!
//! Every series name hashes to one of [`LOOKUP_SIZE`] slots and each slot
//! names the pool that owns it.
//!
//! # Growth
//! ```text
//! 1 pool:  [0 0 0 0 0 0 0 0 ...]
//! 2 pools: [0 1 0 1 0 1 0 1 ...]   every 2nd slot of pool 0 → pool 1
//! 3 pools: [0 1 2 1 0 2 0 1 ...]   every 3rd slot of each pool → pool 2
//! ```
//!
//! Going from `n` to `n + 1` pools only hands slots to the new pool, so an
//! existing series either stays where it is or moves to the new pool.

use serde::{Deserialize, Serialize};

/// Pool identifier (index into the ordered pool set)
pub type PoolId = u16;

/// Number of slots in the lookup table
pub const LOOKUP_SIZE: usize = 8192;

/// Slot table mapping hashed series names to pools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolLookup {
    slots: Vec<PoolId>,
    pool_count: u16,
}

impl PoolLookup {
    /// Build the lookup for `pool_count` pools (at least one)
    pub fn new(pool_count: u16) -> Self {
        let pool_count = pool_count.max(1);
        let mut slots = vec![0 as PoolId; LOOKUP_SIZE];

        for n in 1..pool_count {
            let m = usize::from(n) + 1;
            let mut counters: Vec<usize> = (0..usize::from(n)).collect();

            for slot in slots.iter_mut() {
                let owner = usize::from(*slot);
                counters[owner] += 1;
                if counters[owner] % m == 0 {
                    *slot = n;
                }
            }
        }

        Self { slots, pool_count }
    }

    /// Number of pools this lookup distributes over
    pub fn pool_count(&self) -> u16 {
        self.pool_count
    }

    /// Slot index for a series name
    pub fn slot_for(series: &str) -> usize {
        let sum = series
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_add(u64::from(b)));
        ((sum / 11) % LOOKUP_SIZE as u64) as usize
    }

    /// Pool owning the given series name
    pub fn pool_for(&self, series: &str) -> PoolId {
        self.slots[Self::slot_for(series)]
    }

    /// Number of slots owned by each pool
    pub fn distribution(&self) -> Vec<usize> {
        let mut counts = vec![0usize; usize::from(self.pool_count)];
        for &slot in &self.slots {
            counts[usize::from(slot)] += 1;
        }
        counts
    }
}

impl Default for PoolLookup {
    fn default() -> Self {
        Self::new(1)
    }
}
