//! In-memory series universe
//!
//! Holds the full set of series names shared by every node of a simulated
//! cluster. Each view filters it down to the partition its pool owns, using
//! the shared [`PoolLookup`].

use crate::cluster::{PoolId, PoolLookup};
use crate::series::SeriesUniverse;
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

/// In-memory series store with optional pool partitioning
#[derive(Debug, Clone)]
pub struct MemoryUniverse {
    /// All series names across the cluster
    series: Arc<RwLock<BTreeSet<String>>>,
    /// Current pool lookup, shared by every view
    lookup: Arc<RwLock<PoolLookup>>,
    /// Pool this view belongs to; `None` sees every series
    local_pool: Option<PoolId>,
}

impl MemoryUniverse {
    /// Create an unpartitioned universe
    pub fn new() -> Self {
        Self {
            series: Arc::new(RwLock::new(BTreeSet::new())),
            lookup: Arc::new(RwLock::new(PoolLookup::new(1))),
            local_pool: None,
        }
    }

    /// Create a universe seeded with the given names
    pub fn with_series<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let universe = Self::new();
        {
            let mut series = universe.series.write().unwrap_or_else(PoisonError::into_inner);
            series.extend(names.into_iter().map(Into::into));
        }
        universe
    }

    /// A view on the same store restricted to one pool's partition
    pub fn partition(&self, pool: PoolId) -> Self {
        Self {
            series: Arc::clone(&self.series),
            lookup: Arc::clone(&self.lookup),
            local_pool: Some(pool),
        }
    }

    /// Pool this view is restricted to
    pub fn local_pool(&self) -> Option<PoolId> {
        self.local_pool
    }

    /// Insert a batch of names
    ///
    /// Returns the names that were new and are owned by this view, which is
    /// exactly what the insert path reports to the grouping engine.
    pub fn insert_batch<I, S>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lookup = self.lookup.read().unwrap_or_else(PoisonError::into_inner);
        let mut series = self.series.write().unwrap_or_else(PoisonError::into_inner);

        names
            .into_iter()
            .map(Into::into)
            .filter(|name| series.insert(name.clone()))
            .filter(|name| self.owns(&lookup, name))
            .collect()
    }

    /// Remove a batch of names, returning the ones that existed in this view
    pub fn remove_batch<I, S>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let lookup = self.lookup.read().unwrap_or_else(PoisonError::into_inner);
        let mut series = self.series.write().unwrap_or_else(PoisonError::into_inner);

        names
            .into_iter()
            .filter(|name| series.remove(name.as_ref()))
            .filter(|name| self.owns(&lookup, name.as_ref()))
            .map(|name| name.as_ref().to_string())
            .collect()
    }

    /// Re-partition the store for a new pool count
    ///
    /// Stands in for the storage layer moving series when a pool joins.
    pub fn set_pool_count(&self, pool_count: u16) {
        let mut lookup = self.lookup.write().unwrap_or_else(PoisonError::into_inner);
        *lookup = PoolLookup::new(pool_count);
        tracing::debug!(
            pool_count,
            slots = ?lookup.distribution(),
            "Series universe re-partitioned"
        );
    }

    /// Pool count of the current partitioning
    pub fn pool_count(&self) -> u16 {
        self.lookup
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .pool_count()
    }

    /// Every series in the store, ignoring partitioning
    pub fn all_series(&self) -> BTreeSet<String> {
        self.series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn owns(&self, lookup: &PoolLookup, series: &str) -> bool {
        match self.local_pool {
            Some(pool) => lookup.pool_for(series) == pool,
            None => true,
        }
    }
}

impl Default for MemoryUniverse {
    fn default() -> Self {
        Self::new()
    }
}

impl SeriesUniverse for MemoryUniverse {
    fn snapshot(&self) -> Vec<String> {
        let lookup = self.lookup.read().unwrap_or_else(PoisonError::into_inner);
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        series
            .iter()
            .filter(|name| self.owns(&lookup, name))
            .cloned()
            .collect()
    }

    fn contains(&self, series: &str) -> bool {
        let lookup = self.lookup.read().unwrap_or_else(PoisonError::into_inner);
        self.series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(series)
            && self.owns(&lookup, series)
    }

    fn len(&self) -> usize {
        match self.local_pool {
            None => self.series.read().unwrap_or_else(PoisonError::into_inner).len(),
            Some(_) => self.snapshot().len(),
        }
    }
}
