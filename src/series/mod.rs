//! Series Universe
//!
//! The set of series names visible to this node. The storage layer owns it;
//! the grouping engine only reads snapshots:
//!
//! - **SeriesUniverse**: read-only view consumed by the engine
//! - **MemoryUniverse**: in-memory store, optionally partitioned by pool
//!
//! # Architecture
//!
//! ```text
//! insert path ──► universe ──► GroupEngine::on_series_inserted(batch)
//!                    ▲
//!                    └── full scans read snapshot()
//! ```

mod memory;

pub use memory::MemoryUniverse;

/// Read-only view of the series known to this node
///
/// For a partitioned store this is the local partition only.
pub trait SeriesUniverse: Send + Sync {
    /// Every series name currently owned by this node
    fn snapshot(&self) -> Vec<String>;

    /// Whether the series exists and is owned by this node
    fn contains(&self, series: &str) -> bool;

    /// Number of series owned by this node
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
