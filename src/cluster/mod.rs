//! Cluster Topology
//!
//! Everything the grouping engine knows about the cluster:
//!
//! - **Pools**: series → pool ownership lookup
//! - **View**: the cluster membership collaborator ([`ClusterView`])
//! - **Coordinator**: reacts to pools joining and tracks convergence
//!
//! # Architecture
//!
//! ```text
//! pool joins ──► TopologyCoordinator::pool_added
//!                    │ mark all groups stale
//!                    ▼
//!          poll ClusterView ──► local settled → rescan
//!                           └─► remote pools → Converged{n}?
//! ```

mod coordinator;
mod error;
mod pools;
mod view;

pub use coordinator::{TopologyCoordinator, TopologyState};
pub use error::{ClusterError, ClusterResult};
pub use pools::{PoolId, PoolLookup, LOOKUP_SIZE};
pub use view::{ClusterView, PoolStatus, StaticClusterView};
