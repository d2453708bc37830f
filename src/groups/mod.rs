//! Dynamic Series Groups
//!
//! Named groups whose membership is defined by a pattern over series names
//! and maintained continuously as series come and go:
//!
//! - **Registry**: name → definition and cached members, validated edits
//! - **Maintainer**: incremental inserts/removals and versioned full scans
//! - **Replication**: versioned edits exchanged between pools
//!
//! # Architecture
//!
//! ```text
//!   commands ──► GroupRegistry ──► ScanQueue ──► MembershipMaintainer
//!                    │    ▲                           │
//!                    │    └──── commit members ───────┘
//!                    ▼
//!                GroupEdit ──► peers (apply_replicated)
//! ```

mod error;
mod group;
mod maintainer;
mod registry;
mod replication;

pub use error::{GroupError, GroupResult};
pub use group::{Group, GroupHandle, GroupState, GroupSummary, MemberSet};
pub use maintainer::{MembershipMaintainer, ScanOutcome, ScanQueue, ScanReceiver};
pub use registry::{GroupRegistry, MAX_GROUP_NAME_LEN};
pub use replication::{GroupEdit, ReplicationOutcome};
