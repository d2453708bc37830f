//! Cluster error types

use crate::cluster::pools::PoolId;
use thiserror::Error;

/// Errors reported by the cluster view
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// Pool exists but cannot be reached right now
    #[error("Pool {0} is unreachable")]
    Unreachable(PoolId),

    /// Pool id is outside the current pool set
    #[error("Unknown pool {0}")]
    Unknown(PoolId),
}

/// Result type for cluster operations
pub type ClusterResult<T> = Result<T, ClusterError>;
