//! # Series Groups
//!
//! Dynamic series grouping for a clustered time-series store: named groups
//! defined by a pattern over series names, kept up to date as series arrive
//! and as pools join the cluster, and queried with a small set algebra.
//!
//! ## Features
//!
//! - **Pattern groups**: `/regex/` or exact-name expressions, validated
//!   before any state changes
//! - **Incremental membership**: new series are matched against every group
//!   without rescanning the universe
//! - **Versioned scans**: a slow scan never overwrites a newer edit
//! - **Set algebra**: `|`, `&`, `^`, `-` and `,` over groups and series
//! - **Rebalancing**: pools joining the cluster trigger a tracked,
//!   poll-able convergence
//!
//! ## Modules
//!
//! - [`pattern`]: expression compiler
//! - [`series`]: series universe collaborator
//! - [`groups`]: registry, membership maintainer, replication
//! - [`query`]: command language, evaluator and executor
//! - [`cluster`]: pool lookup, cluster view, topology coordinator
//! - [`engine`]: per-node facade
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use series_groups::{Config, GroupEngine, MemoryUniverse, StaticClusterView};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let universe = MemoryUniverse::with_series(["a1", "a2", "b1", "b2"]);
//!     let engine = GroupEngine::new(
//!         &Config::default(),
//!         Arc::new(universe.clone()),
//!         Arc::new(StaticClusterView::new(0, 1)),
//!     );
//!     engine.start();
//!
//!     engine.execute("create group `a` for /a.*/").await?;
//!     engine.wait_converged(Duration::from_secs(5)).await;
//!
//!     let response = engine.execute("list series `a`").await?;
//!     println!("{}", response.to_json());
//!
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```

pub mod cluster;
pub mod config;
pub mod engine;
pub mod groups;
pub mod pattern;
pub mod query;
pub mod series;

pub use cluster::{
    ClusterError, ClusterView, PoolId, PoolLookup, PoolStatus, StaticClusterView,
    TopologyCoordinator, TopologyState,
};

pub use config::{ClusterConfig, Config, ConfigError, GroupsConfig, LoggingConfig};

pub use engine::{GroupEngine, MembershipSummary};

pub use groups::{
    Group, GroupEdit, GroupError, GroupRegistry, GroupResult, GroupSummary, MembershipMaintainer,
    ReplicationOutcome, ScanOutcome,
};

pub use pattern::{Matcher, PatternCompiler, PatternError, RegexCompiler, SeriesMatcher};

pub use query::{
    parse_command, Command, CommandExecutor, CommandResponse, QueryError, QueryResult,
    SetEvaluator,
};

pub use series::{MemoryUniverse, SeriesUniverse};
