//! Master - cluster metadata and placement engine
//!
//! Owns the authoritative mapping of databases → tables → key ranges →
//! replicas → storage nodes, and decides how ranges are created, replicated
//! and rebalanced across nodes.
//!
//! # Features
//! - Database and table lifecycle (create, cancel, edit, delete)
//! - Range placement through a pipeline of node selectors
//! - Failover and balance detection feeding a per-range event queue
//! - Periodic background workers started and stopped by name
//! - Alarm reporting to an HTTP gateway
//!
//! # Usage Example
//! ```ignore
//! use std::sync::Arc;
//! use master::{Cluster, HttpRangeServerClient, MasterConfig};
//! use metastore::MemoryStore;
//!
//! let config = MasterConfig::default();
//! let client = Arc::new(HttpRangeServerClient::new(config.schedule.rpc_timeout())?);
//! let cluster = Arc::new(Cluster::new(config, Arc::new(MemoryStore::new()), client)?);
//! cluster.load_cache()?;
//! cluster.start()?;
//! ```

pub mod alarm;
pub mod cache;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod id;
pub mod keys;
pub mod metadata;
pub mod rpc;
pub mod scheduler;
pub mod schema;
pub mod worker;

pub use cluster::{Cluster, NodeHeartbeat, RangeHeartbeat, ScheduleSwitches};
pub use config::{ConfigError, MasterConfig};
pub use error::{MasterError, Result};
pub use event::{EventDispatcher, EventKind, RangeEvent};
pub use id::{IdGenerator, StoreIdGenerator};
pub use rpc::{HttpRangeServerClient, RangeServerClient};
pub use worker::{Worker, WorkerManager};
