//! Usage Bridge Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Moves usage events from an upstream, cursor-paged event feed to a usage
//! collector, in feed order, with a checkpoint after every delivered event.
//!
//! # Overview
//!
//! - **Delay**: backoff sequence used between polling cycles
//! - **Checkpoint**: document cache with optimistic-concurrency revisions
//! - **Progress**: the last fully processed cursor, persisted through the cache
//! - **Reader**: single-pass iterator over the upstream pages with a minimum-age horizon
//! - **Bridge**: the polling scheduler that filters, maps, converts, reports and checkpoints
//! - **Executor**: start/stop lifecycle with a guaranteed stop on shutdown
//! - **Statistics** / **Health**: observers of per-event outcomes
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use usage_bridge::{
//!     bridge::{BridgeCollaborators, EventBridge, IdentityMapper},
//!     carry_over::PassThroughCarryOver,
//!     checkpoint::{CacheStatistics, CheckpointCache, InMemoryCheckpointStore},
//!     clock::SystemClock,
//!     delay::DelayGenerator,
//!     progress::ProgressTracker,
//! };
//! # use usage_bridge::{reader::EventSource, bridge::{EventConverter, UsageReporter}};
//! # fn collaborators() -> (Arc<dyn EventSource>, Arc<dyn EventConverter>, Arc<dyn UsageReporter>) { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (source, converter, reporter) = collaborators();
//!     let cache = CheckpointCache::new(
//!         Arc::new(InMemoryCheckpointStore::new()),
//!         "bridge-progress",
//!         Arc::new(CacheStatistics::default()),
//!     );
//!     let progress = Arc::new(ProgressTracker::new(cache, None));
//!     progress.load().await?;
//!
//!     let bridge = EventBridge::new(BridgeCollaborators {
//!         source,
//!         clock: Arc::new(SystemClock),
//!         min_age: Duration::from_secs(60),
//!         filters: Vec::new(),
//!         mapper: Arc::new(IdentityMapper),
//!         converter,
//!         carry_over: Arc::new(PassThroughCarryOver),
//!         reporter,
//!         progress,
//!         delay: DelayGenerator::new(Duration::from_secs(5), Duration::from_secs(240)),
//!         observers: Vec::new(),
//!     });
//!     bridge.start()?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod bridge;
pub mod carry_over;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod convert;
pub mod delay;
pub mod error;
pub mod executor;
pub mod filter;
pub mod health;
pub mod model;
pub mod progress;
pub mod reader;
pub mod report;
pub mod statistics;

pub use error::{BridgeError, Result};
