//! Depth Replica Service
//!
//! Keeps a live copy of one market's limit order book from a venue that
//! publishes a full snapshot plus an ordered stream of sequenced diffs, and
//! answers analytical queries over it:
//! - Side containers with incrementally maintained aggregates
//! - Snapshot/diff reconciliation with gap detection and forced resync
//! - Extrema, cumulative-threshold, local-extrema and normalization queries
//! - A supervised connection loop with inactivity detection and backoff
//! - Checksummed point-in-time exports for replica comparison
//!
//! # Architecture
//!
//! ```text
//! SnapshotSource      DiffSource
//!        │                │
//!        │   ┌────────────┘
//!    ┌───▼───▼──────┐
//!    │  Supervisor  │  ← lifecycle, timers, retries
//!    └──────┬───────┘
//!    ┌──────▼───────┐
//!    │ SyncControl  │  ← sequence checks, resync
//!    └──────┬───────┘
//!    ┌──────▼───────┐
//!    │  OrderBook   │  ← asks + bids, no crossed levels
//!    └──────┬───────┘
//!           │ analyze / filtered copy (ready only)
//!    ┌──────▼───────┐
//!    │  Analytics   │
//!    └──────────────┘
//! ```

pub mod analytics;
pub mod backoff;
pub mod book;
pub mod config;
pub mod events;
pub mod metrics;
pub mod snapshot;
pub mod source;
pub mod supervisor;
pub mod sync;

pub use analytics::{AnalyticsEngine, MinMax, SummaResult};
pub use book::{OrderBook, PriceLevel, Side, SideKind, SyncStatus};
pub use config::{RetryPolicy, SupervisorConfig};
pub use events::{DepthSnapshot, DiffEvent, LevelChange};
pub use source::{DiffSource, DiffSubscription, SnapshotSource, SourceError};
pub use supervisor::{ConnectionState, ConnectionSupervisor, SupervisorHandle};
pub use sync::{BookHandle, DiffOutcome, SyncController, SyncError};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
