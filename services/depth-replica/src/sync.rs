//! Snapshot + diff reconciliation
//!
//! [`SyncController`] is the only writer of a book. It implements the
//! snapshot/diff protocol:
//!
//! 1. `init` fetches a snapshot (no lock held while waiting on the venue),
//!    then replaces the book under the write lock.
//! 2. `apply_diff` discards events while the book is not ready, discards
//!    events entirely covered by `last_sequence`, and treats a hole between
//!    `last_sequence` and the event's first update ID as fatal to the current
//!    state: nothing from the event is applied and the book is rebuilt from a
//!    fresh snapshot.
//!
//! [`SyncController::apply_without_resync`] stops short of the rebuild and
//! reports [`DiffOutcome::Gap`] instead, for callers that schedule the
//! snapshot fetch themselves.
//!
//! Callers must feed events strictly in delivery order. Readers go through
//! [`BookHandle::analyze`] or [`BookHandle::filtered`], which refuse to answer
//! while the book is not ready.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};
use types::ids::MarketId;

use crate::book::{OrderBook, PriceLevel, Side, SideKind};
use crate::events::DiffEvent;
use crate::metrics::SyncMetrics;
use crate::source::{SnapshotSource, SourceError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("snapshot sequence {snapshot} is behind book sequence {current}")]
    StaleSnapshot { snapshot: u64, current: u64 },

    #[error("snapshot not received within {0:?}")]
    SnapshotTimeout(Duration),
}

/// What `apply_diff` did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOutcome {
    /// Applied in full; `changed` tells whether any level moved.
    Applied { changed: bool },
    /// Already covered by the book's sequence; discarded.
    Stale,
    /// No snapshot loaded yet; discarded.
    NotReady,
    /// A gap was detected; the event was dropped and the book reloaded at
    /// `sequence`.
    Resynced { sequence: u64 },
    /// A gap was detected; the event was dropped and the book marked out of
    /// sync. The caller owes it a snapshot.
    Gap { expected: u64, got_first: u64 },
}

/// Shared, lock-guarded access to one replica.
///
/// Readers get `&OrderBook`; the mutation API is private to this crate.
/// [`BookHandle::read`] hands out the book in whatever state it is in;
/// queries that must not see stale levels use [`BookHandle::analyze`].
#[derive(Debug, Clone)]
pub struct BookHandle {
    symbol: MarketId,
    inner: Arc<RwLock<OrderBook>>,
}

impl BookHandle {
    pub fn new(symbol: MarketId) -> Self {
        Self {
            inner: Arc::new(RwLock::new(OrderBook::new(symbol.clone()))),
            symbol,
        }
    }

    pub fn symbol(&self) -> &MarketId {
        &self.symbol
    }

    /// Point-in-time consistent read access.
    pub async fn read(&self) -> RwLockReadGuard<'_, OrderBook> {
        self.inner.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, OrderBook> {
        self.inner.write().await
    }

    /// Run `query` against one side under the read lock. `None` while the
    /// book is not ready.
    ///
    /// ```ignore
    /// let wall = handle
    ///     .analyze(SideKind::Bids, |bids| AnalyticsEngine::summa_by_quantity(bids, dec!(10), true))
    ///     .await
    ///     .flatten();
    /// ```
    pub async fn analyze<T, F>(&self, kind: SideKind, query: F) -> Option<T>
    where
        F: FnOnce(&Side) -> T,
    {
        self.inner.read().await.ready_side(kind).map(query)
    }

    /// Filtered copy of one side taken under a brief read lock. `None`
    /// while the book is not ready.
    pub async fn filtered<F>(&self, kind: SideKind, predicate: F) -> Option<Side>
    where
        F: Fn(&PriceLevel) -> bool,
    {
        self.analyze(kind, |side| side.filtered(predicate)).await
    }

    pub async fn last_sequence(&self) -> Option<u64> {
        self.inner.read().await.last_sequence()
    }

    pub async fn is_ready(&self) -> bool {
        self.inner.read().await.is_ready()
    }
}

/// Drives Init and ApplyDiff against one book.
pub struct SyncController {
    symbol: MarketId,
    snapshots: Arc<dyn SnapshotSource>,
    book: BookHandle,
    metrics: Arc<SyncMetrics>,
}

impl SyncController {
    pub fn new(
        book: BookHandle,
        snapshots: Arc<dyn SnapshotSource>,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            symbol: book.symbol().clone(),
            snapshots,
            book,
            metrics,
        }
    }

    pub fn symbol(&self) -> &MarketId {
        &self.symbol
    }

    pub fn book(&self) -> &BookHandle {
        &self.book
    }

    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    /// Replace the book with a fresh snapshot.
    ///
    /// On failure the book keeps its previous contents and status. Returns
    /// the sequence the book now sits at.
    pub async fn init(&self) -> Result<u64, SyncError> {
        let snapshot = match self.snapshots.fetch(&self.symbol).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.metrics.record_snapshot_failure();
                warn!(symbol = %self.symbol, error = %e, "snapshot fetch failed");
                return Err(e.into());
            }
        };

        let mut book = self.book.write().await;

        if let Some(current) = book.last_sequence() {
            if snapshot.sequence < current {
                self.metrics.record_snapshot_failure();
                warn!(
                    symbol = %self.symbol,
                    snapshot = snapshot.sequence,
                    current,
                    "rejecting snapshot older than book"
                );
                return Err(SyncError::StaleSnapshot {
                    snapshot: snapshot.sequence,
                    current,
                });
            }
        }

        let report = book.load_snapshot(snapshot.sequence, &snapshot.bids, &snapshot.asks);
        self.metrics.record_snapshot_loaded();
        self.metrics.record_malformed(report.malformed);

        info!(
            symbol = %self.symbol,
            sequence = snapshot.sequence,
            bids = book.bids().count(),
            asks = book.asks().count(),
            malformed = report.malformed,
            "snapshot loaded"
        );

        Ok(snapshot.sequence)
    }

    /// Apply one diff event according to the sequence protocol, reloading
    /// the book from a snapshot if the event reveals a gap.
    pub async fn apply_diff(&self, event: &DiffEvent) -> Result<DiffOutcome, SyncError> {
        match self.apply_without_resync(event).await {
            DiffOutcome::Gap { .. } => {
                let sequence = self.init().await?;
                Ok(DiffOutcome::Resynced { sequence })
            }
            outcome => Ok(outcome),
        }
    }

    /// Like [`SyncController::apply_diff`], but a gap only marks the book
    /// out of sync and returns [`DiffOutcome::Gap`].
    pub async fn apply_without_resync(&self, event: &DiffEvent) -> DiffOutcome {
        let mut book = self.book.write().await;

        let last = match book.last_sequence() {
            Some(last) if book.is_ready() => last,
            _ => {
                self.metrics.record_diff_not_ready();
                debug!(
                    symbol = %self.symbol,
                    first = event.first_sequence,
                    last = event.last_sequence,
                    "discarding diff, book not ready"
                );
                return DiffOutcome::NotReady;
            }
        };

        if event.is_stale(last) {
            self.metrics.record_diff_stale();
            debug!(
                symbol = %self.symbol,
                sequence = last,
                event_last = event.last_sequence,
                "discarding stale diff"
            );
            return DiffOutcome::Stale;
        }

        if event.has_gap_after(last) {
            self.metrics.record_gap();
            let expected = last + 1;
            warn!(
                symbol = %self.symbol,
                expected,
                got_first = event.first_sequence,
                "sequence gap, resyncing"
            );
            book.mark_out_of_sync();
            return DiffOutcome::Gap {
                expected,
                got_first: event.first_sequence,
            };
        }

        let started = Instant::now();
        let report = book.apply_diff(event);
        let elapsed_ns = started.elapsed().as_nanos().min(u64::MAX as u128) as u64;

        self.metrics.record_diff_applied(report.changed, elapsed_ns);
        self.metrics.record_malformed(report.malformed);

        DiffOutcome::Applied {
            changed: report.changed,
        }
    }

    /// Mark the book stale ahead of a reconnect.
    pub(crate) async fn invalidate(&self) {
        self.book.write().await.mark_out_of_sync();
    }

    /// Drop all book contents.
    pub(crate) async fn release(&self) {
        self.book.write().await.clear();
    }
}
