//! Two-sided book replica
//!
//! Composes an ask [`Side`] and a bid [`Side`] with the update ID of the last
//! snapshot or diff folded in. Mutation is crate-private: consumers read
//! through `&OrderBook`, and only the sync layer writes.
//!
//! Invariants held after every mutation:
//! - no price rests on both sides at once (a newer change evicts the level
//!   from the opposite side);
//! - each side's cached aggregates match its stored levels;
//! - `last_sequence` never moves backwards.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;
use types::ids::MarketId;
use types::numeric::Price;

use super::price_level::PriceLevel;
use super::side::{Side, SideKind};
use crate::events::{DiffEvent, LevelChange};

/// Synchronization state of a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// No snapshot has been loaded yet.
    Uninitialized,
    /// Snapshot loaded, diffs are being applied.
    Synced,
    /// Continuity was lost; contents are stale until the next snapshot.
    OutOfSync,
}

impl SyncStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, SyncStatus::Synced)
    }
}

/// What a snapshot load or diff application did to the book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Whether any stored level changed.
    pub changed: bool,
    /// Pairs accepted (including no-op pairs).
    pub applied: usize,
    /// Pairs rejected as malformed.
    pub malformed: usize,
    /// Levels evicted from the opposite side.
    pub uncrossed: usize,
}

/// In-memory replica of one market's depth.
#[derive(Debug, Clone)]
pub struct OrderBook {
    symbol: MarketId,
    asks: Side,
    bids: Side,
    last_sequence: Option<u64>,
    status: SyncStatus,
}

impl OrderBook {
    /// Create an empty, not-ready book.
    pub fn new(symbol: MarketId) -> Self {
        Self {
            symbol,
            asks: Side::new(SideKind::Asks),
            bids: Side::new(SideKind::Bids),
            last_sequence: None,
            status: SyncStatus::Uninitialized,
        }
    }

    pub fn symbol(&self) -> &MarketId {
        &self.symbol
    }

    /// Live ask side.
    pub fn asks(&self) -> &Side {
        &self.asks
    }

    /// Live bid side.
    pub fn bids(&self) -> &Side {
        &self.bids
    }

    pub fn side(&self, kind: SideKind) -> &Side {
        match kind {
            SideKind::Asks => &self.asks,
            SideKind::Bids => &self.bids,
        }
    }

    /// One side, or `None` while the book is not ready. Analytics callers
    /// go through this so stale levels never feed a query.
    pub fn ready_side(&self, kind: SideKind) -> Option<&Side> {
        self.is_ready().then(|| self.side(kind))
    }

    /// Update ID of the last snapshot or diff applied.
    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    /// Whether a snapshot is loaded and continuity is intact.
    pub fn is_ready(&self) -> bool {
        self.status.is_ready()
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.best()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.best()
    }

    /// Average of best bid and best ask.
    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        let sum = bid.price.as_decimal().checked_add(ask.price.as_decimal())?;
        Some(sum / Decimal::TWO)
    }

    /// Best ask minus best bid.
    pub fn spread(&self) -> Option<Decimal> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        Some(ask.price.as_decimal() - bid.price.as_decimal())
    }

    /// Spread in basis points of the mid price.
    pub fn spread_bps(&self) -> Option<Decimal> {
        let spread = self.spread()?;
        let mid = self.mid_price()?;
        if mid.is_zero() {
            return None;
        }
        Some(spread / mid * Decimal::from(10_000))
    }

    /// Top `n` levels per side, best first: `(bids, asks)`.
    pub fn depth(&self, n: usize) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
        (self.bids.top(n), self.asks.top(n))
    }

    /// Whether any price currently rests on both sides.
    pub fn is_crossed(&self) -> bool {
        let (small, large) = if self.asks.count() <= self.bids.count() {
            (&self.asks, &self.bids)
        } else {
            (&self.bids, &self.asks)
        };
        small.levels().any(|level| large.contains(level.price))
    }

    /// Replace the whole book with a snapshot and mark it ready.
    ///
    /// Bids are loaded first, then asks; an ask at a price also listed as a
    /// bid evicts that bid.
    pub(crate) fn load_snapshot(
        &mut self,
        sequence: u64,
        bids: &[LevelChange],
        asks: &[LevelChange],
    ) -> ApplyReport {
        let mut report = ApplyReport::default();

        self.bids = self.build_side(SideKind::Bids, bids, &mut report);
        self.asks = self.build_side(SideKind::Asks, asks, &mut report);

        let crossed: Vec<Price> = self
            .asks
            .levels()
            .filter(|level| self.bids.contains(level.price))
            .map(|level| level.price)
            .collect();
        for price in crossed {
            warn!(symbol = %self.symbol, price = %price, "snapshot lists price on both sides, keeping ask");
            self.bids.delete(price);
            report.uncrossed += 1;
        }

        report.changed = true;
        self.last_sequence = Some(sequence);
        self.status = SyncStatus::Synced;
        report
    }

    /// Fold a diff's level changes into the book and advance the sequence.
    ///
    /// Sequence checks are the caller's job; this only applies pairs in
    /// order, skipping malformed ones.
    pub(crate) fn apply_diff(&mut self, event: &DiffEvent) -> ApplyReport {
        let mut report = ApplyReport::default();

        self.apply_changes(SideKind::Bids, &event.bid_changes, &mut report);
        self.apply_changes(SideKind::Asks, &event.ask_changes, &mut report);

        let next = self
            .last_sequence
            .map_or(event.last_sequence, |last| last.max(event.last_sequence));
        self.last_sequence = Some(next);
        report
    }

    /// Flag the contents as stale; they stay readable until replaced.
    pub(crate) fn mark_out_of_sync(&mut self) {
        if self.status == SyncStatus::Synced {
            self.status = SyncStatus::OutOfSync;
        }
    }

    /// Drop all levels. The sequence is kept so a later snapshot still has
    /// to move forward.
    pub(crate) fn clear(&mut self) {
        self.asks.clear();
        self.bids.clear();
        self.status = if self.last_sequence.is_some() {
            SyncStatus::OutOfSync
        } else {
            SyncStatus::Uninitialized
        };
    }

    fn apply_changes(&mut self, kind: SideKind, changes: &[LevelChange], report: &mut ApplyReport) {
        let (target, opposite) = match kind {
            SideKind::Asks => (&mut self.asks, &mut self.bids),
            SideKind::Bids => (&mut self.bids, &mut self.asks),
        };

        for &(price, quantity) in changes {
            match target.update(price, quantity) {
                Ok(changed) => {
                    report.applied += 1;
                    report.changed |= changed;

                    if !quantity.is_zero() {
                        if let Some(price) = Price::try_new(price) {
                            if opposite.delete(price).is_some() {
                                report.uncrossed += 1;
                                report.changed = true;
                            }
                        }
                    }
                }
                Err(e) => {
                    report.malformed += 1;
                    warn!(
                        symbol = %self.symbol,
                        side = ?kind,
                        price = %price,
                        quantity = %quantity,
                        error = %e,
                        "skipping malformed level"
                    );
                }
            }
        }
    }

    fn build_side(&self, kind: SideKind, changes: &[LevelChange], report: &mut ApplyReport) -> Side {
        let mut side = Side::new(kind);

        for &(price, quantity) in changes {
            let stored = PriceLevel::try_new(price, quantity).and_then(|level| {
                if level.quantity.is_zero() {
                    Ok(false)
                } else {
                    side.set(level.price, level.quantity)
                }
            });

            match stored {
                Ok(_) => report.applied += 1,
                Err(e) => {
                    report.malformed += 1;
                    warn!(
                        symbol = %self.symbol,
                        side = ?kind,
                        price = %price,
                        quantity = %quantity,
                        error = %e,
                        "skipping malformed snapshot level"
                    );
                }
            }
        }
        side
    }
}
