//! Point-in-time exports of a replica
//!
//! A [`FullSnapshot`] is a detached, versioned and checksummed copy of a
//! book. Two replicas fed the same snapshot and diffs produce the same
//! checksum, which makes it the cheap way to compare them. A snapshot can
//! also be turned back into a [`DepthSnapshot`] so one replica can seed
//! another.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use types::ids::MarketId;

use crate::book::{OrderBook, PriceLevel, SyncStatus};
use crate::events::{DepthSnapshot, DiffEvent, LevelChange};

/// A versioned, checksummed snapshot of the full book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullSnapshot {
    /// Monotonic snapshot version.
    pub version: u64,
    pub symbol: MarketId,
    pub status: SyncStatus,
    /// Bid levels in descending price order (best first).
    pub bids: Vec<PriceLevel>,
    /// Ask levels in ascending price order (best first).
    pub asks: Vec<PriceLevel>,
    /// Sequence the book was at when captured.
    pub last_sequence: Option<u64>,
    /// Unix nanoseconds when the snapshot was taken.
    pub timestamp: i64,
    /// SHA-256 over levels and sequence.
    pub checksum: String,
}

impl FullSnapshot {
    /// Whether `event` continues directly from this snapshot.
    pub fn chains_with(&self, event: &DiffEvent) -> bool {
        match self.last_sequence {
            Some(seq) => !event.is_stale(seq) && !event.has_gap_after(seq),
            None => false,
        }
    }

    /// Wire form, for seeding another replica. `None` if the book had never
    /// been loaded.
    pub fn to_depth_snapshot(&self) -> Option<DepthSnapshot> {
        let raw = |levels: &[PriceLevel]| -> Vec<LevelChange> {
            levels
                .iter()
                .map(|l| (l.price.as_decimal(), l.quantity.as_decimal()))
                .collect()
        };
        Some(DepthSnapshot {
            sequence: self.last_sequence?,
            bids: raw(&self.bids),
            asks: raw(&self.asks),
        })
    }
}

/// A page of a deep book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginatedSnapshot {
    pub symbol: MarketId,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub last_sequence: Option<u64>,
    pub page: usize,
    pub page_size: usize,
    pub total_bid_levels: usize,
    pub total_ask_levels: usize,
    pub has_more: bool,
}

/// Builds versioned snapshots from a book.
pub struct SnapshotBuilder {
    version_counter: u64,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self { version_counter: 0 }
    }

    /// Capture the book now.
    pub fn build_full(&mut self, book: &OrderBook) -> FullSnapshot {
        let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        self.build_full_at(book, timestamp)
    }

    /// Capture the book with an explicit timestamp.
    pub fn build_full_at(&mut self, book: &OrderBook, timestamp: i64) -> FullSnapshot {
        self.version_counter += 1;

        let bids: Vec<PriceLevel> = book.bids().from_best().collect();
        let asks: Vec<PriceLevel> = book.asks().from_best().collect();
        let last_sequence = book.last_sequence();
        let checksum = compute_checksum(&bids, &asks, last_sequence);

        FullSnapshot {
            version: self.version_counter,
            symbol: book.symbol().clone(),
            status: book.status(),
            bids,
            asks,
            last_sequence,
            timestamp,
            checksum,
        }
    }

    pub fn build_paginated(&self, book: &OrderBook, page: usize, page_size: usize) -> PaginatedSnapshot {
        let offset = page.saturating_mul(page_size);

        let bids: Vec<PriceLevel> = book.bids().from_best().skip(offset).take(page_size).collect();
        let asks: Vec<PriceLevel> = book.asks().from_best().skip(offset).take(page_size).collect();

        let total_bid_levels = book.bids().count();
        let total_ask_levels = book.asks().count();
        let max_total = std::cmp::max(total_bid_levels, total_ask_levels);
        let has_more = offset.saturating_add(page_size) < max_total;

        PaginatedSnapshot {
            symbol: book.symbol().clone(),
            bids,
            asks,
            last_sequence: book.last_sequence(),
            page,
            page_size,
            total_bid_levels,
            total_ask_levels,
            has_more,
        }
    }

    pub fn current_version(&self) -> u64 {
        self.version_counter
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 over the levels and sequence.
///
/// Decimals are normalized first so `1.50` and `1.5` hash the same.
fn compute_checksum(bids: &[PriceLevel], asks: &[PriceLevel], sequence: Option<u64>) -> String {
    let mut hasher = Sha256::new();

    for levels in [bids, asks] {
        for level in levels {
            hasher.update(level.price.as_decimal().normalize().to_string().as_bytes());
            hasher.update(b":");
            hasher.update(level.quantity.as_decimal().normalize().to_string().as_bytes());
            hasher.update(b"|");
        }
        hasher.update(b"---");
    }

    match sequence {
        Some(seq) => hasher.update(seq.to_le_bytes()),
        None => hasher.update(b"none"),
    }

    format!("{:x}", hasher.finalize())
}

/// Verify that a snapshot's checksum matches its content.
pub fn verify_snapshot_integrity(snapshot: &FullSnapshot) -> bool {
    snapshot.checksum == compute_checksum(&snapshot.bids, &snapshot.asks, snapshot.last_sequence)
}
