//! Wire types exchanged with venue adapters
//!
//! A depth feed delivers one full [`DepthSnapshot`] followed by an ordered
//! stream of [`DiffEvent`]s. Each diff covers the inclusive update range
//! `[first_sequence, last_sequence]`; consecutive diffs chain when the next
//! one starts at or before `last_sequence + 1`.
//!
//! Levels travel as `["price","quantity"]` string pairs, the layout most
//! venues use. Values are not validated here: a bad pair is rejected when it
//! is applied to a side, without failing the rest of the message.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One raw `(price, quantity)` change. Quantity zero removes the level.
pub type LevelChange = (Decimal, Decimal);

/// Full point-in-time book state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    /// Update ID the snapshot is consistent with.
    pub sequence: u64,
    pub bids: Vec<LevelChange>,
    pub asks: Vec<LevelChange>,
}

impl DepthSnapshot {
    /// Parse a snapshot from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Total number of levels carried on both sides.
    pub fn level_count(&self) -> usize {
        self.bids.len() + self.asks.len()
    }
}

/// Incremental set of level changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEvent {
    /// First update ID covered by this event.
    pub first_sequence: u64,
    /// Last update ID covered by this event.
    pub last_sequence: u64,
    #[serde(default)]
    pub bid_changes: Vec<LevelChange>,
    #[serde(default)]
    pub ask_changes: Vec<LevelChange>,
}

impl DiffEvent {
    /// Parse a diff event from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Number of level changes carried on both sides.
    pub fn change_count(&self) -> usize {
        self.bid_changes.len() + self.ask_changes.len()
    }

    /// Whether this event is entirely at or before `sequence`.
    pub fn is_stale(&self, sequence: u64) -> bool {
        self.last_sequence <= sequence
    }

    /// Whether this event leaves a hole after `sequence`.
    pub fn has_gap_after(&self, sequence: u64) -> bool {
        self.first_sequence > sequence.saturating_add(1)
    }
}
