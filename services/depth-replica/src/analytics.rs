//! Depth analytics
//!
//! Pure reads over a [`Side`]. Pass either a live side behind a read guard
//! or a detached copy from [`Side::filtered`]; nothing here mutates its
//! input, and every query that builds a new side returns an independent one.
//!
//! Cumulative queries walk from the best price outward and stop at the
//! first level whose inclusion would hit the limit. The reported boundary is
//! the last level taken before stopping (or, with `first_max`, the level with
//! the largest quantity among those taken), and the accumulated totals cover
//! exactly the levels taken. If even the best level hits the limit, the best
//! level is reported with zero accumulated.

use std::collections::BTreeMap;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use types::numeric::{Price, Quantity};

use crate::book::{PriceLevel, Side, SideKind};

/// Smallest and largest level under some key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinMax {
    pub min: PriceLevel,
    pub max: PriceLevel,
}

/// Result of a cumulative-threshold scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaResult {
    pub boundary: PriceLevel,
    /// Quantity accumulated over the levels taken.
    pub quantity: Decimal,
    /// Notional value accumulated over the levels taken.
    pub value: Decimal,
}

/// Stateless query functions over book sides.
pub struct AnalyticsEngine;

impl AnalyticsEngine {
    pub fn min_max_by_quantity(side: &Side) -> Option<MinMax> {
        Self::min_max_by(side, |level| level.quantity.as_decimal())
    }

    pub fn min_max_by_value(side: &Side) -> Option<MinMax> {
        Self::min_max_by(side, |level| level.value())
    }

    pub fn min_max_by_price(side: &Side) -> Option<MinMax> {
        Some(MinMax {
            min: side.first()?,
            max: side.last()?,
        })
    }

    /// Walk from the best price until cumulative quantity would reach
    /// `target`.
    pub fn summa_by_quantity(side: &Side, target: Decimal, first_max: bool) -> Option<SummaResult> {
        Self::summa_by(side, first_max, |_, quantity, _| quantity >= target)
    }

    /// Walk from the best price until cumulative notional value would reach
    /// `target`.
    pub fn summa_by_value(side: &Side, target: Decimal, first_max: bool) -> Option<SummaResult> {
        Self::summa_by(side, first_max, |_, _, value| value >= target)
    }

    /// Walk from the best price while prices stay within `threshold`
    /// (`<=` for asks, `>=` for bids).
    pub fn summa_by_price(side: &Side, threshold: Decimal, first_max: bool) -> Option<SummaResult> {
        let kind = side.kind();
        Self::summa_by(side, first_max, |level, _, _| !kind.within(level.price, threshold))
    }

    /// [`Self::summa_by_quantity`] with the target given as a percentage of
    /// the side's total quantity.
    pub fn summa_by_quantity_percent(
        side: &Side,
        percent: Decimal,
        first_max: bool,
    ) -> Option<SummaResult> {
        let target = side.summa_quantity().saturating_mul(percent / Decimal::ONE_HUNDRED);
        Self::summa_by_quantity(side, target, first_max)
    }

    /// [`Self::summa_by_value`] with the target given as a percentage of the
    /// side's total notional value.
    pub fn summa_by_value_percent(
        side: &Side,
        percent: Decimal,
        first_max: bool,
    ) -> Option<SummaResult> {
        let target = side.summa_value().saturating_mul(percent / Decimal::ONE_HUNDRED);
        Self::summa_by_value(side, target, first_max)
    }

    /// [`Self::summa_by_price`] with the threshold placed `percent` of the
    /// side's price range away from the best price.
    pub fn summa_by_price_percent(
        side: &Side,
        percent: Decimal,
        first_max: bool,
    ) -> Option<SummaResult> {
        let range = Self::min_max_by_price(side)?;
        let offset = (range.max.price.as_decimal() - range.min.price.as_decimal())
            .saturating_mul(percent / Decimal::ONE_HUNDRED);
        let best = side.best()?.price.as_decimal();

        let threshold = match side.kind() {
            SideKind::Asks => best.saturating_add(offset),
            SideKind::Bids => best.saturating_sub(offset),
        };
        Self::summa_by_price(side, threshold, first_max)
    }

    /// Levels whose quantity exceeds both price-adjacent neighbours.
    ///
    /// The lowest-priced level counts when it exceeds the next one; the
    /// highest-priced level is never reported.
    pub fn local_maxima(side: &Side) -> Side {
        Self::local_extrema(side, |current, neighbour| current > neighbour)
    }

    /// Levels whose quantity is below both price-adjacent neighbours, with
    /// the same edge rules as [`Self::local_maxima`].
    pub fn local_minima(side: &Side) -> Side {
        Self::local_extrema(side, |current, neighbour| current < neighbour)
    }

    /// Bucket prices to `significant_digits` significant figures, summing
    /// quantities per bucket.
    ///
    /// Rounds toward +inf when `round_up`, toward -inf otherwise. Levels that
    /// cannot be rounded or that land on a zero price are dropped.
    pub fn normalize(side: &Side, significant_digits: u32, round_up: bool) -> Side {
        let strategy = if round_up {
            RoundingStrategy::ToPositiveInfinity
        } else {
            RoundingStrategy::ToNegativeInfinity
        };

        let mut buckets: BTreeMap<Price, Decimal> = BTreeMap::new();
        for level in side.levels() {
            let bucket = level
                .price
                .as_decimal()
                .round_sf_with_strategy(significant_digits, strategy)
                .and_then(Price::try_new);

            if let Some(price) = bucket {
                *buckets.entry(price).or_insert(Decimal::ZERO) += level.quantity.as_decimal();
            }
        }

        Side::from_levels(
            side.kind(),
            buckets.into_iter().filter_map(|(price, quantity)| {
                Quantity::try_new(quantity).map(|quantity| PriceLevel::new(price, quantity))
            }),
        )
    }

    fn min_max_by<K, F>(side: &Side, key: F) -> Option<MinMax>
    where
        K: PartialOrd,
        F: Fn(&PriceLevel) -> K,
    {
        let mut levels = side.levels();
        let first = levels.next()?;
        let (mut min, mut max) = (first, first);

        for level in levels {
            let k = key(&level);
            if k < key(&min) {
                min = level;
            }
            if k > key(&max) {
                max = level;
            }
        }

        Some(MinMax { min, max })
    }

    fn summa_by<F>(side: &Side, first_max: bool, stop: F) -> Option<SummaResult>
    where
        F: Fn(&PriceLevel, Decimal, Decimal) -> bool,
    {
        let best = side.best()?;

        let mut quantity = Decimal::ZERO;
        let mut value = Decimal::ZERO;
        let mut last_taken: Option<PriceLevel> = None;
        let mut largest: Option<PriceLevel> = None;

        for level in side.from_best() {
            let next_quantity = quantity + level.quantity.as_decimal();
            let next_value = value + level.value();
            if stop(&level, next_quantity, next_value) {
                break;
            }

            quantity = next_quantity;
            value = next_value;
            last_taken = Some(level);
            if largest.map_or(true, |l| level.quantity > l.quantity) {
                largest = Some(level);
            }
        }

        let boundary = if first_max { largest } else { last_taken };
        Some(SummaResult {
            boundary: boundary.unwrap_or(best),
            quantity,
            value,
        })
    }

    fn local_extrema<F>(side: &Side, beats: F) -> Side
    where
        F: Fn(Quantity, Quantity) -> bool,
    {
        let levels: Vec<PriceLevel> = side.levels().collect();
        let mut found = Vec::new();

        if let [first, second, ..] = levels.as_slice() {
            if beats(first.quantity, second.quantity) {
                found.push(*first);
            }
        }

        for window in levels.windows(3) {
            let (prev, current, next) = (window[0], window[1], window[2]);
            if beats(current.quantity, prev.quantity) && beats(current.quantity, next.quantity) {
                found.push(current);
            }
        }

        Side::from_levels(side.kind(), found)
    }
}
