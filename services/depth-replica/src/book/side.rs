//! One side of the book (asks or bids)
//!
//! Levels are stored in a `BTreeMap` keyed by price, ascending for both
//! sides. Which end is "best" depends on the side kind: the lowest ask and
//! the highest bid. Count, summed quantity and summed notional value are
//! kept up to date on every mutation by applying the delta between the old
//! and the new level, so reading them never scans the map. New totals are
//! computed with checked arithmetic before a level is stored; a level that
//! would push them out of `Decimal` range is refused and the side is left
//! as it was.

use std::collections::BTreeMap;

use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};
use types::errors::LevelError;
use types::numeric::{Price, Quantity};

use super::price_level::PriceLevel;

/// Which side of the book a [`Side`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SideKind {
    /// Sell orders; best = lowest price.
    Asks,
    /// Buy orders; best = highest price.
    Bids,
}

impl SideKind {
    /// Whether `price` lies between the best price and `threshold`
    /// (inclusive), scanning outward from the best price.
    pub fn within(self, price: Price, threshold: Decimal) -> bool {
        match self {
            SideKind::Asks => price.as_decimal() <= threshold,
            SideKind::Bids => price.as_decimal() >= threshold,
        }
    }
}

/// Ordered, unique-by-price collection of levels with cached aggregates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Side {
    kind: SideKind,
    levels: BTreeMap<Price, Quantity>,
    summa_quantity: Decimal,
    summa_value: Decimal,
}

impl Side {
    /// Create an empty side.
    pub fn new(kind: SideKind) -> Self {
        Self {
            kind,
            levels: BTreeMap::new(),
            summa_quantity: Decimal::ZERO,
            summa_value: Decimal::ZERO,
        }
    }

    /// Build a side from an externally supplied set of levels.
    ///
    /// Zero-quantity levels are skipped; a repeated price keeps the last
    /// quantity given. Levels that would overflow the totals are dropped;
    /// callers that need to know use [`Side::set`] directly.
    pub fn from_levels(kind: SideKind, levels: impl IntoIterator<Item = PriceLevel>) -> Self {
        let mut side = Self::new(kind);
        for level in levels {
            if !level.quantity.is_zero() {
                side.set(level.price, level.quantity).ok();
            }
        }
        side
    }

    pub fn kind(&self) -> SideKind {
        self.kind
    }

    /// Insert or replace the level at `price`.
    ///
    /// A zero quantity deletes the level. Returns whether the stored state
    /// changed, or `ValueOverflow` (side untouched) if the level's value or
    /// the new totals are out of range.
    pub fn set(&mut self, price: Price, quantity: Quantity) -> Result<bool, LevelError> {
        if quantity.is_zero() {
            return Ok(self.delete(price).is_some());
        }

        let value = PriceLevel::new(price, quantity).checked_value()?;
        let (old_quantity, old_value) = match self.levels.get(&price) {
            Some(old) if *old == quantity => return Ok(false),
            Some(old) => (old.as_decimal(), PriceLevel::new(price, *old).value()),
            None => (Decimal::ZERO, Decimal::ZERO),
        };

        let overflow = || LevelError::ValueOverflow(format!("side totals at price {}", price));
        let summa_quantity = (self.summa_quantity - old_quantity)
            .checked_add(quantity.as_decimal())
            .ok_or_else(overflow)?;
        let summa_value = (self.summa_value - old_value)
            .checked_add(value)
            .ok_or_else(overflow)?;

        self.levels.insert(price, quantity);
        self.summa_quantity = summa_quantity;
        self.summa_value = summa_value;
        Ok(true)
    }

    /// Remove the level at `price`, returning its quantity if it existed.
    pub fn delete(&mut self, price: Price) -> Option<Quantity> {
        let removed = self.levels.remove(&price)?;
        self.subtract(price, removed);
        Some(removed)
    }

    /// Apply one raw diff pair: zero quantity deletes, anything else sets.
    ///
    /// Returns whether the side changed. A malformed pair leaves the side
    /// untouched.
    pub fn update(&mut self, price: Decimal, quantity: Decimal) -> Result<bool, LevelError> {
        let level = PriceLevel::try_new(price, quantity)?;
        self.set(level.price, level.quantity)
    }

    /// Look up the level at `price`.
    pub fn get(&self, price: Price) -> Option<PriceLevel> {
        self.levels
            .get(&price)
            .map(|quantity| PriceLevel::new(price, *quantity))
    }

    pub fn contains(&self, price: Price) -> bool {
        self.levels.contains_key(&price)
    }

    /// Number of stored levels.
    pub fn count(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Sum of quantity across all levels.
    pub fn summa_quantity(&self) -> Decimal {
        self.summa_quantity
    }

    /// Sum of notional value (price * quantity) across all levels.
    pub fn summa_value(&self) -> Decimal {
        self.summa_value
    }

    /// Mean quantity per level, `None` on an empty side.
    pub fn middle_quantity(&self) -> Option<Decimal> {
        if self.levels.is_empty() {
            return None;
        }
        Some(self.summa_quantity / Decimal::from(self.levels.len()))
    }

    /// Population standard deviation of level quantities. `None` on an
    /// empty side or when the squared deviations leave `Decimal` range.
    pub fn standard_deviation(&self) -> Option<Decimal> {
        let mean = self.middle_quantity()?;
        let mut squares = Decimal::ZERO;
        for quantity in self.levels.values() {
            let diff = quantity.as_decimal() - mean;
            squares = squares.checked_add(diff.checked_mul(diff)?)?;
        }
        (squares / Decimal::from(self.levels.len())).sqrt()
    }

    /// Independent copy holding only the levels matching `predicate`.
    ///
    /// The copy owns its own map and aggregates; mutating either side
    /// afterwards never affects the other.
    pub fn filtered<F>(&self, predicate: F) -> Side
    where
        F: Fn(&PriceLevel) -> bool,
    {
        Side::from_levels(self.kind, self.levels().filter(|level| predicate(level)))
    }

    /// Delete every level priced at or above `price`.
    pub fn restrict_up(&mut self, price: Price) -> usize {
        let removed = self.levels.split_off(&price);
        for (p, q) in &removed {
            self.subtract(*p, *q);
        }
        removed.len()
    }

    /// Delete every level priced at or below `price`.
    pub fn restrict_down(&mut self, price: Price) -> usize {
        let mut upper = self.levels.split_off(&price);
        let at_price = upper.remove(&price);
        let lower = std::mem::replace(&mut self.levels, upper);

        let mut removed = 0;
        for (p, q) in lower.into_iter().chain(at_price.map(|q| (price, q))) {
            self.subtract(p, q);
            removed += 1;
        }
        removed
    }

    /// Drop all levels and reset aggregates.
    pub fn clear(&mut self) {
        self.levels.clear();
        self.summa_quantity = Decimal::ZERO;
        self.summa_value = Decimal::ZERO;
    }

    /// Best level: lowest ask or highest bid.
    pub fn best(&self) -> Option<PriceLevel> {
        match self.kind {
            SideKind::Asks => self.first(),
            SideKind::Bids => self.last(),
        }
    }

    /// Level with the lowest price.
    pub fn first(&self) -> Option<PriceLevel> {
        self.levels
            .iter()
            .next()
            .map(|(price, quantity)| PriceLevel::new(*price, *quantity))
    }

    /// Level with the highest price.
    pub fn last(&self) -> Option<PriceLevel> {
        self.levels
            .iter()
            .next_back()
            .map(|(price, quantity)| PriceLevel::new(*price, *quantity))
    }

    /// All levels in ascending price order.
    pub fn levels(&self) -> impl DoubleEndedIterator<Item = PriceLevel> + '_ {
        self.levels
            .iter()
            .map(|(price, quantity)| PriceLevel::new(*price, *quantity))
    }

    /// All levels starting at the best price and moving away from it.
    pub fn from_best(&self) -> Box<dyn Iterator<Item = PriceLevel> + '_> {
        match self.kind {
            SideKind::Asks => Box::new(self.levels()),
            SideKind::Bids => Box::new(self.levels().rev()),
        }
    }

    /// Top `n` levels from the best price outward.
    pub fn top(&self, n: usize) -> Vec<PriceLevel> {
        self.from_best().take(n).collect()
    }

    // Stored levels passed the checks in `set`, so their value is in range
    // and never exceeds the running total.
    fn subtract(&mut self, price: Price, quantity: Quantity) {
        self.summa_quantity -= quantity.as_decimal();
        self.summa_value -= PriceLevel::new(price, quantity).value();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn price(value: Decimal) -> Price {
        Price::try_new(value).unwrap()
    }

    fn qty(value: Decimal) -> Quantity {
        Quantity::try_new(value).unwrap()
    }

    fn asks(levels: &[(Decimal, Decimal)]) -> Side {
        Side::from_levels(
            SideKind::Asks,
            levels
                .iter()
                .map(|(p, q)| PriceLevel::try_new(*p, *q).unwrap()),
        )
    }

    #[test]
    fn test_set_inserts_and_replaces() {
        let mut side = Side::new(SideKind::Asks);

        assert!(side.set(price(dec!(101)), qty(dec!(2))).unwrap());
        assert!(side.set(price(dec!(102)), qty(dec!(3))).unwrap());
        assert_eq!(side.count(), 2);
        assert_eq!(side.summa_quantity(), dec!(5));
        assert_eq!(side.summa_value(), dec!(508));

        // Replace: aggregates move by the delta only
        assert!(side.set(price(dec!(101)), qty(dec!(1))).unwrap());
        assert_eq!(side.count(), 2);
        assert_eq!(side.summa_quantity(), dec!(4));
        assert_eq!(side.summa_value(), dec!(407));
    }

    #[test]
    fn test_set_same_value_reports_no_change() {
        let mut side = Side::new(SideKind::Bids);
        side.set(price(dec!(100)), qty(dec!(1.5))).unwrap();
        assert!(!side.set(price(dec!(100)), qty(dec!(1.50))).unwrap());
    }

    #[test]
    fn test_set_zero_deletes() {
        let mut side = Side::new(SideKind::Bids);
        side.set(price(dec!(100)), qty(dec!(1))).unwrap();

        assert!(side.set(price(dec!(100)), Quantity::ZERO).unwrap());
        assert!(side.is_empty());
        assert_eq!(side.summa_quantity(), Decimal::ZERO);
        assert_eq!(side.summa_value(), Decimal::ZERO);

        // Deleting an absent level is a no-op
        assert!(!side.set(price(dec!(100)), Quantity::ZERO).unwrap());
    }

    #[test]
    fn test_overflowing_totals_leave_side_untouched() {
        // Each level fits on its own; the two together exceed Decimal::MAX
        let big = Decimal::MAX / Decimal::from(2) + Decimal::TEN;
        let mut side = Side::new(SideKind::Asks);
        assert!(side.set(price(big), qty(dec!(1))).unwrap());

        let err = side.set(price(big - dec!(1)), qty(dec!(1))).unwrap_err();
        assert!(matches!(err, LevelError::ValueOverflow(_)));
        assert_eq!(side.count(), 1);
        assert_eq!(side.summa_quantity(), dec!(1));
        assert_eq!(side.summa_value(), big);

        // Growing the existing level is refused the same way
        let err = side.set(price(big), qty(dec!(3))).unwrap_err();
        assert!(matches!(err, LevelError::ValueOverflow(_)));
        assert_eq!(side.get(price(big)).unwrap().quantity, qty(dec!(1)));

        // Shrinking it still works
        assert!(side.set(price(big), qty(dec!(0.5))).unwrap());
        assert_eq!(side.summa_quantity(), dec!(0.5));
    }

    #[test]
    fn test_std_dev_out_of_range_is_none() {
        let huge = Decimal::from(100_000_000_000_000_000u64);
        let side = Side::from_levels(
            SideKind::Bids,
            [
                PriceLevel::try_new(dec!(0.0000000001), huge).unwrap(),
                PriceLevel::try_new(dec!(0.0000000002), dec!(1)).unwrap(),
            ],
        );
        assert_eq!(side.count(), 2);
        assert!(side.standard_deviation().is_none());
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let mut side = asks(&[(dec!(101), dec!(1))]);
        assert!(side.delete(price(dec!(999))).is_none());
        assert_eq!(side.count(), 1);
        assert_eq!(side.summa_quantity(), dec!(1));
    }

    #[test]
    fn test_update_rejects_malformed_pair() {
        let mut side = asks(&[(dec!(101), dec!(1))]);

        let err = side.update(dec!(-5), dec!(1)).unwrap_err();
        assert!(matches!(err, LevelError::InvalidPrice(_)));

        let err = side.update(dec!(101), dec!(-1)).unwrap_err();
        assert!(matches!(err, LevelError::InvalidQuantity(_)));

        assert_eq!(side.get(price(dec!(101))).unwrap().quantity, qty(dec!(1)));
    }

    #[test]
    fn test_update_returns_changed() {
        let mut side = Side::new(SideKind::Asks);
        assert!(side.update(dec!(101), dec!(1)).unwrap());
        assert!(!side.update(dec!(101), dec!(1)).unwrap());
        assert!(side.update(dec!(101), dec!(0)).unwrap());
        assert!(!side.update(dec!(101), dec!(0)).unwrap());
    }

    #[test]
    fn test_best_depends_on_kind() {
        let levels = [(dec!(100), dec!(1)), (dec!(105), dec!(2)), (dec!(110), dec!(3))];
        let ask_side = asks(&levels);
        let bid_side = Side::from_levels(
            SideKind::Bids,
            ask_side.levels().collect::<Vec<_>>(),
        );

        assert_eq!(ask_side.best().unwrap().price, price(dec!(100)));
        assert_eq!(bid_side.best().unwrap().price, price(dec!(110)));

        let bid_prices: Vec<_> = bid_side.from_best().map(|l| l.price.as_decimal()).collect();
        assert_eq!(bid_prices, vec![dec!(110), dec!(105), dec!(100)]);
    }

    #[test]
    fn test_from_levels_skips_zero_quantity() {
        let side = asks(&[(dec!(100), dec!(1)), (dec!(101), dec!(0))]);
        assert_eq!(side.count(), 1);
        assert_eq!(side.summa_quantity(), dec!(1));
    }

    #[test]
    fn test_middle_quantity_and_std_dev() {
        let side = asks(&[
            (dec!(100), dec!(2)),
            (dec!(101), dec!(4)),
            (dec!(102), dec!(4)),
            (dec!(103), dec!(4)),
            (dec!(104), dec!(5)),
            (dec!(105), dec!(5)),
            (dec!(106), dec!(7)),
            (dec!(107), dec!(9)),
        ]);

        assert_eq!(side.middle_quantity(), Some(dec!(5)));
        let std_dev = side.standard_deviation().unwrap();
        assert!((std_dev - dec!(2)).abs() < dec!(0.000001), "std dev was {}", std_dev);
        assert!(Side::new(SideKind::Asks).standard_deviation().is_none());
    }

    #[test]
    fn test_filtered_is_independent_copy() {
        let mut side = asks(&[(dec!(100), dec!(1)), (dec!(101), dec!(2)), (dec!(102), dec!(3))]);

        let mut near = side.filtered(|level| level.price.as_decimal() <= dec!(101));
        assert_eq!(near.count(), 2);
        assert_eq!(near.summa_quantity(), dec!(3));
        assert_eq!(near.kind(), SideKind::Asks);

        near.set(price(dec!(100)), qty(dec!(50))).unwrap();
        side.delete(price(dec!(101)));

        assert_eq!(side.get(price(dec!(100))).unwrap().quantity, qty(dec!(1)));
        assert_eq!(side.summa_quantity(), dec!(4));
        assert!(near.contains(price(dec!(101))));
        assert_eq!(near.summa_quantity(), dec!(52));
    }

    #[test]
    fn test_restrict_up() {
        let mut side = asks(&[(dec!(100), dec!(1)), (dec!(101), dec!(2)), (dec!(102), dec!(3))]);

        assert_eq!(side.restrict_up(price(dec!(101))), 2);
        assert_eq!(side.count(), 1);
        assert_eq!(side.summa_quantity(), dec!(1));
        assert_eq!(side.summa_value(), dec!(100));
    }

    #[test]
    fn test_restrict_down() {
        let mut side = asks(&[(dec!(100), dec!(1)), (dec!(101), dec!(2)), (dec!(102), dec!(3))]);

        assert_eq!(side.restrict_down(price(dec!(101))), 2);
        assert_eq!(side.count(), 1);
        assert_eq!(side.first().unwrap().price, price(dec!(102)));
        assert_eq!(side.summa_quantity(), dec!(3));
        assert_eq!(side.summa_value(), dec!(306));

        // Bound between levels removes nothing at the bound itself
        let mut side = asks(&[(dec!(100), dec!(1)), (dec!(102), dec!(3))]);
        assert_eq!(side.restrict_down(price(dec!(101))), 1);
        assert_eq!(side.count(), 1);
    }

    #[test]
    fn test_top_levels() {
        let side = asks(&[(dec!(100), dec!(1)), (dec!(101), dec!(2)), (dec!(102), dec!(3))]);
        let top = side.top(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].price, price(dec!(100)));
        assert_eq!(top[1].price, price(dec!(101)));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Set(u32, u32),
            Update(u32, u32),
            Delete(u32),
            RestrictUp(u32),
            RestrictDown(u32),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                4 => (1u32..40, 0u32..500).prop_map(|(p, q)| Op::Set(p, q)),
                4 => (1u32..40, 0u32..500).prop_map(|(p, q)| Op::Update(p, q)),
                2 => (1u32..40).prop_map(Op::Delete),
                1 => (1u32..40).prop_map(Op::RestrictUp),
                1 => (1u32..40).prop_map(Op::RestrictDown),
            ]
        }

        fn p(raw: u32) -> Price {
            Price::try_new(Decimal::new(raw as i64 * 25, 1)).unwrap()
        }

        fn q(raw: u32) -> Quantity {
            Quantity::try_new(Decimal::new(raw as i64, 2)).unwrap()
        }

        proptest! {
            #[test]
            fn prop_aggregates_match_stored_levels(ops in prop::collection::vec(op(), 0..200)) {
                let mut side = Side::new(SideKind::Bids);

                for op in ops {
                    match op {
                        Op::Set(price, quantity) => { side.set(p(price), q(quantity)).unwrap(); }
                        Op::Update(price, quantity) => {
                            side.update(p(price).as_decimal(), q(quantity).as_decimal()).unwrap();
                        }
                        Op::Delete(price) => { side.delete(p(price)); }
                        Op::RestrictUp(price) => { side.restrict_up(p(price)); }
                        Op::RestrictDown(price) => { side.restrict_down(p(price)); }
                    }
                }

                let levels: Vec<PriceLevel> = side.levels().collect();
                let true_quantity: Decimal = levels.iter().map(|l| l.quantity.as_decimal()).sum();
                let true_value: Decimal = levels.iter().map(|l| l.value()).sum();

                prop_assert_eq!(side.count(), levels.len());
                prop_assert_eq!(side.summa_quantity(), true_quantity);
                prop_assert_eq!(side.summa_value(), true_value);
                prop_assert!(levels.iter().all(|l| !l.quantity.is_zero()));
            }
        }
    }
}
