// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Dutch-auction pricing.
//!
//! A batch's unit price is a pure function of its [`PriceAnchor`] and the
//! current time:
//!
//! ```text
//! price(now) = max(floor, start_price - decay_per_interval * whole_intervals_elapsed)
//! ```
//!
//! The anchor is copied from the [`PriceEngine`] when the batch is minted, so
//! later admin changes only affect batches created afterwards.
//!
//! The engine also steers the base price handed to new batches: a batch that
//! sells out quickly nudges it up, batches left unsold for too long pull it
//! down. The downward pass walks every batch, so it runs as a bounded
//! [`PriceEngine::housekeeping_step`] that resumes from a cursor.
//!
//! # Example
//!
//! ```
//! use batch_ledger_rs::{PriceAnchor, Timestamp};
//! use rust_decimal_macros::dec;
//!
//! let anchor = PriceAnchor {
//!     start_price: dec!(230),
//!     floor: dec!(40),
//!     decay_per_interval: dec!(1),
//!     interval_secs: 86_400,
//! };
//! assert_eq!(anchor.price_at(Timestamp(0), Timestamp::from_days(3)), dec!(227));
//! assert_eq!(anchor.price_at(Timestamp(0), Timestamp::from_days(500)), dec!(40));
//! ```

use crate::base::{BatchId, Timestamp};
use crate::error::ValidationError;
use crate::inventory::BatchInventory;
use crate::settings::{MAX_HOUSEKEEPING_ITERATIONS, MAX_PRICE, PricingConfig};
use rust_decimal::Decimal;
use serde::Serialize;

/// Price parameters captured by a batch at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceAnchor {
    pub start_price: Decimal,
    pub floor: Decimal,
    pub decay_per_interval: Decimal,
    pub interval_secs: u64,
}

impl PriceAnchor {
    /// Unit price at `now` for a batch created at `created_at`.
    pub fn price_at(&self, created_at: Timestamp, now: Timestamp) -> Decimal {
        let elapsed = Decimal::from(now.intervals_since(created_at, self.interval_secs));
        let price = self
            .decay_per_interval
            .checked_mul(elapsed)
            .and_then(|decay| self.start_price.checked_sub(decay))
            .unwrap_or(self.floor);
        price.max(self.floor)
    }

    pub fn is_at_floor(&self, created_at: Timestamp, now: Timestamp) -> bool {
        self.price_at(created_at, now) <= self.floor
    }
}

/// Outcome of one bounded housekeeping step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HousekeepingReport {
    /// Batches visited by this step.
    pub processed: u64,
    /// Batches still to visit before the current pass completes.
    pub remaining: u64,
    /// Batches in existence when the step ran.
    pub total: u64,
    /// Stale unsold batches counted towards a base price decrease.
    pub stale_batches: u64,
    /// Base price after the step.
    pub base_price: Decimal,
    /// Whether the step lowered the base price.
    pub base_price_lowered: bool,
}

impl HousekeepingReport {
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

/// Global pricing parameters and base price steering.
#[derive(Debug, Clone)]
pub struct PriceEngine {
    base_price: Decimal,
    price_floor: Decimal,
    decay_per_interval: Decimal,
    interval_secs: u64,
    adjust_delta: Decimal,
    increase_threshold: u64,
    decrease_threshold: u64,
    max_iterations: u32,
    last_complete_sale: Timestamp,
    /// Next batch id the housekeeping pass will visit.
    cursor: u64,
}

impl PriceEngine {
    pub fn new(config: &PricingConfig) -> Self {
        Self {
            base_price: config.base_price,
            price_floor: config.price_floor,
            decay_per_interval: config.decay_per_interval,
            interval_secs: config.decay_interval_secs,
            adjust_delta: config.price_adjust_delta,
            increase_threshold: config.increase_threshold_intervals,
            decrease_threshold: config.decrease_threshold_intervals,
            max_iterations: config.max_housekeeping_iterations,
            last_complete_sale: Timestamp::default(),
            cursor: 1,
        }
    }

    /// Anchor that a batch minted now would capture.
    pub fn anchor(&self) -> PriceAnchor {
        PriceAnchor {
            start_price: self.base_price,
            floor: self.price_floor,
            decay_per_interval: self.decay_per_interval,
            interval_secs: self.interval_secs,
        }
    }

    pub fn base_price(&self) -> Decimal {
        self.base_price
    }

    pub fn price_floor(&self) -> Decimal {
        self.price_floor
    }

    pub fn decay_per_interval(&self) -> Decimal {
        self.decay_per_interval
    }

    pub fn adjust_delta(&self) -> Decimal {
        self.adjust_delta
    }

    pub fn thresholds(&self) -> (u64, u64) {
        (self.increase_threshold, self.decrease_threshold)
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn last_complete_sale(&self) -> Timestamp {
        self.last_complete_sale
    }

    pub fn set_base_price(&mut self, price: Decimal) -> Result<(), ValidationError> {
        if price <= Decimal::ZERO {
            return Err(ValidationError::InvalidParameter("base price must be positive"));
        }
        if price < self.price_floor {
            return Err(ValidationError::InvalidParameter(
                "base price must be at least the price floor",
            ));
        }
        if price > MAX_PRICE {
            return Err(ValidationError::InvalidParameter(
                "base price exceeds the price ceiling",
            ));
        }
        self.base_price = price;
        Ok(())
    }

    pub fn set_price_floor(&mut self, floor: Decimal) -> Result<(), ValidationError> {
        if floor <= Decimal::ZERO {
            return Err(ValidationError::InvalidParameter("price floor must be positive"));
        }
        if floor > self.base_price {
            return Err(ValidationError::InvalidParameter(
                "price floor cannot exceed the base price",
            ));
        }
        self.price_floor = floor;
        Ok(())
    }

    pub fn set_decay_rate(&mut self, decay_per_interval: Decimal) -> Result<(), ValidationError> {
        if decay_per_interval < Decimal::ZERO {
            return Err(ValidationError::InvalidParameter(
                "decay rate must not be negative",
            ));
        }
        self.decay_per_interval = decay_per_interval;
        Ok(())
    }

    pub fn set_adjust_delta(&mut self, delta: Decimal) -> Result<(), ValidationError> {
        if delta < Decimal::ZERO {
            return Err(ValidationError::InvalidParameter(
                "price adjust delta must not be negative",
            ));
        }
        self.adjust_delta = delta;
        Ok(())
    }

    pub fn set_thresholds(&mut self, increase: u64, decrease: u64) -> Result<(), ValidationError> {
        if increase == 0 || increase >= decrease {
            return Err(ValidationError::InvalidParameter(
                "thresholds must satisfy 0 < increase < decrease",
            ));
        }
        self.increase_threshold = increase;
        self.decrease_threshold = decrease;
        Ok(())
    }

    pub fn set_max_iterations(&mut self, max_iterations: u32) -> Result<(), ValidationError> {
        if max_iterations == 0 || max_iterations > MAX_HOUSEKEEPING_ITERATIONS {
            return Err(ValidationError::InvalidParameter(
                "iteration limit must be between 1 and 1000",
            ));
        }
        self.max_iterations = max_iterations;
        Ok(())
    }

    /// Records a batch selling out. Returns the new base price when the sale
    /// was quick enough to raise it. The raise saturates at [`MAX_PRICE`].
    pub fn record_sell_out(&mut self, created_at: Timestamp, now: Timestamp) -> Option<Decimal> {
        self.last_complete_sale = now;
        let age = now.intervals_since(created_at, self.interval_secs);
        if age >= self.increase_threshold || self.adjust_delta <= Decimal::ZERO {
            return None;
        }
        let raised = self
            .base_price
            .checked_add(self.adjust_delta)
            .unwrap_or(MAX_PRICE)
            .min(MAX_PRICE);
        if raised == self.base_price {
            return None;
        }
        self.base_price = raised;
        Some(raised)
    }

    /// Visits at most `max_iterations` batches starting at the cursor.
    ///
    /// Marks batches whose price reached their floor, counts stale unsold
    /// batches once each, and lowers the base price by `adjust_delta` per
    /// stale batch (never below the floor). When the last batch is visited the
    /// cursor wraps so the next call starts a fresh pass.
    pub fn housekeeping_step(
        &mut self,
        inventory: &mut BatchInventory,
        now: Timestamp,
    ) -> HousekeepingReport {
        let total = inventory.batch_count() as u64;
        if total == 0 {
            return HousekeepingReport {
                processed: 0,
                remaining: 0,
                total,
                stale_batches: 0,
                base_price: self.base_price,
                base_price_lowered: false,
            };
        }
        if self.cursor == 0 || self.cursor > total {
            self.cursor = 1;
        }

        let start = self.cursor;
        let end = total.min(start + u64::from(self.max_iterations.max(1)) - 1);
        let sales_stalled =
            now.intervals_since(self.last_complete_sale, self.interval_secs) >= self.decrease_threshold;

        let mut stale_batches = 0u64;
        for id in start..=end {
            let Some(batch) = inventory.batch_mut(BatchId(id)) else {
                continue;
            };
            if !batch.floor_reached() && batch.anchor().is_at_floor(batch.created_at(), now) {
                batch.mark_floor_reached();
            }
            let age = now.intervals_since(batch.created_at(), self.interval_secs);
            if sales_stalled
                && batch.sold() == 0
                && !batch.decay_applied()
                && age >= self.decrease_threshold
            {
                batch.mark_decay_applied();
                stale_batches += 1;
            }
        }

        let remaining = total - end;
        self.cursor = if remaining == 0 { 1 } else { end + 1 };

        let mut base_price_lowered = false;
        if stale_batches > 0 && self.adjust_delta > Decimal::ZERO {
            let lowered = self
                .adjust_delta
                .checked_mul(Decimal::from(stale_batches))
                .and_then(|drop| self.base_price.checked_sub(drop))
                .unwrap_or(self.price_floor)
                .max(self.price_floor);
            base_price_lowered = lowered != self.base_price;
            self.base_price = lowered;
        }

        HousekeepingReport {
            processed: end - start + 1,
            remaining,
            total,
            stale_batches,
            base_price: self.base_price,
            base_price_lowered,
        }
    }
}
