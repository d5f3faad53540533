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

//! Pull-payment accounts and revenue splitting.
//!
//! Sales never pay anyone directly. Proceeds are credited to pending balances
//! here and leave escrow only when the beneficiary claims them.
//!
//! ```text
//! credit ──► pending ──take──► 0 ──push ok──► claimed
//!                               │
//!                               └──push rejected──► restore ──► pending
//! ```
//!
//! # Example
//!
//! ```
//! use batch_ledger_rs::RevenueSplit;
//! use rust_decimal_macros::dec;
//!
//! let split = RevenueSplit::compute(dec!(100), 3, 70).unwrap();
//! assert_eq!(split.platform, dec!(30));
//! assert_eq!(split.per_unit, dec!(23.333333));
//! assert_eq!(split.remainder, dec!(0.000001));
//! ```

use crate::LedgerError;
use crate::base::Address;
use crate::error::ValidationError;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;

/// Fractional digits kept by currency amounts.
pub const CURRENCY_SCALE: u32 = 6;

/// Truncates toward zero at [`CURRENCY_SCALE`].
pub fn truncate(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::ToZero)
}

/// How one purchase total is divided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevenueSplit {
    pub total: Decimal,
    pub platform: Decimal,
    pub producer_share: Decimal,
    /// Credited to the producer of every purchased unit.
    pub per_unit: Decimal,
    /// Truncation dust, credited on top to the first purchased unit's producer.
    pub remainder: Decimal,
}

impl RevenueSplit {
    /// Splits `total` across `quantity` units; `quantity` must be at least 1.
    ///
    /// Fails instead of overflowing, so callers can split before moving any
    /// currency.
    pub fn compute(
        total: Decimal,
        quantity: u32,
        producer_share_percent: u8,
    ) -> Result<Self, LedgerError> {
        let overflow = || ValidationError::InvalidParameter("purchase total overflows");
        let platform_percent = Decimal::from(100 - producer_share_percent.min(100));
        let platform = total
            .checked_mul(platform_percent)
            .and_then(|scaled| scaled.checked_div(Decimal::ONE_HUNDRED))
            .map(truncate)
            .ok_or_else(overflow)?;
        let producer_share = total.checked_sub(platform).ok_or_else(overflow)?;
        let quantity = Decimal::from(quantity.max(1));
        let per_unit = producer_share
            .checked_div(quantity)
            .map(truncate)
            .ok_or_else(overflow)?;
        let remainder = per_unit
            .checked_mul(quantity)
            .and_then(|paid| producer_share.checked_sub(paid))
            .ok_or_else(overflow)?;
        debug_assert!(
            remainder >= Decimal::ZERO,
            "Invariant violated: negative split remainder {}",
            remainder
        );
        Ok(Self {
            total,
            platform,
            producer_share,
            per_unit,
            remainder,
        })
    }

    /// Credit for the `index`-th purchased unit.
    pub fn unit_credit(&self, index: usize) -> Decimal {
        if index == 0 {
            self.per_unit + self.remainder
        } else {
            self.per_unit
        }
    }
}

/// Pending balances owed out of escrow.
#[derive(Debug, Default)]
pub struct PayoutAccounts {
    producers: HashMap<Address, Decimal>,
    producers_total: Decimal,
    platform: Decimal,
}

impl PayoutAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.platform >= Decimal::ZERO,
            "Invariant violated: platform balance went negative: {}",
            self.platform
        );
        debug_assert_eq!(
            self.producers_total,
            self.producers.values().copied().sum::<Decimal>(),
            "Invariant violated: producer total out of sync"
        );
    }

    pub fn producer_pending(&self, producer: Address) -> Decimal {
        self.producers.get(&producer).copied().unwrap_or_default()
    }

    pub fn platform_pending(&self) -> Decimal {
        self.platform
    }

    /// Sum of every pending balance; the escrow must always cover it.
    pub fn accounted(&self) -> Decimal {
        self.producers_total + self.platform
    }

    pub fn producers(&self) -> impl Iterator<Item = (Address, Decimal)> + '_ {
        self.producers.iter().map(|(addr, amount)| (*addr, *amount))
    }

    pub fn credit_producer(&mut self, producer: Address, amount: Decimal) {
        if amount <= Decimal::ZERO {
            return;
        }
        *self.producers.entry(producer).or_default() += amount;
        self.producers_total += amount;
        self.assert_invariants();
    }

    pub fn credit_platform(&mut self, amount: Decimal) {
        self.platform += amount.max(Decimal::ZERO);
        self.assert_invariants();
    }

    /// Zeroes and returns a producer's pending balance.
    pub fn take_producer(&mut self, producer: Address) -> Result<Decimal, LedgerError> {
        match self.producers.remove(&producer) {
            Some(amount) if amount > Decimal::ZERO => {
                self.producers_total -= amount;
                self.assert_invariants();
                Ok(amount)
            }
            _ => Err(LedgerError::ZeroBalanceClaim),
        }
    }

    /// Puts back an amount taken by a claim whose transfer failed.
    pub fn restore_producer(&mut self, producer: Address, amount: Decimal) {
        self.credit_producer(producer, amount);
    }

    pub fn take_platform(&mut self) -> Result<Decimal, LedgerError> {
        if self.platform <= Decimal::ZERO {
            return Err(LedgerError::ZeroBalanceClaim);
        }
        let amount = std::mem::take(&mut self.platform);
        self.assert_invariants();
        Ok(amount)
    }

    pub fn restore_platform(&mut self, amount: Decimal) {
        self.credit_platform(amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn split_single_unit_at_start_price() {
        let split = RevenueSplit::compute(dec!(230), 1, 70).unwrap();
        assert_eq!(split.platform, dec!(69));
        assert_eq!(split.producer_share, dec!(161));
        assert_eq!(split.per_unit, dec!(161));
        assert_eq!(split.remainder, Decimal::ZERO);
    }

    #[test]
    fn split_remainder_goes_to_first_unit() {
        let split = RevenueSplit::compute(dec!(100), 3, 70).unwrap();
        assert_eq!(split.unit_credit(0), dec!(23.333334));
        assert_eq!(split.unit_credit(1), dec!(23.333333));
        assert_eq!(split.unit_credit(2), dec!(23.333333));
        let credited: Decimal = (0..3).map(|i| split.unit_credit(i)).sum();
        assert_eq!(credited + split.platform, dec!(100));
    }

    #[test]
    fn split_truncates_platform_toward_zero() {
        let split = RevenueSplit::compute(dec!(0.000001), 1, 70).unwrap();
        assert_eq!(split.platform, Decimal::ZERO);
        assert_eq!(split.per_unit, dec!(0.000001));
    }

    #[test]
    fn full_producer_share_leaves_platform_empty() {
        let split = RevenueSplit::compute(dec!(57), 2, 100).unwrap();
        assert_eq!(split.platform, Decimal::ZERO);
        assert_eq!(split.per_unit, dec!(28.5));
    }

    #[test]
    fn split_reports_overflow_instead_of_panicking() {
        assert_eq!(
            RevenueSplit::compute(Decimal::MAX, 1, 70),
            Err(ValidationError::InvalidParameter("purchase total overflows").into())
        );
        let split = RevenueSplit::compute(Decimal::MAX, 1, 100).unwrap();
        assert_eq!(split.per_unit, Decimal::MAX);
    }

    #[test]
    fn credits_accumulate_and_claims_zero() {
        let mut accounts = PayoutAccounts::new();
        accounts.credit_producer(Address(1), dec!(10));
        accounts.credit_producer(Address(1), dec!(5));
        accounts.credit_platform(dec!(3));
        assert_eq!(accounts.producer_pending(Address(1)), dec!(15));
        assert_eq!(accounts.accounted(), dec!(18));

        assert_eq!(accounts.take_producer(Address(1)), Ok(dec!(15)));
        assert_eq!(accounts.producer_pending(Address(1)), Decimal::ZERO);
        assert_eq!(
            accounts.take_producer(Address(1)),
            Err(LedgerError::ZeroBalanceClaim)
        );
        assert_eq!(accounts.accounted(), dec!(3));
    }

    #[test]
    fn restore_undoes_take() {
        let mut accounts = PayoutAccounts::new();
        accounts.credit_platform(dec!(7));
        let amount = accounts.take_platform().unwrap();
        assert_eq!(accounts.platform_pending(), Decimal::ZERO);
        assert_eq!(accounts.take_platform(), Err(LedgerError::ZeroBalanceClaim));
        accounts.restore_platform(amount);
        assert_eq!(accounts.platform_pending(), dec!(7));
    }

    #[test]
    fn unknown_producer_has_nothing_pending() {
        let mut accounts = PayoutAccounts::new();
        assert_eq!(accounts.producer_pending(Address(9)), Decimal::ZERO);
        assert_eq!(
            accounts.take_producer(Address(9)),
            Err(LedgerError::ZeroBalanceClaim)
        );
    }
}
