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

//! Payment currency balances.
//!
//! Stands in for the external fungible token the marketplace is paid in.
//! Buyers approve the ledger's escrow account, the ledger pulls the exact
//! purchase total on a buy and pushes funds back out on claims.
//!
//! Balances live in [`DashMap`]s so participants can be funded from many
//! threads while the ledger itself is running.

use crate::LedgerError;
use crate::base::Address;
use crate::error::ValidationError;
use dashmap::{DashMap, DashSet};
use rust_decimal::Decimal;

#[derive(Debug, Default)]
pub struct CurrencyBook {
    balances: DashMap<Address, Decimal>,
    /// Amount each owner lets the escrow pull.
    allowances: DashMap<Address, Decimal>,
    /// Recipients that refuse incoming transfers.
    frozen: DashSet<Address>,
}

impl CurrencyBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, owner: Address) -> Decimal {
        self.balances.get(&owner).map(|b| *b).unwrap_or_default()
    }

    pub fn allowance(&self, owner: Address) -> Decimal {
        self.allowances.get(&owner).map(|a| *a).unwrap_or_default()
    }

    /// Addresses with a recorded balance, escrow included.
    pub fn holders(&self) -> Vec<Address> {
        self.balances.iter().map(|entry| *entry.key()).collect()
    }

    pub fn total_supply(&self) -> Decimal {
        self.balances.iter().map(|entry| *entry.value()).sum()
    }

    /// Creates currency out of thin air for `to`.
    pub fn mint(&self, to: Address, amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        let mut balance = self.balances.entry(to).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or(ValidationError::InvalidParameter("balance overflows"))?;
        Ok(())
    }

    /// Sets how much the escrow may pull from `owner`. `Decimal::MAX` never runs down.
    pub fn approve(&self, owner: Address, amount: Decimal) {
        self.allowances.insert(owner, amount.max(Decimal::ZERO));
    }

    /// Makes `who` reject every incoming transfer.
    pub fn freeze(&self, who: Address) {
        self.frozen.insert(who);
    }

    pub fn unfreeze(&self, who: Address) {
        self.frozen.remove(&who);
    }

    pub fn is_frozen(&self, who: Address) -> bool {
        self.frozen.contains(&who)
    }

    pub fn transfer(&self, from: Address, to: Address, amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        if self.is_frozen(to) {
            return Err(LedgerError::TransferRejected(to));
        }
        self.debit(from, amount)?;
        *self.balances.entry(to).or_default() += amount;
        Ok(())
    }

    /// Moves `amount` from `from` into escrow, consuming allowance.
    pub fn pull(&self, from: Address, amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        let mut allowance = self.allowances.entry(from).or_default();
        if *allowance < amount {
            return Err(LedgerError::InsufficientFunds {
                needed: amount,
                available: *allowance,
            });
        }
        self.debit(from, amount)?;
        if *allowance != Decimal::MAX {
            *allowance -= amount;
        }
        drop(allowance);
        *self.balances.entry(Address::ESCROW).or_default() += amount;
        Ok(())
    }

    /// Pays `amount` out of escrow.
    pub fn push(&self, to: Address, amount: Decimal) -> Result<(), LedgerError> {
        self.transfer(Address::ESCROW, to, amount)
    }

    fn debit(&self, from: Address, amount: Decimal) -> Result<(), LedgerError> {
        let mut balance = self.balances.entry(from).or_default();
        if *balance < amount {
            return Err(LedgerError::InsufficientFunds {
                needed: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        Ok(())
    }
}
