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

//! Collateral vault.
//!
//! A holder locks a unit and receives a flat amount of debt token. Returning
//! the same amount releases the unit. There is no interest, no price oracle
//! and no liquidation.
//!
//! ```text
//!   Holder(a) ──deposit──► Vault, Loan { a, debt_per_unit, active }, +debt to a
//!   Vault ──withdraw (a only, burns debt)──► Holder(a), Loan inactive
//! ```
//!
//! Every id in a multi-unit call is checked before anything moves, so a
//! single bad id rejects the whole call. Vault operations change custody and
//! loans only; batch sale counters are never touched.

use crate::LedgerError;
use crate::base::{Address, UnitId};
use crate::error::ValidationError;
use crate::events::LedgerEvent;
use crate::inventory::Custodian;
use crate::ledger::{CallContext, Ledger, LedgerState};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Loan {
    pub borrower: Address,
    pub amount: Decimal,
    pub active: bool,
}

/// One page of a borrower's active loans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoanPage {
    pub unit_ids: Vec<UnitId>,
    /// Cursor for the next page, `None` on the last one.
    pub next_offset: Option<u64>,
}

/// Fungible debt token minted against deposited units.
#[derive(Debug)]
pub struct DebtToken {
    balances: HashMap<Address, Decimal>,
    total_supply: Decimal,
    max_supply: Decimal,
}

impl DebtToken {
    pub fn new(max_supply: Decimal) -> Self {
        Self {
            balances: HashMap::new(),
            total_supply: Decimal::ZERO,
            max_supply,
        }
    }

    fn assert_invariants(&self) {
        debug_assert_eq!(
            self.total_supply,
            self.balances.values().copied().sum::<Decimal>(),
            "Invariant violated: debt supply out of sync with balances"
        );
        debug_assert!(
            self.total_supply <= self.max_supply,
            "Invariant violated: debt supply {} above cap {}",
            self.total_supply,
            self.max_supply
        );
    }

    pub fn balance_of(&self, holder: Address) -> Decimal {
        self.balances.get(&holder).copied().unwrap_or_default()
    }

    pub fn total_supply(&self) -> Decimal {
        self.total_supply
    }

    pub fn max_supply(&self) -> Decimal {
        self.max_supply
    }

    pub fn holders(&self) -> impl Iterator<Item = Address> + '_ {
        self.balances.keys().copied()
    }

    pub fn check_mint(&self, amount: Decimal) -> Result<(), LedgerError> {
        match self.total_supply.checked_add(amount) {
            Some(supply) if supply <= self.max_supply => Ok(()),
            _ => Err(LedgerError::DebtSupplyExceeded),
        }
    }

    pub fn check_balance(&self, holder: Address, amount: Decimal) -> Result<(), LedgerError> {
        let available = self.balance_of(holder);
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                needed: amount,
                available,
            });
        }
        Ok(())
    }

    pub fn mint(&mut self, to: Address, amount: Decimal) -> Result<(), LedgerError> {
        self.check_mint(amount)?;
        *self.balances.entry(to).or_default() += amount;
        self.total_supply += amount;
        self.assert_invariants();
        Ok(())
    }

    pub fn burn(&mut self, from: Address, amount: Decimal) -> Result<(), LedgerError> {
        self.check_balance(from, amount)?;
        if let Some(balance) = self.balances.get_mut(&from) {
            *balance -= amount;
        }
        self.total_supply -= amount;
        self.assert_invariants();
        Ok(())
    }

    pub fn transfer(&mut self, from: Address, to: Address, amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        self.check_balance(from, amount)?;
        if let Some(balance) = self.balances.get_mut(&from) {
            *balance -= amount;
        }
        *self.balances.entry(to).or_default() += amount;
        self.assert_invariants();
        Ok(())
    }
}

/// Loans by unit, indexed by borrower.
#[derive(Debug, Default)]
pub struct LoanBook {
    loans: HashMap<UnitId, Loan>,
    /// Active loan units per borrower, ascending.
    by_borrower: HashMap<Address, BTreeSet<UnitId>>,
    active: usize,
    active_debt: Decimal,
}

impl LoanBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loan(&self, unit_id: UnitId) -> Option<Loan> {
        self.loans.get(&unit_id).copied()
    }

    pub fn is_active(&self, unit_id: UnitId) -> bool {
        self.loans.get(&unit_id).is_some_and(|loan| loan.active)
    }

    pub fn total_active(&self) -> usize {
        self.active
    }

    /// Sum of active loan amounts.
    pub fn active_debt(&self) -> Decimal {
        self.active_debt
    }

    pub fn count(&self, borrower: Address) -> usize {
        self.by_borrower.get(&borrower).map_or(0, BTreeSet::len)
    }

    pub fn user_loans(&self, borrower: Address) -> Vec<UnitId> {
        self.by_borrower
            .get(&borrower)
            .map(|units| units.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Active loans of `borrower` with unit id `>= offset`, at most
    /// `min(limit, max_page)` of them.
    pub fn page(
        &self,
        borrower: Address,
        offset: u64,
        limit: usize,
        max_page: usize,
    ) -> Result<LoanPage, ValidationError> {
        if limit == 0 {
            return Err(ValidationError::ZeroPageLimit);
        }
        let limit = limit.min(max_page.max(1));
        let Some(units) = self.by_borrower.get(&borrower) else {
            return Ok(LoanPage {
                unit_ids: Vec::new(),
                next_offset: None,
            });
        };
        let mut range = units.range(UnitId(offset)..);
        let unit_ids: Vec<UnitId> = range.by_ref().take(limit).copied().collect();
        let next_offset = match (range.next(), unit_ids.last()) {
            (Some(_), Some(last)) => Some(last.0 + 1),
            _ => None,
        };
        Ok(LoanPage {
            unit_ids,
            next_offset,
        })
    }

    pub fn open(&mut self, unit_id: UnitId, borrower: Address, amount: Decimal) {
        debug_assert!(!self.is_active(unit_id));
        self.loans.insert(
            unit_id,
            Loan {
                borrower,
                amount,
                active: true,
            },
        );
        self.by_borrower.entry(borrower).or_default().insert(unit_id);
        self.active += 1;
        self.active_debt += amount;
    }

    /// Marks a loan inactive and returns it.
    pub fn close(&mut self, unit_id: UnitId) -> Result<Loan, LedgerError> {
        let loan = self
            .loans
            .get_mut(&unit_id)
            .filter(|loan| loan.active)
            .ok_or(LedgerError::NoActiveLoan(unit_id))?;
        loan.active = false;
        let closed = *loan;
        if let Some(units) = self.by_borrower.get_mut(&closed.borrower) {
            units.remove(&unit_id);
            if units.is_empty() {
                self.by_borrower.remove(&closed.borrower);
            }
        }
        self.active -= 1;
        self.active_debt -= closed.amount;
        Ok(closed)
    }
}

/// Rejects empty, oversized and repeating id lists.
fn check_unit_list(unit_ids: &[UnitId], max: usize) -> Result<(), ValidationError> {
    if unit_ids.is_empty() {
        return Err(ValidationError::NoUnits);
    }
    if unit_ids.len() > max {
        return Err(ValidationError::TooManyUnits {
            count: unit_ids.len(),
            max,
        });
    }
    let mut seen = HashSet::with_capacity(unit_ids.len());
    for id in unit_ids {
        if !seen.insert(*id) {
            return Err(ValidationError::DuplicateUnit(*id));
        }
    }
    Ok(())
}

impl LedgerState {
    fn deposit_units(
        &mut self,
        ctx: &CallContext,
        unit_ids: &[UnitId],
    ) -> Result<LedgerEvent, LedgerError> {
        self.authority.require_not_paused()?;
        check_unit_list(unit_ids, self.vault_config.max_units_per_call)?;
        for id in unit_ids {
            let unit = self.inventory.unit(*id)?;
            if unit.redeemed {
                return Err(LedgerError::RedeemedUnit(*id));
            }
            if self.loans.is_active(*id) {
                return Err(LedgerError::LoanAlreadyActive(*id));
            }
            if unit.custodian != Custodian::Holder(ctx.caller) {
                return Err(ValidationError::NotCustodian(*id).into());
            }
        }
        let per_unit = self.vault_config.debt_per_unit;
        let debt = per_unit * Decimal::from(unit_ids.len());
        self.debt.check_mint(debt)?;

        for id in unit_ids {
            self.inventory.set_custodian(*id, Custodian::Vault)?;
            self.loans.open(*id, ctx.caller, per_unit);
        }
        self.debt.mint(ctx.caller, debt)?;
        Ok(LedgerEvent::Deposited {
            borrower: ctx.caller,
            unit_ids: unit_ids.to_vec(),
            debt,
        })
    }

    fn withdraw_units(
        &mut self,
        ctx: &CallContext,
        unit_ids: &[UnitId],
    ) -> Result<LedgerEvent, LedgerError> {
        self.authority.require_not_paused()?;
        check_unit_list(unit_ids, self.vault_config.max_units_per_call)?;
        let mut debt = Decimal::ZERO;
        for id in unit_ids {
            self.inventory.unit(*id)?;
            let loan = self
                .loans
                .loan(*id)
                .filter(|loan| loan.active)
                .ok_or(LedgerError::NoActiveLoan(*id))?;
            if loan.borrower != ctx.caller {
                return Err(ValidationError::NotBorrower(*id).into());
            }
            debt += loan.amount;
        }
        self.debt.check_balance(ctx.caller, debt)?;

        self.debt.burn(ctx.caller, debt)?;
        for id in unit_ids {
            self.loans.close(*id)?;
            self.inventory
                .set_custodian(*id, Custodian::Holder(ctx.caller))?;
        }
        Ok(LedgerEvent::Withdrawn {
            borrower: ctx.caller,
            unit_ids: unit_ids.to_vec(),
            debt,
        })
    }
}

impl Ledger {
    /// Locks a held unit and mints `debt_per_unit` debt token to the caller.
    pub fn deposit(&self, ctx: CallContext, unit_id: UnitId) -> Result<(), LedgerError> {
        self.deposit_batch(ctx, &[unit_id])
    }

    /// Deposits up to `max_units_per_call` distinct units, all or nothing.
    pub fn deposit_batch(&self, ctx: CallContext, unit_ids: &[UnitId]) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        let event = state.deposit_units(&ctx, unit_ids)?;
        info!(borrower = %ctx.caller, units = unit_ids.len(), "units deposited");
        self.events.publish(vec![event], ctx.now);
        Ok(())
    }

    /// Burns the loan amount and returns the unit to its borrower.
    pub fn withdraw(&self, ctx: CallContext, unit_id: UnitId) -> Result<(), LedgerError> {
        self.withdraw_batch(ctx, &[unit_id])
    }

    /// Withdraws up to `max_units_per_call` distinct units, all or nothing.
    pub fn withdraw_batch(&self, ctx: CallContext, unit_ids: &[UnitId]) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        let event = state.withdraw_units(&ctx, unit_ids)?;
        info!(borrower = %ctx.caller, units = unit_ids.len(), "units withdrawn");
        self.events.publish(vec![event], ctx.now);
        Ok(())
    }

    /// Moves debt token so a borrower can repay with tokens from elsewhere.
    pub fn transfer_debt(
        &self,
        ctx: CallContext,
        to: Address,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        state.authority.require_not_paused()?;
        if !to.is_participant() {
            return Err(ValidationError::InvalidAddress(to).into());
        }
        state.debt.transfer(ctx.caller, to, amount)?;
        debug!(from = %ctx.caller, %to, %amount, "debt transferred");
        self.events.publish(
            vec![LedgerEvent::DebtTransferred {
                from: ctx.caller,
                to,
                amount,
            }],
            ctx.now,
        );
        Ok(())
    }

    /// Loan record for a unit, active or not.
    pub fn loan(&self, unit_id: UnitId) -> Option<Loan> {
        self.state.read().loans.loan(unit_id)
    }

    /// Every active loan of `borrower`, ascending by unit id.
    pub fn user_loans(&self, borrower: Address) -> Vec<UnitId> {
        self.state.read().loans.user_loans(borrower)
    }

    /// One page of [`Ledger::user_loans`], starting at unit id `offset`.
    pub fn user_loans_indexed(
        &self,
        borrower: Address,
        offset: u64,
        limit: usize,
    ) -> Result<LoanPage, LedgerError> {
        let state = self.state.read();
        Ok(state
            .loans
            .page(borrower, offset, limit, state.vault_config.max_loan_page)?)
    }

    pub fn user_loan_count(&self, borrower: Address) -> usize {
        self.state.read().loans.count(borrower)
    }

    pub fn total_active_loans(&self) -> usize {
        self.state.read().loans.total_active()
    }

    pub fn debt_balance(&self, holder: Address) -> Decimal {
        self.state.read().debt.balance_of(holder)
    }

    pub fn debt_supply(&self) -> Decimal {
        self.state.read().debt.total_supply()
    }
}
