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

//! Ledger facade.
//!
//! The [`Ledger`] owns every piece of marketplace and vault state behind one
//! [`RwLock`]. Each mutating operation:
//!
//! 1. takes the write guard for its whole duration,
//! 2. checks authority, pause state and every input,
//! 3. mutates state and collects events,
//! 4. moves external currency last,
//! 5. publishes its events.
//!
//! A failure in steps 2 or 4 returns before anything was committed, so a
//! failed call has no observable effect.
//!
//! Trading lives in the `settlement` module and the collateral vault in
//! `vault`; both extend [`Ledger`] with further operations.
//!
//! # Thread Safety
//!
//! Writers are strictly sequential. Readers take the read guard and only ever
//! see committed state. Races for the same unit resolve in lock order, and
//! the loser fails its preconditions.

use crate::LedgerError;
use crate::authority::{AuthorityGate, Capability};
use crate::base::{Address, BatchId, Timestamp, UnitId};
use crate::currency::CurrencyBook;
use crate::error::ValidationError;
use crate::events::{EventLog, LedgerEvent};
use crate::inventory::{BatchInfo, BatchInventory, Custodian, UnitInfo, validate_new_batch};
use crate::payout::{CURRENCY_SCALE, PayoutAccounts};
use crate::pricing::{HousekeepingReport, PriceEngine};
use crate::settings::{
    LedgerConfig, MAX_BATCH_SIZE_LIMIT, MIN_PRODUCER_SHARE_PERCENT, MarketConfig, VaultConfig,
};
use crate::vault::{DebtToken, LoanBook};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Who is calling and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub caller: Address,
    pub now: Timestamp,
}

impl CallContext {
    pub fn new(caller: Address, now: Timestamp) -> Self {
        Self { caller, now }
    }
}

pub(crate) struct LedgerState {
    pub(crate) market: MarketConfig,
    pub(crate) vault_config: VaultConfig,
    pub(crate) authority: AuthorityGate,
    pub(crate) pricing: PriceEngine,
    pub(crate) inventory: BatchInventory,
    pub(crate) payouts: PayoutAccounts,
    pub(crate) loans: LoanBook,
    pub(crate) debt: DebtToken,
}

impl LedgerState {
    /// Runs one bounded housekeeping step and records what it did.
    pub(crate) fn housekeeping(
        &mut self,
        now: Timestamp,
        events: &mut Vec<LedgerEvent>,
    ) -> HousekeepingReport {
        let old_price = self.pricing.base_price();
        let report = self.pricing.housekeeping_step(&mut self.inventory, now);
        if report.base_price_lowered {
            info!(
                %old_price,
                new_price = %report.base_price,
                stale = report.stale_batches,
                "base price lowered"
            );
            events.push(LedgerEvent::BasePriceAdjusted {
                old_price,
                new_price: report.base_price,
            });
        }
        if !report.is_complete() {
            warn!(
                processed = report.processed,
                total = report.total,
                "price housekeeping stopped at iteration limit"
            );
            events.push(LedgerEvent::PriceHousekeepingLimitReached {
                processed: report.processed,
                total: report.total,
            });
        }
        report
    }

    fn require_pricing_admin(&self, caller: Address) -> Result<(), LedgerError> {
        self.authority.require(caller, Capability::SetPricing)?;
        self.authority.require_not_paused()
    }
}

/// Invariant check over the whole ledger.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LedgerAudit {
    /// Currency held by the escrow account.
    pub escrow_balance: Decimal,
    /// Platform pending plus every producer pending.
    pub accounted: Decimal,
    pub debt_supply: Decimal,
    pub active_loan_debt: Decimal,
    /// Batches whose counters disagree with unit custody.
    pub inconsistent_batches: Vec<BatchId>,
}

impl LedgerAudit {
    /// Escrow covers what is owed, debt matches loans, batches add up.
    pub fn holds(&self) -> bool {
        self.escrow_balance >= self.accounted
            && self.debt_supply == self.active_loan_debt
            && self.inconsistent_batches.is_empty()
    }

    /// Escrow currency not owed to anyone.
    pub fn surplus(&self) -> Decimal {
        (self.escrow_balance - self.accounted).max(Decimal::ZERO)
    }
}

/// Per-address balances, as written by the replay CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountReport {
    pub address: Address,
    pub currency: Decimal,
    pub producer_pending: Decimal,
    pub debt: Decimal,
    pub active_loans: usize,
}

impl Serialize for AccountReport {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("AccountReport", 5)?;
        state.serialize_field("address", &self.address)?;
        state.serialize_field("currency", &self.currency.round_dp(CURRENCY_SCALE))?;
        state.serialize_field(
            "producer_pending",
            &self.producer_pending.round_dp(CURRENCY_SCALE),
        )?;
        state.serialize_field("debt", &self.debt.round_dp(CURRENCY_SCALE))?;
        state.serialize_field("active_loans", &self.active_loans)?;
        state.end()
    }
}

/// Settlement core for the batch marketplace and collateral vault.
pub struct Ledger {
    pub(crate) state: RwLock<LedgerState>,
    pub(crate) currency: CurrencyBook,
    pub(crate) events: EventLog,
}

impl Ledger {
    /// Creates an empty ledger where `owner` holds every capability.
    ///
    /// The configuration is validated first; the ledger owns its currency
    /// book, so escrow holds only this ledger's funds.
    pub fn new(owner: Address, config: LedgerConfig) -> Result<Self, LedgerError> {
        config.validate()?;
        let LedgerConfig {
            pricing,
            market,
            vault,
        } = config;
        let state = LedgerState {
            pricing: PriceEngine::new(&pricing),
            debt: DebtToken::new(vault.debt_max_supply),
            market,
            vault_config: vault,
            authority: AuthorityGate::new(owner),
            inventory: BatchInventory::new(),
            payouts: PayoutAccounts::new(),
            loans: LoanBook::new(),
        };
        debug!(%owner, "ledger created");
        Ok(Self {
            state: RwLock::new(state),
            currency: CurrencyBook::new(),
            events: EventLog::new(),
        })
    }

    pub fn currency(&self) -> &CurrencyBook {
        &self.currency
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Creates a batch priced from the current base price, floor and decay.
    pub fn mint_batch(
        &self,
        ctx: CallContext,
        producers: Vec<Address>,
        unit_refs: Vec<String>,
    ) -> Result<BatchId, LedgerError> {
        let mut state = self.state.write();
        state.authority.require(ctx.caller, Capability::MintBatch)?;
        state.authority.require_not_paused()?;
        validate_new_batch(
            &producers,
            &unit_refs,
            state.market.max_batch_size,
            state.market.max_unit_ref_len,
        )?;

        let mut events = Vec::new();
        state.housekeeping(ctx.now, &mut events);
        let anchor = state.pricing.anchor();
        let batch_id = state
            .inventory
            .create_batch(&producers, unit_refs, anchor, ctx.now);
        info!(%batch_id, size = producers.len(), start_price = %anchor.start_price, "batch created");
        events.push(LedgerEvent::BatchCreated {
            batch_id,
            size: producers.len() as u32,
            start_price: anchor.start_price,
        });
        self.events.publish(events, ctx.now);
        Ok(batch_id)
    }

    /// Runs one bounded price housekeeping step. Call again while
    /// `remaining > 0` to finish the pass.
    pub fn run_price_housekeeping(&self, ctx: CallContext) -> HousekeepingReport {
        let mut state = self.state.write();
        let mut events = Vec::new();
        let report = state.housekeeping(ctx.now, &mut events);
        debug!(
            processed = report.processed,
            remaining = report.remaining,
            "price housekeeping step"
        );
        self.events.publish(events, ctx.now);
        report
    }

    pub fn current_price(&self, batch_id: BatchId, now: Timestamp) -> Result<Decimal, LedgerError> {
        Ok(self.state.read().inventory.batch(batch_id)?.price_at(now))
    }

    pub fn batch_info(&self, batch_id: BatchId, now: Timestamp) -> Result<BatchInfo, LedgerError> {
        Ok(self.state.read().inventory.info(batch_id, now)?)
    }

    pub fn unit_info(&self, unit_id: UnitId) -> Result<UnitInfo, LedgerError> {
        Ok(self.state.read().inventory.unit(unit_id)?.clone())
    }

    pub fn batch_count(&self) -> usize {
        self.state.read().inventory.batch_count()
    }

    pub fn base_price(&self) -> Decimal {
        self.state.read().pricing.base_price()
    }

    pub fn price_floor(&self) -> Decimal {
        self.state.read().pricing.price_floor()
    }

    pub fn producer_share_percent(&self) -> u8 {
        self.state.read().market.producer_share_percent
    }

    pub fn producer_pending(&self, producer: Address) -> Decimal {
        self.state.read().payouts.producer_pending(producer)
    }

    pub fn platform_pending(&self) -> Decimal {
        self.state.read().payouts.platform_pending()
    }

    pub fn total_producer_pending(&self) -> Decimal {
        let state = self.state.read();
        state.payouts.accounted() - state.payouts.platform_pending()
    }

    pub fn is_paused(&self) -> bool {
        self.state.read().authority.is_paused()
    }

    pub fn has_capability(&self, who: Address, capability: Capability) -> bool {
        self.state.read().authority.has(who, capability)
    }

    pub fn pause(&self, ctx: CallContext) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        if state.authority.set_paused(ctx.caller, true)? {
            info!(by = %ctx.caller, "ledger paused");
            self.events
                .publish(vec![LedgerEvent::Paused { by: ctx.caller }], ctx.now);
        }
        Ok(())
    }

    pub fn unpause(&self, ctx: CallContext) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        if state.authority.set_paused(ctx.caller, false)? {
            info!(by = %ctx.caller, "ledger unpaused");
            self.events
                .publish(vec![LedgerEvent::Unpaused { by: ctx.caller }], ctx.now);
        }
        Ok(())
    }

    fn parameter_changed(&self, ctx: &CallContext, parameter: &'static str, value: Decimal) {
        info!(by = %ctx.caller, parameter, %value, "parameter changed");
        self.events.publish(
            vec![LedgerEvent::PriceParameterChanged { parameter, value }],
            ctx.now,
        );
    }

    /// Start price for batches minted from now on.
    pub fn set_base_price(&self, ctx: CallContext, price: Decimal) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        state.require_pricing_admin(ctx.caller)?;
        state.pricing.set_base_price(price)?;
        self.parameter_changed(&ctx, "base_price", price);
        Ok(())
    }

    pub fn set_price_floor(&self, ctx: CallContext, floor: Decimal) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        state.require_pricing_admin(ctx.caller)?;
        state.pricing.set_price_floor(floor)?;
        self.parameter_changed(&ctx, "price_floor", floor);
        Ok(())
    }

    pub fn set_decay_rate(&self, ctx: CallContext, per_interval: Decimal) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        state.require_pricing_admin(ctx.caller)?;
        state.pricing.set_decay_rate(per_interval)?;
        self.parameter_changed(&ctx, "decay_per_interval", per_interval);
        Ok(())
    }

    pub fn set_price_adjust_delta(&self, ctx: CallContext, delta: Decimal) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        state.require_pricing_admin(ctx.caller)?;
        state.pricing.set_adjust_delta(delta)?;
        self.parameter_changed(&ctx, "price_adjust_delta", delta);
        Ok(())
    }

    pub fn set_adjust_thresholds(
        &self,
        ctx: CallContext,
        increase: u64,
        decrease: u64,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        state.require_pricing_admin(ctx.caller)?;
        state.pricing.set_thresholds(increase, decrease)?;
        self.parameter_changed(&ctx, "increase_threshold", Decimal::from(increase));
        self.parameter_changed(&ctx, "decrease_threshold", Decimal::from(decrease));
        Ok(())
    }

    pub fn set_producer_share_percent(&self, ctx: CallContext, percent: u8) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        state.authority.require(ctx.caller, Capability::SetPolicy)?;
        if !(MIN_PRODUCER_SHARE_PERCENT..=100).contains(&percent) {
            return Err(ValidationError::InvalidParameter(
                "producer share must be between 50 and 100 percent",
            )
            .into());
        }
        state.market.producer_share_percent = percent;
        self.parameter_changed(&ctx, "producer_share_percent", Decimal::from(percent));
        Ok(())
    }

    pub fn set_max_batch_size(&self, ctx: CallContext, size: usize) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        state.authority.require(ctx.caller, Capability::SetPolicy)?;
        if size == 0 || size > MAX_BATCH_SIZE_LIMIT {
            return Err(ValidationError::InvalidParameter(
                "batch size must be between 1 and 100",
            )
            .into());
        }
        state.market.max_batch_size = size;
        self.parameter_changed(&ctx, "max_batch_size", Decimal::from(size));
        Ok(())
    }

    pub fn set_max_housekeeping_iterations(
        &self,
        ctx: CallContext,
        iterations: u32,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        state.authority.require(ctx.caller, Capability::SetPolicy)?;
        state.pricing.set_max_iterations(iterations)?;
        self.parameter_changed(&ctx, "max_housekeeping_iterations", Decimal::from(iterations));
        Ok(())
    }

    pub fn grant_capability(
        &self,
        ctx: CallContext,
        to: Address,
        capability: Capability,
    ) -> Result<(), LedgerError> {
        self.state.write().authority.grant(ctx.caller, to, capability)?;
        info!(by = %ctx.caller, %to, ?capability, "capability granted");
        Ok(())
    }

    pub fn revoke_capability(
        &self,
        ctx: CallContext,
        from: Address,
        capability: Capability,
    ) -> Result<(), LedgerError> {
        self.state
            .write()
            .authority
            .revoke(ctx.caller, from, capability)?;
        info!(by = %ctx.caller, %from, ?capability, "capability revoked");
        Ok(())
    }

    /// Hands every capability the caller holds to `new_owner`.
    pub fn transfer_authority(&self, ctx: CallContext, new_owner: Address) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        state.authority.transfer_authority(ctx.caller, new_owner)?;
        info!(from = %ctx.caller, to = %new_owner, "authority transferred");
        self.events.publish(
            vec![LedgerEvent::AuthorityTransferred {
                from: ctx.caller,
                to: new_owner,
            }],
            ctx.now,
        );
        Ok(())
    }

    /// Marks a held unit as redeemed for its physical counterpart.
    pub fn redeem_unit(&self, ctx: CallContext, unit_id: UnitId) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        state.authority.require_not_paused()?;
        state.inventory.redeem(unit_id, ctx.caller)?;
        info!(holder = %ctx.caller, %unit_id, "unit redeemed");
        self.events.publish(
            vec![LedgerEvent::UnitRedeemed {
                holder: ctx.caller,
                unit_id,
            }],
            ctx.now,
        );
        Ok(())
    }

    pub fn transfer_unit(&self, ctx: CallContext, unit_id: UnitId, to: Address) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        state.authority.require_not_paused()?;
        state.inventory.transfer(unit_id, ctx.caller, to)?;
        debug!(from = %ctx.caller, %to, %unit_id, "unit transferred");
        self.events.publish(
            vec![LedgerEvent::UnitTransferred {
                from: ctx.caller,
                to,
                unit_id,
            }],
            ctx.now,
        );
        Ok(())
    }

    /// Checks escrow coverage, debt backing and batch counters in one read.
    pub fn audit(&self) -> LedgerAudit {
        let state = self.state.read();
        LedgerAudit {
            escrow_balance: self.currency.balance_of(Address::ESCROW),
            accounted: state.payouts.accounted(),
            debt_supply: state.debt.total_supply(),
            active_loan_debt: state.loans.active_debt(),
            inconsistent_batches: state.inventory.inconsistent_batches(),
        }
    }

    pub fn account_report(&self, address: Address) -> AccountReport {
        let state = self.state.read();
        AccountReport {
            address,
            currency: self.currency.balance_of(address),
            producer_pending: state.payouts.producer_pending(address),
            debt: state.debt.balance_of(address),
            active_loans: state.loans.count(address),
        }
    }

    /// Every address the ledger has recorded a balance, unit or loan for.
    pub fn known_addresses(&self) -> BTreeSet<Address> {
        let state = self.state.read();
        let mut addresses: BTreeSet<Address> = state.payouts.producers().map(|(a, _)| a).collect();
        addresses.extend(state.debt.holders());
        addresses.extend(state.inventory.units().filter_map(|unit| match unit.custodian {
            Custodian::Holder(holder) => Some(holder),
            _ => None,
        }));
        addresses.extend(self.currency.holders());
        addresses.retain(Address::is_participant);
        addresses
    }
}
