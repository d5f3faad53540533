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

//! Purchases and claims.
//!
//! # Purchase
//!
//! | Step | Effect |
//! |------|--------|
//! | Validate | caller, batch, pause, quantity, supply, slippage |
//! | Split | platform share and per-unit producer credits are computed |
//! | Pull | exact total moves from buyer to escrow |
//! | Credit | the split accrues to pending balances |
//! | Assign | lowest unsold units move to the buyer |
//! | Adjust | a quick sell-out raises the base price |
//! | Housekeeping | one bounded step |
//!
//! Producers are never paid during a sale. A producer whose wallet refuses
//! transfers cannot block buyers; the credit simply waits to be claimed.
//!
//! # Claims
//!
//! A claim zeroes the pending balance before pushing currency out. If the push
//! is refused the balance is restored and the claim fails as a whole.

use crate::LedgerError;
use crate::authority::Capability;
use crate::base::{Address, BatchId, UnitId};
use crate::error::ValidationError;
use crate::events::LedgerEvent;
use crate::ledger::{CallContext, Ledger};
use crate::payout::RevenueSplit;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

impl Ledger {
    /// Buys `quantity` units of a batch at the current price.
    ///
    /// Fails with [`LedgerError::SlippageExceeded`] when the total would be
    /// above `max_total_price`. Returns the purchased unit ids, lowest first.
    pub fn buy(
        &self,
        ctx: CallContext,
        batch_id: BatchId,
        max_total_price: Decimal,
        quantity: u32,
    ) -> Result<Vec<UnitId>, LedgerError> {
        let mut state = self.state.write();
        if !ctx.caller.is_participant() {
            return Err(ValidationError::InvalidAddress(ctx.caller).into());
        }
        state.inventory.batch(batch_id)?;
        state.authority.require_not_paused()?;
        let batch = state.inventory.check_supply(batch_id, quantity)?;

        let unit_price = batch.price_at(ctx.now);
        let created_at = batch.created_at();
        let total = unit_price
            .checked_mul(Decimal::from(quantity))
            .ok_or(ValidationError::InvalidParameter("purchase total overflows"))?;
        if total > max_total_price {
            return Err(LedgerError::SlippageExceeded {
                total,
                max_total: max_total_price,
            });
        }

        let split = RevenueSplit::compute(total, quantity, state.market.producer_share_percent)?;

        // Nothing has changed yet, so a failed pull needs no rollback
        self.currency.pull(ctx.caller, total)?;

        let sold = state.inventory.take_units(batch_id, quantity, ctx.caller)?;

        let mut events = Vec::with_capacity(sold.len() + 3);
        events.push(LedgerEvent::Purchase {
            buyer: ctx.caller,
            batch_id,
            quantity,
            total,
        });
        state.payouts.credit_platform(split.platform);
        for (index, (unit_id, producer)) in sold.iter().enumerate() {
            let amount = split.unit_credit(index);
            state.payouts.credit_producer(*producer, amount);
            events.push(LedgerEvent::ProducerPaymentAccrued {
                producer: *producer,
                unit_id: *unit_id,
                amount,
            });
        }

        if state.inventory.batch(batch_id)?.is_sold_out() {
            let old_price = state.pricing.base_price();
            if let Some(new_price) = state.pricing.record_sell_out(created_at, ctx.now) {
                info!(%batch_id, %old_price, %new_price, "quick sell-out raised base price");
                events.push(LedgerEvent::BasePriceAdjusted {
                    old_price,
                    new_price,
                });
            }
        }
        state.housekeeping(ctx.now, &mut events);

        info!(buyer = %ctx.caller, %batch_id, quantity, %total, "purchase settled");
        self.events.publish(events, ctx.now);
        Ok(sold.into_iter().map(|(unit_id, _)| unit_id).collect())
    }

    /// Pays the caller's accrued producer balance out of escrow.
    pub fn claim_producer(&self, ctx: CallContext) -> Result<Decimal, LedgerError> {
        let mut state = self.state.write();
        let amount = state.payouts.take_producer(ctx.caller)?;
        if let Err(error) = self.currency.push(ctx.caller, amount) {
            state.payouts.restore_producer(ctx.caller, amount);
            warn!(producer = %ctx.caller, %amount, %error, "producer claim transfer rejected");
            return Err(error);
        }
        info!(producer = %ctx.caller, %amount, "producer payment claimed");
        self.events.publish(
            vec![LedgerEvent::ProducerPaymentClaimed {
                producer: ctx.caller,
                amount,
            }],
            ctx.now,
        );
        Ok(amount)
    }

    /// Pays the platform's accrued share to `recipient`.
    pub fn claim_platform(&self, ctx: CallContext, recipient: Address) -> Result<Decimal, LedgerError> {
        let mut state = self.state.write();
        state.authority.require(ctx.caller, Capability::ClaimPlatform)?;
        if !recipient.is_participant() {
            return Err(ValidationError::InvalidAddress(recipient).into());
        }
        let amount = state.payouts.take_platform()?;
        if let Err(error) = self.currency.push(recipient, amount) {
            state.payouts.restore_platform(amount);
            warn!(%recipient, %amount, %error, "platform claim transfer rejected");
            return Err(error);
        }
        info!(by = %ctx.caller, %recipient, %amount, "platform funds claimed");
        self.events.publish(
            vec![LedgerEvent::PlatformFundsClaimed {
                to: recipient,
                amount,
            }],
            ctx.now,
        );
        Ok(amount)
    }

    /// Sends escrow currency that no pending balance accounts for to `recipient`.
    pub fn recover_surplus(&self, ctx: CallContext, recipient: Address) -> Result<Decimal, LedgerError> {
        let state = self.state.write();
        state.authority.require(ctx.caller, Capability::RecoverSurplus)?;
        if !recipient.is_participant() {
            return Err(ValidationError::InvalidAddress(recipient).into());
        }
        let escrow = self.currency.balance_of(Address::ESCROW);
        let surplus = escrow - state.payouts.accounted();
        if surplus <= Decimal::ZERO {
            return Err(ValidationError::NoSurplus.into());
        }
        self.currency.push(recipient, surplus)?;
        info!(by = %ctx.caller, %recipient, %surplus, "surplus recovered");
        debug!(%escrow, remaining = %(escrow - surplus), "escrow after recovery");
        self.events.publish(
            vec![LedgerEvent::SurplusRecovered {
                to: recipient,
                amount: surplus,
            }],
            ctx.now,
        );
        Ok(surplus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::Timestamp;
    use crate::settings::LedgerConfig;
    use rust_decimal_macros::dec;

    const OWNER: Address = Address(1);
    const PRODUCER: Address = Address(5);
    const BUYER: Address = Address(10);

    fn funded_ledger() -> (Ledger, BatchId) {
        let ledger = Ledger::new(OWNER, LedgerConfig::default()).unwrap();
        let batch = ledger
            .mint_batch(
                CallContext::new(OWNER, Timestamp(0)),
                vec![PRODUCER; 3],
                vec!["a".into(), "b".into(), "c".into()],
            )
            .unwrap();
        ledger.currency().mint(BUYER, dec!(10_000)).unwrap();
        ledger.currency().approve(BUYER, dec!(10_000));
        (ledger, batch)
    }

    #[test]
    fn buy_at_start_price_splits_revenue() {
        let (ledger, batch) = funded_ledger();
        let units = ledger
            .buy(CallContext::new(BUYER, Timestamp(0)), batch, dec!(230), 1)
            .unwrap();
        assert_eq!(units, vec![UnitId(1)]);
        assert_eq!(ledger.producer_pending(PRODUCER), dec!(161));
        assert_eq!(ledger.platform_pending(), dec!(69));
        assert_eq!(ledger.currency().balance_of(BUYER), dec!(9_770));
        assert!(ledger.audit().holds());
    }

    #[test]
    fn slippage_guard_rejects_without_side_effects() {
        let (ledger, batch) = funded_ledger();
        let result = ledger.buy(CallContext::new(BUYER, Timestamp(0)), batch, dec!(229), 1);
        assert_eq!(
            result,
            Err(LedgerError::SlippageExceeded {
                total: dec!(230),
                max_total: dec!(229),
            })
        );
        assert_eq!(ledger.currency().balance_of(BUYER), dec!(10_000));
        assert_eq!(ledger.batch_info(batch, Timestamp(0)).unwrap().remaining, 3);
    }

    #[test]
    fn zero_caller_cannot_buy() {
        let (ledger, batch) = funded_ledger();
        assert_eq!(
            ledger.buy(CallContext::new(Address::ZERO, Timestamp(0)), batch, dec!(230), 1),
            Err(ValidationError::InvalidAddress(Address::ZERO).into())
        );
    }

    #[test]
    fn unknown_batch_is_reported_before_pause() {
        let (ledger, _) = funded_ledger();
        ledger.pause(CallContext::new(OWNER, Timestamp(0))).unwrap();
        assert_eq!(
            ledger.buy(CallContext::new(BUYER, Timestamp(0)), BatchId(9), dec!(230), 1),
            Err(ValidationError::UnknownBatch(BatchId(9)).into())
        );
    }

    #[test]
    fn claim_twice_fails_second_time() {
        let (ledger, batch) = funded_ledger();
        ledger
            .buy(CallContext::new(BUYER, Timestamp(0)), batch, dec!(230), 1)
            .unwrap();
        let claim = CallContext::new(PRODUCER, Timestamp(1));
        assert_eq!(ledger.claim_producer(claim), Ok(dec!(161)));
        assert_eq!(ledger.claim_producer(claim), Err(LedgerError::ZeroBalanceClaim));
        assert_eq!(ledger.currency().balance_of(PRODUCER), dec!(161));
    }

    #[test]
    fn surplus_excludes_accounted_funds() {
        let (ledger, batch) = funded_ledger();
        ledger
            .buy(CallContext::new(BUYER, Timestamp(0)), batch, dec!(230), 1)
            .unwrap();
        let admin = CallContext::new(OWNER, Timestamp(0));
        assert_eq!(
            ledger.recover_surplus(admin, OWNER),
            Err(ValidationError::NoSurplus.into())
        );

        ledger
            .currency()
            .transfer(BUYER, Address::ESCROW, dec!(15))
            .unwrap();
        assert_eq!(ledger.recover_surplus(admin, OWNER), Ok(dec!(15)));
        assert_eq!(ledger.audit().escrow_balance, dec!(230));
    }
}
