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

//! Capability and pause integration tests.

use batch_ledger_rs::{
    Address, BatchId, CallContext, Capability, Ledger, LedgerConfig, LedgerError, LedgerEvent,
    Timestamp, UnitId, ValidationError,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const OWNER: Address = Address(1);
const MINTER: Address = Address(2);
const SUCCESSOR: Address = Address(3);
const PRODUCER: Address = Address(5);
const BUYER: Address = Address(10);

fn at(caller: Address) -> CallContext {
    CallContext::new(caller, Timestamp(0))
}

fn unauthorized(caller: Address, capability: Capability) -> Result<(), LedgerError> {
    Err(LedgerError::Unauthorized { caller, capability })
}

/// Ledger with a three-unit batch, two units bought and one of them deposited.
fn active_ledger() -> Ledger {
    let ledger = Ledger::new(OWNER, LedgerConfig::default()).unwrap();
    ledger.currency().mint(BUYER, dec!(10_000)).unwrap();
    ledger.currency().approve(BUYER, Decimal::MAX);
    let batch = ledger
        .mint_batch(at(OWNER), vec![PRODUCER; 3], vec!["a".into(), "b".into(), "c".into()])
        .unwrap();
    ledger.buy(at(BUYER), batch, dec!(460), 2).unwrap();
    ledger.deposit(at(BUYER), UnitId(2)).unwrap();
    ledger
}

// ============================================================================
// Capabilities
// ============================================================================

#[test]
fn owner_starts_with_every_capability() {
    let ledger = Ledger::new(OWNER, LedgerConfig::default()).unwrap();
    for capability in Capability::ALL {
        assert!(ledger.has_capability(OWNER, capability));
        assert!(!ledger.has_capability(MINTER, capability));
    }
}

#[test]
fn restricted_operations_reject_strangers() {
    let ledger = active_ledger();
    let stranger = at(BUYER);

    assert_eq!(
        ledger.mint_batch(stranger, vec![PRODUCER], vec!["x".into()]).map(|_| ()),
        unauthorized(BUYER, Capability::MintBatch)
    );
    assert_eq!(
        ledger.set_base_price(stranger, dec!(300)),
        unauthorized(BUYER, Capability::SetPricing)
    );
    assert_eq!(
        ledger.set_price_floor(stranger, dec!(50)),
        unauthorized(BUYER, Capability::SetPricing)
    );
    assert_eq!(
        ledger.set_decay_rate(stranger, dec!(2)),
        unauthorized(BUYER, Capability::SetPricing)
    );
    assert_eq!(
        ledger.set_producer_share_percent(stranger, 80),
        unauthorized(BUYER, Capability::SetPolicy)
    );
    assert_eq!(ledger.pause(stranger), unauthorized(BUYER, Capability::Pause));
    assert_eq!(
        ledger.claim_platform(stranger, BUYER).map(|_| ()),
        unauthorized(BUYER, Capability::ClaimPlatform)
    );
    assert_eq!(
        ledger.grant_capability(stranger, BUYER, Capability::MintBatch),
        unauthorized(BUYER, Capability::ManageAuthority)
    );
    assert_eq!(
        ledger.transfer_authority(stranger, BUYER),
        unauthorized(BUYER, Capability::ManageAuthority)
    );
}

#[test]
fn granted_capability_can_be_used_and_revoked() {
    let ledger = Ledger::new(OWNER, LedgerConfig::default()).unwrap();
    ledger
        .grant_capability(at(OWNER), MINTER, Capability::MintBatch)
        .unwrap();

    ledger
        .mint_batch(at(MINTER), vec![PRODUCER], vec!["x".into()])
        .unwrap();
    assert!(!ledger.has_capability(MINTER, Capability::SetPricing));

    ledger
        .revoke_capability(at(OWNER), MINTER, Capability::MintBatch)
        .unwrap();
    assert_eq!(
        ledger
            .mint_batch(at(MINTER), vec![PRODUCER], vec!["y".into()])
            .map(|_| ()),
        unauthorized(MINTER, Capability::MintBatch)
    );
    assert_eq!(ledger.batch_count(), 1);
}

#[test]
fn capability_cannot_be_granted_to_zero_address() {
    let ledger = Ledger::new(OWNER, LedgerConfig::default()).unwrap();
    assert_eq!(
        ledger.grant_capability(at(OWNER), Address::ZERO, Capability::Pause),
        Err(ValidationError::InvalidAddress(Address::ZERO).into())
    );
}

#[test]
fn transfer_authority_moves_all_capabilities() {
    let ledger = Ledger::new(OWNER, LedgerConfig::default()).unwrap();
    ledger.events().drain();
    ledger.transfer_authority(at(OWNER), SUCCESSOR).unwrap();

    for capability in Capability::ALL {
        assert!(ledger.has_capability(SUCCESSOR, capability));
        assert!(!ledger.has_capability(OWNER, capability));
    }
    assert_eq!(
        ledger.pause(at(OWNER)),
        unauthorized(OWNER, Capability::Pause)
    );
    ledger.pause(at(SUCCESSOR)).unwrap();

    let events: Vec<LedgerEvent> = ledger.events().drain().into_iter().map(|r| r.event).collect();
    assert_eq!(
        events,
        vec![
            LedgerEvent::AuthorityTransferred {
                from: OWNER,
                to: SUCCESSOR,
            },
            LedgerEvent::Paused { by: SUCCESSOR },
        ]
    );
}

#[test]
fn transfer_authority_rejects_zero_and_self() {
    let ledger = Ledger::new(OWNER, LedgerConfig::default()).unwrap();
    assert!(ledger.transfer_authority(at(OWNER), Address::ZERO).is_err());
    assert!(ledger.transfer_authority(at(OWNER), OWNER).is_err());
    assert!(ledger.has_capability(OWNER, Capability::ManageAuthority));
}

#[test]
fn policy_setters_validate_ranges() {
    let ledger = Ledger::new(OWNER, LedgerConfig::default()).unwrap();
    assert!(ledger.set_producer_share_percent(at(OWNER), 49).is_err());
    assert!(ledger.set_producer_share_percent(at(OWNER), 101).is_err());
    ledger.set_producer_share_percent(at(OWNER), 100).unwrap();
    assert_eq!(ledger.producer_share_percent(), 100);

    assert!(ledger.set_max_batch_size(at(OWNER), 0).is_err());
    assert!(ledger.set_max_batch_size(at(OWNER), 101).is_err());
    ledger.set_max_batch_size(at(OWNER), 2).unwrap();
    assert_eq!(
        ledger
            .mint_batch(at(OWNER), vec![PRODUCER; 3], vec!["a".into(), "b".into(), "c".into()])
            .map(|_| ()),
        Err(ValidationError::BatchTooLarge { size: 3, max: 2 }.into())
    );

    assert!(ledger.set_max_housekeeping_iterations(at(OWNER), 0).is_err());
    assert!(ledger.set_max_housekeeping_iterations(at(OWNER), 1_001).is_err());
    ledger.set_max_housekeeping_iterations(at(OWNER), 1_000).unwrap();
}

#[test]
fn pricing_setters_validate_against_each_other() {
    let ledger = Ledger::new(OWNER, LedgerConfig::default()).unwrap();
    assert!(ledger.set_price_floor(at(OWNER), dec!(231)).is_err());
    assert!(ledger.set_price_floor(at(OWNER), Decimal::ZERO).is_err());
    assert!(ledger.set_base_price(at(OWNER), dec!(39)).is_err());
    assert!(ledger.set_decay_rate(at(OWNER), dec!(-1)).is_err());
    assert!(ledger.set_adjust_thresholds(at(OWNER), 4, 2).is_err());
    assert!(ledger.set_adjust_thresholds(at(OWNER), 0, 2).is_err());

    ledger.set_adjust_thresholds(at(OWNER), 1, 3).unwrap();
    ledger.set_price_adjust_delta(at(OWNER), dec!(5)).unwrap();
    assert_eq!(ledger.base_price(), dec!(230));
    assert_eq!(ledger.price_floor(), dec!(40));
}

// ============================================================================
// Pause
// ============================================================================

#[test]
fn pause_blocks_state_changing_operations() {
    let ledger = active_ledger();
    ledger.pause(at(OWNER)).unwrap();
    assert!(ledger.is_paused());

    let paused = Err(LedgerError::Paused);
    assert_eq!(
        ledger
            .mint_batch(at(OWNER), vec![PRODUCER], vec!["x".into()])
            .map(|_| ()),
        paused
    );
    assert_eq!(
        ledger
            .buy(at(BUYER), BatchId(1), dec!(1_000), 1)
            .map(|_| ()),
        paused
    );
    assert_eq!(ledger.deposit(at(BUYER), UnitId(1)), paused);
    assert_eq!(ledger.withdraw(at(BUYER), UnitId(2)), paused);
    assert_eq!(ledger.transfer_debt(at(BUYER), OWNER, dec!(1)), paused);
    assert_eq!(ledger.redeem_unit(at(BUYER), UnitId(1)), paused);
    assert_eq!(ledger.transfer_unit(at(BUYER), UnitId(1), OWNER), paused);
    assert_eq!(ledger.set_base_price(at(OWNER), dec!(300)), paused);
    assert_eq!(ledger.set_price_floor(at(OWNER), dec!(50)), paused);
    assert_eq!(ledger.set_decay_rate(at(OWNER), dec!(2)), paused);
    assert_eq!(ledger.set_price_adjust_delta(at(OWNER), dec!(2)), paused);
    assert_eq!(ledger.set_adjust_thresholds(at(OWNER), 1, 3), paused);
}

#[test]
fn pause_leaves_reads_claims_and_policy_open() {
    let ledger = active_ledger();
    ledger.pause(at(OWNER)).unwrap();

    assert_eq!(ledger.current_price(BatchId(1), Timestamp(0)), Ok(dec!(230)));
    assert_eq!(ledger.user_loans(BUYER), vec![UnitId(2)]);
    assert_eq!(ledger.debt_balance(BUYER), dec!(20));

    assert_eq!(ledger.claim_producer(at(PRODUCER)), Ok(dec!(322)));
    assert_eq!(ledger.claim_platform(at(OWNER), OWNER), Ok(dec!(138)));
    ledger.set_producer_share_percent(at(OWNER), 80).unwrap();
    let report = ledger.run_price_housekeeping(at(BUYER));
    assert!(report.is_complete());
    assert!(ledger.audit().holds());
}

#[test]
fn pause_and_unpause_emit_only_on_change() {
    let ledger = Ledger::new(OWNER, LedgerConfig::default()).unwrap();
    ledger.events().drain();

    ledger.pause(at(OWNER)).unwrap();
    ledger.pause(at(OWNER)).unwrap();
    ledger.unpause(at(OWNER)).unwrap();
    ledger.unpause(at(OWNER)).unwrap();

    let events: Vec<LedgerEvent> = ledger.events().drain().into_iter().map(|r| r.event).collect();
    assert_eq!(
        events,
        vec![
            LedgerEvent::Paused { by: OWNER },
            LedgerEvent::Unpaused { by: OWNER },
        ]
    );
    assert!(!ledger.is_paused());
}
