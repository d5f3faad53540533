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

//! Batches, units and custody.
//!
//! Unit ids are assigned globally and sequentially. A batch owns a contiguous
//! run of them, and its unsold units are always the suffix
//! `unit_ids[sold..]`, so buying hands out the lowest remaining ids first.
//!
//! ```text
//!              buy                deposit              withdraw
//! Marketplace ─────► Holder(a) ─────────► Vault ─────────► Holder(a)
//!                        │
//!                        ├──transfer──► Holder(b)
//!                        └──redeem────► Holder(a), redeemed
//! ```
//!
//! Batch sale counters change only inside [`BatchInventory::take_units`].

use crate::LedgerError;
use crate::base::{Address, BatchId, Timestamp, UnitId};
use crate::error::ValidationError;
use crate::pricing::PriceAnchor;
use rust_decimal::Decimal;
use serde::Serialize;

/// Who currently holds a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "address")]
pub enum Custodian {
    /// Unsold, held by the market.
    Marketplace,
    /// Locked as loan collateral.
    Vault,
    Holder(Address),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unit {
    pub id: UnitId,
    pub batch_id: BatchId,
    pub producer: Address,
    pub unit_ref: String,
    pub redeemed: bool,
    pub custodian: Custodian,
}

#[derive(Debug, Clone)]
pub struct Batch {
    id: BatchId,
    unit_ids: Vec<UnitId>,
    anchor: PriceAnchor,
    created_at: Timestamp,
    remaining: u32,
    sold: u32,
    floor_reached: bool,
    decay_applied: bool,
}

impl Batch {
    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn unit_ids(&self) -> &[UnitId] {
        &self.unit_ids
    }

    pub fn size(&self) -> u32 {
        self.unit_ids.len() as u32
    }

    pub fn anchor(&self) -> &PriceAnchor {
        &self.anchor
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn sold(&self) -> u32 {
        self.sold
    }

    pub fn is_sold_out(&self) -> bool {
        self.remaining == 0
    }

    pub fn floor_reached(&self) -> bool {
        self.floor_reached
    }

    pub fn decay_applied(&self) -> bool {
        self.decay_applied
    }

    pub(crate) fn mark_floor_reached(&mut self) {
        self.floor_reached = true;
    }

    pub(crate) fn mark_decay_applied(&mut self) {
        self.decay_applied = true;
    }

    /// Unsold unit ids, lowest first.
    pub fn unsold(&self) -> &[UnitId] {
        &self.unit_ids[self.sold as usize..]
    }

    pub fn price_at(&self, now: Timestamp) -> Decimal {
        self.anchor.price_at(self.created_at, now)
    }

    fn assert_invariants(&self) {
        debug_assert_eq!(
            self.remaining + self.sold,
            self.size(),
            "Invariant violated: batch {} counters do not add up",
            self.id
        );
    }
}

/// Read-only snapshot of a batch, as returned by ledger queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchInfo {
    pub batch_id: BatchId,
    pub unit_ids: Vec<UnitId>,
    pub price: Decimal,
    pub remaining: u32,
    pub sold: u32,
    pub created_at: Timestamp,
    pub start_price: Decimal,
    pub floor_reached: bool,
}

/// Read-only snapshot of a unit.
pub type UnitInfo = Unit;

/// Checks a mint request before any id is allocated.
pub fn validate_new_batch(
    producers: &[Address],
    unit_refs: &[String],
    max_batch_size: usize,
    max_unit_ref_len: usize,
) -> Result<(), ValidationError> {
    if producers.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }
    if producers.len() != unit_refs.len() {
        return Err(ValidationError::LengthMismatch {
            producers: producers.len(),
            unit_refs: unit_refs.len(),
        });
    }
    if producers.len() > max_batch_size {
        return Err(ValidationError::BatchTooLarge {
            size: producers.len(),
            max: max_batch_size,
        });
    }
    if let Some(bad) = producers.iter().find(|p| !p.is_participant()) {
        return Err(ValidationError::InvalidAddress(*bad));
    }
    if let Some(long) = unit_refs.iter().find(|r| r.len() > max_unit_ref_len) {
        return Err(ValidationError::UnitRefTooLong {
            len: long.len(),
            max: max_unit_ref_len,
        });
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct BatchInventory {
    batches: Vec<Batch>,
    /// Indexed by `unit_id - 1`.
    units: Vec<Unit>,
}

impl BatchInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn batches(&self) -> impl Iterator<Item = &Batch> {
        self.batches.iter()
    }

    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter()
    }

    pub fn batch(&self, id: BatchId) -> Result<&Batch, ValidationError> {
        Self::index(id.0)
            .and_then(|i| self.batches.get(i))
            .ok_or(ValidationError::UnknownBatch(id))
    }

    pub(crate) fn batch_mut(&mut self, id: BatchId) -> Option<&mut Batch> {
        Self::index(id.0).and_then(|i| self.batches.get_mut(i))
    }

    pub fn unit(&self, id: UnitId) -> Result<&Unit, ValidationError> {
        Self::index(id.0)
            .and_then(|i| self.units.get(i))
            .ok_or(ValidationError::UnknownUnit(id))
    }

    fn unit_mut(&mut self, id: UnitId) -> Result<&mut Unit, ValidationError> {
        Self::index(id.0)
            .and_then(|i| self.units.get_mut(i))
            .ok_or(ValidationError::UnknownUnit(id))
    }

    fn index(id: u64) -> Option<usize> {
        id.checked_sub(1).map(|i| i as usize)
    }

    /// Appends a batch whose units are all held by the marketplace.
    ///
    /// Inputs must already have passed [`validate_new_batch`].
    pub fn create_batch(
        &mut self,
        producers: &[Address],
        unit_refs: Vec<String>,
        anchor: PriceAnchor,
        now: Timestamp,
    ) -> BatchId {
        let batch_id = BatchId(self.batches.len() as u64 + 1);
        let first = self.units.len() as u64 + 1;
        let mut unit_ids = Vec::with_capacity(producers.len());
        for (offset, (producer, unit_ref)) in producers.iter().zip(unit_refs).enumerate() {
            let id = UnitId(first + offset as u64);
            self.units.push(Unit {
                id,
                batch_id,
                producer: *producer,
                unit_ref,
                redeemed: false,
                custodian: Custodian::Marketplace,
            });
            unit_ids.push(id);
        }
        let size = unit_ids.len() as u32;
        let batch = Batch {
            id: batch_id,
            unit_ids,
            anchor,
            created_at: now,
            remaining: size,
            sold: 0,
            floor_reached: false,
            decay_applied: false,
        };
        batch.assert_invariants();
        self.batches.push(batch);
        batch_id
    }

    /// Checks that `quantity` units can be bought from `batch_id`.
    pub fn check_supply(&self, batch_id: BatchId, quantity: u32) -> Result<&Batch, LedgerError> {
        if quantity == 0 {
            return Err(ValidationError::ZeroQuantity.into());
        }
        let batch = self.batch(batch_id)?;
        if quantity > batch.remaining {
            return Err(LedgerError::InsufficientSupply {
                requested: quantity,
                remaining: batch.remaining,
            });
        }
        Ok(batch)
    }

    /// Moves the lowest `quantity` unsold units to `buyer`.
    ///
    /// Returns `(unit, producer)` pairs in id order.
    pub fn take_units(
        &mut self,
        batch_id: BatchId,
        quantity: u32,
        buyer: Address,
    ) -> Result<Vec<(UnitId, Address)>, LedgerError> {
        self.check_supply(batch_id, quantity)?;
        let batch = self
            .batch_mut(batch_id)
            .ok_or(ValidationError::UnknownBatch(batch_id))?;
        let start = batch.sold as usize;
        let taken: Vec<UnitId> = batch.unit_ids[start..start + quantity as usize].to_vec();
        batch.sold += quantity;
        batch.remaining -= quantity;
        batch.assert_invariants();

        let mut sold = Vec::with_capacity(taken.len());
        for id in taken {
            let unit = self.unit_mut(id)?;
            debug_assert_eq!(unit.custodian, Custodian::Marketplace);
            unit.custodian = Custodian::Holder(buyer);
            sold.push((id, unit.producer));
        }
        Ok(sold)
    }

    /// Fails unless `caller` holds every unit directly and none is redeemed.
    pub fn check_held_by(&self, unit_ids: &[UnitId], caller: Address) -> Result<(), LedgerError> {
        for id in unit_ids {
            let unit = self.unit(*id)?;
            if unit.redeemed {
                return Err(LedgerError::RedeemedUnit(*id));
            }
            if unit.custodian != Custodian::Holder(caller) {
                return Err(ValidationError::NotCustodian(*id).into());
            }
        }
        Ok(())
    }

    pub(crate) fn set_custodian(
        &mut self,
        unit_id: UnitId,
        custodian: Custodian,
    ) -> Result<(), ValidationError> {
        self.unit_mut(unit_id)?.custodian = custodian;
        Ok(())
    }

    /// Marks a held unit as redeemed. The holder keeps it; it can no longer
    /// be sold or used as collateral.
    pub fn redeem(&mut self, unit_id: UnitId, caller: Address) -> Result<(), LedgerError> {
        self.check_held_by(&[unit_id], caller)?;
        self.unit_mut(unit_id)?.redeemed = true;
        Ok(())
    }

    /// Hands a held, unredeemed unit to another participant.
    pub fn transfer(
        &mut self,
        unit_id: UnitId,
        from: Address,
        to: Address,
    ) -> Result<(), LedgerError> {
        if !to.is_participant() {
            return Err(ValidationError::InvalidAddress(to).into());
        }
        self.check_held_by(&[unit_id], from)?;
        self.set_custodian(unit_id, Custodian::Holder(to))?;
        Ok(())
    }

    pub fn info(&self, batch_id: BatchId, now: Timestamp) -> Result<BatchInfo, ValidationError> {
        let batch = self.batch(batch_id)?;
        Ok(BatchInfo {
            batch_id,
            unit_ids: batch.unit_ids.clone(),
            price: batch.price_at(now),
            remaining: batch.remaining,
            sold: batch.sold,
            created_at: batch.created_at,
            start_price: batch.anchor.start_price,
            floor_reached: batch.floor_reached,
        })
    }

    /// Batches whose counters disagree with unit custody.
    pub fn inconsistent_batches(&self) -> Vec<BatchId> {
        self.batches
            .iter()
            .filter(|batch| {
                let unsold_in_market = batch.unsold().iter().all(|id| {
                    self.unit(*id)
                        .is_ok_and(|u| u.custodian == Custodian::Marketplace && !u.redeemed)
                });
                let sold_left_market = batch.unit_ids[..batch.sold as usize].iter().all(|id| {
                    self.unit(*id)
                        .is_ok_and(|u| u.custodian != Custodian::Marketplace)
                });
                batch.remaining + batch.sold != batch.size() || !unsold_in_market || !sold_left_market
            })
            .map(|batch| batch.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::PriceEngine;
    use crate::settings::PricingConfig;

    const BUYER: Address = Address(10);

    fn inventory_with(sizes: &[usize]) -> BatchInventory {
        let anchor = PriceEngine::new(&PricingConfig::default()).anchor();
        let mut inventory = BatchInventory::new();
        for size in sizes {
            let producers: Vec<Address> = (1..=*size as u64).map(Address).collect();
            let refs = (0..*size).map(|i| format!("unit-{i}")).collect();
            inventory.create_batch(&producers, refs, anchor, Timestamp(0));
        }
        inventory
    }

    #[test]
    fn unit_ids_are_global_and_sequential() {
        let inventory = inventory_with(&[3, 2]);
        assert_eq!((inventory.batch_count(), inventory.unit_count()), (2, 5));
        let first = inventory.batch(BatchId(1)).unwrap();
        let second = inventory.batch(BatchId(2)).unwrap();
        assert_eq!(first.unit_ids(), &[UnitId(1), UnitId(2), UnitId(3)]);
        assert_eq!(second.unit_ids(), &[UnitId(4), UnitId(5)]);
        assert_eq!(inventory.unit(UnitId(4)).unwrap().batch_id, BatchId(2));
        assert_eq!(inventory.unit(UnitId(4)).unwrap().producer, Address(1));
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let inventory = inventory_with(&[1]);
        assert_eq!(
            inventory.batch(BatchId(0)).unwrap_err(),
            ValidationError::UnknownBatch(BatchId(0))
        );
        assert!(inventory.batch(BatchId(2)).is_err());
        assert!(inventory.unit(UnitId(0)).is_err());
        assert!(inventory.unit(UnitId(2)).is_err());
    }

    #[test]
    fn take_units_hands_out_lowest_ids_first() {
        let mut inventory = inventory_with(&[4]);
        let first = inventory.take_units(BatchId(1), 2, BUYER).unwrap();
        assert_eq!(
            first,
            vec![(UnitId(1), Address(1)), (UnitId(2), Address(2))]
        );
        let batch = inventory.batch(BatchId(1)).unwrap();
        assert_eq!((batch.sold(), batch.remaining()), (2, 2));
        assert_eq!(batch.unsold(), &[UnitId(3), UnitId(4)]);
        assert_eq!(
            inventory.unit(UnitId(2)).unwrap().custodian,
            Custodian::Holder(BUYER)
        );
        assert_eq!(
            inventory.unit(UnitId(3)).unwrap().custodian,
            Custodian::Marketplace
        );
    }

    #[test]
    fn take_units_checks_supply() {
        let mut inventory = inventory_with(&[2]);
        assert_eq!(
            inventory.take_units(BatchId(1), 3, BUYER),
            Err(LedgerError::InsufficientSupply {
                requested: 3,
                remaining: 2,
            })
        );
        assert_eq!(
            inventory.take_units(BatchId(1), 0, BUYER),
            Err(ValidationError::ZeroQuantity.into())
        );
        inventory.take_units(BatchId(1), 2, BUYER).unwrap();
        assert!(inventory.batch(BatchId(1)).unwrap().is_sold_out());
        assert!(inventory.take_units(BatchId(1), 1, BUYER).is_err());
    }

    #[test]
    fn redeemed_units_cannot_move() {
        let mut inventory = inventory_with(&[2]);
        inventory.take_units(BatchId(1), 1, BUYER).unwrap();
        assert!(inventory.redeem(UnitId(1), Address(11)).is_err());
        inventory.redeem(UnitId(1), BUYER).unwrap();
        assert_eq!(
            inventory.redeem(UnitId(1), BUYER),
            Err(LedgerError::RedeemedUnit(UnitId(1)))
        );
        assert_eq!(
            inventory.transfer(UnitId(1), BUYER, Address(11)),
            Err(LedgerError::RedeemedUnit(UnitId(1)))
        );
    }

    #[test]
    fn unsold_units_cannot_be_redeemed_or_transferred() {
        let mut inventory = inventory_with(&[1]);
        assert_eq!(
            inventory.redeem(UnitId(1), BUYER),
            Err(ValidationError::NotCustodian(UnitId(1)).into())
        );
        assert!(inventory.transfer(UnitId(1), BUYER, Address(11)).is_err());
    }

    #[test]
    fn transfer_moves_custody() {
        let mut inventory = inventory_with(&[1]);
        inventory.take_units(BatchId(1), 1, BUYER).unwrap();
        assert!(inventory.transfer(UnitId(1), BUYER, Address::ZERO).is_err());
        inventory.transfer(UnitId(1), BUYER, Address(11)).unwrap();
        assert_eq!(
            inventory.unit(UnitId(1)).unwrap().custodian,
            Custodian::Holder(Address(11))
        );
    }

    #[test]
    fn validate_new_batch_rules() {
        let producers = vec![Address(1), Address(2)];
        let refs = vec!["a".to_string(), "b".to_string()];
        assert!(validate_new_batch(&producers, &refs, 50, 100).is_ok());
        assert_eq!(
            validate_new_batch(&[], &[], 50, 100),
            Err(ValidationError::EmptyBatch)
        );
        assert_eq!(
            validate_new_batch(&producers, &refs[..1], 50, 100),
            Err(ValidationError::LengthMismatch {
                producers: 2,
                unit_refs: 1,
            })
        );
        assert_eq!(
            validate_new_batch(&producers, &refs, 1, 100),
            Err(ValidationError::BatchTooLarge { size: 2, max: 1 })
        );
        assert_eq!(
            validate_new_batch(&[Address::ZERO], &refs[..1], 50, 100),
            Err(ValidationError::InvalidAddress(Address::ZERO))
        );
        let long = vec!["x".repeat(101)];
        assert_eq!(
            validate_new_batch(&producers[..1], &long, 50, 100),
            Err(ValidationError::UnitRefTooLong { len: 101, max: 100 })
        );
    }

    #[test]
    fn fresh_inventory_is_consistent() {
        let mut inventory = inventory_with(&[3, 1]);
        inventory.take_units(BatchId(1), 2, BUYER).unwrap();
        assert!(inventory.inconsistent_batches().is_empty());
    }
}
