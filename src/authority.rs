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

//! Capability table and circuit breaker.
//!
//! Restricted operations consult [`AuthorityGate::require`] before touching
//! state. Nothing is implied by being the first caller or the deployer: the
//! owner handed to the ledger at construction is simply seeded with every
//! capability, and can move or share them afterwards.

use crate::LedgerError;
use crate::base::Address;
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A permission that can be granted to an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    /// Create new batches.
    MintBatch,
    /// Change base price, floor, decay and auto-adjustment parameters.
    SetPricing,
    /// Change producer share, batch size limit and housekeeping cap.
    SetPolicy,
    /// Pause and unpause trading and vault operations.
    Pause,
    /// Withdraw the platform's pending balance.
    ClaimPlatform,
    /// Sweep escrow currency not owed to anyone.
    RecoverSurplus,
    /// Grant, revoke and transfer capabilities.
    ManageAuthority,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::MintBatch,
        Capability::SetPricing,
        Capability::SetPolicy,
        Capability::Pause,
        Capability::ClaimPlatform,
        Capability::RecoverSurplus,
        Capability::ManageAuthority,
    ];
}

#[derive(Debug)]
pub struct AuthorityGate {
    grants: HashMap<Address, BTreeSet<Capability>>,
    paused: bool,
}

impl AuthorityGate {
    /// Creates a gate where `owner` holds every capability.
    pub fn new(owner: Address) -> Self {
        let mut grants = HashMap::new();
        grants.insert(owner, Capability::ALL.into_iter().collect());
        Self {
            grants,
            paused: false,
        }
    }

    pub fn has(&self, caller: Address, capability: Capability) -> bool {
        self.grants
            .get(&caller)
            .is_some_and(|caps| caps.contains(&capability))
    }

    pub fn require(&self, caller: Address, capability: Capability) -> Result<(), LedgerError> {
        if self.has(caller, capability) {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized { caller, capability })
        }
    }

    pub fn require_not_paused(&self) -> Result<(), LedgerError> {
        if self.paused {
            return Err(LedgerError::Paused);
        }
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Sets the pause flag. Returns `false` when the flag already had that value.
    pub fn set_paused(&mut self, caller: Address, paused: bool) -> Result<bool, LedgerError> {
        self.require(caller, Capability::Pause)?;
        let changed = self.paused != paused;
        self.paused = paused;
        Ok(changed)
    }

    pub fn grant(
        &mut self,
        caller: Address,
        to: Address,
        capability: Capability,
    ) -> Result<(), LedgerError> {
        self.require(caller, Capability::ManageAuthority)?;
        if !to.is_participant() {
            return Err(ValidationError::InvalidAddress(to).into());
        }
        self.grants.entry(to).or_default().insert(capability);
        Ok(())
    }

    pub fn revoke(
        &mut self,
        caller: Address,
        from: Address,
        capability: Capability,
    ) -> Result<(), LedgerError> {
        self.require(caller, Capability::ManageAuthority)?;
        if let Some(caps) = self.grants.get_mut(&from) {
            caps.remove(&capability);
            if caps.is_empty() {
                self.grants.remove(&from);
            }
        }
        Ok(())
    }

    /// Moves every capability held by `caller` to `new_owner`.
    pub fn transfer_authority(
        &mut self,
        caller: Address,
        new_owner: Address,
    ) -> Result<(), LedgerError> {
        self.require(caller, Capability::ManageAuthority)?;
        if !new_owner.is_participant() || new_owner == caller {
            return Err(ValidationError::InvalidAddress(new_owner).into());
        }
        let caps = self.grants.remove(&caller).unwrap_or_default();
        self.grants.entry(new_owner).or_default().extend(caps);
        Ok(())
    }
}
