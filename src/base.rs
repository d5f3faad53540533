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

//! Core identifier types for participants, batches, units and time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a participant (buyer, producer, borrower, admin).
///
/// `Address::ZERO` is never a valid participant. `Address::ESCROW` is the
/// ledger's own currency account and cannot act as a caller either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Address(pub u64);

impl Address {
    pub const ZERO: Address = Address(0);
    pub const ESCROW: Address = Address(u64::MAX);

    /// Returns `true` for addresses that can call operations and receive funds.
    pub fn is_participant(&self) -> bool {
        *self != Self::ZERO && *self != Self::ESCROW
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::ESCROW => write!(f, "escrow"),
            Self(id) => write!(f, "{}", id),
        }
    }
}

/// Unique identifier for a batch. Assigned sequentially starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a unit. Assigned globally and sequentially starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct UnitId(pub u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical time in seconds, supplied by the execution environment.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const SECONDS_PER_DAY: u64 = 86_400;

    /// Seconds elapsed since `earlier`, zero if `earlier` is in the future.
    pub fn seconds_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Whole `interval`-second periods elapsed since `earlier`.
    pub fn intervals_since(&self, earlier: Timestamp, interval: u64) -> u64 {
        if interval == 0 {
            return 0;
        }
        self.seconds_since(earlier) / interval
    }

    pub fn from_days(days: u64) -> Self {
        Timestamp(days * Self::SECONDS_PER_DAY)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_addresses_are_not_participants() {
        assert!(!Address::ZERO.is_participant());
        assert!(!Address::ESCROW.is_participant());
        assert!(Address(7).is_participant());
    }

    #[test]
    fn intervals_round_down_and_saturate() {
        let created = Timestamp(1_000);
        assert_eq!(Timestamp(1_000 + 86_399).intervals_since(created, 86_400), 0);
        assert_eq!(Timestamp(1_000 + 86_400).intervals_since(created, 86_400), 1);
        assert_eq!(Timestamp(10).intervals_since(created, 86_400), 0);
        assert_eq!(Timestamp(5_000).intervals_since(created, 0), 0);
    }

    #[test]
    fn escrow_displays_by_name() {
        assert_eq!(Address::ESCROW.to_string(), "escrow");
        assert_eq!(Address(42).to_string(), "42");
        assert_eq!(Timestamp::from_days(2), Timestamp(172_800));
    }
}
