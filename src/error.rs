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

//! Error types for ledger operations.
//!
//! Every error aborts the operation that raised it with no state change.

use crate::authority::Capability;
use crate::base::{Address, BatchId, UnitId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Ledger operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Malformed or out-of-range input
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Purchase quantity exceeds the units left in the batch
    #[error("insufficient supply: requested {requested}, remaining {remaining}")]
    InsufficientSupply { requested: u32, remaining: u32 },

    /// Total price is above the caller's ceiling
    #[error("slippage exceeded: total {total} above maximum {max_total}")]
    SlippageExceeded { total: Decimal, max_total: Decimal },

    /// Caller lacks the capability for a restricted operation
    #[error("{caller} lacks capability {capability:?}")]
    Unauthorized {
        caller: Address,
        capability: Capability,
    },

    /// Operation is blocked while the ledger is paused
    #[error("ledger is paused")]
    Paused,

    /// Unit was redeemed and is permanently excluded
    #[error("unit {0} is redeemed")]
    RedeemedUnit(UnitId),

    /// Unit already backs an active loan
    #[error("unit {0} already has an active loan")]
    LoanAlreadyActive(UnitId),

    /// Unit has no active loan
    #[error("unit {0} has no active loan")]
    NoActiveLoan(UnitId),

    /// Claim with nothing pending
    #[error("no funds to claim")]
    ZeroBalanceClaim,

    /// Currency or debt-token balance (or allowance) too low
    #[error("insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    /// The receiving side refused an outgoing transfer
    #[error("transfer to {0} was rejected")]
    TransferRejected(Address),

    /// Minting would push the debt token past its supply cap
    #[error("debt token supply cap exceeded")]
    DebtSupplyExceeded,
}

/// Reasons an input was rejected before any state was touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("batch {0} does not exist")]
    UnknownBatch(BatchId),

    #[error("unit {0} does not exist")]
    UnknownUnit(UnitId),

    #[error("quantity must be at least 1")]
    ZeroQuantity,

    #[error("invalid address {0}")]
    InvalidAddress(Address),

    #[error("batch must contain at least one unit")]
    EmptyBatch,

    #[error("mismatch between {producers} producers and {unit_refs} unit refs")]
    LengthMismatch { producers: usize, unit_refs: usize },

    #[error("batch size {size} exceeds maximum {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("unit ref of {len} bytes exceeds maximum {max}")]
    UnitRefTooLong { len: usize, max: usize },

    #[error("no unit ids given")]
    NoUnits,

    #[error("{count} unit ids exceed the per-call maximum {max}")]
    TooManyUnits { count: usize, max: usize },

    #[error("unit {0} listed more than once")]
    DuplicateUnit(UnitId),

    #[error("caller does not hold unit {0}")]
    NotCustodian(UnitId),

    #[error("caller is not the borrower of unit {0}")]
    NotBorrower(UnitId),

    #[error("amount must be positive")]
    NonPositiveAmount,

    #[error("page limit must be at least 1")]
    ZeroPageLimit,

    #[error("no surplus to recover")]
    NoSurplus,

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
}
