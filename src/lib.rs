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

//! # Batch Ledger
//!
//! This library provides the settlement core for a marketplace that sells
//! fixed-size batches of unique units through a time-decaying price, pays its
//! producers through pull payments, and lets holders borrow a flat amount of
//! debt token against the units they own.
//!
//! ## Core Components
//!
//! - [`Ledger`]: Facade owning all state; every operation goes through it
//! - [`PriceEngine`]: Dutch-auction price function and base price steering
//! - [`BatchInventory`]: Batches, units and custody
//! - [`PayoutAccounts`]: Pending producer and platform balances
//! - [`LoanBook`] and [`DebtToken`]: Collateral vault bookkeeping
//! - [`AuthorityGate`]: Capability table and pause switch
//! - [`LedgerError`]: Error types for rejected operations
//!
//! ## Example
//!
//! ```
//! use batch_ledger_rs::{Address, CallContext, Ledger, LedgerConfig, Timestamp};
//! use rust_decimal_macros::dec;
//!
//! let admin = Address(1);
//! let producer = Address(2);
//! let buyer = Address(3);
//! let ledger = Ledger::new(admin, LedgerConfig::default()).unwrap();
//!
//! let batch = ledger
//!     .mint_batch(CallContext::new(admin, Timestamp(0)), vec![producer], vec!["lot-1".into()])
//!     .unwrap();
//!
//! ledger.currency().mint(buyer, dec!(500)).unwrap();
//! ledger.currency().approve(buyer, dec!(500));
//! ledger
//!     .buy(CallContext::new(buyer, Timestamp(0)), batch, dec!(230), 1)
//!     .unwrap();
//!
//! assert_eq!(ledger.producer_pending(producer), dec!(161));
//! assert_eq!(ledger.platform_pending(), dec!(69));
//! ```
//!
//! ## Thread Safety
//!
//! The ledger serializes writers behind one lock and lets readers run
//! concurrently, so a shared `Arc<Ledger>` can be driven from many threads.

pub mod authority;
mod base;
pub mod currency;
pub mod error;
pub mod events;
pub mod inventory;
mod ledger;
pub mod payout;
pub mod pricing;
pub mod settings;
mod settlement;
pub mod vault;

pub use authority::{AuthorityGate, Capability};
pub use base::{Address, BatchId, Timestamp, UnitId};
pub use currency::CurrencyBook;
pub use error::{LedgerError, ValidationError};
pub use events::{EventLog, EventRecord, LedgerEvent};
pub use inventory::{Batch, BatchInfo, BatchInventory, Custodian, Unit, UnitInfo};
pub use ledger::{AccountReport, CallContext, Ledger, LedgerAudit};
pub use payout::{CURRENCY_SCALE, PayoutAccounts, RevenueSplit};
pub use pricing::{HousekeepingReport, PriceAnchor, PriceEngine};
pub use settings::LedgerConfig;
pub use vault::{DebtToken, Loan, LoanBook, LoanPage};
