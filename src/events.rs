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

//! Observable ledger events.
//!
//! Operations collect their events while they run and hand them to the
//! [`EventLog`] only once they have succeeded, so a failed operation leaves
//! no trace in the log.

use crate::base::{Address, BatchId, Timestamp, UnitId};
use crossbeam::queue::SegQueue;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum LedgerEvent {
    BatchCreated {
        batch_id: BatchId,
        size: u32,
        start_price: Decimal,
    },
    Purchase {
        buyer: Address,
        batch_id: BatchId,
        quantity: u32,
        total: Decimal,
    },
    ProducerPaymentAccrued {
        producer: Address,
        unit_id: UnitId,
        amount: Decimal,
    },
    ProducerPaymentClaimed {
        producer: Address,
        amount: Decimal,
    },
    PlatformFundsClaimed {
        to: Address,
        amount: Decimal,
    },
    UnitRedeemed {
        holder: Address,
        unit_id: UnitId,
    },
    UnitTransferred {
        from: Address,
        to: Address,
        unit_id: UnitId,
    },
    /// Housekeeping stopped at its work cap with batches left to visit.
    PriceHousekeepingLimitReached {
        processed: u64,
        total: u64,
    },
    BasePriceAdjusted {
        old_price: Decimal,
        new_price: Decimal,
    },
    PriceParameterChanged {
        parameter: &'static str,
        value: Decimal,
    },
    Paused {
        by: Address,
    },
    Unpaused {
        by: Address,
    },
    AuthorityTransferred {
        from: Address,
        to: Address,
    },
    Deposited {
        borrower: Address,
        unit_ids: Vec<UnitId>,
        debt: Decimal,
    },
    Withdrawn {
        borrower: Address,
        unit_ids: Vec<UnitId>,
        debt: Decimal,
    },
    DebtTransferred {
        from: Address,
        to: Address,
        amount: Decimal,
    },
    SurplusRecovered {
        to: Address,
        amount: Decimal,
    },
}

/// A published event with its position in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub sequence: u64,
    pub at: Timestamp,
    pub event: LedgerEvent,
}

/// Append-only, lock-free event sink.
///
/// Sequence numbers start at 1 and are gapless in publication order.
#[derive(Debug, Default)]
pub struct EventLog {
    records: SegQueue<EventRecord>,
    sequence: AtomicU64,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes the events of one successful operation.
    pub fn publish(&self, events: Vec<LedgerEvent>, at: Timestamp) {
        for event in events {
            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::debug!(sequence, ?event, "event published");
            self.records.push(EventRecord {
                sequence,
                at,
                event,
            });
        }
    }

    /// Takes every record published so far, oldest first.
    pub fn drain(&self) -> Vec<EventRecord> {
        let mut drained = Vec::with_capacity(self.records.len());
        while let Some(record) = self.records.pop() {
            drained.push(record);
        }
        drained
    }

    /// Records published but not yet drained.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total records ever published.
    pub fn published(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}
