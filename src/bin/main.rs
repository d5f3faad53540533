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

use batch_ledger_rs::{
    Address, BatchId, CallContext, Ledger, LedgerConfig, LedgerError, Timestamp, UnitId,
};
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Batch Ledger - Replay marketplace and vault operations
///
/// Reads an operation script from a CSV file, applies it to a fresh ledger
/// and writes the resulting balances of every known address to stdout.
#[derive(Parser, Debug)]
#[command(name = "batch-ledger-rs")]
#[command(about = "Replays batch marketplace operations from a CSV script", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: time,caller,op,arg1,arg2,arg3
    /// Example: cargo run -- script.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// TOML configuration file, overridable with BATCH_LEDGER__* variables
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Address that starts out holding every capability
    #[arg(long, default_value_t = 1)]
    owner: u64,

    /// Log every accepted operation
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match LedgerConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            process::exit(1);
        }
    };

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            error!(path = %args.input.display(), error = %e, "cannot open script");
            process::exit(1);
        }
    };

    let ledger = match Ledger::new(Address(args.owner), config) {
        Ok(ledger) => ledger,
        Err(e) => {
            error!(error = %e, "cannot create ledger");
            process::exit(1);
        }
    };
    let summary = match replay(BufReader::new(file), &ledger) {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "cannot read script");
            process::exit(1);
        }
    };
    info!(applied = summary.applied, skipped = summary.skipped, "replay finished");

    if let Err(e) = write_accounts(&ledger, std::io::stdout()) {
        error!(error = %e, "cannot write output");
        process::exit(1);
    }
}

/// Raw CSV record matching the script format.
///
/// Fields: `time, caller, op, arg1, arg2, arg3`
#[derive(Debug, Deserialize)]
struct ScriptRecord {
    time: u64,
    caller: u64,
    op: String,
    #[serde(default)]
    arg1: Option<String>,
    #[serde(default)]
    arg2: Option<String>,
    #[serde(default)]
    arg3: Option<String>,
}

#[derive(Debug, Error)]
enum ScriptError {
    #[error("unknown operation `{0}`")]
    UnknownOp(String),

    #[error("missing argument {0}")]
    MissingArgument(&'static str),

    #[error("cannot parse `{value}` as {expected}")]
    BadArgument {
        value: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

fn required<'a>(field: &'a Option<String>, name: &'static str) -> Result<&'a str, ScriptError> {
    field
        .as_deref()
        .filter(|value| !value.is_empty())
        .ok_or(ScriptError::MissingArgument(name))
}

fn parse<T: FromStr>(value: &str, expected: &'static str) -> Result<T, ScriptError> {
    value.parse().map_err(|_| ScriptError::BadArgument {
        value: value.to_string(),
        expected,
    })
}

/// Splits a `;`-separated list.
fn parse_list<T: FromStr>(value: &str, expected: &'static str) -> Result<Vec<T>, ScriptError> {
    value
        .split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| parse(item, expected))
        .collect()
}

impl ScriptRecord {
    /// Applies this record to the ledger.
    fn apply(&self, ledger: &Ledger) -> Result<(), ScriptError> {
        let ctx = CallContext::new(Address(self.caller), Timestamp(self.time));
        let amount = |field: &Option<String>, name: &'static str| -> Result<Decimal, ScriptError> {
            parse(required(field, name)?, "decimal")
        };
        let address = |field: &Option<String>, name: &'static str| -> Result<Address, ScriptError> {
            parse(required(field, name)?, "address").map(Address)
        };
        let unit = |field: &Option<String>, name: &'static str| -> Result<UnitId, ScriptError> {
            parse(required(field, name)?, "unit id").map(UnitId)
        };
        let units = |field: &Option<String>, name: &'static str| -> Result<Vec<UnitId>, ScriptError> {
            let ids: Vec<u64> = parse_list(required(field, name)?, "unit id")?;
            Ok(ids.into_iter().map(UnitId).collect())
        };

        match self.op.to_lowercase().as_str() {
            "fund" => ledger.currency().mint(ctx.caller, amount(&self.arg1, "amount")?)?,
            "approve" => ledger
                .currency()
                .approve(ctx.caller, amount(&self.arg1, "amount")?),
            "donate" => ledger.currency().transfer(
                ctx.caller,
                Address::ESCROW,
                amount(&self.arg1, "amount")?,
            )?,
            "freeze" => ledger.currency().freeze(ctx.caller),
            "unfreeze" => ledger.currency().unfreeze(ctx.caller),
            "mint" => {
                let producers: Vec<u64> = parse_list(required(&self.arg1, "producers")?, "address")?;
                let unit_refs = required(&self.arg2, "unit_refs")?
                    .split(';')
                    .map(|r| r.trim().to_string())
                    .collect();
                let batch_id = ledger.mint_batch(
                    ctx,
                    producers.into_iter().map(Address).collect(),
                    unit_refs,
                )?;
                debug!(%batch_id, "mint applied");
            }
            "buy" => {
                let batch_id = BatchId(parse(required(&self.arg1, "batch")?, "batch id")?);
                let max_total = amount(&self.arg2, "max_total")?;
                let quantity = parse(required(&self.arg3, "quantity")?, "quantity")?;
                ledger.buy(ctx, batch_id, max_total, quantity)?;
            }
            "claim" => {
                ledger.claim_producer(ctx)?;
            }
            "claim_platform" => {
                ledger.claim_platform(ctx, address(&self.arg1, "recipient")?)?;
            }
            "recover_surplus" => {
                ledger.recover_surplus(ctx, address(&self.arg1, "recipient")?)?;
            }
            "deposit" => ledger.deposit_batch(ctx, &units(&self.arg1, "units")?)?,
            "withdraw" => ledger.withdraw_batch(ctx, &units(&self.arg1, "units")?)?,
            "redeem" => ledger.redeem_unit(ctx, unit(&self.arg1, "unit")?)?,
            "transfer_unit" => {
                ledger.transfer_unit(ctx, unit(&self.arg1, "unit")?, address(&self.arg2, "to")?)?
            }
            "transfer_debt" => ledger.transfer_debt(
                ctx,
                address(&self.arg1, "to")?,
                amount(&self.arg2, "amount")?,
            )?,
            "pause" => ledger.pause(ctx)?,
            "unpause" => ledger.unpause(ctx)?,
            "set_base_price" => ledger.set_base_price(ctx, amount(&self.arg1, "price")?)?,
            "set_price_floor" => ledger.set_price_floor(ctx, amount(&self.arg1, "floor")?)?,
            "set_decay_rate" => ledger.set_decay_rate(ctx, amount(&self.arg1, "rate")?)?,
            "housekeeping" => {
                ledger.run_price_housekeeping(ctx);
            }
            other => return Err(ScriptError::UnknownOp(other.to_string())),
        }
        Ok(())
    }
}

/// Counts of replayed and rejected script rows.
#[derive(Debug, Default, PartialEq, Eq)]
struct ReplaySummary {
    applied: usize,
    skipped: usize,
}

/// Replays an operation script against `ledger`.
///
/// Rows are streamed one at a time. Malformed rows and rejected operations
/// are logged and skipped; they never stop the replay.
///
/// # CSV Format
///
/// Expected columns: `time, caller, op, arg1, arg2, arg3`
///
/// ```csv
/// time,caller,op,arg1,arg2,arg3
/// 0,1,mint,5;6,lot-a;lot-b,
/// 0,10,fund,1000,,
/// 0,10,approve,1000,,
/// 0,10,buy,1,230,1
/// 60,5,claim,,,
/// ```
///
/// # Errors
///
/// Returns a CSV error only if the reader itself fails.
fn replay<R: Read>(reader: R, ledger: &Ledger) -> Result<ReplaySummary, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let mut summary = ReplaySummary::default();
    for (line, result) in rdr.deserialize::<ScriptRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) if e.is_io_error() => return Err(e),
            Err(e) => {
                debug!(line = line + 2, error = %e, "skipping malformed row");
                summary.skipped += 1;
                continue;
            }
        };
        match record.apply(ledger) {
            Ok(()) => {
                debug!(line = line + 2, op = %record.op, caller = record.caller, "applied");
                summary.applied += 1;
            }
            Err(e) => {
                warn!(line = line + 2, op = %record.op, error = %e, "operation rejected");
                summary.skipped += 1;
            }
        }
    }
    Ok(summary)
}

/// Writes one balance row per known address, in address order.
///
/// # CSV Format
///
/// ```csv
/// address,currency,producer_pending,debt,active_loans
/// 5,0,161,0,0
/// 10,770,0,20,1
/// ```
fn write_accounts<W: Write>(ledger: &Ledger, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for address in ledger.known_addresses() {
        wtr.serialize(ledger.account_report(address))?;
    }
    wtr.flush()?;
    Ok(())
}
