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

//! Ledger configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables of the form `BATCH_LEDGER__<SECTION>__<KEY>`
//! (for example `BATCH_LEDGER__PRICING__BASE_PRICE=250`).
//!
//! ```toml
//! [pricing]
//! base_price = "230"
//! price_floor = "40"
//!
//! [market]
//! producer_share_percent = 70
//! ```

use crate::error::ValidationError;
use ::config::{Config, ConfigError, Environment, File, FileFormat};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound for the housekeeping work cap.
pub const MAX_HOUSEKEEPING_ITERATIONS: u32 = 1_000;
/// Upper bound for [`MarketConfig::max_batch_size`].
pub const MAX_BATCH_SIZE_LIMIT: usize = 100;
/// Platform share can never exceed half of a sale.
pub const MIN_PRODUCER_SHARE_PERCENT: u8 = 50;
/// Ceiling for the base price, so a full batch total stays exact at
/// currency scale.
pub const MAX_PRICE: Decimal = dec!(1_000_000_000_000);

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub pricing: PricingConfig,
    pub market: MarketConfig,
    pub vault: VaultConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Start price snapshotted by each new batch.
    pub base_price: Decimal,
    pub price_floor: Decimal,
    /// Price drop per elapsed interval.
    pub decay_per_interval: Decimal,
    pub decay_interval_secs: u64,
    /// Step applied to the base price by quick sell-outs and stale batches.
    pub price_adjust_delta: Decimal,
    /// A batch selling out within this many intervals raises the base price.
    pub increase_threshold_intervals: u64,
    /// An unsold batch this many intervals old lowers the base price.
    pub decrease_threshold_intervals: u64,
    pub max_housekeeping_iterations: u32,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_price: dec!(230),
            price_floor: dec!(40),
            decay_per_interval: dec!(1),
            decay_interval_secs: 86_400,
            price_adjust_delta: dec!(10),
            increase_threshold_intervals: 2,
            decrease_threshold_intervals: 4,
            max_housekeeping_iterations: 100,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub producer_share_percent: u8,
    pub max_batch_size: usize,
    pub max_unit_ref_len: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            producer_share_percent: 70,
            max_batch_size: 50,
            max_unit_ref_len: 100,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Debt token minted per deposited unit.
    pub debt_per_unit: Decimal,
    pub debt_max_supply: Decimal,
    /// Maximum ids accepted by one batch deposit or withdraw.
    pub max_units_per_call: usize,
    /// Maximum loans returned by one page of loan enumeration.
    pub max_loan_page: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            debt_per_unit: dec!(20),
            debt_max_supply: dec!(1_000_000_000),
            max_units_per_call: 20,
            max_loan_page: 100,
        }
    }
}

impl LedgerConfig {
    /// Loads configuration from an optional TOML file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("BATCH_LEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        Ok(config)
    }

    /// Parses configuration from a TOML string, without environment overrides.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let pricing = &self.pricing;
        if pricing.price_floor <= Decimal::ZERO {
            return Err(ValidationError::InvalidParameter("price_floor must be positive"));
        }
        if pricing.base_price < pricing.price_floor {
            return Err(ValidationError::InvalidParameter(
                "base_price must be at least price_floor",
            ));
        }
        if pricing.base_price > MAX_PRICE {
            return Err(ValidationError::InvalidParameter(
                "base_price must not exceed 1000000000000",
            ));
        }
        if pricing.decay_per_interval < Decimal::ZERO {
            return Err(ValidationError::InvalidParameter(
                "decay_per_interval must not be negative",
            ));
        }
        if pricing.decay_interval_secs == 0 {
            return Err(ValidationError::InvalidParameter(
                "decay_interval_secs must be positive",
            ));
        }
        if pricing.price_adjust_delta < Decimal::ZERO {
            return Err(ValidationError::InvalidParameter(
                "price_adjust_delta must not be negative",
            ));
        }
        if pricing.increase_threshold_intervals == 0
            || pricing.increase_threshold_intervals >= pricing.decrease_threshold_intervals
        {
            return Err(ValidationError::InvalidParameter(
                "thresholds must satisfy 0 < increase < decrease",
            ));
        }
        if pricing.max_housekeeping_iterations == 0
            || pricing.max_housekeeping_iterations > MAX_HOUSEKEEPING_ITERATIONS
        {
            return Err(ValidationError::InvalidParameter(
                "max_housekeeping_iterations must be between 1 and 1000",
            ));
        }

        let market = &self.market;
        if !(MIN_PRODUCER_SHARE_PERCENT..=100).contains(&market.producer_share_percent) {
            return Err(ValidationError::InvalidParameter(
                "producer_share_percent must be between 50 and 100",
            ));
        }
        if market.max_batch_size == 0 || market.max_batch_size > MAX_BATCH_SIZE_LIMIT {
            return Err(ValidationError::InvalidParameter(
                "max_batch_size must be between 1 and 100",
            ));
        }
        if market.max_unit_ref_len == 0 {
            return Err(ValidationError::InvalidParameter(
                "max_unit_ref_len must be positive",
            ));
        }

        let vault = &self.vault;
        if vault.debt_per_unit <= Decimal::ZERO || vault.debt_max_supply < vault.debt_per_unit {
            return Err(ValidationError::InvalidParameter(
                "debt_per_unit must be positive and within debt_max_supply",
            ));
        }
        if vault.max_units_per_call == 0 || vault.max_loan_page == 0 {
            return Err(ValidationError::InvalidParameter(
                "vault call and page limits must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = LedgerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pricing.base_price, dec!(230));
        assert_eq!(config.pricing.price_floor, dec!(40));
        assert_eq!(config.market.producer_share_percent, 70);
        assert_eq!(config.vault.debt_per_unit, dec!(20));
    }

    #[test]
    fn toml_overrides_selected_fields() {
        let config = LedgerConfig::from_toml_str(
            r#"
            [pricing]
            base_price = "300"
            max_housekeeping_iterations = 5

            [vault]
            max_units_per_call = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.pricing.base_price, dec!(300));
        assert_eq!(config.pricing.price_floor, dec!(40));
        assert_eq!(config.pricing.max_housekeeping_iterations, 5);
        assert_eq!(config.vault.max_units_per_call, 10);
        assert_eq!(config.market, MarketConfig::default());
    }

    #[test]
    fn rejects_floor_above_base() {
        let mut config = LedgerConfig::default();
        config.pricing.price_floor = dec!(500);
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidParameter(_))
        ));
    }

    #[test]
    fn rejects_platform_share_above_half() {
        let mut config = LedgerConfig::default();
        config.market.producer_share_percent = 49;
        assert!(config.validate().is_err());
        config.market.producer_share_percent = 50;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_base_price_above_ceiling() {
        let mut config = LedgerConfig::default();
        config.pricing.base_price = MAX_PRICE + dec!(0.000001);
        assert!(config.validate().is_err());
        config.pricing.base_price = MAX_PRICE;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_iteration_cap() {
        let mut config = LedgerConfig::default();
        config.pricing.max_housekeeping_iterations = 0;
        assert!(config.validate().is_err());
        config.pricing.max_housekeeping_iterations = 1_001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_toml_values_fail_validation() {
        let result = LedgerConfig::from_toml_str(
            r#"
            [market]
            max_batch_size = 0
            "#,
        );
        assert!(result.is_err());
    }
}
