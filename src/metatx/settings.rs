//! Meta-transaction settings
//!
//! Persisted under `simpleVault.metaTxSettings` as
//! `{"deadline": <secs>, "maxGasPrice": "<wei>"}`.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::storage::{load_json, save_json, KeyValueStore, META_TX_SETTINGS_KEY};
use crate::units::{decimal_u256, format_amount, gwei};
use crate::vault::types::MetaTxParams;

/// Default signature lifetime (1 hour)
pub const DEFAULT_DEADLINE_SECS: u64 = 3600;

/// Longest accepted signature lifetime (30 days)
pub const MAX_DEADLINE_SECS: u64 = 30 * 24 * 3600;

/// Default gas price ceiling in gwei
pub const DEFAULT_MAX_GAS_PRICE_GWEI: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaTxSettings {
    /// Signature lifetime in seconds, relative to signing time
    pub deadline: u64,
    #[serde(with = "decimal_u256")]
    pub max_gas_price: U256,
}

impl Default for MetaTxSettings {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE_SECS,
            max_gas_price: gwei(DEFAULT_MAX_GAS_PRICE_GWEI),
        }
    }
}

impl MetaTxSettings {
    pub fn validate(&self) -> Result<()> {
        if self.deadline == 0 {
            return Err(Error::InvalidInput(
                "Meta-tx deadline must be positive".to_string(),
            ));
        }
        if self.deadline > MAX_DEADLINE_SECS {
            return Err(Error::InvalidInput(format!(
                "Meta-tx deadline must be at most {}s",
                MAX_DEADLINE_SECS
            )));
        }
        if self.max_gas_price.is_zero() {
            return Err(Error::InvalidInput(
                "Meta-tx max gas price must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Stored settings, or the defaults when none (or invalid ones) are stored
    pub async fn load(store: &dyn KeyValueStore) -> Result<Self> {
        Self::load_or(store, Self::default()).await
    }

    /// Stored settings, or `fallback` when none (or invalid ones) are stored
    pub async fn load_or(store: &dyn KeyValueStore, fallback: Self) -> Result<Self> {
        let Some(settings) = load_json::<Self>(store, META_TX_SETTINGS_KEY).await? else {
            return Ok(fallback);
        };

        if let Err(e) = settings.validate() {
            warn!("Ignoring stored meta-tx settings: {}", e);
            return Ok(fallback);
        }

        Ok(settings)
    }

    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        self.validate()?;
        save_json(store, META_TX_SETTINGS_KEY, self).await
    }

    /// Call parameters for a signature made at `now`
    pub fn params_at(&self, now: u64) -> Result<MetaTxParams> {
        let deadline = now.checked_add(self.deadline).ok_or_else(|| {
            Error::InvalidInput(format!(
                "Meta-tx deadline {}s overflows at {}",
                self.deadline, now
            ))
        })?;

        Ok(MetaTxParams {
            deadline,
            max_gas_price: self.max_gas_price,
        })
    }

    /// Gas price ceiling in gwei, for display
    pub fn max_gas_price_gwei(&self) -> String {
        format_amount(self.max_gas_price, 9)
    }
}
