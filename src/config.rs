//! Configuration loading and validation

use alloy_primitives::Address;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::metatx::MetaTxSettings;
use crate::units::gwei;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub rpc: RpcConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    pub storage: StorageConfig,
    pub meta_tx: MetaTxConfig,
    pub tracker: TrackerConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Deployed vault the client is bound to
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VaultConfig {
    /// Contract address; empty when not configured
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

/// Defaults applied when no meta-tx settings are persisted
#[derive(Debug, Clone, Deserialize)]
pub struct MetaTxConfig {
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Progress window used until the vault's timelock period is known
    #[serde(default = "default_timelock_secs")]
    pub default_timelock_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("rpc.endpoint", default_rpc_endpoint())?
            .set_default("rpc.timeout_ms", default_timeout_ms() as i64)?
            .set_default("vault.address", "")?
            .set_default("vault.chain_id", default_chain_id() as i64)?
            .set_default(
                "storage.path",
                default_storage_path().to_string_lossy().to_string(),
            )?
            .set_default("meta_tx.deadline_secs", default_deadline_secs() as i64)?
            .set_default(
                "meta_tx.max_gas_price_gwei",
                default_max_gas_price_gwei() as i64,
            )?
            .set_default(
                "tracker.poll_interval_secs",
                default_poll_interval_secs() as i64,
            )?
            .set_default("tracker.default_timelock_secs", default_timelock_secs() as i64)?
            .set_default("notifications.max_messages", default_max_messages() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix SANDBLOX_)
            .add_source(
                config::Environment::with_prefix("SANDBLOX")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        url::Url::parse(&self.rpc.endpoint)
            .with_context(|| format!("Invalid rpc.endpoint: {}", self.rpc.endpoint))?;

        if self.rpc.timeout_ms == 0 {
            anyhow::bail!("rpc.timeout_ms must be positive");
        }

        self.vault_address()?;

        if self.meta_tx.deadline_secs == 0 {
            anyhow::bail!("meta_tx.deadline_secs must be positive");
        }

        if self.meta_tx.deadline_secs > crate::metatx::settings::MAX_DEADLINE_SECS {
            anyhow::bail!(
                "meta_tx.deadline_secs must be at most {}",
                crate::metatx::settings::MAX_DEADLINE_SECS
            );
        }

        if self.meta_tx.max_gas_price_gwei == 0 {
            anyhow::bail!("meta_tx.max_gas_price_gwei must be positive");
        }

        if self.tracker.poll_interval_secs == 0 {
            anyhow::bail!("tracker.poll_interval_secs must be positive");
        }

        if self.notifications.max_messages == 0 {
            anyhow::bail!("notifications.max_messages must be positive");
        }

        if self.tracker.poll_interval_secs < 5 {
            tracing::warn!(
                "tracker.poll_interval_secs is {}s - frequent polling may hit RPC rate limits",
                self.tracker.poll_interval_secs
            );
        }

        Ok(())
    }

    /// Configured vault address, if any
    pub fn vault_address(&self) -> Result<Option<Address>> {
        let raw = self.vault.address.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        let address = crate::vault::parse_address(raw)
            .with_context(|| format!("Invalid vault.address: {}", raw))?;
        Ok(Some(address))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.tracker.poll_interval_secs)
    }

    /// Meta-tx settings used when none are persisted
    pub fn meta_tx_defaults(&self) -> MetaTxSettings {
        MetaTxSettings {
            deadline: self.meta_tx.deadline_secs,
            max_gas_price: gwei(self.meta_tx.max_gas_price_gwei),
        }
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  RPC:
    endpoint: {}
    timeout: {}ms
  Vault:
    address: {}
    chain_id: {}
  Storage:
    path: {}
  Meta-tx:
    deadline: {}s
    max_gas_price: {} gwei
  Tracker:
    poll_interval: {}s
    default_timelock: {}s
  Notifications:
    max_messages: {}
"#,
            mask_url(&self.rpc.endpoint),
            self.rpc.timeout_ms,
            if self.vault.address.is_empty() {
                "(not set)"
            } else {
                self.vault.address.as_str()
            },
            self.vault.chain_id,
            self.storage.path.display(),
            self.meta_tx.deadline_secs,
            self.meta_tx.max_gas_price_gwei,
            self.tracker.poll_interval_secs,
            self.tracker.default_timelock_secs,
            self.notifications.max_messages,
        )
    }
}

/// Hide API keys embedded in provider URLs
fn mask_url(url: &str) -> String {
    let base = match url.find('?') {
        Some(idx) => format!("{}?***", &url[..idx]),
        None => url.to_string(),
    };

    // Keys passed as the last path segment (e.g. /v2/<key>)
    match base.rfind('/') {
        Some(idx) if base.len() - idx > 24 && !base[idx..].contains('?') => {
            format!("{}/***", &base[..idx])
        }
        _ => base,
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig {
                endpoint: default_rpc_endpoint(),
                timeout_ms: default_timeout_ms(),
            },
            vault: VaultConfig {
                address: String::new(),
                chain_id: default_chain_id(),
            },
            storage: StorageConfig {
                path: default_storage_path(),
            },
            meta_tx: MetaTxConfig {
                deadline_secs: default_deadline_secs(),
                max_gas_price_gwei: default_max_gas_price_gwei(),
            },
            tracker: TrackerConfig {
                poll_interval_secs: default_poll_interval_secs(),
                default_timelock_secs: default_timelock_secs(),
            },
            notifications: NotificationConfig {
                max_messages: default_max_messages(),
            },
        }
    }
}

fn default_rpc_endpoint() -> String {
    "http://127.0.0.1:8545".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_chain_id() -> u64 {
    1
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/sandblox.json")
}

fn default_deadline_secs() -> u64 {
    crate::metatx::settings::DEFAULT_DEADLINE_SECS
}

fn default_max_gas_price_gwei() -> u64 {
    crate::metatx::settings::DEFAULT_MAX_GAS_PRICE_GWEI
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_timelock_secs() -> u64 {
    crate::tracker::DEFAULT_TIMELOCK_WINDOW_SECS
}

fn default_max_messages() -> usize {
    50
}
