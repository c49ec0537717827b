//! SandBlox vault client library
//!
//! Client-side coordination of SimpleVault withdrawals: timelocked
//! request/approve/cancel, owner-signed meta-transactions relayed by a
//! broadcaster, pending transaction tracking and a persisted token cache.

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod metatx;
pub mod notify;
pub mod rpc;
pub mod session;
pub mod storage;
pub mod tokens;
pub mod tracker;
pub mod units;
pub mod vault;
pub mod wallet;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use session::{SessionConfig, VaultSession};
