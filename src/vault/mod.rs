//! SimpleVault contract access

pub mod client;
pub mod preflight;
pub mod sandbox;
pub mod types;

pub use client::{TransactionHandle, VaultCall, VaultClient, VaultReader, VaultWriter};
pub use preflight::{check_withdrawal, parse_address, WithdrawalRequest};
pub use sandbox::{SandboxConfig, SandboxVault};
pub use types::{
    ContractInfo, MetaTxAction, MetaTxKey, MetaTxParams, SignedMetaTx, TokenMetadata,
    TransactionRecord, TxId, TxOptions, TxStatus, UnsignedMetaTx, VaultInfo,
};
