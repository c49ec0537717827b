//! Error types for the vault client

use alloy_primitives::U256;
use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for vault operations
#[derive(Error, Debug)]
pub enum Error {
    // Wallet errors
    #[error("Wallet not connected")]
    WalletNotConnected,

    #[error("Wallet has no active chain")]
    ChainNotFound,

    #[error("Chain mismatch: vault is deployed on chain {expected}, wallet is on chain {actual}")]
    ChainMismatch { expected: u64, actual: u64 },

    // Contract authorization / lifecycle errors
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Timelock not elapsed: transaction {tx_id} releases at {release_time}")]
    NotReady { tx_id: u64, release_time: u64 },

    #[error("Transaction {0} not found")]
    TransactionNotFound(u64),

    #[error("Transaction {0} is no longer pending")]
    NotPending(u64),

    #[error("Amount exceeds balance: requested {requested}, available {available}")]
    AmountExceedsBalance { requested: U256, available: U256 },

    #[error("Transaction reverted: {0}")]
    TransactionReverted(String),

    // Meta-transaction errors
    #[error("Invalid meta-transaction signature")]
    InvalidSignature,

    #[error("Meta-transaction expired at {deadline} (now {now})")]
    Expired { deadline: u64, now: u64 },

    #[error("Gas price {gas_price} exceeds meta-transaction ceiling {max_gas_price}")]
    GasPriceTooHigh { gas_price: U256, max_gas_price: U256 },

    #[error("No signed transaction stored for {0}")]
    NoSignedTransaction(String),

    // Client-side guards
    #[error("Operation already in progress: {0}")]
    OperationInProgress(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Contract info not loaded")]
    ContractInfoNotLoaded,

    // RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    // Persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Rpc(_) | Error::RpcTimeout(_) | Error::OperationInProgress(_)
        )
    }

    /// Check if this error was caused by the caller rather than the network
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::WalletNotConnected
                | Error::ChainNotFound
                | Error::ChainMismatch { .. }
                | Error::Unauthorized(_)
                | Error::NotReady { .. }
                | Error::AmountExceedsBalance { .. }
                | Error::NoSignedTransaction(_)
                | Error::InvalidInput(_)
                | Error::Expired { .. }
        )
    }

    /// Short human title used for notifications
    pub fn title(&self) -> &'static str {
        match self {
            Error::WalletNotConnected => "Wallet not connected",
            Error::ChainNotFound | Error::ChainMismatch { .. } => "Wrong network",
            Error::Unauthorized(_) => "Not authorized",
            Error::NotReady { .. } => "Timelock active",
            Error::TransactionNotFound(_) | Error::NotPending(_) => "Unknown transaction",
            Error::AmountExceedsBalance { .. } => "Insufficient vault balance",
            Error::TransactionReverted(_) => "Transaction reverted",
            Error::InvalidSignature | Error::Expired { .. } | Error::GasPriceTooHigh { .. } => {
                "Meta-transaction rejected"
            }
            Error::NoSignedTransaction(_) => "Nothing to broadcast",
            Error::OperationInProgress(_) => "Please wait",
            Error::InvalidInput(_) => "Invalid input",
            Error::ContractInfoNotLoaded => "Vault not loaded",
            Error::Rpc(_) | Error::RpcTimeout(_) => "Network error",
            Error::Storage(_) | Error::Serialization(_) | Error::Io(_) => "Storage error",
            Error::Config(_) => "Configuration error",
            Error::Internal(_) | Error::Anyhow(_) => "Unexpected error",
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Rpc(e.to_string())
    }
}
