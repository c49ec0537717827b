//! Core types for vault operations
//!
//! Transaction records, contract info, receipts and meta-transaction
//! payloads exchanged with a SimpleVault deployment.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Vault-assigned transaction identifier
pub type TxId = u64;

lazy_static! {
    /// Operation type of a native ETH withdrawal
    pub static ref WITHDRAW_ETH: B256 = keccak256("WITHDRAW_ETH");

    /// Operation type of an ERC-20 withdrawal
    pub static ref WITHDRAW_TOKEN: B256 = keccak256("WITHDRAW_TOKEN");
}

/// Status of a vault transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Cancelled,
    Completed,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxStatus::Pending => write!(f, "Pending"),
            TxStatus::Cancelled => write!(f, "Cancelled"),
            TxStatus::Completed => write!(f, "Completed"),
        }
    }
}

/// Withdrawal operation kinds the client understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    WithdrawEth,
    WithdrawToken,
}

impl OperationKind {
    /// On-chain operation type identifier
    pub fn operation_type(&self) -> B256 {
        match self {
            OperationKind::WithdrawEth => *WITHDRAW_ETH,
            OperationKind::WithdrawToken => *WITHDRAW_TOKEN,
        }
    }

    /// Decode an operation type; `None` for non-withdrawal operations
    pub fn from_operation_type(operation_type: &B256) -> Option<Self> {
        if *operation_type == *WITHDRAW_ETH {
            Some(OperationKind::WithdrawEth)
        } else if *operation_type == *WITHDRAW_TOKEN {
            Some(OperationKind::WithdrawToken)
        } else {
            None
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::WithdrawEth => write!(f, "ETH withdrawal"),
            OperationKind::WithdrawToken => write!(f, "Token withdrawal"),
        }
    }
}

/// Parameters of a withdrawal operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalParams {
    pub to: Address,
    pub amount: U256,
    pub token: Option<Address>,
}

/// Operation as returned by `getPendingTransactions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub tx_id: TxId,
    pub release_time: u64,
    pub status: TxStatus,
    pub operation_type: B256,
    pub requester: Address,
    pub params: WithdrawalParams,
}

/// Client-side view of a withdrawal request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub tx_id: TxId,
    pub status: TxStatus,
    /// Unix seconds after which the timelock approval is allowed
    pub release_time: u64,
    pub amount: U256,
    pub recipient: Address,
    pub token: Option<Address>,
    pub operation_kind: OperationKind,
}

impl TransactionRecord {
    /// Decode a raw operation; non-withdrawal operations yield `None`
    pub fn from_operation(op: &PendingOperation) -> Option<Self> {
        let operation_kind = OperationKind::from_operation_type(&op.operation_type)?;
        Some(Self {
            tx_id: op.tx_id,
            status: op.status,
            release_time: op.release_time,
            amount: op.params.amount,
            recipient: op.params.to,
            token: op.params.token,
            operation_kind,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.status == TxStatus::Pending
    }
}

/// ERC-20 token metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
}

/// Roles and configuration of a deployed vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultInfo {
    pub address: Address,
    pub chain_id: u64,
    pub owner: Address,
    pub broadcaster: Address,
    pub recovery: Address,
    pub timelock_period_secs: u64,
}

/// Contract information, explicit about whether it has been read yet
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ContractInfo {
    #[default]
    NotLoaded,
    Loaded(VaultInfo),
}

impl ContractInfo {
    pub fn loaded(&self) -> Result<&VaultInfo> {
        match self {
            ContractInfo::Loaded(info) => Ok(info),
            ContractInfo::NotLoaded => Err(Error::ContractInfoNotLoaded),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, ContractInfo::Loaded(_))
    }
}

/// Options for a state-changing call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOptions {
    pub from: Address,
    pub gas_price: Option<U256>,
}

impl TxOptions {
    pub fn sender(account: Address) -> Self {
        Self {
            from: account,
            gas_price: None,
        }
    }
}

/// Receipt status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// Mined transaction receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub tx_hash: B256,
    pub status: ReceiptStatus,
    pub block_number: u64,
    /// Vault transaction created by a withdrawal request
    pub tx_id: Option<TxId>,
}

/// Which meta-transaction a signature authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaTxAction {
    Approve,
    Cancel,
}

impl MetaTxAction {
    /// Storage record type label
    pub fn record_type(&self) -> &'static str {
        match self {
            MetaTxAction::Approve => "WITHDRAWAL_APPROVAL",
            MetaTxAction::Cancel => "WITHDRAWAL_CANCELLATION",
        }
    }
}

impl std::fmt::Display for MetaTxAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetaTxAction::Approve => write!(f, "approve"),
            MetaTxAction::Cancel => write!(f, "cancel"),
        }
    }
}

impl FromStr for MetaTxAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "approve" => Ok(MetaTxAction::Approve),
            "cancel" => Ok(MetaTxAction::Cancel),
            other => Err(Error::InvalidInput(format!("Unknown meta-tx action: {}", other))),
        }
    }
}

/// Canonical key of a signed meta-transaction, rendered `"<txId>-<action>"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetaTxKey {
    pub tx_id: TxId,
    pub action: MetaTxAction,
}

impl MetaTxKey {
    pub fn new(tx_id: TxId, action: MetaTxAction) -> Self {
        Self { tx_id, action }
    }
}

impl std::fmt::Display for MetaTxKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.tx_id, self.action)
    }
}

impl FromStr for MetaTxKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (id, action) = s
            .split_once('-')
            .ok_or_else(|| Error::InvalidInput(format!("Invalid meta-tx key: {}", s)))?;
        let tx_id = id
            .parse()
            .map_err(|_| Error::InvalidInput(format!("Invalid tx id in key: {}", s)))?;
        Ok(Self::new(tx_id, action.parse()?))
    }
}

/// Caller-chosen limits embedded in a meta-transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaTxParams {
    /// Absolute unix timestamp after which the payload is rejected
    pub deadline: u64,
    pub max_gas_price: U256,
}

/// Payload the owner signs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedMetaTx {
    pub tx_id: TxId,
    pub action: MetaTxAction,
    pub vault: Address,
    pub chain_id: u64,
    pub signer: Address,
    pub nonce: u64,
    pub params: MetaTxParams,
    /// Digest to sign
    pub message: B256,
}

impl UnsignedMetaTx {
    /// Recompute the digest from the payload fields
    pub fn digest(&self) -> B256 {
        meta_tx_digest(
            self.vault,
            self.chain_id,
            self.tx_id,
            self.action,
            self.nonce,
            &self.params,
        )
    }

    pub fn key(&self) -> MetaTxKey {
        MetaTxKey::new(self.tx_id, self.action)
    }
}

/// Payload plus the owner's signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMetaTx {
    pub payload: UnsignedMetaTx,
    pub signature: Bytes,
}

impl SignedMetaTx {
    pub fn key(&self) -> MetaTxKey {
        self.payload.key()
    }

    pub fn action(&self) -> MetaTxAction {
        self.payload.action
    }
}

/// Digest binding a meta-transaction to one vault, chain, tx and nonce
pub fn meta_tx_digest(
    vault: Address,
    chain_id: u64,
    tx_id: TxId,
    action: MetaTxAction,
    nonce: u64,
    params: &MetaTxParams,
) -> B256 {
    let mut packed = Vec::with_capacity(20 + 32 * 6);
    packed.extend_from_slice(vault.as_slice());
    packed.extend_from_slice(&U256::from(chain_id).to_be_bytes::<32>());
    packed.extend_from_slice(&U256::from(tx_id).to_be_bytes::<32>());
    packed.extend_from_slice(keccak256(action.record_type()).as_slice());
    packed.extend_from_slice(&U256::from(nonce).to_be_bytes::<32>());
    packed.extend_from_slice(&U256::from(params.deadline).to_be_bytes::<32>());
    packed.extend_from_slice(&params.max_gas_price.to_be_bytes::<32>());
    keccak256(&packed)
}
