//! Vault client adapter
//!
//! Thin wrapper over one deployed SimpleVault. Reads go through a
//! `VaultReader`, state-changing calls through a `VaultWriter`. The adapter
//! never caches; callers own local state.

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::preflight::{check_withdrawal, WithdrawalRequest};
use super::types::{
    MetaTxAction, MetaTxParams, PendingOperation, ReceiptStatus, SignedMetaTx, TokenMetadata,
    TransactionReceipt, TxId, TxOptions, UnsignedMetaTx, VaultInfo,
};

/// Read side of the contract boundary
#[async_trait]
pub trait VaultReader: Send + Sync {
    /// `getEthBalance()`
    async fn eth_balance(&self, vault: Address) -> Result<U256>;

    /// ERC-20 `balanceOf(vault)`
    async fn token_balance(&self, vault: Address, token: Address) -> Result<U256>;

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata>;

    /// `getPendingTransactions()`, in contract order
    async fn pending_transactions(&self, vault: Address) -> Result<Vec<PendingOperation>>;

    /// Owner, broadcaster, recovery and timelock period
    async fn vault_info(&self, vault: Address) -> Result<VaultInfo>;

    /// `generateUnsignedWithdrawalMetaTx{Approval,Cancellation}`
    async fn unsigned_meta_tx(
        &self,
        vault: Address,
        tx_id: TxId,
        action: MetaTxAction,
        params: MetaTxParams,
    ) -> Result<UnsignedMetaTx>;
}

/// State-changing contract calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultCall {
    WithdrawEthRequest {
        to: Address,
        amount: U256,
    },
    WithdrawTokenRequest {
        token: Address,
        to: Address,
        amount: U256,
    },
    ApproveWithdrawalAfterDelay {
        tx_id: TxId,
    },
    CancelWithdrawal {
        tx_id: TxId,
    },
    ApproveWithdrawalWithMetaTx(SignedMetaTx),
    CancelWithdrawalWithMetaTx(SignedMetaTx),
}

impl VaultCall {
    /// Contract method name
    pub fn method(&self) -> &'static str {
        match self {
            VaultCall::WithdrawEthRequest { .. } => "withdrawEthRequest",
            VaultCall::WithdrawTokenRequest { .. } => "withdrawTokenRequest",
            VaultCall::ApproveWithdrawalAfterDelay { .. } => "approveWithdrawalAfterDelay",
            VaultCall::CancelWithdrawal { .. } => "cancelWithdrawal",
            VaultCall::ApproveWithdrawalWithMetaTx(_) => "approveWithdrawalWithMetaTx",
            VaultCall::CancelWithdrawalWithMetaTx(_) => "cancelWithdrawalWithMetaTx",
        }
    }
}

/// Write side of the contract boundary
#[async_trait]
pub trait VaultWriter: Send + Sync {
    /// Submit one transaction; returns its hash once accepted
    async fn submit(&self, vault: Address, call: VaultCall, opts: &TxOptions) -> Result<B256>;

    /// Wait for the receipt of a submitted transaction
    async fn receipt(&self, tx_hash: B256) -> Result<TransactionReceipt>;
}

/// Handle to a submitted transaction
pub struct TransactionHandle {
    pub tx_hash: B256,
    pub method: &'static str,
    writer: Arc<dyn VaultWriter>,
}

impl TransactionHandle {
    /// Wait for the receipt; a reverted receipt is an error
    pub async fn wait(self) -> Result<TransactionReceipt> {
        let receipt = self.writer.receipt(self.tx_hash).await?;
        match receipt.status {
            ReceiptStatus::Success => {
                debug!(
                    "{} confirmed in block {} ({})",
                    self.method, receipt.block_number, self.tx_hash
                );
                Ok(receipt)
            }
            ReceiptStatus::Reverted => {
                warn!("{} reverted ({})", self.method, self.tx_hash);
                Err(Error::TransactionReverted(format!(
                    "{} ({})",
                    self.method, self.tx_hash
                )))
            }
        }
    }
}

impl std::fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("tx_hash", &self.tx_hash)
            .field("method", &self.method)
            .finish()
    }
}

/// Client for one vault deployment
pub struct VaultClient {
    reader: Arc<dyn VaultReader>,
    writer: Arc<dyn VaultWriter>,
    address: Address,
    chain_id: u64,
}

impl VaultClient {
    pub fn new(
        reader: Arc<dyn VaultReader>,
        writer: Arc<dyn VaultWriter>,
        address: Address,
        chain_id: u64,
    ) -> Self {
        Self {
            reader,
            writer,
            address,
            chain_id,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub async fn get_eth_balance(&self) -> Result<U256> {
        self.reader.eth_balance(self.address).await
    }

    pub async fn get_token_balance(&self, token: Address) -> Result<U256> {
        self.reader.token_balance(self.address, token).await
    }

    pub async fn get_token_metadata(&self, token: Address) -> Result<TokenMetadata> {
        self.reader.token_metadata(token).await
    }

    /// Pending operations in contract order; not re-sorted
    pub async fn get_pending_transactions(&self) -> Result<Vec<PendingOperation>> {
        self.reader.pending_transactions(self.address).await
    }

    pub async fn contract_info(&self) -> Result<VaultInfo> {
        let info = self.reader.vault_info(self.address).await?;
        if info.chain_id != self.chain_id {
            warn!(
                "Vault {} reports chain {} but client is bound to chain {}",
                self.address, info.chain_id, self.chain_id
            );
        }
        Ok(info)
    }

    pub async fn withdraw_eth_request(
        &self,
        to: Address,
        amount: U256,
        opts: &TxOptions,
    ) -> Result<TransactionHandle> {
        check_withdrawal(&WithdrawalRequest::eth(to, amount), None)?;
        self.send(VaultCall::WithdrawEthRequest { to, amount }, opts)
            .await
    }

    pub async fn withdraw_token_request(
        &self,
        token: Address,
        to: Address,
        amount: U256,
        opts: &TxOptions,
    ) -> Result<TransactionHandle> {
        check_withdrawal(&WithdrawalRequest::token(token, to, amount), None)?;
        self.send(VaultCall::WithdrawTokenRequest { token, to, amount }, opts)
            .await
    }

    pub async fn approve_withdrawal_after_delay(
        &self,
        tx_id: TxId,
        opts: &TxOptions,
    ) -> Result<TransactionHandle> {
        self.send(VaultCall::ApproveWithdrawalAfterDelay { tx_id }, opts)
            .await
    }

    pub async fn cancel_withdrawal(
        &self,
        tx_id: TxId,
        opts: &TxOptions,
    ) -> Result<TransactionHandle> {
        self.send(VaultCall::CancelWithdrawal { tx_id }, opts).await
    }

    /// Payload the owner must sign to approve `tx_id` off-chain
    pub async fn generate_unsigned_withdrawal_meta_tx_approval(
        &self,
        tx_id: TxId,
        params: MetaTxParams,
    ) -> Result<UnsignedMetaTx> {
        self.generate_unsigned_meta_tx(tx_id, MetaTxAction::Approve, params)
            .await
    }

    /// Payload the owner must sign to cancel `tx_id` off-chain
    pub async fn generate_unsigned_withdrawal_meta_tx_cancellation(
        &self,
        tx_id: TxId,
        params: MetaTxParams,
    ) -> Result<UnsignedMetaTx> {
        self.generate_unsigned_meta_tx(tx_id, MetaTxAction::Cancel, params)
            .await
    }

    pub async fn generate_unsigned_meta_tx(
        &self,
        tx_id: TxId,
        action: MetaTxAction,
        params: MetaTxParams,
    ) -> Result<UnsignedMetaTx> {
        let unsigned = self
            .reader
            .unsigned_meta_tx(self.address, tx_id, action, params)
            .await?;

        // The payload must describe what we asked for
        if unsigned.tx_id != tx_id || unsigned.action != action || unsigned.params != params {
            return Err(Error::Internal(format!(
                "Vault returned a payload for {} instead of {}-{}",
                unsigned.key(),
                tx_id,
                action
            )));
        }

        Ok(unsigned)
    }

    pub async fn approve_withdrawal_with_meta_tx(
        &self,
        signed: SignedMetaTx,
        opts: &TxOptions,
    ) -> Result<TransactionHandle> {
        if signed.action() != MetaTxAction::Approve {
            return Err(Error::InvalidInput(format!(
                "{} is not an approval",
                signed.key()
            )));
        }
        self.send(VaultCall::ApproveWithdrawalWithMetaTx(signed), opts)
            .await
    }

    pub async fn cancel_withdrawal_with_meta_tx(
        &self,
        signed: SignedMetaTx,
        opts: &TxOptions,
    ) -> Result<TransactionHandle> {
        if signed.action() != MetaTxAction::Cancel {
            return Err(Error::InvalidInput(format!(
                "{} is not a cancellation",
                signed.key()
            )));
        }
        self.send(VaultCall::CancelWithdrawalWithMetaTx(signed), opts)
            .await
    }

    /// Submit a signed meta-transaction with the method matching its action
    pub async fn submit_meta_tx(
        &self,
        signed: SignedMetaTx,
        opts: &TxOptions,
    ) -> Result<TransactionHandle> {
        match signed.action() {
            MetaTxAction::Approve => self.approve_withdrawal_with_meta_tx(signed, opts).await,
            MetaTxAction::Cancel => self.cancel_withdrawal_with_meta_tx(signed, opts).await,
        }
    }

    async fn send(&self, call: VaultCall, opts: &TxOptions) -> Result<TransactionHandle> {
        let method = call.method();
        debug!("Submitting {} to vault {} from {}", method, self.address, opts.from);

        let tx_hash = self.writer.submit(self.address, call, opts).await?;

        info!("{} submitted: {}", method, tx_hash);

        Ok(TransactionHandle {
            tx_hash,
            method,
            writer: self.writer.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::metatx::signer::DevSigner;
    use crate::vault::sandbox::{SandboxConfig, SandboxVault};
    use crate::vault::types::TxStatus;

    const START: u64 = 1_700_000_000;

    fn setup() -> (Arc<SandboxVault>, VaultClient, DevSigner, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let owner = DevSigner::from_seed("owner");
        let sandbox = Arc::new(SandboxVault::new(
            SandboxConfig::new(owner.address(), Address::repeat_byte(0xbb)),
            &owner,
            clock.clone(),
        ));
        sandbox.fund_eth(U256::from(1_000u64));
        let client = VaultClient::new(
            sandbox.clone(),
            sandbox.clone(),
            sandbox.address(),
            sandbox.chain_id(),
        );
        (sandbox, client, owner, clock)
    }

    #[tokio::test]
    async fn test_withdraw_request_creates_pending_operation() {
        let (_sandbox, client, owner, _clock) = setup();
        let opts = TxOptions::sender(owner.address());

        let receipt = client
            .withdraw_eth_request(Address::repeat_byte(5), U256::from(100u64), &opts)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Success);
        assert_eq!(receipt.tx_id, Some(1));

        let pending = client.get_pending_transactions().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, TxStatus::Pending);
        assert_eq!(pending[0].params.amount, U256::from(100u64));
    }

    #[tokio::test]
    async fn test_zero_amount_never_reaches_chain() {
        let (sandbox, client, owner, _clock) = setup();
        let opts = TxOptions::sender(owner.address());

        let result = client
            .withdraw_eth_request(Address::repeat_byte(5), U256::ZERO, &opts)
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(sandbox.stats().submissions(), 0);
    }

    #[tokio::test]
    async fn test_approve_before_release_is_not_ready() {
        let (_sandbox, client, owner, clock) = setup();
        let opts = TxOptions::sender(owner.address());

        client
            .withdraw_eth_request(Address::repeat_byte(5), U256::from(10u64), &opts)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        clock.advance(60);
        let result = client.approve_withdrawal_after_delay(1, &opts).await;
        assert!(matches!(result, Err(Error::NotReady { tx_id: 1, .. })));
    }

    #[tokio::test]
    async fn test_non_owner_cannot_cancel() {
        let (_sandbox, client, owner, _clock) = setup();

        client
            .withdraw_eth_request(
                Address::repeat_byte(5),
                U256::from(10u64),
                &TxOptions::sender(owner.address()),
            )
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        let stranger = TxOptions::sender(Address::repeat_byte(0xee));
        let result = client.cancel_withdrawal(1, &stranger).await;
        assert!(matches!(result, Err(Error::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_reverted_receipt_is_an_error() {
        let (sandbox, client, owner, _clock) = setup();
        sandbox.revert_next();

        let handle = client
            .withdraw_eth_request(
                Address::repeat_byte(5),
                U256::from(10u64),
                &TxOptions::sender(owner.address()),
            )
            .await
            .unwrap();
        assert!(matches!(
            handle.wait().await,
            Err(Error::TransactionReverted(_))
        ));
    }

    #[tokio::test]
    async fn test_meta_tx_method_must_match_action() {
        let (_sandbox, client, owner, clock) = setup();
        let opts = TxOptions::sender(owner.address());
        client
            .withdraw_eth_request(Address::repeat_byte(5), U256::from(10u64), &opts)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        let params = MetaTxParams {
            deadline: clock.now() + 60,
            max_gas_price: crate::units::gwei(50),
        };
        let unsigned = client
            .generate_unsigned_withdrawal_meta_tx_cancellation(1, params)
            .await
            .unwrap();
        let signed = SignedMetaTx {
            signature: owner.sign_digest(&unsigned.message),
            payload: unsigned,
        };

        let result = client
            .approve_withdrawal_with_meta_tx(signed, &TxOptions::sender(Address::repeat_byte(0xbb)))
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
