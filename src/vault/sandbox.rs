//! In-process SimpleVault
//!
//! Simulates one vault deployment with the contract's rules: owner-only
//! requests and timelock approvals, broadcaster-only meta-transaction
//! submission, deadlines, gas price ceilings and owner signatures. Used by
//! the test-suite and the `demo` command in place of a live chain.

use alloy_primitives::{keccak256, Address, B256, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::metatx::signer::DevSigner;
use crate::tokens::balances::BalanceReader;
use crate::units::gwei;

use super::client::{VaultCall, VaultReader, VaultWriter};
use super::types::{
    meta_tx_digest, MetaTxAction, MetaTxParams, OperationKind, PendingOperation, ReceiptStatus,
    SignedMetaTx, TokenMetadata, TransactionReceipt, TxId, TxOptions, TxStatus, UnsignedMetaTx,
    VaultInfo, WithdrawalParams,
};

/// Sandbox deployment parameters
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub address: Address,
    pub chain_id: u64,
    pub owner: Address,
    pub broadcaster: Address,
    pub recovery: Address,
    pub timelock_period_secs: u64,
    /// Network gas price used when a call does not set one
    pub gas_price: U256,
}

impl SandboxConfig {
    pub fn new(owner: Address, broadcaster: Address) -> Self {
        Self {
            address: Address::repeat_byte(0x5b),
            chain_id: 31337,
            owner,
            broadcaster,
            recovery: owner,
            timelock_period_secs: 24 * 3600,
            gas_price: gwei(20),
        }
    }

    pub fn with_timelock(mut self, secs: u64) -> Self {
        self.timelock_period_secs = secs;
        self
    }
}

/// Call counters
#[derive(Default)]
pub struct SandboxStats {
    pending_fetches: AtomicU64,
    submissions: AtomicU64,
}

impl SandboxStats {
    pub fn pending_fetches(&self) -> u64 {
        self.pending_fetches.load(Ordering::Relaxed)
    }

    pub fn submissions(&self) -> u64 {
        self.submissions.load(Ordering::Relaxed)
    }
}

struct SandboxToken {
    metadata: TokenMetadata,
    balances: HashMap<Address, U256>,
}

#[derive(Default)]
struct SandboxState {
    eth_balance: U256,
    accounts: HashMap<Address, U256>,
    tokens: HashMap<Address, SandboxToken>,
    operations: Vec<PendingOperation>,
    next_tx_id: TxId,
    meta_nonce: u64,
    receipts: HashMap<B256, TransactionReceipt>,
    block_number: u64,
    revert_next: bool,
}

/// Simulated vault contract
pub struct SandboxVault {
    config: SandboxConfig,
    owner_key: DevSigner,
    clock: Arc<dyn Clock>,
    state: Mutex<SandboxState>,
    stats: SandboxStats,
    latency_ms: AtomicU64,
}

impl SandboxVault {
    /// Deploy a sandbox vault owned by `owner_key`
    pub fn new(config: SandboxConfig, owner_key: &DevSigner, clock: Arc<dyn Clock>) -> Self {
        info!(
            "Sandbox vault {} on chain {} (timelock {}s)",
            config.address, config.chain_id, config.timelock_period_secs
        );

        Self {
            config,
            owner_key: owner_key.clone(),
            clock,
            state: Mutex::new(SandboxState {
                next_tx_id: 1,
                block_number: 1,
                ..Default::default()
            }),
            stats: SandboxStats::default(),
            latency_ms: AtomicU64::new(0),
        }
    }

    pub fn address(&self) -> Address {
        self.config.address
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn stats(&self) -> &SandboxStats {
        &self.stats
    }

    /// Deposit native currency into the vault
    pub fn fund_eth(&self, amount: U256) {
        let mut state = self.lock();
        state.eth_balance += amount;
    }

    /// Deploy a token and credit the vault with `vault_balance`
    pub fn add_token(&self, token: Address, metadata: TokenMetadata, vault_balance: U256) {
        let mut state = self.lock();
        let mut balances = HashMap::new();
        balances.insert(self.config.address, vault_balance);
        state.tokens.insert(token, SandboxToken { metadata, balances });
    }

    /// Make the next mined transaction revert
    pub fn revert_next(&self) {
        self.lock().revert_next = true;
    }

    /// Artificial latency applied to every call
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn operation(&self, tx_id: TxId) -> Option<PendingOperation> {
        self.lock()
            .operations
            .iter()
            .find(|op| op.tx_id == tx_id)
            .cloned()
    }

    /// Native balance of an externally owned account
    pub fn account_balance(&self, account: Address) -> U256 {
        self.lock()
            .accounts
            .get(&account)
            .copied()
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, SandboxState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn delay(&self) {
        let ms = self.latency_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn ensure_vault(&self, vault: Address) -> Result<()> {
        if vault != self.config.address {
            return Err(Error::Rpc(format!("No vault deployed at {}", vault)));
        }
        Ok(())
    }

    fn require_owner(&self, from: Address, method: &str) -> Result<()> {
        if from != self.config.owner {
            return Err(Error::Unauthorized(format!(
                "{} is restricted to the owner, caller {}",
                method, from
            )));
        }
        Ok(())
    }

    fn execute(
        &self,
        state: &mut SandboxState,
        call: &VaultCall,
        opts: &TxOptions,
    ) -> Result<Option<TxId>> {
        let now = self.clock.now();

        match call {
            VaultCall::WithdrawEthRequest { to, amount } => {
                self.require_owner(opts.from, call.method())?;
                if *amount > state.eth_balance {
                    return Err(Error::TransactionReverted(
                        "withdrawEthRequest: insufficient balance".to_string(),
                    ));
                }
                let params = WithdrawalParams {
                    to: *to,
                    amount: *amount,
                    token: None,
                };
                Ok(Some(self.create_operation(
                    state,
                    OperationKind::WithdrawEth,
                    params,
                    opts.from,
                    now,
                )))
            }
            VaultCall::WithdrawTokenRequest { token, to, amount } => {
                self.require_owner(opts.from, call.method())?;
                let available = state
                    .tokens
                    .get(token)
                    .and_then(|t| t.balances.get(&self.config.address).copied())
                    .unwrap_or_default();
                if *amount > available {
                    return Err(Error::TransactionReverted(
                        "withdrawTokenRequest: insufficient balance".to_string(),
                    ));
                }
                let params = WithdrawalParams {
                    to: *to,
                    amount: *amount,
                    token: Some(*token),
                };
                Ok(Some(self.create_operation(
                    state,
                    OperationKind::WithdrawToken,
                    params,
                    opts.from,
                    now,
                )))
            }
            VaultCall::ApproveWithdrawalAfterDelay { tx_id } => {
                self.require_owner(opts.from, call.method())?;
                let index = Self::pending_index(state, *tx_id)?;
                let release_time = state.operations[index].release_time;
                if now < release_time {
                    return Err(Error::NotReady {
                        tx_id: *tx_id,
                        release_time,
                    });
                }
                self.release_funds(state, index)?;
                state.operations[index].status = TxStatus::Completed;
                Ok(None)
            }
            VaultCall::CancelWithdrawal { tx_id } => {
                self.require_owner(opts.from, call.method())?;
                let index = Self::pending_index(state, *tx_id)?;
                state.operations[index].status = TxStatus::Cancelled;
                Ok(None)
            }
            VaultCall::ApproveWithdrawalWithMetaTx(signed)
            | VaultCall::CancelWithdrawalWithMetaTx(signed) => {
                if opts.from != self.config.broadcaster {
                    return Err(Error::Unauthorized(format!(
                        "{} is restricted to the broadcaster, caller {}",
                        call.method(),
                        opts.from
                    )));
                }
                self.verify_meta_tx(state, signed, opts, now)?;

                let index = Self::pending_index(state, signed.payload.tx_id)?;
                match signed.action() {
                    MetaTxAction::Approve => {
                        self.release_funds(state, index)?;
                        state.operations[index].status = TxStatus::Completed;
                    }
                    MetaTxAction::Cancel => {
                        state.operations[index].status = TxStatus::Cancelled;
                    }
                }
                state.meta_nonce += 1;
                Ok(None)
            }
        }
    }

    fn verify_meta_tx(
        &self,
        state: &SandboxState,
        signed: &SignedMetaTx,
        opts: &TxOptions,
        now: u64,
    ) -> Result<()> {
        let payload = &signed.payload;

        if payload.vault != self.config.address || payload.chain_id != self.config.chain_id {
            return Err(Error::InvalidSignature);
        }

        if now > payload.params.deadline {
            return Err(Error::Expired {
                deadline: payload.params.deadline,
                now,
            });
        }

        let gas_price = opts.gas_price.unwrap_or(self.config.gas_price);
        if gas_price > payload.params.max_gas_price {
            return Err(Error::GasPriceTooHigh {
                gas_price,
                max_gas_price: payload.params.max_gas_price,
            });
        }

        if payload.nonce != state.meta_nonce
            || payload.signer != self.config.owner
            || payload.digest() != payload.message
            || !self.owner_key.verify(&payload.message, &signed.signature)
        {
            return Err(Error::InvalidSignature);
        }

        Ok(())
    }

    fn create_operation(
        &self,
        state: &mut SandboxState,
        kind: OperationKind,
        params: WithdrawalParams,
        requester: Address,
        now: u64,
    ) -> TxId {
        let tx_id = state.next_tx_id;
        state.next_tx_id += 1;

        state.operations.push(PendingOperation {
            tx_id,
            release_time: now + self.config.timelock_period_secs,
            status: TxStatus::Pending,
            operation_type: kind.operation_type(),
            requester,
            params,
        });

        debug!("Sandbox created {} #{}", kind, tx_id);
        tx_id
    }

    fn pending_index(state: &SandboxState, tx_id: TxId) -> Result<usize> {
        let index = state
            .operations
            .iter()
            .position(|op| op.tx_id == tx_id)
            .ok_or(Error::TransactionNotFound(tx_id))?;
        if state.operations[index].status != TxStatus::Pending {
            return Err(Error::NotPending(tx_id));
        }
        Ok(index)
    }

    fn release_funds(&self, state: &mut SandboxState, index: usize) -> Result<()> {
        let params = state.operations[index].params.clone();

        match params.token {
            None => {
                state.eth_balance = state
                    .eth_balance
                    .checked_sub(params.amount)
                    .ok_or_else(|| {
                        Error::TransactionReverted("vault balance too low at release".to_string())
                    })?;
                *state.accounts.entry(params.to).or_default() += params.amount;
            }
            Some(token) => {
                let vault = self.config.address;
                let entry = state
                    .tokens
                    .get_mut(&token)
                    .ok_or_else(|| Error::TransactionReverted(format!("unknown token {}", token)))?;
                let held = entry.balances.get(&vault).copied().unwrap_or_default();
                let remaining = held.checked_sub(params.amount).ok_or_else(|| {
                    Error::TransactionReverted("token balance too low at release".to_string())
                })?;
                entry.balances.insert(vault, remaining);
                *entry.balances.entry(params.to).or_default() += params.amount;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl VaultReader for SandboxVault {
    async fn eth_balance(&self, vault: Address) -> Result<U256> {
        self.delay().await;
        self.ensure_vault(vault)?;
        Ok(self.lock().eth_balance)
    }

    async fn token_balance(&self, vault: Address, token: Address) -> Result<U256> {
        self.delay().await;
        self.ensure_vault(vault)?;
        BalanceReader::token_balance(self, token, vault).await
    }

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata> {
        BalanceReader::token_metadata(self, token).await
    }

    async fn pending_transactions(&self, vault: Address) -> Result<Vec<PendingOperation>> {
        self.stats.pending_fetches.fetch_add(1, Ordering::Relaxed);
        self.delay().await;
        self.ensure_vault(vault)?;

        Ok(self
            .lock()
            .operations
            .iter()
            .filter(|op| op.status == TxStatus::Pending)
            .cloned()
            .collect())
    }

    async fn vault_info(&self, vault: Address) -> Result<VaultInfo> {
        self.delay().await;
        self.ensure_vault(vault)?;

        Ok(VaultInfo {
            address: self.config.address,
            chain_id: self.config.chain_id,
            owner: self.config.owner,
            broadcaster: self.config.broadcaster,
            recovery: self.config.recovery,
            timelock_period_secs: self.config.timelock_period_secs,
        })
    }

    async fn unsigned_meta_tx(
        &self,
        vault: Address,
        tx_id: TxId,
        action: MetaTxAction,
        params: MetaTxParams,
    ) -> Result<UnsignedMetaTx> {
        self.delay().await;
        self.ensure_vault(vault)?;

        let state = self.lock();
        Self::pending_index(&state, tx_id)?;

        let nonce = state.meta_nonce;
        let message = meta_tx_digest(vault, self.config.chain_id, tx_id, action, nonce, &params);

        Ok(UnsignedMetaTx {
            tx_id,
            action,
            vault,
            chain_id: self.config.chain_id,
            signer: self.config.owner,
            nonce,
            params,
            message,
        })
    }
}

#[async_trait]
impl VaultWriter for SandboxVault {
    async fn submit(&self, vault: Address, call: VaultCall, opts: &TxOptions) -> Result<B256> {
        self.delay().await;
        self.ensure_vault(vault)?;
        self.stats.submissions.fetch_add(1, Ordering::Relaxed);

        let mut state = self.lock();
        let reverting = std::mem::take(&mut state.revert_next);

        let (status, tx_id) = if reverting {
            (ReceiptStatus::Reverted, None)
        } else {
            (ReceiptStatus::Success, self.execute(&mut state, &call, opts)?)
        };

        state.block_number += 1;
        let block_number = state.block_number;

        let mut seed = block_number.to_be_bytes().to_vec();
        seed.extend_from_slice(call.method().as_bytes());
        seed.extend_from_slice(opts.from.as_slice());
        let tx_hash = keccak256(&seed);

        state.receipts.insert(
            tx_hash,
            TransactionReceipt {
                tx_hash,
                status,
                block_number,
                tx_id,
            },
        );

        debug!("Sandbox mined {} in block {}", call.method(), block_number);
        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: B256) -> Result<TransactionReceipt> {
        self.delay().await;
        self.lock()
            .receipts
            .get(&tx_hash)
            .cloned()
            .ok_or_else(|| Error::Rpc(format!("Unknown transaction {}", tx_hash)))
    }
}

#[async_trait]
impl BalanceReader for SandboxVault {
    async fn native_balance(&self, account: Address) -> Result<U256> {
        if account == self.config.address {
            return Ok(self.lock().eth_balance);
        }
        Ok(self.account_balance(account))
    }

    async fn token_balance(&self, token: Address, account: Address) -> Result<U256> {
        let state = self.lock();
        let entry = state
            .tokens
            .get(&token)
            .ok_or_else(|| Error::Rpc(format!("execution reverted: {} is not a token", token)))?;
        Ok(entry.balances.get(&account).copied().unwrap_or_default())
    }

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata> {
        self.lock()
            .tokens
            .get(&token)
            .map(|t| t.metadata.clone())
            .ok_or_else(|| Error::Rpc(format!("execution reverted: {} is not a token", token)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const START: u64 = 1_700_000_000;

    struct Fixture {
        vault: SandboxVault,
        owner: DevSigner,
        broadcaster: Address,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(START));
        let owner = DevSigner::from_seed("owner");
        let broadcaster = Address::repeat_byte(0xbb);
        let vault = SandboxVault::new(
            SandboxConfig::new(owner.address(), broadcaster).with_timelock(3600),
            &owner,
            clock.clone(),
        );
        vault.fund_eth(U256::from(1_000u64));
        Fixture {
            vault,
            owner,
            broadcaster,
            clock,
        }
    }

    async fn request(f: &Fixture, amount: u64) -> TxId {
        let call = VaultCall::WithdrawEthRequest {
            to: Address::repeat_byte(7),
            amount: U256::from(amount),
        };
        let hash = f
            .vault
            .submit(f.vault.address(), call, &TxOptions::sender(f.owner.address()))
            .await
            .unwrap();
        f.vault.receipt(hash).await.unwrap().tx_id.unwrap()
    }

    async fn signed(f: &Fixture, tx_id: TxId, action: MetaTxAction, deadline: u64) -> SignedMetaTx {
        let params = MetaTxParams {
            deadline,
            max_gas_price: gwei(50),
        };
        let payload = f
            .vault
            .unsigned_meta_tx(f.vault.address(), tx_id, action, params)
            .await
            .unwrap();
        SignedMetaTx {
            signature: f.owner.sign_digest(&payload.message),
            payload,
        }
    }

    #[tokio::test]
    async fn test_timelock_release() {
        let f = fixture();
        let tx_id = request(&f, 400).await;
        let opts = TxOptions::sender(f.owner.address());

        f.clock.advance(3599);
        let early = f
            .vault
            .submit(f.vault.address(), VaultCall::ApproveWithdrawalAfterDelay { tx_id }, &opts)
            .await;
        assert!(matches!(early, Err(Error::NotReady { .. })));

        f.clock.advance(1);
        f.vault
            .submit(f.vault.address(), VaultCall::ApproveWithdrawalAfterDelay { tx_id }, &opts)
            .await
            .unwrap();

        assert_eq!(f.vault.operation(tx_id).unwrap().status, TxStatus::Completed);
        assert_eq!(f.vault.account_balance(Address::repeat_byte(7)), U256::from(400u64));
        assert_eq!(
            f.vault.eth_balance(f.vault.address()).await.unwrap(),
            U256::from(600u64)
        );
    }

    #[tokio::test]
    async fn test_request_above_balance_reverts() {
        let f = fixture();
        let call = VaultCall::WithdrawEthRequest {
            to: Address::repeat_byte(7),
            amount: U256::from(5_000u64),
        };
        let result = f
            .vault
            .submit(f.vault.address(), call, &TxOptions::sender(f.owner.address()))
            .await;
        assert!(matches!(result, Err(Error::TransactionReverted(_))));
    }

    #[tokio::test]
    async fn test_meta_tx_approval_by_broadcaster() {
        let f = fixture();
        let tx_id = request(&f, 100).await;
        let signed = signed(&f, tx_id, MetaTxAction::Approve, START + 600).await;

        // Owner cannot broadcast
        let as_owner = f
            .vault
            .submit(
                f.vault.address(),
                VaultCall::ApproveWithdrawalWithMetaTx(signed.clone()),
                &TxOptions::sender(f.owner.address()),
            )
            .await;
        assert!(matches!(as_owner, Err(Error::Unauthorized(_))));

        f.vault
            .submit(
                f.vault.address(),
                VaultCall::ApproveWithdrawalWithMetaTx(signed),
                &TxOptions::sender(f.broadcaster),
            )
            .await
            .unwrap();
        assert_eq!(f.vault.operation(tx_id).unwrap().status, TxStatus::Completed);
    }

    #[tokio::test]
    async fn test_meta_tx_expired() {
        let f = fixture();
        let tx_id = request(&f, 100).await;
        let signed = signed(&f, tx_id, MetaTxAction::Approve, START + 10).await;

        f.clock.advance(11);
        let result = f
            .vault
            .submit(
                f.vault.address(),
                VaultCall::ApproveWithdrawalWithMetaTx(signed),
                &TxOptions::sender(f.broadcaster),
            )
            .await;
        assert!(matches!(result, Err(Error::Expired { .. })));
    }

    #[tokio::test]
    async fn test_meta_tx_tampered_signature() {
        let f = fixture();
        let tx_id = request(&f, 100).await;
        let mut signed = signed(&f, tx_id, MetaTxAction::Cancel, START + 600).await;
        signed.signature = DevSigner::from_seed("mallory").sign_digest(&signed.payload.message);

        let result = f
            .vault
            .submit(
                f.vault.address(),
                VaultCall::CancelWithdrawalWithMetaTx(signed),
                &TxOptions::sender(f.broadcaster),
            )
            .await;
        assert!(matches!(result, Err(Error::InvalidSignature)));
        assert_eq!(f.vault.operation(tx_id).unwrap().status, TxStatus::Pending);
    }

    #[tokio::test]
    async fn test_meta_tx_gas_ceiling() {
        let f = fixture();
        let tx_id = request(&f, 100).await;
        let signed = signed(&f, tx_id, MetaTxAction::Approve, START + 600).await;

        let opts = TxOptions {
            from: f.broadcaster,
            gas_price: Some(gwei(51)),
        };
        let result = f
            .vault
            .submit(f.vault.address(), VaultCall::ApproveWithdrawalWithMetaTx(signed), &opts)
            .await;
        assert!(matches!(result, Err(Error::GasPriceTooHigh { .. })));
    }

    #[tokio::test]
    async fn test_token_withdrawal() {
        let f = fixture();
        let token = Address::repeat_byte(0x70);
        f.vault.add_token(
            token,
            TokenMetadata {
                name: "USD Coin".to_string(),
                symbol: "USDC".to_string(),
                decimals: 6,
                logo: None,
            },
            U256::from(5_000_000u64),
        );

        let opts = TxOptions::sender(f.owner.address());
        let call = VaultCall::WithdrawTokenRequest {
            token,
            to: Address::repeat_byte(7),
            amount: U256::from(1_000_000u64),
        };
        let hash = f.vault.submit(f.vault.address(), call, &opts).await.unwrap();
        let tx_id = f.vault.receipt(hash).await.unwrap().tx_id.unwrap();

        f.clock.advance(3600);
        f.vault
            .submit(f.vault.address(), VaultCall::ApproveWithdrawalAfterDelay { tx_id }, &opts)
            .await
            .unwrap();

        let vault_left = VaultReader::token_balance(&f.vault, f.vault.address(), token)
            .await
            .unwrap();
        assert_eq!(vault_left, U256::from(4_000_000u64));
        let received = BalanceReader::token_balance(&f.vault, token, Address::repeat_byte(7))
            .await
            .unwrap();
        assert_eq!(received, U256::from(1_000_000u64));
    }
}
