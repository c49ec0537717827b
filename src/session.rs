//! Application session
//!
//! `VaultSession` owns every piece of client state for one vault: the
//! adapter, pending transaction tracker, meta-transaction coordinator,
//! token cache, wallet connection and notification sink. Each user-facing
//! operation reports its outcome as a notification and returns the result.

use alloy_primitives::{Address, U256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::metatx::{MetaTxCoordinator, MetaTxSettings, StoredMetaTx};
use crate::notify::{LogNotifier, Notification, Notifier};
use crate::storage::KeyValueStore;
use crate::tokens::{TokenCache, TokenState};
use crate::tracker::{
    LoadingState, PendingTransactionTracker, TimelockProgress, DEFAULT_TIMELOCK_WINDOW_SECS,
};
use crate::units::{format_amount, ETH_DECIMALS};
use crate::vault::client::VaultClient;
use crate::vault::preflight::{check_withdrawal, WithdrawalRequest};
use crate::vault::types::{
    ContractInfo, MetaTxAction, MetaTxKey, TransactionReceipt, TransactionRecord, TxId, TxOptions,
};
use crate::wallet::WalletConnection;

/// Session tunables
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    /// Progress window until the vault's timelock period is loaded
    pub fallback_timelock_secs: u64,
    pub meta_tx_defaults: MetaTxSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            fallback_timelock_secs: DEFAULT_TIMELOCK_WINDOW_SECS,
            meta_tx_defaults: MetaTxSettings::default(),
        }
    }
}

pub struct VaultSession {
    client: Arc<VaultClient>,
    tracker: Arc<PendingTransactionTracker>,
    meta_tx: Arc<MetaTxCoordinator>,
    tokens: Arc<TokenCache>,
    wallet: Arc<WalletConnection>,
    notifier: Arc<dyn Notifier>,
    eth_balance: RwLock<Option<U256>>,
    initialized: AtomicBool,
    shutdown: CancellationToken,
    poll_interval: Duration,
}

impl VaultSession {
    pub fn new(
        client: Arc<VaultClient>,
        wallet: Arc<WalletConnection>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        let loading = Arc::new(LoadingState::new());
        let tracker = Arc::new(PendingTransactionTracker::new(
            client.clone(),
            clock.clone(),
            loading,
            config.fallback_timelock_secs,
        ));
        let meta_tx = Arc::new(
            MetaTxCoordinator::new(
                client.clone(),
                tracker.clone(),
                wallet.clone(),
                store.clone(),
                clock,
            )
            .with_default_settings(config.meta_tx_defaults),
        );
        let tokens = Arc::new(TokenCache::new(store, client.clone()));

        Self {
            client,
            tracker,
            meta_tx,
            tokens,
            wallet,
            notifier: Arc::new(LogNotifier),
            eth_balance: RwLock::new(None),
            initialized: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            poll_interval: config.poll_interval,
        }
    }

    /// Route notifications to `notifier` instead of the log
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn client(&self) -> &Arc<VaultClient> {
        &self.client
    }

    pub fn tracker(&self) -> &Arc<PendingTransactionTracker> {
        &self.tracker
    }

    pub fn meta_tx(&self) -> &Arc<MetaTxCoordinator> {
        &self.meta_tx
    }

    pub fn token_cache(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    pub fn wallet(&self) -> &Arc<WalletConnection> {
        &self.wallet
    }

    pub fn loading(&self) -> &Arc<LoadingState> {
        self.tracker.loading()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn report<T>(&self, context: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.notifier.add_message(Notification::from_error(context, e));
        }
        result
    }

    /// Load persisted state, contract info and pending transactions
    ///
    /// On failure an error notification is emitted and the session stays
    /// uninitialized; call `retry_initialize` to try again.
    pub async fn initialize(&self) -> Result<()> {
        let result = self.load_all().await;
        if result.is_ok() {
            self.initialized.store(true, Ordering::Release);
            info!("Session ready for vault {}", self.client.address());
        }
        self.report("Failed to load vault", result)
    }

    pub async fn retry_initialize(&self) -> Result<()> {
        info!("Retrying session initialization");
        self.initialize().await
    }

    async fn load_all(&self) -> Result<()> {
        self.tokens.hydrate().await?;
        self.meta_tx.hydrate().await?;
        self.tracker.load_contract_info().await?;
        self.tracker.refresh().await?;
        self.refresh_balance().await?;
        Ok(())
    }

    /// Compare the wallet's chain with the vault's
    ///
    /// A mismatch (or no wallet chain) is reported as a warning; returns
    /// whether the chains match.
    pub async fn check_chain(&self) -> bool {
        let expected = self.client.chain_id();
        let problem = match self.wallet.chain_id().await {
            Ok(actual) if actual == expected => return true,
            Ok(actual) => Error::ChainMismatch { expected, actual },
            Err(e) => e,
        };

        self.notifier.add_message(Notification::warning(
            problem.title(),
            problem.to_string(),
        ));
        false
    }

    /// Refetch the vault's native balance
    pub async fn refresh_balance(&self) -> Result<U256> {
        let balance = self.client.get_eth_balance().await?;
        *self.eth_balance.write().await = Some(balance);
        debug!("Vault balance: {} ETH", format_amount(balance, ETH_DECIMALS));
        Ok(balance)
    }

    /// Last observed native balance
    pub async fn eth_balance(&self) -> Option<U256> {
        *self.eth_balance.read().await
    }

    pub async fn contract_info(&self) -> ContractInfo {
        self.tracker.contract_info().await
    }

    pub async fn transactions(&self) -> Vec<TransactionRecord> {
        self.tracker.records().await
    }

    pub async fn pending_transactions(&self) -> Vec<TransactionRecord> {
        self.tracker.pending().await
    }

    pub async fn progress(&self, tx_id: TxId) -> Option<TimelockProgress> {
        self.tracker.progress(tx_id).await
    }

    /// Request a timelocked withdrawal from the vault
    pub async fn request_withdrawal(
        &self,
        request: WithdrawalRequest,
    ) -> Result<TransactionReceipt> {
        let result = self.request_withdrawal_inner(&request).await;
        if let Ok(receipt) = &result {
            let asset = match request.token {
                Some(token) => token.to_string(),
                None => "ETH".to_string(),
            };
            self.notifier.add_message(Notification::success(
                "Withdrawal requested",
                format!(
                    "Transaction {} for {} {} to {}",
                    receipt.tx_id.map(|id| id.to_string()).unwrap_or_default(),
                    request.amount,
                    asset,
                    request.to
                ),
            ));
        }
        self.report("Withdrawal request", result)
    }

    async fn request_withdrawal_inner(
        &self,
        request: &WithdrawalRequest,
    ) -> Result<TransactionReceipt> {
        let known_balance = match request.token {
            None => self.eth_balance().await,
            Some(token) => self
                .tokens
                .get(token)
                .await
                .filter(|state| state.error.is_none())
                .map(|state| state.balance),
        };
        check_withdrawal(request, known_balance)?;

        let account = self.wallet.account().await?;
        let opts = TxOptions::sender(account);

        let handle = match request.token {
            None => {
                self.client
                    .withdraw_eth_request(request.to, request.amount, &opts)
                    .await?
            }
            Some(token) => {
                self.client
                    .withdraw_token_request(token, request.to, request.amount, &opts)
                    .await?
            }
        };
        let receipt = handle.wait().await?;

        self.tracker.refresh().await?;
        Ok(receipt)
    }

    /// Approve a withdrawal after its timelock
    pub async fn approve(&self, tx_id: TxId) -> Result<TransactionReceipt> {
        let result: Result<TransactionReceipt> = async {
            let account = self.wallet.account().await?;
            let receipt = self.tracker.approve(tx_id, account).await?;
            self.meta_tx.forget(tx_id).await;
            self.after_release().await;
            Ok(receipt)
        }
        .await;

        if result.is_ok() {
            self.notifier.add_message(Notification::success(
                "Withdrawal approved",
                format!("Transaction {} completed", tx_id),
            ));
        }
        self.report(&format!("Approve transaction {}", tx_id), result)
    }

    /// Cancel a pending withdrawal
    pub async fn cancel(&self, tx_id: TxId) -> Result<TransactionReceipt> {
        let result: Result<TransactionReceipt> = async {
            let account = self.wallet.account().await?;
            let receipt = self.tracker.cancel(tx_id, account).await?;
            self.meta_tx.forget(tx_id).await;
            Ok(receipt)
        }
        .await;

        if result.is_ok() {
            self.notifier.add_message(Notification::success(
                "Withdrawal cancelled",
                format!("Transaction {} cancelled", tx_id),
            ));
        }
        self.report(&format!("Cancel transaction {}", tx_id), result)
    }

    /// Sign an approval or cancellation for later broadcast
    pub async fn sign_meta_tx(&self, tx_id: TxId, action: MetaTxAction) -> Result<StoredMetaTx> {
        let key = MetaTxKey::new(tx_id, action);
        let result = self.meta_tx.sign(tx_id, action).await;
        if let Ok(stored) = &result {
            self.notifier.add_message(Notification::success(
                "Meta-transaction signed",
                format!(
                    "{} signed, valid until {}",
                    key, stored.signed.payload.params.deadline
                ),
            ));
        }
        self.report(&format!("Sign {}", key), result)
    }

    /// Broadcast a stored signature from the connected wallet
    pub async fn broadcast_meta_tx(
        &self,
        tx_id: TxId,
        action: MetaTxAction,
    ) -> Result<TransactionReceipt> {
        let key = MetaTxKey::new(tx_id, action);
        let result = self.meta_tx.broadcast(tx_id, action).await;
        if result.is_ok() {
            if action == MetaTxAction::Approve {
                self.after_release().await;
            }
            self.notifier.add_message(Notification::success(
                "Meta-transaction broadcast",
                format!("{} confirmed", key),
            ));
        }
        self.report(&format!("Broadcast {}", key), result)
    }

    pub fn is_signed(&self, tx_id: TxId, action: MetaTxAction) -> bool {
        self.meta_tx.is_signed(&MetaTxKey::new(tx_id, action))
    }

    /// Balances change once funds leave the vault
    async fn after_release(&self) {
        if let Err(e) = self.refresh_balance().await {
            self.notifier
                .add_message(Notification::warning("Balance not refreshed", e.to_string()));
        }
        if let Err(e) = self.tokens.refresh_all().await {
            self.notifier
                .add_message(Notification::warning("Token balances not refreshed", e.to_string()));
        }
    }

    pub async fn tokens(&self) -> Vec<(Address, TokenState)> {
        self.tokens.tokens().await.into_iter().collect()
    }

    /// Track a token held by the vault
    pub async fn add_token(&self, token: Address) -> Result<TokenState> {
        let result = self.tokens.add_token(token).await;
        if let Ok(state) = &result {
            match &state.error {
                Some(err) => self.notifier.add_message(Notification::warning(
                    "Token added with errors",
                    format!("{}: {}", token, err),
                )),
                None => self.notifier.add_message(Notification::info(
                    "Token added",
                    match &state.metadata {
                        Some(meta) => format!(
                            "{} ({}), balance {}",
                            meta.symbol,
                            token,
                            format_amount(state.balance, meta.decimals)
                        ),
                        None => token.to_string(),
                    },
                )),
            }
        }
        self.report(&format!("Add token {}", token), result)
    }

    pub async fn remove_token(&self, token: Address) -> Result<bool> {
        let result = self.tokens.remove_token(token).await;
        self.report(&format!("Remove token {}", token), result)
    }

    pub async fn refresh_tokens(&self) -> Result<()> {
        let result = self.tokens.refresh_all().await;
        self.report("Refresh token balances", result)
    }

    /// Drop cached transactions and tokens
    pub async fn clear_cache(&self) -> Result<()> {
        self.tracker.clear().await;
        let result = self.tokens.clear().await;
        self.report("Clear cache", result)
    }

    /// Start polling pending transactions until `shutdown`
    pub fn start_background(&self) -> JoinHandle<()> {
        self.tracker
            .spawn_auto_refresh(self.poll_interval, self.shutdown.child_token())
    }

    /// Stop background work
    pub fn shutdown(&self) {
        info!("Session shutting down");
        self.shutdown.cancel();
    }
}
