//! Meta-transaction signing and broadcasting
//!
//! The owner signs an approval or cancellation off-chain; later, any
//! connected broadcaster submits it. Signed payloads are persisted between
//! the two steps so they survive a restart.

use dashmap::DashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::storage::KeyValueStore;
use crate::tracker::{LoadingState, PendingTransactionTracker};
use crate::vault::client::VaultClient;
use crate::vault::types::{
    MetaTxAction, MetaTxKey, SignedMetaTx, TransactionReceipt, TxId, TxOptions, TxStatus,
};
use crate::wallet::WalletConnection;

use super::settings::MetaTxSettings;
use super::store::{SignedMetaTxStore, StoredMetaTx};

pub struct MetaTxCoordinator {
    client: Arc<VaultClient>,
    tracker: Arc<PendingTransactionTracker>,
    wallet: Arc<WalletConnection>,
    settings_store: Arc<dyn KeyValueStore>,
    default_settings: MetaTxSettings,
    signed: SignedMetaTxStore,
    /// Keys with a stored signature
    signed_keys: DashSet<MetaTxKey>,
    loading: Arc<LoadingState>,
    clock: Arc<dyn Clock>,
}

impl MetaTxCoordinator {
    pub fn new(
        client: Arc<VaultClient>,
        tracker: Arc<PendingTransactionTracker>,
        wallet: Arc<WalletConnection>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let signed = SignedMetaTxStore::new(store.clone(), client.address());
        let loading = tracker.loading().clone();
        Self {
            client,
            tracker,
            wallet,
            settings_store: store,
            default_settings: MetaTxSettings::default(),
            signed,
            signed_keys: DashSet::new(),
            loading,
            clock,
        }
    }

    /// Settings used until the operator saves their own
    pub fn with_default_settings(mut self, settings: MetaTxSettings) -> Self {
        self.default_settings = settings;
        self
    }

    /// Restore the signed flags from storage
    pub async fn hydrate(&self) -> Result<usize> {
        let stored = self.signed.list().await?;
        self.signed_keys.clear();
        for (key, _) in &stored {
            self.signed_keys.insert(*key);
        }
        debug!("Restored {} signed meta-transactions", stored.len());
        Ok(stored.len())
    }

    pub async fn settings(&self) -> Result<MetaTxSettings> {
        MetaTxSettings::load_or(self.settings_store.as_ref(), self.default_settings).await
    }

    pub async fn save_settings(&self, settings: &MetaTxSettings) -> Result<()> {
        settings.save(self.settings_store.as_ref()).await?;
        info!(
            "Meta-tx settings saved: deadline {}s, max gas {} gwei",
            settings.deadline,
            settings.max_gas_price_gwei()
        );
        Ok(())
    }

    /// Sign an approval or cancellation of `tx_id` with the connected wallet
    pub async fn sign(&self, tx_id: TxId, action: MetaTxAction) -> Result<StoredMetaTx> {
        let key = MetaTxKey::new(tx_id, action);
        let _guard = self.loading.begin_sign(key)?;

        let signer = self.wallet.signer().await?;
        let chain_id = self.wallet.chain_id().await?;
        if chain_id != self.client.chain_id() {
            warn!(
                "Signing {} on chain {} for a vault on chain {}",
                key,
                chain_id,
                self.client.chain_id()
            );
        }

        if let Some(record) = self.tracker.get(tx_id).await {
            if !record.is_pending() {
                return Err(Error::NotPending(tx_id));
            }
        }

        let settings = self.settings().await?;
        let now = self.clock.now();
        let params = settings.params_at(now)?;

        let payload = self
            .client
            .generate_unsigned_meta_tx(tx_id, action, params)
            .await?;

        if payload.signer != signer.address() {
            return Err(Error::Unauthorized(format!(
                "{} must be signed by {}, wallet is {}",
                key,
                payload.signer,
                signer.address()
            )));
        }

        let signature = signer.sign_message(&payload.message).await?;
        let stored = self
            .signed
            .put(SignedMetaTx { payload, signature }, now)
            .await?;
        self.signed_keys.insert(key);

        info!("Signed {} (deadline {})", key, params.deadline);
        Ok(stored)
    }

    /// Submit a previously signed meta-transaction from the connected wallet
    pub async fn broadcast(&self, tx_id: TxId, action: MetaTxAction) -> Result<TransactionReceipt> {
        let key = MetaTxKey::new(tx_id, action);
        let _guard = self.loading.begin_broadcast(key)?;

        let stored = self
            .signed
            .get(&key)
            .await?
            .ok_or_else(|| Error::NoSignedTransaction(key.to_string()))?;

        let account = self.wallet.account().await?;

        let receipt = self
            .client
            .submit_meta_tx(stored.signed, &TxOptions::sender(account))
            .await?
            .wait()
            .await?;

        info!("Broadcast {} in block {}", key, receipt.block_number);

        self.forget(tx_id).await;

        let status = match action {
            MetaTxAction::Approve => TxStatus::Completed,
            MetaTxAction::Cancel => TxStatus::Cancelled,
        };
        self.tracker.finalize(tx_id, status).await;
        if let Err(e) = self.tracker.refresh().await {
            warn!("Refresh after broadcast failed: {}", e);
        }

        Ok(receipt)
    }

    /// Drop both stored signatures of a withdrawal that left Pending
    pub async fn forget(&self, tx_id: TxId) {
        for action in [MetaTxAction::Approve, MetaTxAction::Cancel] {
            let key = MetaTxKey::new(tx_id, action);
            if let Err(e) = self.signed.remove(&key).await {
                warn!("Failed to drop stored {}: {}", key, e);
            }
            self.signed_keys.remove(&key);
        }
    }

    pub fn is_signed(&self, key: &MetaTxKey) -> bool {
        self.signed_keys.contains(key)
    }

    pub async fn list_signed(&self) -> Result<Vec<(MetaTxKey, StoredMetaTx)>> {
        self.signed.list().await
    }

    /// Discard a stored signature; returns whether one existed
    pub async fn clear_signed(&self, key: &MetaTxKey) -> Result<bool> {
        self.signed_keys.remove(key);
        self.signed.remove(key).await
    }

    pub async fn clear_all(&self) -> Result<()> {
        self.signed_keys.clear();
        self.signed.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::metatx::signer::DevSigner;
    use crate::storage::MemoryStore;
    use crate::tracker::DEFAULT_TIMELOCK_WINDOW_SECS;
    use crate::units::gwei;
    use crate::vault::sandbox::{SandboxConfig, SandboxVault};
    use alloy_primitives::{Address, U256};
    use std::time::Duration;

    const START: u64 = 1_700_000_000;

    struct Fixture {
        sandbox: Arc<SandboxVault>,
        client: Arc<VaultClient>,
        tracker: Arc<PendingTransactionTracker>,
        wallet: Arc<WalletConnection>,
        coordinator: Arc<MetaTxCoordinator>,
        owner: Arc<DevSigner>,
        broadcaster: Arc<DevSigner>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(START));
        let owner = Arc::new(DevSigner::from_seed("owner"));
        let broadcaster = Arc::new(DevSigner::from_seed("broadcaster"));
        let sandbox = Arc::new(SandboxVault::new(
            SandboxConfig::new(owner.address(), broadcaster.address()),
            &owner,
            clock.clone(),
        ));
        sandbox.fund_eth(U256::from(1_000u64));

        let client = Arc::new(VaultClient::new(
            sandbox.clone(),
            sandbox.clone(),
            sandbox.address(),
            sandbox.chain_id(),
        ));
        let tracker = Arc::new(PendingTransactionTracker::new(
            client.clone(),
            clock.clone(),
            Arc::new(LoadingState::new()),
            DEFAULT_TIMELOCK_WINDOW_SECS,
        ));
        let wallet = Arc::new(WalletConnection::connected(owner.clone(), sandbox.chain_id()));
        let coordinator = Arc::new(MetaTxCoordinator::new(
            client.clone(),
            tracker.clone(),
            wallet.clone(),
            Arc::new(MemoryStore::new()),
            clock,
        ));

        Fixture {
            sandbox,
            client,
            tracker,
            wallet,
            coordinator,
            owner,
            broadcaster,
        }
    }

    async fn request(f: &Fixture) -> TxId {
        let tx_id = f
            .client
            .withdraw_eth_request(
                Address::repeat_byte(9),
                U256::from(100u64),
                &TxOptions::sender(f.owner.address()),
            )
            .await
            .unwrap()
            .wait()
            .await
            .unwrap()
            .tx_id
            .unwrap();
        f.tracker.refresh().await.unwrap();
        tx_id
    }

    #[tokio::test]
    async fn test_sign_uses_default_deadline() {
        let f = fixture();
        let tx_id = request(&f).await;

        let stored = f.coordinator.sign(tx_id, MetaTxAction::Approve).await.unwrap();
        assert_eq!(stored.signed.payload.params.deadline, START + 3600);
        assert_eq!(stored.signed.payload.params.max_gas_price, gwei(50));
        assert_eq!(stored.metadata.timestamp, START);
        assert!(f
            .coordinator
            .is_signed(&MetaTxKey::new(tx_id, MetaTxAction::Approve)));
    }

    #[tokio::test]
    async fn test_sign_uses_stored_settings() {
        let f = fixture();
        f.sandbox.fund_eth(U256::from(10_000u64));
        f.coordinator
            .save_settings(&MetaTxSettings {
                deadline: 600,
                max_gas_price: gwei(30),
            })
            .await
            .unwrap();

        let mut tx_id = 0;
        while tx_id < 42 {
            tx_id = request(&f).await;
        }
        assert_eq!(tx_id, 42);

        let stored = f.coordinator.sign(42, MetaTxAction::Approve).await.unwrap();
        assert_eq!(stored.signed.payload.tx_id, 42);
        assert_eq!(stored.signed.payload.params.deadline, START + 600);
        assert_eq!(stored.signed.payload.params.max_gas_price, gwei(30));

        // Nothing signed for the cancel side
        let cancel = f.coordinator.broadcast(42, MetaTxAction::Cancel).await;
        assert!(matches!(cancel, Err(Error::NoSignedTransaction(key)) if key == "42-cancel"));
    }

    #[tokio::test]
    async fn test_broadcast_without_signature() {
        let f = fixture();
        let tx_id = request(&f).await;

        let result = f.coordinator.broadcast(tx_id, MetaTxAction::Approve).await;
        assert!(matches!(
            result,
            Err(Error::NoSignedTransaction(key)) if key == format!("{}-approve", tx_id)
        ));
        assert_eq!(f.sandbox.stats().submissions(), 1);
    }

    #[tokio::test]
    async fn test_sign_then_broadcast() {
        let f = fixture();
        let tx_id = request(&f).await;

        f.coordinator.sign(tx_id, MetaTxAction::Cancel).await.unwrap();

        // Switch to the broadcaster account
        f.wallet
            .connect(f.broadcaster.clone(), f.sandbox.chain_id())
            .await;
        f.coordinator
            .broadcast(tx_id, MetaTxAction::Cancel)
            .await
            .unwrap();

        let key = MetaTxKey::new(tx_id, MetaTxAction::Cancel);
        assert!(!f.coordinator.is_signed(&key));
        assert!(f.coordinator.list_signed().await.unwrap().is_empty());
        assert_eq!(
            f.tracker.get(tx_id).await.unwrap().status,
            TxStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_wallet_errors() {
        let f = fixture();
        let tx_id = request(&f).await;

        f.wallet.disconnect().await;
        let result = f.coordinator.sign(tx_id, MetaTxAction::Approve).await;
        assert!(matches!(result, Err(Error::WalletNotConnected)));

        let no_chain = Arc::new(WalletConnection::without_chain(f.owner.clone()));
        let coordinator = MetaTxCoordinator::new(
            f.client.clone(),
            f.tracker.clone(),
            no_chain,
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(START)),
        );
        let result = coordinator.sign(tx_id, MetaTxAction::Approve).await;
        assert!(matches!(result, Err(Error::ChainNotFound)));
    }

    #[tokio::test]
    async fn test_non_owner_cannot_sign() {
        let f = fixture();
        let tx_id = request(&f).await;

        f.wallet
            .connect(f.broadcaster.clone(), f.sandbox.chain_id())
            .await;
        let result = f.coordinator.sign(tx_id, MetaTxAction::Approve).await;
        assert!(matches!(result, Err(Error::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_sign_finalized_record() {
        let f = fixture();
        let tx_id = request(&f).await;
        f.tracker.cancel(tx_id, f.owner.address()).await.unwrap();

        let result = f.coordinator.sign(tx_id, MetaTxAction::Approve).await;
        assert!(matches!(result, Err(Error::NotPending(_))));
    }

    #[tokio::test]
    async fn test_concurrent_sign_same_key() {
        let f = fixture();
        let tx_id = request(&f).await;
        f.sandbox.set_latency(Duration::from_millis(20));

        let (a, b) = tokio::join!(
            f.coordinator.sign(tx_id, MetaTxAction::Approve),
            f.coordinator.sign(tx_id, MetaTxAction::Approve)
        );
        let in_progress = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(Error::OperationInProgress(_))))
            .count();
        assert_eq!(in_progress, 1);
        assert!(a.is_ok() || b.is_ok());

        // A different action is not blocked
        f.coordinator
            .sign(tx_id, MetaTxAction::Cancel)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_hydrate_restores_flags() {
        let f = fixture();
        let tx_id = request(&f).await;
        f.coordinator.sign(tx_id, MetaTxAction::Approve).await.unwrap();

        f.coordinator.signed_keys.clear();
        assert_eq!(f.coordinator.hydrate().await.unwrap(), 1);
        assert!(f
            .coordinator
            .is_signed(&MetaTxKey::new(tx_id, MetaTxAction::Approve)));
    }
}
