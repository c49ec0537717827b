//! Pending transaction tracker
//!
//! Keeps the client's view of in-flight withdrawals in step with the vault.
//! Pending entries are replaced wholesale on refresh; entries this client
//! approved or cancelled keep their terminal status until the list is
//! cleared.

use alloy_primitives::Address;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::vault::client::VaultClient;
use crate::vault::types::{
    ContractInfo, TransactionReceipt, TransactionRecord, TxId, TxOptions, TxStatus, VaultInfo,
};

use super::loading::LoadingState;
use super::progress::{compute_progress, TimelockProgress};

/// Resets the single-flight flag when the refresh ends or is dropped
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PendingTransactionTracker {
    client: Arc<VaultClient>,
    clock: Arc<dyn Clock>,
    loading: Arc<LoadingState>,
    records: RwLock<Vec<TransactionRecord>>,
    contract_info: RwLock<ContractInfo>,
    refreshing: AtomicBool,
    /// Progress window when contract info is not loaded
    fallback_period: u64,
}

impl PendingTransactionTracker {
    pub fn new(
        client: Arc<VaultClient>,
        clock: Arc<dyn Clock>,
        loading: Arc<LoadingState>,
        fallback_period: u64,
    ) -> Self {
        Self {
            client,
            clock,
            loading,
            records: RwLock::new(Vec::new()),
            contract_info: RwLock::new(ContractInfo::NotLoaded),
            refreshing: AtomicBool::new(false),
            fallback_period,
        }
    }

    pub fn loading(&self) -> &Arc<LoadingState> {
        &self.loading
    }

    pub async fn contract_info(&self) -> ContractInfo {
        self.contract_info.read().await.clone()
    }

    /// Read roles and timelock period from the vault
    pub async fn load_contract_info(&self) -> Result<VaultInfo> {
        let info = self.client.contract_info().await?;
        *self.contract_info.write().await = ContractInfo::Loaded(info.clone());
        Ok(info)
    }

    /// Refetch pending operations from the vault
    ///
    /// Returns `false` without fetching when a refresh is already running.
    pub async fn refresh(&self) -> Result<bool> {
        if self.refreshing.swap(true, Ordering::AcqRel) {
            debug!("Refresh already in flight, skipping");
            return Ok(false);
        }
        let _guard = RefreshGuard(&self.refreshing);

        let operations = self.client.get_pending_transactions().await?;
        let fetched: Vec<TransactionRecord> = operations
            .iter()
            .filter_map(TransactionRecord::from_operation)
            .collect();

        let mut records = self.records.write().await;
        let finalized: Vec<TransactionRecord> = records
            .iter()
            .filter(|r| r.status.is_terminal())
            .cloned()
            .collect();
        let finalized_ids: HashSet<TxId> = finalized.iter().map(|r| r.tx_id).collect();

        let mut next: Vec<TransactionRecord> = fetched
            .into_iter()
            .filter(|r| !finalized_ids.contains(&r.tx_id))
            .collect();
        next.extend(finalized);

        debug!(
            "Tracked {} pending of {} operations",
            next.iter().filter(|r| r.is_pending()).count(),
            operations.len()
        );
        *records = next;

        Ok(true)
    }

    /// Approve a withdrawal whose timelock has elapsed
    pub async fn approve(&self, tx_id: TxId, caller: Address) -> Result<TransactionReceipt> {
        let _guard = self.loading.begin_approval(tx_id)?;

        let info = self.load_contract_info().await?;
        if caller != info.owner {
            return Err(Error::Unauthorized(format!(
                "{} is not the vault owner",
                caller
            )));
        }

        if let Some(record) = self.get(tx_id).await {
            if record.status.is_terminal() {
                return Err(Error::NotPending(tx_id));
            }
            let now = self.clock.now();
            if now < record.release_time {
                return Err(Error::NotReady {
                    tx_id,
                    release_time: record.release_time,
                });
            }
        }

        let receipt = self
            .client
            .approve_withdrawal_after_delay(tx_id, &TxOptions::sender(caller))
            .await?
            .wait()
            .await?;

        info!("Withdrawal {} approved", tx_id);
        self.finalize(tx_id, TxStatus::Completed).await;
        self.refresh_after_write().await;

        Ok(receipt)
    }

    /// Cancel a pending withdrawal
    pub async fn cancel(&self, tx_id: TxId, caller: Address) -> Result<TransactionReceipt> {
        let _guard = self.loading.begin_cancellation(tx_id)?;

        let info = self.load_contract_info().await?;
        if caller != info.owner {
            return Err(Error::Unauthorized(format!(
                "{} is not the vault owner",
                caller
            )));
        }

        if let Some(record) = self.get(tx_id).await {
            if record.status.is_terminal() {
                return Err(Error::NotPending(tx_id));
            }
        }

        let receipt = self
            .client
            .cancel_withdrawal(tx_id, &TxOptions::sender(caller))
            .await?
            .wait()
            .await?;

        info!("Withdrawal {} cancelled", tx_id);
        self.finalize(tx_id, TxStatus::Cancelled).await;
        self.refresh_after_write().await;

        Ok(receipt)
    }

    /// Record a confirmed terminal status
    pub async fn finalize(&self, tx_id: TxId, status: TxStatus) {
        let mut records = self.records.write().await;
        if let Some(record) = records.iter_mut().find(|r| r.tx_id == tx_id) {
            record.status = status;
        }
    }

    async fn refresh_after_write(&self) {
        if let Err(e) = self.refresh().await {
            warn!("Refresh after confirmed transaction failed: {}", e);
        }
    }

    pub async fn records(&self) -> Vec<TransactionRecord> {
        self.records.read().await.clone()
    }

    pub async fn pending(&self) -> Vec<TransactionRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.is_pending())
            .cloned()
            .collect()
    }

    pub async fn get(&self, tx_id: TxId) -> Option<TransactionRecord> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.tx_id == tx_id)
            .cloned()
    }

    /// Timelock progress of a tracked record
    pub async fn progress(&self, tx_id: TxId) -> Option<TimelockProgress> {
        let record = self.get(tx_id).await?;
        let period = match &*self.contract_info.read().await {
            ContractInfo::Loaded(info) => info.timelock_period_secs,
            ContractInfo::NotLoaded => self.fallback_period,
        };
        Some(compute_progress(record.release_time, self.clock.now(), period))
    }

    /// Drop every tracked record
    pub async fn clear(&self) {
        self.records.write().await.clear();
        info!("Cleared tracked transactions");
    }

    /// Poll the vault until `cancel` fires
    ///
    /// A refresh still running at cancellation is dropped before it applies.
    pub fn spawn_auto_refresh(
        self: &Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);

        info!("Auto-refresh every {:?}", every);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Auto-refresh stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                debug!("Auto-refresh stopped mid-refresh");
                                break;
                            }
                            result = tracker.refresh() => {
                                if let Err(e) = result {
                                    warn!("Auto-refresh failed: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        })
    }
}
