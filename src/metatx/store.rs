//! Signed meta-transaction storage
//!
//! One JSON object per vault under `txManager.<vault>`, mapping
//! `"<txId>-<action>"` to the signed payload and its metadata.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::{load_json, save_json, KeyValueStore, TX_MANAGER_PREFIX};
use crate::vault::types::{MetaTxAction, MetaTxKey, SignedMetaTx, TxStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaTxMetadata {
    #[serde(rename = "type")]
    pub record_type: String,
    /// Unix seconds when signed
    pub timestamp: u64,
    pub action: MetaTxAction,
    pub broadcasted: bool,
    pub status: TxStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMetaTx {
    pub signed: SignedMetaTx,
    pub metadata: MetaTxMetadata,
}

type Entries = BTreeMap<String, StoredMetaTx>;

/// Signed payloads awaiting broadcast for one vault
pub struct SignedMetaTxStore {
    store: Arc<dyn KeyValueStore>,
    namespace: String,
    write_lock: Mutex<()>,
}

impl SignedMetaTxStore {
    pub fn new(store: Arc<dyn KeyValueStore>, vault: Address) -> Self {
        Self {
            store,
            namespace: format!("{}.{}", TX_MANAGER_PREFIX, vault),
            write_lock: Mutex::new(()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn load(&self) -> Result<Entries> {
        Ok(load_json(self.store.as_ref(), &self.namespace)
            .await?
            .unwrap_or_default())
    }

    async fn save(&self, entries: &Entries) -> Result<()> {
        if entries.is_empty() {
            return self.store.remove(&self.namespace).await;
        }
        save_json(self.store.as_ref(), &self.namespace, entries).await
    }

    /// Store a fresh signature, replacing any previous one for the same key
    pub async fn put(&self, signed: SignedMetaTx, timestamp: u64) -> Result<StoredMetaTx> {
        let _lock = self.write_lock.lock().await;
        let key = signed.key();
        let action = signed.action();

        let stored = StoredMetaTx {
            signed,
            metadata: MetaTxMetadata {
                record_type: action.record_type().to_string(),
                timestamp,
                action,
                broadcasted: false,
                status: TxStatus::Pending,
            },
        };

        let mut entries = self.load().await?;
        entries.insert(key.to_string(), stored.clone());
        self.save(&entries).await?;

        debug!("Stored signed meta-tx {} in {}", key, self.namespace);
        Ok(stored)
    }

    pub async fn get(&self, key: &MetaTxKey) -> Result<Option<StoredMetaTx>> {
        Ok(self.load().await?.remove(&key.to_string()))
    }

    /// Delete a stored signature; returns whether one existed
    pub async fn remove(&self, key: &MetaTxKey) -> Result<bool> {
        let _lock = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        let existed = entries.remove(&key.to_string()).is_some();
        if existed {
            self.save(&entries).await?;
        }
        Ok(existed)
    }

    /// Every stored signature, ordered by key
    pub async fn list(&self) -> Result<Vec<(MetaTxKey, StoredMetaTx)>> {
        let mut out = Vec::new();
        for (raw, stored) in self.load().await? {
            match raw.parse::<MetaTxKey>() {
                Ok(key) => out.push((key, stored)),
                Err(e) => warn!("Skipping stored meta-tx with bad key {}: {}", raw, e),
            }
        }
        out.sort_by_key(|(key, _)| *key);
        Ok(out)
    }

    pub async fn clear(&self) -> Result<()> {
        let _lock = self.write_lock.lock().await;
        self.store.remove(&self.namespace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::units::gwei;
    use crate::vault::types::{MetaTxParams, UnsignedMetaTx};
    use alloy_primitives::{Bytes, B256};

    fn signed(tx_id: u64, action: MetaTxAction) -> SignedMetaTx {
        SignedMetaTx {
            payload: UnsignedMetaTx {
                tx_id,
                action,
                vault: Address::repeat_byte(0x5b),
                chain_id: 1,
                signer: Address::repeat_byte(1),
                nonce: 0,
                params: MetaTxParams {
                    deadline: 100,
                    max_gas_price: gwei(50),
                },
                message: B256::repeat_byte(0xaa),
            },
            signature: Bytes::from_static(&[1, 2, 3]),
        }
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let backend = Arc::new(MemoryStore::new());
        let store = SignedMetaTxStore::new(backend.clone(), Address::repeat_byte(0x5b));
        let key = MetaTxKey::new(42, MetaTxAction::Approve);

        let stored = store.put(signed(42, MetaTxAction::Approve), 10).await.unwrap();
        assert_eq!(stored.metadata.record_type, "WITHDRAWAL_APPROVAL");
        assert!(!stored.metadata.broadcasted);

        let raw = backend.get(store.namespace()).await.unwrap().unwrap();
        assert!(raw.contains("\"42-approve\""));
        assert!(raw.contains("\"type\":\"WITHDRAWAL_APPROVAL\""));

        assert_eq!(store.get(&key).await.unwrap(), Some(stored));
        assert!(store.remove(&key).await.unwrap());
        assert!(store.get(&key).await.unwrap().is_none());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_approve_and_cancel_are_separate() {
        let store = SignedMetaTxStore::new(Arc::new(MemoryStore::new()), Address::ZERO);
        store.put(signed(1, MetaTxAction::Cancel), 0).await.unwrap();
        store.put(signed(1, MetaTxAction::Approve), 0).await.unwrap();
        store.put(signed(2, MetaTxAction::Approve), 0).await.unwrap();

        let keys: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k.to_string())
            .collect();
        assert_eq!(keys, vec!["1-approve", "1-cancel", "2-approve"]);
    }

    #[tokio::test]
    async fn test_namespaced_per_vault() {
        let backend = Arc::new(MemoryStore::new());
        let a = SignedMetaTxStore::new(backend.clone(), Address::repeat_byte(1));
        let b = SignedMetaTxStore::new(backend.clone(), Address::repeat_byte(2));

        a.put(signed(1, MetaTxAction::Approve), 0).await.unwrap();
        assert!(b.list().await.unwrap().is_empty());
        assert!(a.namespace().starts_with("txManager.0x"));
    }
}
