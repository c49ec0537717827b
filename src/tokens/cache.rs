//! Tracked token cache
//!
//! Map of token address to balance and metadata for the vault, persisted
//! under `simpleVault.trackedTokens`. Every mutation rewrites the full map.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::storage::{load_json, save_json, KeyValueStore, TRACKED_TOKENS_KEY};
use crate::tokens::balances::BalanceReader;
use crate::units::decimal_u256;
use crate::vault::client::VaultClient;
use crate::vault::types::TokenMetadata;

/// Cached state of one tracked token
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenState {
    #[serde(with = "decimal_u256")]
    pub balance: U256,
    #[serde(default)]
    pub metadata: Option<TokenMetadata>,
    #[serde(default)]
    pub loading: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Where tracked balances come from
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn balance(&self, token: Address) -> Result<U256>;

    async fn metadata(&self, token: Address) -> Result<TokenMetadata>;
}

/// Balances held by the vault itself
#[async_trait]
impl TokenSource for VaultClient {
    async fn balance(&self, token: Address) -> Result<U256> {
        self.get_token_balance(token).await
    }

    async fn metadata(&self, token: Address) -> Result<TokenMetadata> {
        self.get_token_metadata(token).await
    }
}

/// Balances held by an arbitrary account, read straight from the chain
pub struct AccountTokens {
    reader: Arc<dyn BalanceReader>,
    account: Address,
}

impl AccountTokens {
    pub fn new(reader: Arc<dyn BalanceReader>, account: Address) -> Self {
        Self { reader, account }
    }
}

#[async_trait]
impl TokenSource for AccountTokens {
    async fn balance(&self, token: Address) -> Result<U256> {
        self.reader.token_balance(token, self.account).await
    }

    async fn metadata(&self, token: Address) -> Result<TokenMetadata> {
        self.reader.token_metadata(token).await
    }
}

/// Persisted token balance cache
pub struct TokenCache {
    store: Arc<dyn KeyValueStore>,
    source: Arc<dyn TokenSource>,
    tokens: RwLock<BTreeMap<Address, TokenState>>,
}

impl TokenCache {
    pub fn new(store: Arc<dyn KeyValueStore>, source: Arc<dyn TokenSource>) -> Self {
        Self {
            store,
            source,
            tokens: RwLock::new(BTreeMap::new()),
        }
    }

    /// Load the persisted map, replacing in-memory state
    ///
    /// Entries are never left loading after a restart.
    pub async fn hydrate(&self) -> Result<usize> {
        let stored: BTreeMap<String, TokenState> =
            load_json(self.store.as_ref(), TRACKED_TOKENS_KEY)
                .await?
                .unwrap_or_default();

        let mut tokens = BTreeMap::new();
        for (key, mut state) in stored {
            match key.parse::<Address>() {
                Ok(address) => {
                    state.loading = false;
                    tokens.insert(address, state);
                }
                Err(e) => warn!("Skipping tracked token with bad address {}: {}", key, e),
            }
        }

        let count = tokens.len();
        *self.tokens.write().await = tokens;

        info!("Hydrated {} tracked tokens", count);
        Ok(count)
    }

    pub async fn tokens(&self) -> BTreeMap<Address, TokenState> {
        self.tokens.read().await.clone()
    }

    pub async fn get(&self, token: Address) -> Option<TokenState> {
        self.tokens.read().await.get(&token).cloned()
    }

    pub async fn addresses(&self) -> Vec<Address> {
        self.tokens.read().await.keys().copied().collect()
    }

    /// Start tracking a token and fetch its balance
    ///
    /// Metadata is fetched only when not already cached. Fetch failures are
    /// recorded on the entry rather than returned.
    pub async fn add_token(&self, token: Address) -> Result<TokenState> {
        let cached_metadata = {
            let mut tokens = self.tokens.write().await;
            let entry = tokens.entry(token).or_default();
            entry.loading = true;
            entry.error = None;
            entry.metadata.clone()
        };

        let balance = self.source.balance(token).await;
        let metadata = match cached_metadata {
            Some(meta) => Ok(meta),
            None => self.source.metadata(token).await,
        };

        let state = {
            let mut tokens = self.tokens.write().await;
            // Removed while the fetch was in flight
            let Some(entry) = tokens.get_mut(&token) else {
                debug!("{} untracked before its fetch finished", token);
                return Err(Error::InvalidInput(format!("{} is no longer tracked", token)));
            };
            entry.loading = false;

            match balance {
                Ok(value) => entry.balance = value,
                Err(e) => {
                    warn!("Failed to fetch balance of {}: {}", token, e);
                    entry.error = Some(e.to_string());
                }
            }
            match metadata {
                Ok(meta) => entry.metadata = Some(meta),
                Err(e) => {
                    warn!("Failed to fetch metadata of {}: {}", token, e);
                    entry.error.get_or_insert_with(|| e.to_string());
                }
            }

            entry.clone()
        };

        self.persist().await?;
        debug!("Tracking {} (balance {})", token, state.balance);
        Ok(state)
    }

    /// Stop tracking a token; returns whether it was tracked
    pub async fn remove_token(&self, token: Address) -> Result<bool> {
        let removed = self.tokens.write().await.remove(&token).is_some();
        self.persist().await?;
        if removed {
            info!("Stopped tracking {}", token);
        }
        Ok(removed)
    }

    /// Refetch every tracked balance concurrently
    pub async fn refresh_all(&self) -> Result<()> {
        let addresses = self.addresses().await;

        let results = join_all(addresses.iter().map(|token| async move {
            (*token, self.source.balance(*token).await)
        }))
        .await;

        {
            let mut tokens = self.tokens.write().await;
            for (token, result) in results {
                // Removed while the fetch was in flight
                let Some(entry) = tokens.get_mut(&token) else {
                    continue;
                };
                match result {
                    Ok(balance) => {
                        entry.balance = balance;
                        entry.error = None;
                    }
                    Err(e) => entry.error = Some(e.to_string()),
                }
            }
        }

        self.persist().await
    }

    /// Drop every tracked token
    pub async fn clear(&self) -> Result<()> {
        self.tokens.write().await.clear();
        self.persist().await
    }

    async fn persist(&self) -> Result<()> {
        let snapshot: BTreeMap<String, TokenState> = self
            .tokens
            .read()
            .await
            .iter()
            .map(|(address, state)| (address.to_string(), state.clone()))
            .collect();
        save_json(self.store.as_ref(), TRACKED_TOKENS_KEY, &snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        metadata_calls: AtomicUsize,
        broken: Address,
    }

    impl FakeSource {
        fn new(broken: Address) -> Self {
            Self {
                metadata_calls: AtomicUsize::new(0),
                broken,
            }
        }
    }

    #[async_trait]
    impl TokenSource for FakeSource {
        async fn balance(&self, token: Address) -> Result<U256> {
            if token == self.broken {
                return Err(Error::Rpc("execution reverted".to_string()));
            }
            Ok(U256::from(token.as_slice()[19] as u64 * 1_000))
        }

        async fn metadata(&self, token: Address) -> Result<TokenMetadata> {
            self.metadata_calls.fetch_add(1, Ordering::SeqCst);
            if token == self.broken {
                return Err(Error::Rpc("execution reverted".to_string()));
            }
            Ok(TokenMetadata {
                name: "Test".to_string(),
                symbol: "TST".to_string(),
                decimals: 18,
                logo: None,
            })
        }
    }

    fn cache(store: Arc<MemoryStore>) -> (TokenCache, Arc<FakeSource>) {
        let source = Arc::new(FakeSource::new(Address::repeat_byte(0xff)));
        (TokenCache::new(store, source.clone()), source)
    }

    #[tokio::test]
    async fn test_round_trip_through_storage() {
        let store = Arc::new(MemoryStore::new());
        let (cache, _) = cache(store.clone());
        let token = Address::repeat_byte(2);

        cache.add_token(token).await.unwrap();

        let raw = store.get(TRACKED_TOKENS_KEY).await.unwrap().unwrap();
        assert!(raw.contains("\"2000\""));

        let (restored, _) = self::cache(store);
        assert_eq!(restored.hydrate().await.unwrap(), 1);
        let state = restored.get(token).await.unwrap();
        assert_eq!(state.balance, U256::from(2_000u64));
        assert!(!state.loading);
        assert_eq!(state.metadata.unwrap().symbol, "TST");
    }

    #[tokio::test]
    async fn test_hydrate_clears_loading_flag() {
        let store = Arc::new(MemoryStore::new());
        let token = Address::repeat_byte(3);
        let mut stored = BTreeMap::new();
        stored.insert(
            token.to_string(),
            TokenState {
                balance: U256::from(1u64),
                loading: true,
                ..Default::default()
            },
        );
        save_json(store.as_ref(), TRACKED_TOKENS_KEY, &stored)
            .await
            .unwrap();

        let (cache, _) = cache(store);
        cache.hydrate().await.unwrap();
        assert!(!cache.get(token).await.unwrap().loading);
    }

    #[tokio::test]
    async fn test_metadata_fetched_once() {
        let store = Arc::new(MemoryStore::new());
        let (cache, source) = cache(store);
        let token = Address::repeat_byte(4);

        cache.add_token(token).await.unwrap();
        cache.add_token(token).await.unwrap();
        assert_eq!(source.metadata_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_stored_on_entry() {
        let store = Arc::new(MemoryStore::new());
        let (cache, _) = cache(store);

        let state = cache.add_token(Address::repeat_byte(0xff)).await.unwrap();
        assert!(state.error.is_some());
        assert!(!state.loading);
        assert!(state.metadata.is_none());
    }

    #[tokio::test]
    async fn test_remove_deletes_from_memory_and_storage() {
        let store = Arc::new(MemoryStore::new());
        let (cache, _) = cache(store.clone());
        let token = Address::repeat_byte(5);

        cache.add_token(token).await.unwrap();
        assert!(cache.remove_token(token).await.unwrap());
        assert!(cache.get(token).await.is_none());

        let stored: BTreeMap<String, TokenState> = load_json(store.as_ref(), TRACKED_TOKENS_KEY)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_all() {
        let store = Arc::new(MemoryStore::new());
        let (cache, _) = cache(store);
        cache.add_token(Address::repeat_byte(6)).await.unwrap();
        cache.add_token(Address::repeat_byte(7)).await.unwrap();

        cache.refresh_all().await.unwrap();
        let tokens = cache.tokens().await;
        assert_eq!(tokens.len(), 2);
        assert!(tokens.values().all(|t| t.error.is_none()));
    }

    #[tokio::test]
    async fn test_account_tokens_reads_holder_balance() {
        use crate::clock::ManualClock;
        use crate::metatx::DevSigner;
        use crate::vault::sandbox::{SandboxConfig, SandboxVault};

        let owner = DevSigner::from_seed("owner");
        let sandbox = Arc::new(SandboxVault::new(
            SandboxConfig::new(owner.address(), Address::repeat_byte(0xbb)),
            &owner,
            Arc::new(ManualClock::new(0)),
        ));
        let token = Address::repeat_byte(0x0c);
        sandbox.add_token(
            token,
            TokenMetadata {
                name: "USD Coin".to_string(),
                symbol: "USDC".to_string(),
                decimals: 6,
                logo: None,
            },
            U256::from(42u64),
        );

        let source = Arc::new(AccountTokens::new(sandbox.clone(), sandbox.address()));
        let cache = TokenCache::new(Arc::new(MemoryStore::new()), source);
        let state = cache.add_token(token).await.unwrap();
        assert_eq!(state.balance, U256::from(42u64));
        assert_eq!(state.metadata.unwrap().symbol, "USDC");
    }

    struct SlowSource;

    #[async_trait]
    impl TokenSource for SlowSource {
        async fn balance(&self, _token: Address) -> Result<U256> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(U256::from(1u64))
        }

        async fn metadata(&self, _token: Address) -> Result<TokenMetadata> {
            Ok(TokenMetadata {
                name: "Slow".to_string(),
                symbol: "SLW".to_string(),
                decimals: 18,
                logo: None,
            })
        }
    }

    #[tokio::test]
    async fn test_remove_during_add_stays_removed() {
        let store = Arc::new(MemoryStore::new());
        let cache = TokenCache::new(store.clone(), Arc::new(SlowSource));
        let token = Address::repeat_byte(8);

        let (added, removed) = tokio::join!(cache.add_token(token), async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            cache.remove_token(token).await
        });

        assert!(removed.unwrap());
        assert!(matches!(added, Err(Error::InvalidInput(_))));
        assert!(cache.get(token).await.is_none());

        let stored: BTreeMap<String, TokenState> = load_json(store.as_ref(), TRACKED_TOKENS_KEY)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.is_empty());
    }
}
