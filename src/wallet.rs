//! Connected wallet
//!
//! The account, active chain and signer that state-changing actions run as.

use alloy_primitives::Address;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{Error, Result};
use crate::metatx::signer::MessageSigner;

#[derive(Default)]
struct Connection {
    signer: Option<Arc<dyn MessageSigner>>,
    chain_id: Option<u64>,
}

/// Wallet connection state
#[derive(Default)]
pub struct WalletConnection {
    inner: RwLock<Connection>,
}

impl WalletConnection {
    /// No wallet connected
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn connected(signer: Arc<dyn MessageSigner>, chain_id: u64) -> Self {
        Self {
            inner: RwLock::new(Connection {
                signer: Some(signer),
                chain_id: Some(chain_id),
            }),
        }
    }

    /// Signer available but no active network
    pub fn without_chain(signer: Arc<dyn MessageSigner>) -> Self {
        Self {
            inner: RwLock::new(Connection {
                signer: Some(signer),
                chain_id: None,
            }),
        }
    }

    pub async fn connect(&self, signer: Arc<dyn MessageSigner>, chain_id: u64) {
        info!("Wallet {} connected on chain {}", signer.address(), chain_id);
        let mut inner = self.inner.write().await;
        inner.signer = Some(signer);
        inner.chain_id = Some(chain_id);
    }

    pub async fn disconnect(&self) {
        *self.inner.write().await = Connection::default();
        info!("Wallet disconnected");
    }

    pub async fn switch_chain(&self, chain_id: u64) {
        self.inner.write().await.chain_id = Some(chain_id);
    }

    /// Active account
    pub async fn account(&self) -> Result<Address> {
        Ok(self.signer().await?.address())
    }

    pub async fn signer(&self) -> Result<Arc<dyn MessageSigner>> {
        self.inner
            .read()
            .await
            .signer
            .clone()
            .ok_or(Error::WalletNotConnected)
    }

    /// Active chain; `ChainNotFound` when the wallet reports none
    pub async fn chain_id(&self) -> Result<u64> {
        let inner = self.inner.read().await;
        if inner.signer.is_none() {
            return Err(Error::WalletNotConnected);
        }
        inner.chain_id.ok_or(Error::ChainNotFound)
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.read().await.signer.is_some()
    }
}
