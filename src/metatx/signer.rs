//! Wallet signing boundary
//!
//! `MessageSigner` is what the connected wallet provides. `DevSigner` is a
//! deterministic local signer for the sandbox and tests; its scheme is only
//! meaningful to `SandboxVault`, not to a real chain.

use alloy_primitives::{keccak256, Address, Bytes, B256};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Produces signatures over meta-transaction digests
#[async_trait]
pub trait MessageSigner: Send + Sync {
    /// Account the signatures belong to
    fn address(&self) -> Address;

    /// Sign a 32-byte message digest
    async fn sign_message(&self, message: &B256) -> Result<Bytes>;
}

/// Seed-derived signer
#[derive(Clone)]
pub struct DevSigner {
    secret: [u8; 32],
    address: Address,
}

impl DevSigner {
    pub fn from_seed(seed: &str) -> Self {
        let secret: [u8; 32] = Sha256::digest(seed.as_bytes()).into();
        let hash = keccak256(secret);
        Self {
            secret,
            address: Address::from_slice(&hash[12..]),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn sign_digest(&self, digest: &B256) -> Bytes {
        let mut hasher = Sha256::new();
        hasher.update(self.secret);
        hasher.update(digest.as_slice());
        Bytes::from(hasher.finalize().to_vec())
    }

    pub fn verify(&self, digest: &B256, signature: &[u8]) -> bool {
        self.sign_digest(digest).as_ref() == signature
    }
}

impl std::fmt::Debug for DevSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageSigner for DevSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_message(&self, message: &B256) -> Result<Bytes> {
        Ok(self.sign_digest(message))
    }
}
