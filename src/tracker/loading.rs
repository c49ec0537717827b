//! Per-operation loading state
//!
//! One set per operation family. An entry exists exactly while the guarded
//! call is running; the guard removes it on every exit path.

use dashmap::DashSet;
use std::fmt::{self, Debug, Display};
use std::hash::Hash;
use tracing::debug;

use crate::error::{Error, Result};
use crate::vault::types::{MetaTxKey, TxId};

/// In-flight operations, observable by readers
#[derive(Default)]
pub struct LoadingState {
    approval: DashSet<TxId>,
    cancellation: DashSet<TxId>,
    meta_tx_sign: DashSet<MetaTxKey>,
    meta_tx_broadcast: DashSet<MetaTxKey>,
}

/// Clears its loading entry when dropped
pub struct LoadingGuard<'a, K: Eq + Hash> {
    set: &'a DashSet<K>,
    key: K,
}

impl<K: Eq + Hash + Debug> Debug for LoadingGuard<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadingGuard").field("key", &self.key).finish()
    }
}

impl<K: Eq + Hash> Drop for LoadingGuard<'_, K> {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

fn acquire<'a, K>(set: &'a DashSet<K>, key: K, operation: &str) -> Result<LoadingGuard<'a, K>>
where
    K: Eq + Hash + Clone + Display,
{
    if !set.insert(key.clone()) {
        return Err(Error::OperationInProgress(format!("{} {}", operation, key)));
    }
    debug!("{} {} started", operation, key);
    Ok(LoadingGuard { set, key })
}

impl LoadingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_approval(&self, tx_id: TxId) -> Result<LoadingGuard<'_, TxId>> {
        acquire(&self.approval, tx_id, "approval")
    }

    pub fn begin_cancellation(&self, tx_id: TxId) -> Result<LoadingGuard<'_, TxId>> {
        acquire(&self.cancellation, tx_id, "cancellation")
    }

    pub fn begin_sign(&self, key: MetaTxKey) -> Result<LoadingGuard<'_, MetaTxKey>> {
        acquire(&self.meta_tx_sign, key, "meta-tx signing")
    }

    pub fn begin_broadcast(&self, key: MetaTxKey) -> Result<LoadingGuard<'_, MetaTxKey>> {
        acquire(&self.meta_tx_broadcast, key, "meta-tx broadcast")
    }

    pub fn is_approving(&self, tx_id: TxId) -> bool {
        self.approval.contains(&tx_id)
    }

    pub fn is_cancelling(&self, tx_id: TxId) -> bool {
        self.cancellation.contains(&tx_id)
    }

    pub fn is_signing(&self, key: &MetaTxKey) -> bool {
        self.meta_tx_sign.contains(key)
    }

    pub fn is_broadcasting(&self, key: &MetaTxKey) -> bool {
        self.meta_tx_broadcast.contains(key)
    }

    /// Nothing in flight
    pub fn is_idle(&self) -> bool {
        self.approval.is_empty()
            && self.cancellation.is_empty()
            && self.meta_tx_sign.is_empty()
            && self.meta_tx_broadcast.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::types::MetaTxAction;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_guard_clears_on_drop() {
        let state = LoadingState::new();
        {
            let _guard = state.begin_approval(7).unwrap();
            assert!(state.is_approving(7));
            assert!(matches!(
                state.begin_approval(7),
                Err(Error::OperationInProgress(_))
            ));
            // Other ids and other families are independent
            assert!(state.begin_approval(8).is_ok());
            assert!(state.begin_cancellation(7).is_ok());
        }
        assert!(state.is_idle());
    }

    #[test]
    fn test_meta_tx_keys_are_per_action() {
        let state = LoadingState::new();
        let approve = MetaTxKey::new(1, MetaTxAction::Approve);
        let cancel = MetaTxKey::new(1, MetaTxAction::Cancel);

        let _a = state.begin_sign(approve).unwrap();
        let _b = state.begin_sign(cancel).unwrap();
        assert!(state.is_signing(&approve));
        assert!(state.begin_sign(approve).is_err());
        assert!(!state.is_broadcasting(&approve));
    }

    #[test]
    fn test_guard_released_on_error_path() {
        fn failing(state: &LoadingState) -> Result<()> {
            let _guard = state.begin_broadcast(MetaTxKey::new(3, MetaTxAction::Approve))?;
            Err(Error::InvalidSignature)
        }

        let state = LoadingState::new();
        assert!(failing(&state).is_err());
        assert!(state.is_idle());
    }

    #[test]
    fn test_guard_held_across_await() {
        let state = LoadingState::new();
        tokio_test::block_on(async {
            let guard = assert_ok!(state.begin_cancellation(9));
            tokio::task::yield_now().await;
            assert_err!(state.begin_cancellation(9));
            drop(guard);
        });
        assert!(!state.is_cancelling(9));
    }
}
