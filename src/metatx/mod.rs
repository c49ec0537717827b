//! Owner-signed meta-transactions

pub mod coordinator;
pub mod settings;
pub mod signer;
pub mod store;

pub use coordinator::MetaTxCoordinator;
pub use settings::MetaTxSettings;
pub use signer::{DevSigner, MessageSigner};
pub use store::{SignedMetaTxStore, StoredMetaTx};
