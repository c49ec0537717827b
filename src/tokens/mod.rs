//! Token balances: the vault's tracked-token cache and wallet balance reads

pub mod balances;
pub mod cache;

pub use balances::{BalanceReader, WalletBalances, WalletSnapshot};
pub use cache::{AccountTokens, TokenCache, TokenSource, TokenState};
