//! Client-side tracking of withdrawal requests

pub mod loading;
pub mod pending;
pub mod progress;

pub use loading::{LoadingGuard, LoadingState};
pub use pending::PendingTransactionTracker;
pub use progress::{compute_progress, TimelockProgress, DEFAULT_TIMELOCK_WINDOW_SECS};
