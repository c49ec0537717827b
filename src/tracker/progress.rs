//! Timelock progress

use serde::Serialize;

/// Window used when the contract's timelock period is unknown
pub const DEFAULT_TIMELOCK_WINDOW_SECS: u64 = 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimelockProgress {
    /// Percent of the timelock window elapsed, 0-100
    pub progress: f64,
    pub is_timelock_complete: bool,
    /// The release time has passed; approval is allowed
    pub is_ready: bool,
}

/// Progress of a timelock that ends at `release_time` and lasts `period` seconds
pub fn compute_progress(release_time: u64, now: u64, period: u64) -> TimelockProgress {
    let period = if period == 0 {
        DEFAULT_TIMELOCK_WINDOW_SECS
    } else {
        period
    };

    let start = release_time as f64 - period as f64;
    let elapsed = now as f64 - start;
    let progress = ((elapsed / period as f64) * 100.0).clamp(0.0, 100.0);

    TimelockProgress {
        progress,
        is_timelock_complete: progress >= 100.0,
        is_ready: now >= release_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: u64 = DEFAULT_TIMELOCK_WINDOW_SECS;

    #[test]
    fn test_boundaries() {
        let release = 1_000_000;

        let at_release = compute_progress(release, release, DAY);
        assert_eq!(at_release.progress, 100.0);
        assert!(at_release.is_timelock_complete);
        assert!(at_release.is_ready);

        let at_start = compute_progress(release, release - DAY, DAY);
        assert_eq!(at_start.progress, 0.0);
        assert!(!at_start.is_ready);

        let halfway = compute_progress(release, release - DAY / 2, DAY);
        assert!((halfway.progress - 50.0).abs() < 1e-9);
        assert!(!halfway.is_timelock_complete);
    }

    #[test]
    fn test_clamped() {
        let release = 1_000_000;
        assert_eq!(compute_progress(release, 0, DAY).progress, 0.0);
        assert_eq!(compute_progress(release, release + DAY, DAY).progress, 100.0);
    }

    #[test]
    fn test_uses_contract_period() {
        let release = 10_000;
        let p = compute_progress(release, release - 1_800, 3_600);
        assert!((p.progress - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_period_falls_back() {
        let p = compute_progress(DAY, 0, 0);
        assert_eq!(p.progress, 0.0);
    }
}
