use anyhow::{anyhow, Error};
use std::{fmt, str::FromStr, time::Duration};

use crate::error::SweepError;

pub const FIRST_PIN: u32 = 0;
pub const LAST_PIN: u32 = 27;
pub const HOLD: Duration = Duration::from_millis(1000);

/// What a sweep does between acquiring and cleaning up the pins.
///
/// * `ResetAll` - acquire every pin and go straight to cleanup
/// * `DriveHigh` - drive every pin high, hold, then clean up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepMode {
    ResetAll,
    DriveHigh,
}

/// How the cleanup pass treats a failed low write.
///
/// * `BestEffort` - discard the error and release the pin anyway
/// * `FailFast` - stop the sweep; the remaining pins stay exported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPolicy {
    BestEffort,
    FailFast,
}

impl CleanupPolicy {
    pub fn to_str(&self) -> &str {
        match self {
            CleanupPolicy::BestEffort => "best-effort",
            CleanupPolicy::FailFast => "fail-fast",
        }
    }
}

impl FromStr for CleanupPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "best-effort" => Ok(CleanupPolicy::BestEffort),
            "fail-fast" => Ok(CleanupPolicy::FailFast),
            _ => Err(anyhow!("Invalid cleanup policy: {}", s)),
        }
    }
}

impl fmt::Display for CleanupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_str())
    }
}

/// Parameters of one sweep.
///
/// # Example
///
/// ```rust
/// use pin_sweep::{CleanupPolicy, SweepConfig};
///
/// let config = SweepConfig::drive_high().pins(4, 7).policy(CleanupPolicy::BestEffort);
/// assert_eq!(config.pin_numbers().collect::<Vec<_>>(), vec![4, 5, 6, 7]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepConfig {
    pub first: u32,
    pub last: u32,
    pub mode: SweepMode,
    pub hold: Duration,
    pub policy: CleanupPolicy,
    pub snapshot: bool,
    pub park_inputs: bool,
}

impl SweepConfig {
    /// Lowers and releases pins 0..=27, ignoring failed writes and logging
    /// each handle before its cleanup write.
    pub fn reset_all() -> Self {
        SweepConfig {
            first: FIRST_PIN,
            last: LAST_PIN,
            mode: SweepMode::ResetAll,
            hold: Duration::ZERO,
            policy: CleanupPolicy::BestEffort,
            snapshot: true,
            park_inputs: false,
        }
    }

    /// Drives pins 0..=27 high for one second, then lowers and releases
    /// them, stopping at the first failed write.
    pub fn drive_high() -> Self {
        SweepConfig {
            first: FIRST_PIN,
            last: LAST_PIN,
            mode: SweepMode::DriveHigh,
            hold: HOLD,
            policy: CleanupPolicy::FailFast,
            snapshot: false,
            park_inputs: false,
        }
    }

    pub fn pins(mut self, first: u32, last: u32) -> Self {
        self.first = first;
        self.last = last;
        self
    }

    pub fn hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    pub fn policy(mut self, policy: CleanupPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn snapshot(mut self, snapshot: bool) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn park_inputs(mut self, park_inputs: bool) -> Self {
        self.park_inputs = park_inputs;
        self
    }

    pub fn validate(&self) -> Result<(), SweepError> {
        if self.first > self.last {
            return Err(SweepError::InvalidRange {
                first: self.first,
                last: self.last,
            });
        }
        Ok(())
    }

    /// Pin numbers in sweep order. Both ends are included.
    pub fn pin_numbers(&self) -> std::ops::RangeInclusive<u32> {
        self.first..=self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_cover_both_boundary_pins() {
        for config in [SweepConfig::reset_all(), SweepConfig::drive_high()] {
            let pins: Vec<u32> = config.pin_numbers().collect();
            assert_eq!(pins.len(), 28);
            assert_eq!(pins.first(), Some(&0));
            assert_eq!(pins.last(), Some(&27));
        }
    }

    #[test]
    fn presets_keep_their_policies() {
        assert_eq!(SweepConfig::reset_all().policy, CleanupPolicy::BestEffort);
        assert!(SweepConfig::reset_all().snapshot);
        assert_eq!(SweepConfig::drive_high().policy, CleanupPolicy::FailFast);
        assert_eq!(SweepConfig::drive_high().hold, Duration::from_millis(1000));
    }

    #[test]
    fn reversed_range_is_rejected() {
        let err = SweepConfig::reset_all().pins(9, 3).validate().unwrap_err();
        assert!(matches!(err, SweepError::InvalidRange { first: 9, last: 3 }));
        assert!(SweepConfig::reset_all().pins(5, 5).validate().is_ok());
    }

    #[test]
    fn policy_from_str() {
        assert_eq!(
            "best-effort".parse::<CleanupPolicy>().unwrap(),
            CleanupPolicy::BestEffort
        );
        assert_eq!(
            "fail-fast".parse::<CleanupPolicy>().unwrap(),
            CleanupPolicy::FailFast
        );
        assert!("sometimes".parse::<CleanupPolicy>().is_err());
    }
}
