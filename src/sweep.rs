use log::{debug, info, warn};
use std::thread;

use crate::{
    config::{CleanupPolicy, SweepConfig, SweepMode},
    error::{GpioError, SweepError},
    gpio::{Direction, Gpio, GpioPin, Level},
};

/// What happened to one pin during the cleanup pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinOutcome {
    pub gpio: u32,
    /// The low write was accepted by the driver.
    pub lowered: bool,
    /// The pin was switched to input. Always false when parking is off.
    pub parked: bool,
    pub released: bool,
}

/// Result of a completed sweep, in pin order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pins: Vec<PinOutcome>,
}

impl SweepReport {
    pub fn failed_writes(&self) -> impl Iterator<Item = u32> + '_ {
        self.pins.iter().filter(|p| !p.lowered).map(|p| p.gpio)
    }
}

/// Acquires a contiguous range of pins as outputs, optionally drives them
/// high for a while, then lowers and releases every one of them.
///
/// # Example
///
/// ```rust
/// use pin_sweep::{mock::MockGpio, PinSweep, SweepConfig};
///
/// let gpio = MockGpio::new();
/// let mut sweep = PinSweep::new(gpio.clone(), SweepConfig::reset_all()).unwrap();
/// let report = sweep.run().unwrap();
/// assert_eq!(report.pins.len(), 28);
/// ```
pub struct PinSweep<G: Gpio> {
    gpio: G,
    config: SweepConfig,
}

impl<G: Gpio> PinSweep<G> {
    pub fn new(gpio: G, config: SweepConfig) -> Result<Self, SweepError> {
        config.validate()?;
        Ok(PinSweep { gpio, config })
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn into_inner(self) -> G {
        self.gpio
    }

    /// Runs one sweep. Acquisition and drive errors stop the sweep and leave
    /// the pins acquired so far untouched. Cleanup errors follow the
    /// configured [`CleanupPolicy`].
    pub fn run(&mut self) -> Result<SweepReport, SweepError> {
        let pins = self.acquire_all()?;

        if self.config.mode == SweepMode::DriveHigh && !self.config.hold.is_zero() {
            debug!("holding {} pins for {:?}", pins.len(), self.config.hold);
            thread::sleep(self.config.hold);
        }

        self.cleanup_all(pins)
    }

    fn acquire_all(&mut self) -> Result<Vec<G::Pin>, SweepError> {
        let mut pins = Vec::new();

        for gpio in self.config.pin_numbers() {
            let mut pin = self
                .gpio
                .acquire(gpio, Direction::OUT)
                .map_err(|source| SweepError::Acquire { pin: gpio, source })?;

            if self.config.mode == SweepMode::DriveHigh {
                info!("pin {} on", gpio);
                pin.write_sync(Level::HIGH)
                    .map_err(|source| SweepError::Drive { pin: gpio, source })?;
            }

            pins.push(pin);
        }

        Ok(pins)
    }

    fn cleanup_all(&self, pins: Vec<G::Pin>) -> Result<SweepReport, SweepError> {
        let mut report = SweepReport::default();

        for mut pin in pins {
            let gpio = pin.gpio();

            if self.config.snapshot {
                match serde_json::to_string(&pin.snapshot()) {
                    Ok(json) => info!("{}", json),
                    Err(e) => warn!("pin {}: cannot serialize snapshot: {}", gpio, e),
                }
            }

            let lowered = self.guard(gpio, pin.write_sync(Level::LOW))?;
            let parked = self.config.park_inputs
                && self.guard(gpio, pin.set_direction(Direction::IN))?;

            let released = match pin.release() {
                Ok(()) => true,
                Err(source) if self.config.policy == CleanupPolicy::FailFast => {
                    return Err(SweepError::Cleanup { pin: gpio, source });
                }
                Err(e) => {
                    warn!("pin {}: release failed: {}", gpio, e);
                    false
                }
            };

            info!("pin {} done", gpio);
            report.pins.push(PinOutcome {
                gpio,
                lowered,
                parked,
                released,
            });
        }

        Ok(report)
    }

    /// Applies the cleanup policy to one cleanup step. Returns whether the
    /// step succeeded.
    fn guard(&self, gpio: u32, result: Result<(), GpioError>) -> Result<bool, SweepError> {
        match (result, self.config.policy) {
            (Ok(()), _) => Ok(true),
            (Err(e), CleanupPolicy::BestEffort) => {
                debug!("pin {}: ignoring cleanup error: {}", gpio, e);
                Ok(false)
            }
            (Err(source), CleanupPolicy::FailFast) => {
                Err(SweepError::Cleanup { pin: gpio, source })
            }
        }
    }
}
