//! Bulk GPIO pin sweeps: acquire a range of pins as outputs, optionally drive
//! them high for a while, then lower and release every one of them.

pub mod config;
pub mod error;
pub mod gpio;
pub mod mock;
pub mod sweep;
pub mod turret;

pub use config::{CleanupPolicy, SweepConfig, SweepMode};
pub use error::{GpioError, SweepError, TurretError};
pub use gpio::{Direction, Gpio, GpioPin, Level, PinSnapshot, SysfsGpio, SysfsPin};
pub use sweep::{PinOutcome, PinSweep, SweepReport};

/// Installs the stdout logger used by the binaries. `LOG_LEVEL` selects the
/// verbosity, `info` by default.
pub fn init_logging() {
    use std::io::Write;

    env_logger::Builder::from_env(env_logger::Env::default().filter_or("LOG_LEVEL", "info"))
        .format(|buf, record| writeln!(buf, "{}: {}", record.level(), record.args()))
        .target(env_logger::Target::Stdout)
        .init();
}
