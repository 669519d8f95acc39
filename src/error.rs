use std::{io, path::PathBuf};

use thiserror::Error;

/// Failures reported by a GPIO access layer.
#[derive(Error, Debug)]
pub enum GpioError {
    #[error("You do not have write access to the GPIO sysfs interface at {0}")]
    NoAccess(PathBuf),
    #[error("GPIO {pin}: {op} failed: {source}")]
    Io {
        pin: u32,
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("GPIO {0} is already acquired by this process")]
    Busy(u32),
    #[error("GPIO {0} did not appear after export")]
    ExportTimeout(u32),
    #[error("GPIO {0} has already been released")]
    Released(u32),
    #[error("GPIO {pin}: {reason}")]
    Rejected { pin: u32, reason: String },
}

impl GpioError {
    pub(crate) fn io(pin: u32, op: &'static str, source: io::Error) -> Self {
        GpioError::Io { pin, op, source }
    }
}

/// Failures that abort a sweep. Every variant names the pin it stopped at.
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("invalid pin range {first}..={last}")]
    InvalidRange { first: u32, last: u32 },
    #[error("failed to acquire pin {pin}")]
    Acquire {
        pin: u32,
        #[source]
        source: GpioError,
    },
    #[error("failed to drive pin {pin}")]
    Drive {
        pin: u32,
        #[source]
        source: GpioError,
    },
    #[error("failed to clean up pin {pin}")]
    Cleanup {
        pin: u32,
        #[source]
        source: GpioError,
    },
}

/// Failures of the turret controller.
#[derive(Error, Debug)]
pub enum TurretError {
    #[error("the turret has not been calibrated")]
    NotCalibrated,
    #[error(transparent)]
    Gpio(#[from] GpioError),
}

impl SweepError {
    /// The pin number the sweep stopped at, if any.
    pub fn pin(&self) -> Option<u32> {
        match self {
            SweepError::InvalidRange { .. } => None,
            SweepError::Acquire { pin, .. }
            | SweepError::Drive { pin, .. }
            | SweepError::Cleanup { pin, .. } => Some(*pin),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_error_names_the_pin() {
        let err = SweepError::Acquire {
            pin: 13,
            source: GpioError::Busy(13),
        };
        assert_eq!(err.pin(), Some(13));
        assert_eq!(err.to_string(), "failed to acquire pin 13");

        let range = SweepError::InvalidRange { first: 5, last: 2 };
        assert_eq!(range.pin(), None);
    }

    #[test]
    fn io_error_display_includes_operation() {
        let err = GpioError::io(4, "write value", io::Error::from(io::ErrorKind::PermissionDenied));
        let msg = err.to_string();
        assert!(msg.starts_with("GPIO 4: write value failed"));
    }
}
