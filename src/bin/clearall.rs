use anyhow::{Context, Result};
use log::debug;

use pin_sweep::{PinSweep, SweepConfig, SysfsGpio};

fn main() -> Result<()> {
    pin_sweep::init_logging();

    let gpio = SysfsGpio::new().context("cannot open GPIO sysfs interface")?;
    let report = PinSweep::new(gpio, SweepConfig::reset_all())?.run()?;

    let failed: Vec<u32> = report.failed_writes().collect();
    if !failed.is_empty() {
        debug!("pins that could not be driven low: {:?}", failed);
    }

    Ok(())
}
