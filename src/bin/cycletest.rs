use anyhow::{Context, Result};

use pin_sweep::{PinSweep, SweepConfig, SysfsGpio};

fn main() -> Result<()> {
    pin_sweep::init_logging();

    let gpio = SysfsGpio::new().context("cannot open GPIO sysfs interface")?;
    PinSweep::new(gpio, SweepConfig::drive_high())?.run()?;

    Ok(())
}
