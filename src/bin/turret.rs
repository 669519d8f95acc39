use anyhow::{Context, Result};

use pin_sweep::{
    turret::{PingSensor, Turret, TurretConfig},
    Direction, Gpio, GpioPin, SysfsGpio, SysfsPin,
};

fn watch(turret: &mut Turret<SysfsPin, PingSensor<SysfsPin>>) -> Result<()> {
    turret.show_safe_timer()?;
    turret.calibrate()?;
    turret.arm()?;

    loop {
        turret.step()?;
    }
}

fn main() -> Result<()> {
    pin_sweep::init_logging();

    let config = TurretConfig::default();
    let mut gpio = SysfsGpio::new().context("cannot open GPIO sysfs interface")?;
    let pinger = gpio
        .acquire(config.pinger, Direction::OUT)
        .context("cannot acquire the rangefinder pin")?;

    let mut turret = Turret::setup(&mut gpio, PingSensor::new(pinger), config)?;
    let result = watch(&mut turret);

    let (sensor, teardown) = turret.teardown();
    let released = sensor.into_inner().release();

    result?;
    teardown?;
    released?;
    Ok(())
}
