//! Ultrasonic sentry turret: blink an arming countdown, calibrate a ping
//! rangefinder against the empty scene, then fire the trigger output in
//! bursts whenever two consecutive samples stray from the calibration by more
//! than the threshold.

use chrono::Local;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use std::{
    thread,
    time::{Duration, Instant},
};

use crate::{
    error::{GpioError, TurretError},
    gpio::{Direction, Gpio, GpioPin, Level},
};

pub const ARMING: u32 = 18;
pub const CALIBRATING: u32 = 23;
pub const ARMED: u32 = 24;
pub const PINGER: u32 = 20;
pub const TRIGGER: u32 = 21;

const PING_PULSE: Duration = Duration::from_micros(5);
const ECHO_TIMEOUT: Duration = Duration::from_millis(50);
const ECHO_US_PER_CM: u128 = 20;

/// Number of readings and the pause after each one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sampling {
    pub readings: usize,
    pub delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurretConfig {
    pub arming: u32,
    pub calibrating: u32,
    pub armed: u32,
    pub trigger: u32,
    pub pinger: u32,
    pub calibration: Sampling,
    /// First look taken on every loop iteration.
    pub watch: Sampling,
    /// Second look taken only when the first one wants to fire.
    pub confirm: Sampling,
    /// Multiple of the calibration stdev a sample must exceed to fire.
    pub fire_threshold: f32,
    pub burst: Duration,
    pub blink_unit: Duration,
    pub blink_pause: Duration,
    pub loop_delay: Duration,
    pub settle: Duration,
}

impl Default for TurretConfig {
    fn default() -> Self {
        TurretConfig {
            arming: ARMING,
            calibrating: CALIBRATING,
            armed: ARMED,
            trigger: TRIGGER,
            pinger: PINGER,
            calibration: Sampling {
                readings: 100,
                delay: Duration::from_millis(3),
            },
            watch: Sampling {
                readings: 5,
                delay: Duration::from_millis(3),
            },
            confirm: Sampling {
                readings: 15,
                delay: Duration::from_millis(1),
            },
            fire_threshold: 2.0,
            burst: Duration::from_millis(5000),
            blink_unit: Duration::from_millis(200),
            blink_pause: Duration::from_millis(500),
            loop_delay: Duration::from_millis(15),
            settle: Duration::from_millis(30),
        }
    }
}

impl TurretConfig {
    /// Same pins and sample sizes with every pause set to zero.
    pub fn without_delays(mut self) -> Self {
        for d in [
            &mut self.calibration.delay,
            &mut self.watch.delay,
            &mut self.confirm.delay,
            &mut self.burst,
            &mut self.blink_unit,
            &mut self.blink_pause,
            &mut self.loop_delay,
            &mut self.settle,
        ] {
            *d = Duration::ZERO;
        }
        self
    }
}

/// Mean and population standard deviation of a set of distance readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Stats {
    pub n: usize,
    pub mean: f32,
    pub stdev: f32,
}

impl Stats {
    /// All zero for an empty slice.
    pub fn from_readings(readings: &[u32]) -> Stats {
        if readings.is_empty() {
            return Stats::default();
        }

        let n = readings.len() as f32;
        let mean = readings.iter().map(|&r| r as f32).sum::<f32>() / n;
        let variance = readings
            .iter()
            .map(|&r| (r as f32 - mean).powi(2))
            .sum::<f32>()
            / n;

        Stats {
            n: readings.len(),
            mean,
            stdev: variance.sqrt(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FireDecision {
    pub should_fire: bool,
    /// Whole centimetres between the observed and calibrated means.
    pub delta: f32,
    pub threshold: f32,
}

/// Fires when the observed mean differs from the calibrated mean by more than
/// `factor` calibration standard deviations. The difference is truncated to
/// whole centimetres first.
pub fn fire_decision(calibration: &Stats, observation: &Stats, factor: f32) -> FireDecision {
    let delta = (observation.mean - calibration.mean).trunc().abs();
    let threshold = factor * calibration.stdev;

    FireDecision {
        should_fire: delta > threshold,
        delta,
        threshold,
    }
}

/// A distance sensor. `None` means no usable echo.
pub trait Rangefinder {
    fn distance_cm(&mut self) -> Result<Option<u32>, GpioError>;
}

/// A single-pin ultrasonic ranger: a short high pulse on the pin, then the
/// same pin is read back and the echo width is timed.
pub struct PingSensor<P: GpioPin> {
    pin: P,
}

impl<P: GpioPin> PingSensor<P> {
    pub fn new(pin: P) -> Self {
        PingSensor { pin }
    }

    pub fn into_inner(self) -> P {
        self.pin
    }
}

impl<P: GpioPin> Rangefinder for PingSensor<P> {
    fn distance_cm(&mut self) -> Result<Option<u32>, GpioError> {
        self.pin.set_direction(Direction::OUT)?;
        self.pin.write_sync(Level::HIGH)?;
        thread::sleep(PING_PULSE);
        self.pin.write_sync(Level::LOW)?;
        let deadline = Instant::now() + ECHO_TIMEOUT;
        self.pin.set_direction(Direction::IN)?;

        while self.pin.read()? == Level::LOW {
            if Instant::now() > deadline {
                return Ok(None);
            }
        }
        let start = Instant::now();
        while self.pin.read()? == Level::HIGH {
            if Instant::now() > deadline {
                return Ok(None);
            }
        }

        let cm = (start.elapsed().as_micros() / ECHO_US_PER_CM) as u32;
        Ok((cm > 0).then_some(cm))
    }
}

/// Takes `sampling.readings` readings. A missed echo throws away the readings
/// taken so far and starts over.
pub fn collect_sample<R: Rangefinder>(
    sensor: &mut R,
    sampling: Sampling,
) -> Result<Stats, GpioError> {
    let mut readings = Vec::with_capacity(sampling.readings);

    while readings.len() < sampling.readings {
        match sensor.distance_cm()? {
            Some(cm) => {
                readings.push(cm);
                thread::sleep(sampling.delay);
            }
            None => {
                debug!("no echo after {} readings, starting over", readings.len());
                readings.clear();
            }
        }
    }

    Ok(Stats::from_readings(&readings))
}

fn timestamp() -> String {
    Local::now().format("%a %b %e %H:%M:%S %Y").to_string()
}

fn log_event(event: &str, fields: Value) {
    let mut record = json!({ "event": event, "time": timestamp() });
    if let (Some(map), Value::Object(extra)) = (record.as_object_mut(), fields) {
        map.extend(extra);
    }
    info!("{}", record);
}

/// The turret's output lines plus its rangefinder.
pub struct Turret<P: GpioPin, R: Rangefinder> {
    trigger: P,
    arming: P,
    calibrating: P,
    armed: P,
    sensor: R,
    config: TurretConfig,
    calibration: Option<Stats>,
}

impl<P: GpioPin, R: Rangefinder> Turret<P, R> {
    /// Acquires the trigger and indicator pins as outputs, all driven low.
    pub fn setup<G: Gpio<Pin = P>>(
        gpio: &mut G,
        sensor: R,
        config: TurretConfig,
    ) -> Result<Self, GpioError> {
        let mut output = |pin: u32| -> Result<P, GpioError> {
            let mut p = gpio.acquire(pin, Direction::OUT)?;
            p.write_sync(Level::LOW)?;
            Ok(p)
        };

        let trigger = output(config.trigger)?;
        let arming = output(config.arming)?;
        let calibrating = output(config.calibrating)?;
        let armed = output(config.armed)?;
        thread::sleep(config.settle);

        Ok(Turret {
            trigger,
            arming,
            calibrating,
            armed,
            sensor,
            config,
            calibration: None,
        })
    }

    pub fn calibration(&self) -> Option<Stats> {
        self.calibration
    }

    /// Blinks the arming light three times slowly, twice faster, once fast.
    pub fn show_safe_timer(&mut self) -> Result<(), GpioError> {
        log_event("arming", json!({}));

        for i in (1..=3u32).rev() {
            for _ in 0..i {
                self.arming.write_sync(Level::HIGH)?;
                thread::sleep(self.config.blink_unit * i);
                self.arming.write_sync(Level::LOW)?;
                thread::sleep(self.config.blink_unit);
            }
            thread::sleep(self.config.blink_pause);
            self.arming.write_sync(Level::LOW)?;
        }

        Ok(())
    }

    /// Samples the empty scene with the calibrating light on.
    pub fn calibrate(&mut self) -> Result<Stats, GpioError> {
        log_event(
            "calibrating",
            json!({ "observations": self.config.calibration.readings }),
        );

        self.calibrating.write_sync(Level::HIGH)?;
        let stats = collect_sample(&mut self.sensor, self.config.calibration)?;
        self.calibrating.write_sync(Level::LOW)?;

        log_event(
            "calibration complete",
            json!({ "mean": stats.mean, "stdev": stats.stdev }),
        );
        self.calibration = Some(stats);
        Ok(stats)
    }

    pub fn arm(&mut self) -> Result<(), TurretError> {
        if self.calibration.is_none() {
            return Err(TurretError::NotCalibrated);
        }
        self.armed.write_sync(Level::HIGH)?;
        log_event("armed", json!({}));
        Ok(())
    }

    /// One watch cycle. Returns the confirming decision when the trigger
    /// fired.
    pub fn step(&mut self) -> Result<Option<FireDecision>, TurretError> {
        let calibration = self.calibration.ok_or(TurretError::NotCalibrated)?;
        let threshold = self.config.fire_threshold;

        thread::sleep(self.config.loop_delay);
        let first = collect_sample(&mut self.sensor, self.config.watch)?;
        let mut fired = None;

        if fire_decision(&calibration, &first, threshold).should_fire {
            let second = collect_sample(&mut self.sensor, self.config.confirm)?;
            let decision = fire_decision(&calibration, &second, threshold);

            if decision.should_fire {
                self.trigger.write_sync(Level::HIGH)?;
                log_event(
                    &format!("firing for {}ms", self.config.burst.as_millis()),
                    json!({
                        "threshold": decision.threshold,
                        "delta": decision.delta,
                        "observed": second.mean,
                        "expected": calibration.mean,
                    }),
                );
                thread::sleep(self.config.burst);
                fired = Some(decision);
            }
        }

        self.trigger.write_sync(Level::LOW)?;
        Ok(fired)
    }

    /// Drives every output low, switches it to input and releases it. Keeps
    /// going past failures and returns the first one; hands back the sensor.
    pub fn teardown(self) -> (R, Result<(), GpioError>) {
        log_event("process terminated", json!({}));

        let mut result = Ok(());
        for mut pin in [self.trigger, self.arming, self.calibrating, self.armed] {
            let gpio = pin.gpio();
            let step = pin
                .write_sync(Level::LOW)
                .and_then(|_| pin.set_direction(Direction::IN))
                .and_then(|_| pin.release());
            if let Err(e) = step {
                warn!("pin {}: teardown failed: {}", gpio, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        (self.sensor, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Event, MockGpio};
    use std::collections::VecDeque;

    struct Scripted(VecDeque<Option<u32>>);

    impl Scripted {
        fn new(readings: &[Option<u32>]) -> Self {
            Scripted(readings.iter().copied().collect())
        }
    }

    impl Rangefinder for Scripted {
        fn distance_cm(&mut self) -> Result<Option<u32>, GpioError> {
            self.0.pop_front().ok_or(GpioError::Rejected {
                pin: PINGER,
                reason: "no more readings".to_string(),
            })
        }
    }

    fn config() -> TurretConfig {
        let mut config = TurretConfig::default().without_delays();
        config.calibration.readings = 4;
        config
    }

    fn writes(gpio: &MockGpio, pin: u32) -> Vec<Level> {
        gpio.events_for(pin)
            .into_iter()
            .filter_map(|e| match e {
                Event::Write { level, .. } => Some(level),
                _ => None,
            })
            .collect()
    }

    fn calibrated(gpio: &MockGpio, readings: Vec<Option<u32>>) -> Turret<crate::mock::MockPin, Scripted> {
        // calibration 98, 100, 100, 102: mean 100, stdev ~1.41, threshold ~2.83
        let mut script = vec![Some(98), Some(100), Some(100), Some(102)];
        script.extend(readings);
        let mut turret = Turret::setup(&mut gpio.clone(), Scripted::new(&script), config()).unwrap();
        turret.calibrate().unwrap();
        turret.arm().unwrap();
        turret
    }

    #[test]
    fn stats_use_population_stdev() {
        let stats = Stats::from_readings(&[2, 4, 4, 4, 5, 5, 7, 9]);
        assert_eq!(stats.n, 8);
        assert_eq!(stats.mean, 5.0);
        assert_eq!(stats.stdev, 2.0);

        assert_eq!(Stats::from_readings(&[]), Stats::default());
        assert_eq!(Stats::from_readings(&[42]).stdev, 0.0);
    }

    #[test]
    fn fire_threshold_is_strict_and_symmetric() {
        let calibration = Stats {
            n: 100,
            mean: 100.0,
            stdev: 3.0,
        };
        let at = |mean: f32| Stats { n: 5, mean, stdev: 0.0 };

        let d = fire_decision(&calibration, &at(106.9), 2.0);
        assert_eq!(d.delta, 6.0);
        assert_eq!(d.threshold, 6.0);
        assert!(!d.should_fire);

        assert!(fire_decision(&calibration, &at(107.2), 2.0).should_fire);
        assert!(fire_decision(&calibration, &at(92.5), 2.0).should_fire);
        assert!(!fire_decision(&calibration, &at(100.0), 2.0).should_fire);
    }

    #[test]
    fn missed_echo_restarts_the_sample() {
        let mut sensor = Scripted::new(&[Some(10), None, Some(20), Some(30)]);
        let sampling = Sampling {
            readings: 2,
            delay: Duration::ZERO,
        };

        let stats = collect_sample(&mut sensor, sampling).unwrap();
        assert_eq!(stats.n, 2);
        assert_eq!(stats.mean, 25.0);
    }

    #[test]
    fn safe_timer_blinks_three_two_one() {
        let gpio = MockGpio::new();
        let mut turret = Turret::setup(&mut gpio.clone(), Scripted::new(&[]), config()).unwrap();
        turret.show_safe_timer().unwrap();

        let (h, l) = (Level::HIGH, Level::LOW);
        assert_eq!(
            writes(&gpio, ARMING),
            vec![l, h, l, h, l, h, l, l, h, l, h, l, l, h, l, l]
        );
    }

    #[test]
    fn setup_drives_outputs_low() {
        let gpio = MockGpio::new();
        Turret::setup(&mut gpio.clone(), Scripted::new(&[]), config()).unwrap();

        for pin in [TRIGGER, ARMING, CALIBRATING, ARMED] {
            assert_eq!(
                gpio.events_for(pin),
                vec![
                    Event::Acquire(pin, Direction::OUT),
                    Event::Write {
                        pin,
                        level: Level::LOW,
                        ok: true
                    },
                ]
            );
        }
    }

    #[test]
    fn calibration_lights_the_indicator_and_stores_stats() {
        let gpio = MockGpio::new();
        let turret = calibrated(&gpio, vec![]);

        let stats = turret.calibration().unwrap();
        assert_eq!(stats.n, 4);
        assert_eq!(stats.mean, 100.0);
        assert_eq!(writes(&gpio, CALIBRATING), vec![Level::LOW, Level::HIGH, Level::LOW]);
        assert_eq!(writes(&gpio, ARMED), vec![Level::LOW, Level::HIGH]);
    }

    #[test]
    fn arming_requires_calibration() {
        let gpio = MockGpio::new();
        let mut turret = Turret::setup(&mut gpio.clone(), Scripted::new(&[]), config()).unwrap();

        assert!(matches!(turret.arm(), Err(TurretError::NotCalibrated)));
        assert!(matches!(turret.step(), Err(TurretError::NotCalibrated)));
    }

    #[test]
    fn quiet_scene_does_not_fire() {
        let gpio = MockGpio::new();
        let mut turret = calibrated(&gpio, vec![Some(101); 5]);

        assert_eq!(turret.step().unwrap(), None);
        assert_eq!(writes(&gpio, TRIGGER), vec![Level::LOW, Level::LOW]);
    }

    #[test]
    fn confirmed_intruder_fires_a_burst() {
        let gpio = MockGpio::new();
        let mut turret = calibrated(&gpio, vec![Some(60); 5 + 15]);

        let decision = turret.step().unwrap().unwrap();
        assert!(decision.should_fire);
        assert_eq!(decision.delta, 40.0);
        assert_eq!(writes(&gpio, TRIGGER), vec![Level::LOW, Level::HIGH, Level::LOW]);
    }

    #[test]
    fn unconfirmed_reading_does_not_fire() {
        let gpio = MockGpio::new();
        let mut readings = vec![Some(60); 5];
        readings.extend(vec![Some(100); 15]);
        let mut turret = calibrated(&gpio, readings);

        assert_eq!(turret.step().unwrap(), None);
        assert_eq!(writes(&gpio, TRIGGER), vec![Level::LOW, Level::LOW]);
    }

    #[test]
    fn teardown_lowers_parks_and_releases_every_output() {
        let gpio = MockGpio::new();
        let turret = calibrated(&gpio, vec![]);
        let (_sensor, result) = turret.teardown();
        result.unwrap();

        for pin in [TRIGGER, ARMING, CALIBRATING, ARMED] {
            let events = gpio.events_for(pin);
            assert_eq!(
                events[events.len() - 3..],
                [
                    Event::Write {
                        pin,
                        level: Level::LOW,
                        ok: true
                    },
                    Event::SetDirection {
                        pin,
                        direction: Direction::IN,
                        ok: true
                    },
                    Event::Release(pin),
                ]
            );
            assert!(!gpio.is_held(pin));
        }
    }

    #[test]
    fn teardown_continues_past_a_failed_pin() {
        let gpio = MockGpio::new();
        gpio.fail_release(ARMING);
        let turret = Turret::setup(&mut gpio.clone(), Scripted::new(&[]), config()).unwrap();

        let (_sensor, result) = turret.teardown();
        assert!(matches!(result, Err(GpioError::Rejected { pin: ARMING, .. })));
        assert!(!gpio.is_held(ARMED));
    }

    #[test]
    fn ping_without_echo_times_out() {
        let mut gpio = MockGpio::new();
        let pin = gpio.acquire(PINGER, Direction::OUT).unwrap();
        let mut sensor = PingSensor::new(pin);

        let start = Instant::now();
        assert_eq!(sensor.distance_cm().unwrap(), None);
        assert!(start.elapsed() >= ECHO_TIMEOUT);
        assert_eq!(sensor.into_inner().snapshot().direction, Direction::IN);
    }
}
