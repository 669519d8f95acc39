use log::{Level as LogLevel, LevelFilter, Log, Metadata, Record};
use pin_sweep::mock::MockGpio;
use pin_sweep::{PinSweep, SweepConfig};
use std::{cell::RefCell, sync::Once, time::Duration};

thread_local! {
    static LINES: RefCell<Vec<String>> = RefCell::new(Vec::new());
}

/// Collects the crate's info-level lines per test thread.
struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.target().starts_with("pin_sweep") && metadata.level() <= LogLevel::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            LINES.with(|lines| lines.borrow_mut().push(record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;
static INIT: Once = Once::new();

fn captured(gpio: &MockGpio, config: SweepConfig) -> Vec<String> {
    INIT.call_once(|| {
        log::set_logger(&LOGGER).unwrap();
        log::set_max_level(LevelFilter::Trace);
    });
    LINES.with(|lines| lines.borrow_mut().clear());

    PinSweep::new(gpio.clone(), config).unwrap().run().unwrap();

    LINES.with(|lines| lines.borrow_mut().drain(..).collect())
}

fn snapshot(pin: u32, value: &str) -> String {
    format!(
        r#"{{"gpio":{},"path":"mock/gpio{}","direction":"out","value":{}}}"#,
        pin, pin, value
    )
}

#[test]
fn test_reset_all_logs_snapshot_then_done() {
    let lines = captured(&MockGpio::new(), SweepConfig::reset_all());

    let expected: Vec<String> = (0..=27)
        .flat_map(|pin| [snapshot(pin, "null"), format!("pin {} done", pin)])
        .collect();
    assert_eq!(lines, expected);
}

#[test]
fn test_drive_high_logs_on_then_done_without_snapshots() {
    let lines = captured(&MockGpio::new(), SweepConfig::drive_high().hold(Duration::ZERO));

    let expected: Vec<String> = (0..=27)
        .map(|pin| format!("pin {} on", pin))
        .chain((0..=27).map(|pin| format!("pin {} done", pin)))
        .collect();
    assert_eq!(lines, expected);
    assert!(!lines.iter().any(|l| l.starts_with('{')));
}

#[test]
fn test_snapshot_is_taken_before_the_low_write() {
    let config = SweepConfig::drive_high()
        .pins(3, 4)
        .hold(Duration::ZERO)
        .snapshot(true);

    let lines = captured(&MockGpio::new(), config);

    // still high when logged, so the low write has not happened yet
    assert_eq!(
        lines,
        vec![
            "pin 3 on".to_string(),
            "pin 4 on".to_string(),
            snapshot(3, "1"),
            "pin 3 done".to_string(),
            snapshot(4, "1"),
            "pin 4 done".to_string(),
        ]
    );
}

#[test]
fn test_consecutive_runs_produce_the_same_log_sequence() {
    for config in [
        SweepConfig::reset_all(),
        SweepConfig::drive_high().hold(Duration::ZERO),
    ] {
        let gpio = MockGpio::new();
        let first = captured(&gpio, config.clone());
        let second = captured(&gpio, config);

        assert!(!first.is_empty());
        assert_eq!(first, second);
    }
}
