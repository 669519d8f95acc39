use log::{debug, warn};
use serde::{Serialize, Serializer};
use std::{
    collections::HashSet,
    fs,
    io::{Read, Seek, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use crate::error::GpioError;

pub static SYSFS_ROOT: &str = "/sys/class/gpio";

const EXPORT_POLL: Duration = Duration::from_millis(10);
const EXPORT_TIMEOUT: Duration = Duration::from_secs(1);

/// Specifies the GPIO pin value in output mode.
///
/// * `LOW` - 0
/// * `HIGH` - 1
///
/// # Example
///
/// ```rust,no_run
/// use pin_sweep::{Direction, Gpio, GpioPin, Level, SysfsGpio};
///
/// let mut gpio = SysfsGpio::new().unwrap();
/// let mut pin = gpio.acquire(17, Direction::OUT).unwrap();
/// pin.write_sync(Level::HIGH).unwrap();
/// pin.release().unwrap();
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Level {
    LOW = 0,
    HIGH = 1,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::LOW => "0",
            Level::HIGH => "1",
        }
    }
}

impl Serialize for Level {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// Specifies the GPIO pin direction.
///
/// * `IN` - Input
/// * `OUT` - Output
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    IN,
    OUT,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::IN => "in",
            Direction::OUT => "out",
        }
    }
}

/// Identity and last known state of an acquired pin, as logged before cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PinSnapshot {
    pub gpio: u32,
    pub path: String,
    pub direction: Direction,
    pub value: Option<Level>,
}

/// A GPIO access layer able to hand out exclusive pin handles.
pub trait Gpio {
    type Pin: GpioPin;

    /// Requests exclusive control of `pin` and configures its direction.
    fn acquire(&mut self, pin: u32, direction: Direction) -> Result<Self::Pin, GpioError>;
}

/// An acquired GPIO line. Dropping a handle without calling [`GpioPin::release`]
/// leaves the line exported.
pub trait GpioPin {
    fn gpio(&self) -> u32;

    /// Sets the output level and returns once the driver has accepted it.
    fn write_sync(&mut self, level: Level) -> Result<(), GpioError>;

    /// Reads the current level of the line.
    fn read(&mut self) -> Result<Level, GpioError>;

    fn set_direction(&mut self, direction: Direction) -> Result<(), GpioError>;

    fn snapshot(&self) -> PinSnapshot;

    /// Hands the line back to the operating system.
    fn release(self) -> Result<(), GpioError>
    where
        Self: Sized;
}

fn check_write_access(root: &Path) -> Result<(), GpioError> {
    for name in ["export", "unexport"] {
        let path = root.join(name);
        let writable = fs::metadata(&path)
            .map(|m| !m.permissions().readonly())
            .unwrap_or(false);
        if !writable {
            return Err(GpioError::NoAccess(root.to_path_buf()));
        }
    }
    Ok(())
}

fn gpio_dir(root: &Path, gpio: u32) -> PathBuf {
    root.join(format!("gpio{}", gpio))
}

fn write_attr(path: &Path, gpio: u32, op: &'static str, contents: &str) -> Result<(), GpioError> {
    let mut f = fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| GpioError::io(gpio, op, e))?;
    f.rewind().map_err(|e| GpioError::io(gpio, op, e))?;
    f.write_all(contents.as_bytes())
        .map_err(|e| GpioError::io(gpio, op, e))
}

fn export_gpio(root: &Path, gpio: u32) -> Result<(), GpioError> {
    let dir = gpio_dir(root, gpio);
    if dir.exists() {
        warn!("GPIO {} is already exported, continuing anyway", gpio);
    } else {
        debug!("exporting GPIO {}", gpio);
        write_attr(&root.join("export"), gpio, "export", &gpio.to_string())?;
    }

    let value = dir.join("value");
    let start = Instant::now();
    while !value.exists() {
        if start.elapsed() >= EXPORT_TIMEOUT {
            return Err(GpioError::ExportTimeout(gpio));
        }
        thread::sleep(EXPORT_POLL);
    }

    Ok(())
}

fn unexport_gpio(root: &Path, gpio: u32) -> Result<(), GpioError> {
    if gpio_dir(root, gpio).exists() {
        debug!("unexporting GPIO {}", gpio);
        write_attr(&root.join("unexport"), gpio, "unexport", &gpio.to_string())?;
    }
    Ok(())
}

fn write_direction(root: &Path, gpio: u32, direction: Direction) -> Result<(), GpioError> {
    let path = gpio_dir(root, gpio).join("direction");
    write_attr(&path, gpio, "write direction", direction.as_str())
}

fn write_value(root: &Path, gpio: u32, value: Level) -> Result<(), GpioError> {
    let path = gpio_dir(root, gpio).join("value");
    write_attr(&path, gpio, "write value", value.as_str())
}

fn read_value(root: &Path, gpio: u32) -> Result<Level, GpioError> {
    let path = gpio_dir(root, gpio).join("value");
    let mut f = fs::OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|e| GpioError::io(gpio, "read value", e))?;
    let mut value = String::new();
    f.read_to_string(&mut value)
        .map_err(|e| GpioError::io(gpio, "read value", e))?;

    match value.trim() {
        "0" => Ok(Level::LOW),
        _ => Ok(Level::HIGH),
    }
}

// Arc/Mutex rather than Rc/RefCell so that SysfsGpio and its pins stay Send
// and can be moved to another thread, even though a sweep itself never does.
type Claims = Arc<Mutex<HashSet<u32>>>;

fn claims(set: &Claims) -> std::sync::MutexGuard<'_, HashSet<u32>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// GPIO access through the Linux sysfs interface.
///
/// # Example
///
/// ```rust,no_run
/// use pin_sweep::SysfsGpio;
///
/// let gpio = SysfsGpio::new().unwrap();
/// assert_eq!(gpio.root().to_str(), Some("/sys/class/gpio"));
/// ```
pub struct SysfsGpio {
    root: PathBuf,
    claimed: Claims,
}

impl SysfsGpio {
    /// Opens the default sysfs root, `/sys/class/gpio`.
    pub fn new() -> Result<Self, GpioError> {
        Self::with_root(SYSFS_ROOT)
    }

    /// Opens an alternative sysfs root. Fails if `export` or `unexport`
    /// cannot be written.
    pub fn with_root(root: impl Into<PathBuf>) -> Result<Self, GpioError> {
        let root = root.into();
        check_write_access(&root)?;
        Ok(SysfsGpio {
            root,
            claimed: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Gpio for SysfsGpio {
    type Pin = SysfsPin;

    fn acquire(&mut self, pin: u32, direction: Direction) -> Result<SysfsPin, GpioError> {
        if !claims(&self.claimed).insert(pin) {
            return Err(GpioError::Busy(pin));
        }

        let setup = export_gpio(&self.root, pin)
            .and_then(|_| write_direction(&self.root, pin, direction));
        if let Err(e) = setup {
            claims(&self.claimed).remove(&pin);
            return Err(e);
        }

        Ok(SysfsPin {
            gpio: pin,
            root: self.root.clone(),
            direction,
            value: None,
            claimed: Arc::clone(&self.claimed),
        })
    }
}

/// A line exported through sysfs.
#[derive(Debug)]
pub struct SysfsPin {
    gpio: u32,
    root: PathBuf,
    direction: Direction,
    value: Option<Level>,
    claimed: Claims,
}

impl GpioPin for SysfsPin {
    fn gpio(&self) -> u32 {
        self.gpio
    }

    fn write_sync(&mut self, level: Level) -> Result<(), GpioError> {
        write_value(&self.root, self.gpio, level)?;
        self.value = Some(level);
        Ok(())
    }

    fn read(&mut self) -> Result<Level, GpioError> {
        read_value(&self.root, self.gpio)
    }

    fn set_direction(&mut self, direction: Direction) -> Result<(), GpioError> {
        write_direction(&self.root, self.gpio, direction)?;
        self.direction = direction;
        Ok(())
    }

    fn snapshot(&self) -> PinSnapshot {
        PinSnapshot {
            gpio: self.gpio,
            path: gpio_dir(&self.root, self.gpio).display().to_string(),
            direction: self.direction,
            value: self.value,
        }
    }

    fn release(self) -> Result<(), GpioError> {
        let result = unexport_gpio(&self.root, self.gpio);
        claims(&self.claimed).remove(&self.gpio);
        result
    }
}
