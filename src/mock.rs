//! A simulated GPIO layer that records every operation.
//!
//! Clones share the same state, so a test can keep one copy for inspection
//! while the sweep owns another.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    error::GpioError,
    gpio::{Direction, Gpio, GpioPin, Level, PinSnapshot},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Acquire(u32, Direction),
    Write { pin: u32, level: Level, ok: bool },
    SetDirection {
        pin: u32,
        direction: Direction,
        ok: bool,
    },
    Release(u32),
}

#[derive(Debug, Default)]
struct State {
    events: Vec<Event>,
    held: HashSet<u32>,
    levels: HashMap<u32, Level>,
    fail_acquire: HashSet<u32>,
    fail_write: HashSet<(u32, u8)>,
    fail_direction: HashSet<u32>,
    fail_release: HashSet<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct MockGpio {
    state: Arc<Mutex<State>>,
}

impl MockGpio {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes every acquire of `pin` fail.
    pub fn fail_acquire(&self, pin: u32) -> &Self {
        self.state().fail_acquire.insert(pin);
        self
    }

    /// Makes every write of `level` to `pin` fail.
    pub fn fail_write(&self, pin: u32, level: Level) -> &Self {
        self.state().fail_write.insert((pin, level as u8));
        self
    }

    /// Makes every direction change of `pin` fail.
    pub fn fail_direction(&self, pin: u32) -> &Self {
        self.state().fail_direction.insert(pin);
        self
    }

    /// Makes every release of `pin` fail. The pin stays held.
    pub fn fail_release(&self, pin: u32) -> &Self {
        self.state().fail_release.insert(pin);
        self
    }

    /// Sets the level an input read of `pin` returns.
    pub fn set_input(&self, pin: u32, level: Level) -> &Self {
        self.state().levels.insert(pin, level);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    pub fn clear_events(&self) {
        self.state().events.clear();
    }

    pub fn events_for(&self, pin: u32) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| match e {
                Event::Acquire(p, _) | Event::Release(p) => *p == pin,
                Event::Write { pin: p, .. } | Event::SetDirection { pin: p, .. } => *p == pin,
            })
            .collect()
    }

    pub fn is_held(&self, pin: u32) -> bool {
        self.state().held.contains(&pin)
    }

    /// Last level successfully written to `pin`, or set with [`MockGpio::set_input`].
    pub fn level(&self, pin: u32) -> Option<Level> {
        self.state().levels.get(&pin).copied()
    }
}

impl Gpio for MockGpio {
    type Pin = MockPin;

    fn acquire(&mut self, pin: u32, direction: Direction) -> Result<MockPin, GpioError> {
        let mut state = self.state();
        if state.fail_acquire.contains(&pin) {
            return Err(GpioError::Rejected {
                pin,
                reason: "simulated acquire failure".to_string(),
            });
        }
        if !state.held.insert(pin) {
            return Err(GpioError::Busy(pin));
        }
        state.events.push(Event::Acquire(pin, direction));
        drop(state);

        Ok(MockPin {
            gpio: pin,
            direction,
            value: None,
            chip: self.clone(),
        })
    }
}

#[derive(Debug)]
pub struct MockPin {
    gpio: u32,
    direction: Direction,
    value: Option<Level>,
    chip: MockGpio,
}

impl GpioPin for MockPin {
    fn gpio(&self) -> u32 {
        self.gpio
    }

    fn write_sync(&mut self, level: Level) -> Result<(), GpioError> {
        let mut state = self.chip.state();
        let ok = !state.fail_write.contains(&(self.gpio, level as u8));
        state.events.push(Event::Write {
            pin: self.gpio,
            level,
            ok,
        });
        if !ok {
            return Err(GpioError::Rejected {
                pin: self.gpio,
                reason: "simulated write failure".to_string(),
            });
        }
        state.levels.insert(self.gpio, level);
        self.value = Some(level);
        Ok(())
    }

    fn read(&mut self) -> Result<Level, GpioError> {
        Ok(self.chip.level(self.gpio).unwrap_or(Level::LOW))
    }

    fn set_direction(&mut self, direction: Direction) -> Result<(), GpioError> {
        let mut state = self.chip.state();
        let ok = !state.fail_direction.contains(&self.gpio);
        state.events.push(Event::SetDirection {
            pin: self.gpio,
            direction,
            ok,
        });
        if !ok {
            return Err(GpioError::Rejected {
                pin: self.gpio,
                reason: "simulated direction failure".to_string(),
            });
        }
        self.direction = direction;
        Ok(())
    }

    fn snapshot(&self) -> PinSnapshot {
        PinSnapshot {
            gpio: self.gpio,
            path: format!("mock/gpio{}", self.gpio),
            direction: self.direction,
            value: self.value,
        }
    }

    fn release(self) -> Result<(), GpioError> {
        let mut state = self.chip.state();
        if state.fail_release.contains(&self.gpio) {
            return Err(GpioError::Rejected {
                pin: self.gpio,
                reason: "simulated release failure".to_string(),
            });
        }
        if !state.held.remove(&self.gpio) {
            return Err(GpioError::Released(self.gpio));
        }
        state.events.push(Event::Release(self.gpio));
        Ok(())
    }
}
