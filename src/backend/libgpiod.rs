use log::info;
use std::path::PathBuf;

use libgpiod::{chip::Chip, line, request};
use parking_lot::FairMutex;
use rustc_hash::FxHashMap;

use crate::error::AppError;
use crate::gpio::{GpioBackend, PinLevel};
use crate::registry::{self, PinMode};

/// GPIO character device backend.
///
/// Every registry line has its own request slot, fixed at construction, so a
/// call only ever locks the line it touches. Lines are requested on first use
/// and held until [`GpioBackend::release`]. Requests are dropped, and the
/// kernel returns the lines, when the backend is dropped.
pub struct LibgpiodBackend {
    chip: String,
    consumer: String,
    lines: FxHashMap<u32, FairMutex<Option<request::Request>>>, // keyed by line offset
}

impl LibgpiodBackend {
    pub fn new(chip: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            chip: chip.into(),
            consumer: consumer.into(),
            lines: registry::PINS
                .iter()
                .map(|p| (p.line, FairMutex::new(None)))
                .collect(),
        }
    }

    fn slot(&self, offset: u32) -> Result<&FairMutex<Option<request::Request>>, AppError> {
        self.lines
            .get(&offset)
            .ok_or_else(|| AppError::HardwareFault(format!("line {offset} is not managed")))
    }

    fn open_chip(&self) -> Result<Chip, AppError> {
        let p = PathBuf::from(&self.chip);
        Chip::open(&p).map_err(|e| AppError::HardwareFault(format!("open chip {}: {e}", self.chip)))
    }

    fn request_line(&self, line_cfg: &line::Config) -> Result<request::Request, AppError> {
        let chip = self.open_chip()?;
        let mut req_cfg = request::Config::new()
            .map_err(|e| AppError::HardwareFault(format!("request config: {e}")))?;
        req_cfg
            .set_consumer(&self.consumer)
            .map_err(|e| AppError::HardwareFault(format!("request consumer: {e}")))?;
        chip.request_lines(Some(&req_cfg), line_cfg)
            .map_err(|e| AppError::HardwareFault(format!("request lines: {e}")))
    }

    fn make_line_settings(mode: PinMode, initial: PinLevel) -> Result<line::Settings, AppError> {
        let mut ls = line::Settings::new()
            .map_err(|e| AppError::HardwareFault(format!("libgpiod settings: {e}")))?;

        match mode {
            PinMode::Output => {
                ls.set_direction(line::Direction::Output)
                    .map_err(|e| AppError::HardwareFault(format!("set direction: {e}")))?;
                ls.set_output_value(to_value(initial))
                    .map_err(|e| AppError::HardwareFault(format!("set output value: {e}")))?;
            }
            PinMode::Input => {
                ls.set_direction(line::Direction::Input)
                    .map_err(|e| AppError::HardwareFault(format!("set direction: {e}")))?;
                ls.set_bias(Some(line::Bias::PullDown))
                    .map_err(|e| AppError::HardwareFault(format!("set bias: {e}")))?;
            }
        }

        Ok(ls)
    }

    fn make_line_config(offset: u32, settings: line::Settings) -> Result<line::Config, AppError> {
        let mut cfg = line::Config::new()
            .map_err(|e| AppError::HardwareFault(format!("line config: {e}")))?;
        cfg.add_line_settings(&[offset], settings)
            .map_err(|e| AppError::HardwareFault(format!("line config add settings: {e}")))?;
        Ok(cfg)
    }

    fn apply(
        &self,
        slot: &mut Option<request::Request>,
        offset: u32,
        mode: PinMode,
        initial: PinLevel,
    ) -> Result<(), AppError> {
        let line_cfg = Self::make_line_config(offset, Self::make_line_settings(mode, initial)?)?;

        match slot {
            Some(req) => {
                req.reconfigure_lines(&line_cfg).map_err(|e| {
                    AppError::HardwareFault(format!("reconfigure line {offset}: {e}"))
                })?;
            }
            None => *slot = Some(self.request_line(&line_cfg)?),
        }

        Ok(())
    }
}

fn to_value(level: PinLevel) -> line::Value {
    match level {
        PinLevel::Low => line::Value::InActive,
        PinLevel::High => line::Value::Active,
    }
}

impl GpioBackend for LibgpiodBackend {
    fn init(&self) -> Result<(), AppError> {
        let chip = self.open_chip()?;
        let num_lines = chip
            .info()
            .map_err(|e| AppError::HardwareFault(format!("chip info {}: {e}", self.chip)))?
            .num_lines();

        let highest = registry::PINS.iter().map(|p| p.line).max().unwrap_or(0);
        if (highest as usize) >= num_lines {
            return Err(AppError::HardwareFault(format!(
                "chip {} exposes {num_lines} lines, line {highest} required",
                self.chip
            )));
        }

        info!("Opened GPIO chip {} with {num_lines} lines", self.chip);
        Ok(())
    }

    fn configure(&self, line: u32, mode: PinMode) -> Result<(), AppError> {
        let mut slot = self.slot(line)?.lock();
        self.apply(&mut slot, line, mode, PinLevel::Low)
    }

    fn write(&self, line: u32, level: PinLevel) -> Result<(), AppError> {
        let mut slot = self.slot(line)?.lock();

        match slot.as_mut() {
            Some(req) => {
                req.set_value(line, to_value(level))
                    .map_err(|e| AppError::HardwareFault(format!("set value: {e}")))?;
                Ok(())
            }
            // first touch of a line that was never configured
            None => self.apply(&mut slot, line, PinMode::Output, level),
        }
    }

    fn read(&self, line: u32) -> Result<PinLevel, AppError> {
        let slot = self.slot(line)?.lock();
        let req = slot
            .as_ref()
            .ok_or_else(|| AppError::HardwareFault(format!("line {line} not requested")))?;

        let value = req
            .value(line)
            .map_err(|e| AppError::HardwareFault(format!("get value: {e}")))?;
        Ok(match value {
            line::Value::InActive => PinLevel::Low,
            line::Value::Active => PinLevel::High,
        })
    }

    fn release(&self) -> Result<(), AppError> {
        let released = self
            .lines
            .values()
            .filter_map(|slot| slot.lock().take())
            .count();
        info!("Released {released} lines on {}", self.chip);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> LibgpiodBackend {
        LibgpiodBackend::new("/nonexistent/gpiochip", "rgpio-test")
    }

    #[test]
    fn slots_cover_every_registry_line() {
        let backend = backend();
        assert_eq!(backend.lines.len(), registry::PINS.len());
        for pin in registry::PINS {
            assert!(backend.slot(pin.line).is_ok());
        }
    }

    #[test]
    fn unmanaged_line_fails_without_opening_the_chip() {
        let backend = backend();
        for line in [0, 12, 99] {
            assert!(matches!(
                backend.configure(line, PinMode::Output),
                Err(AppError::HardwareFault(m)) if m.contains("not managed")
            ));
        }
    }

    #[test]
    fn read_of_unrequested_line_fails() {
        let backend = backend();
        assert!(matches!(
            backend.read(17),
            Err(AppError::HardwareFault(m)) if m.contains("not requested")
        ));
    }

    #[test]
    fn one_line_held_does_not_block_another() {
        let backend = backend();
        let _held = backend.slot(17).unwrap().lock();

        // a second line's slot is independent of the first
        assert!(backend.slot(27).unwrap().try_lock().is_some());
        assert!(backend.slot(17).unwrap().try_lock().is_none());
    }

    #[test]
    fn release_with_nothing_requested_is_ok() {
        backend().release().unwrap();
    }
}
