use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::AppError;
use crate::gpio::{GpioBackend, PinLevel};
use crate::registry::PinMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockCall {
    Configure(u32, PinMode),
    Write(u32, PinLevel),
    Read(u32),
    Release,
}

/// In-memory GPIO lines for tests and hosts without GPIO hardware.
///
/// Every call is logged in completion order. Faults and latency can be
/// injected at runtime, and the backend tracks how many operations overlap
/// so callers can observe their own locking.
#[derive(Default)]
pub struct MockGpioBackend {
    lines: Mutex<FxHashMap<u32, MockLine>>,
    inputs: Mutex<FxHashMap<u32, PinLevel>>,
    calls: Mutex<Vec<MockCall>>,
    latency: Mutex<Duration>,
    fail_init: AtomicBool,
    fail_configures: AtomicBool,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    in_flight: Mutex<FxHashMap<u32, usize>>,
    in_flight_total: AtomicUsize,
    peak_overlap: AtomicUsize,
    peak_line_overlap: AtomicUsize,
}

#[derive(Debug, Clone, Copy)]
struct MockLine {
    mode: PinMode,
    level: PinLevel,
}

struct InFlight<'a> {
    backend: &'a MockGpioBackend,
    line: u32,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(n) = self.backend.in_flight.lock().get_mut(&self.line) {
            *n -= 1;
        }
        self.backend.in_flight_total.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockGpioBackend {
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn set_fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_configures(&self, fail: bool) {
        self.fail_configures.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Simulates an external voltage on a line configured as input.
    pub fn drive_input(&self, line: u32, level: PinLevel) {
        self.inputs.lock().insert(line, level);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn line_level(&self, line: u32) -> Option<PinLevel> {
        self.lines.lock().get(&line).map(|l| l.level)
    }

    pub fn line_mode(&self, line: u32) -> Option<PinMode> {
        self.lines.lock().get(&line).map(|l| l.mode)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight_total.load(Ordering::SeqCst)
    }

    /// Most operations seen in flight at once, across all lines.
    pub fn peak_overlap(&self) -> usize {
        self.peak_overlap.load(Ordering::SeqCst)
    }

    /// Most operations seen in flight at once on a single line.
    pub fn peak_line_overlap(&self) -> usize {
        self.peak_line_overlap.load(Ordering::SeqCst)
    }

    fn enter(&self, line: u32) -> InFlight<'_> {
        let on_line = {
            let mut in_flight = self.in_flight.lock();
            let n = in_flight.entry(line).or_insert(0);
            *n += 1;
            *n
        };
        let total = self.in_flight_total.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_line_overlap.fetch_max(on_line, Ordering::SeqCst);
        self.peak_overlap.fetch_max(total, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            thread::sleep(latency);
        }

        InFlight {
            backend: self,
            line,
        }
    }

    fn input_level(&self, line: u32) -> PinLevel {
        self.inputs.lock().get(&line).copied().unwrap_or(PinLevel::Low)
    }
}

impl GpioBackend for MockGpioBackend {
    fn init(&self) -> Result<(), AppError> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(AppError::HardwareFault("mock chip unavailable".into()));
        }
        Ok(())
    }

    fn configure(&self, line: u32, mode: PinMode) -> Result<(), AppError> {
        let _op = self.enter(line);

        if self.fail_configures.load(Ordering::SeqCst) {
            return Err(AppError::HardwareFault(format!(
                "mock configure failed on line {line}"
            )));
        }

        let level = match mode {
            PinMode::Output => PinLevel::Low,
            PinMode::Input => self.input_level(line),
        };
        self.lines.lock().insert(line, MockLine { mode, level });
        self.calls.lock().push(MockCall::Configure(line, mode));

        Ok(())
    }

    fn write(&self, line: u32, level: PinLevel) -> Result<(), AppError> {
        let _op = self.enter(line);

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::HardwareFault(format!(
                "mock write failed on line {line}"
            )));
        }

        let mut lines = self.lines.lock();
        let entry = lines.entry(line).or_insert(MockLine {
            mode: PinMode::Output,
            level: PinLevel::Low,
        });
        if entry.mode != PinMode::Output {
            return Err(AppError::HardwareFault(format!(
                "line {line} is not an output"
            )));
        }
        entry.level = level;
        self.calls.lock().push(MockCall::Write(line, level));

        Ok(())
    }

    fn read(&self, line: u32) -> Result<PinLevel, AppError> {
        let _op = self.enter(line);

        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::HardwareFault(format!(
                "mock read failed on line {line}"
            )));
        }

        let mode = self
            .line_mode(line)
            .ok_or_else(|| AppError::HardwareFault(format!("line {line} not requested")))?;
        let level = match mode {
            PinMode::Input => self.input_level(line),
            PinMode::Output => self.line_level(line).unwrap_or(PinLevel::Low),
        };
        self.calls.lock().push(MockCall::Read(line));

        Ok(level)
    }

    fn release(&self) -> Result<(), AppError> {
        self.lines.lock().clear();
        self.calls.lock().push(MockCall::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_requests_unconfigured_line_as_output() {
        let backend = MockGpioBackend::default();
        backend.write(17, PinLevel::High).unwrap();

        assert_eq!(backend.line_mode(17), Some(PinMode::Output));
        assert_eq!(backend.line_level(17), Some(PinLevel::High));
        assert_eq!(backend.calls(), vec![MockCall::Write(17, PinLevel::High)]);
    }

    #[test]
    fn write_to_input_line_fails() {
        let backend = MockGpioBackend::default();
        backend.configure(17, PinMode::Input).unwrap();
        assert!(matches!(
            backend.write(17, PinLevel::High),
            Err(AppError::HardwareFault(_))
        ));
    }

    #[test]
    fn read_of_unrequested_line_fails() {
        let backend = MockGpioBackend::default();
        assert!(backend.read(4).is_err());
    }

    #[test]
    fn input_follows_driven_voltage() {
        let backend = MockGpioBackend::default();
        backend.configure(5, PinMode::Input).unwrap();
        assert_eq!(backend.read(5).unwrap(), PinLevel::Low);

        backend.drive_input(5, PinLevel::High);
        assert_eq!(backend.read(5).unwrap(), PinLevel::High);
    }

    #[test]
    fn failed_calls_are_not_logged() {
        let backend = MockGpioBackend::default();
        backend.set_fail_writes(true);
        let _ = backend.write(17, PinLevel::High);

        assert!(backend.calls().is_empty());
        assert_eq!(backend.line_level(17), None);
    }

    #[test]
    fn overlap_counters_return_to_idle() {
        let backend = MockGpioBackend::default();
        backend.write(17, PinLevel::High).unwrap();
        backend.write(27, PinLevel::High).unwrap();

        assert_eq!(backend.peak_overlap(), 1);
        assert_eq!(backend.peak_line_overlap(), 1);
        assert_eq!(backend.in_flight_total.load(Ordering::SeqCst), 0);
    }
}
