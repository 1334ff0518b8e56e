use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::{error, info, warn};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::registry::{self, PinEntry, PinMode};

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "bool", into = "bool")]
pub enum PinLevel {
    Low,
    High,
}

impl PinLevel {
    pub fn is_high(&self) -> bool {
        matches!(self, PinLevel::High)
    }
}

impl From<bool> for PinLevel {
    fn from(high: bool) -> Self {
        if high { PinLevel::High } else { PinLevel::Low }
    }
}

impl From<PinLevel> for bool {
    fn from(level: PinLevel) -> Self {
        level.is_high()
    }
}

impl fmt::Display for PinLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinLevel::Low => f.write_str("LOW"),
            PinLevel::High => f.write_str("HIGH"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinStatus {
    pub mode: PinMode,
    pub state: PinLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub ok: bool,
    pub configured_pins: Vec<u32>,
}

/// Capability set over the platform GPIO interface.
///
/// Implementations address hardware lines, not BCM identifiers, and keep no
/// model of their own: the controller owns the logical pin state and calls
/// into the backend with that pin's lock held.
pub trait GpioBackend: Send + Sync {
    fn init(&self) -> Result<(), AppError>;
    fn configure(&self, line: u32, mode: PinMode) -> Result<(), AppError>;
    fn write(&self, line: u32, level: PinLevel) -> Result<(), AppError>;
    fn read(&self, line: u32) -> Result<PinLevel, AppError>;
    fn release(&self) -> Result<(), AppError>;
}

#[derive(Debug, Clone, Copy)]
struct PinRecord {
    mode: PinMode,
    level: PinLevel,
    configured: bool,
}

impl PinRecord {
    fn status(&self) -> PinStatus {
        PinStatus {
            mode: self.mode,
            state: self.level,
        }
    }
}

impl Default for PinRecord {
    fn default() -> Self {
        Self {
            mode: PinMode::Output,
            level: PinLevel::Low,
            configured: false,
        }
    }
}

struct PinSlot {
    entry: PinEntry,
    op: Mutex<()>,
    record: RwLock<PinRecord>,
}

impl PinSlot {
    fn new(entry: PinEntry) -> Self {
        Self {
            entry,
            op: Mutex::new(()),
            record: RwLock::new(PinRecord::default()),
        }
    }

    fn record(&self) -> PinRecord {
        *self.record.read()
    }

    fn commit(&self, update: impl FnOnce(&mut PinRecord)) -> PinStatus {
        let mut record = self.record.write();
        update(&mut record);
        record.status()
    }
}

/// Owns the cached state of every registry pin.
///
/// Every operation on a pin, including the hardware call, runs with that
/// pin's `op` mutex held. The cached record has its own lock, taken only for
/// the read before and the commit after a successful backend call, so
/// snapshots never wait on hardware. Operations on distinct pins never share
/// a lock.
pub struct GpioController<B: GpioBackend> {
    backend: Arc<B>,
    pins: FxHashMap<u32, PinSlot>,
    hardware_ready: bool,
}

impl<B: GpioBackend> GpioController<B> {
    pub fn new(backend: Arc<B>) -> Self {
        let hardware_ready = match backend.init() {
            Ok(()) => true,
            Err(e) => {
                error!("GPIO backend failed to initialize: {e}");
                false
            }
        };

        let pins = registry::PINS
            .iter()
            .map(|entry| (entry.bcm, PinSlot::new(*entry)))
            .collect();

        Self {
            backend,
            pins,
            hardware_ready,
        }
    }

    fn pin(&self, pin_id: u32) -> Result<&PinSlot, AppError> {
        registry::lookup(pin_id)
            .and_then(|entry| self.pins.get(&entry.bcm))
            .ok_or_else(|| AppError::InvalidPin(pin_id.to_string()))
    }

    pub fn set_state(&self, pin_id: u32, level: PinLevel) -> Result<PinStatus, AppError> {
        let pin = self.pin(pin_id)?;
        let _op = pin.op.lock();

        if pin.record().mode == PinMode::Input {
            return Err(AppError::InvalidOperation(format!(
                "GPIO {pin_id} is configured as input and cannot be written"
            )));
        }

        self.backend
            .write(pin.entry.line, level)
            .inspect_err(|e| warn!("write GPIO {pin_id} failed: {e}"))?;

        let status = pin.commit(|r| {
            r.level = level;
            r.configured = true;
        });
        info!("Set GPIO {pin_id} to {level}");

        Ok(status)
    }

    pub fn set_mode(&self, pin_id: u32, mode: &str) -> Result<PinStatus, AppError> {
        let pin = self.pin(pin_id)?;
        let mode: PinMode = mode.parse()?;

        let _op = pin.op.lock();
        self.backend
            .configure(pin.entry.line, mode)
            .inspect_err(|e| warn!("configure GPIO {pin_id} as {mode} failed: {e}"))?;

        // outputs start low; inputs are pulled down
        let status = pin.commit(|r| {
            r.mode = mode;
            r.level = PinLevel::Low;
            r.configured = true;
        });
        info!(
            "Configured GPIO {pin_id} (header pin {}) as {}",
            pin.entry.header,
            mode.as_str().to_uppercase()
        );

        Ok(status)
    }

    /// Samples an input pin from hardware. Output pins report the level they
    /// were last driven to without touching hardware.
    pub fn read_pin(&self, pin_id: u32) -> Result<PinStatus, AppError> {
        let pin = self.pin(pin_id)?;
        let _op = pin.op.lock();

        let record = pin.record();
        if record.mode == PinMode::Output {
            return Ok(record.status());
        }

        let level = self
            .backend
            .read(pin.entry.line)
            .inspect_err(|e| warn!("read GPIO {pin_id} failed: {e}"))?;

        Ok(pin.commit(|r| {
            r.level = level;
            r.configured = true;
        }))
    }

    /// Snapshot of the cached state. Never calls into the backend and never
    /// waits on an in-flight hardware operation.
    pub fn status(&self) -> BTreeMap<u32, PinStatus> {
        self.pins
            .iter()
            .map(|(id, pin)| (*id, pin.record().status()))
            .collect()
    }

    pub fn health(&self) -> HealthReport {
        let mut configured_pins: Vec<u32> = self
            .pins
            .iter()
            .filter(|(_, pin)| pin.record().configured)
            .map(|(id, _)| *id)
            .collect();
        configured_pins.sort_unstable();

        HealthReport {
            ok: self.hardware_ready,
            configured_pins,
        }
    }

    /// Releases every hardware line. Operation locks are taken in registry
    /// order so no operation is in flight while the backend lets go of its
    /// lines.
    pub fn release(&self) -> Result<(), AppError> {
        let _ops: Vec<_> = registry::pin_ids()
            .filter_map(|id| self.pins.get(&id))
            .map(|pin| pin.op.lock())
            .collect();

        self.backend.release()?;
        info!("Released GPIO lines");

        Ok(())
    }
}
