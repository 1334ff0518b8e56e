mod backend;
mod config;
mod error;
mod gpio;
mod registry;
mod routes;

pub use config::{AppConfig, CONFIG_ENV, DEFAULT_CONFIG_PATH, GpioConfig, HttpConfig};
pub use error::AppError;
pub use gpio::{GpioBackend, GpioController, HealthReport, PinLevel, PinStatus};
pub use registry::{PINS, PinEntry, PinMode, is_valid_mode, is_valid_pin, lookup};
pub use routes::{AppState, cors_headers};

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodBackend;
pub use backend::{MockCall, MockGpioBackend};
