use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const CONFIG_ENV: &str = "RGPIO_CONFIG";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    pub unix_socket: Option<String>,
    pub host: Option<String>,
    pub path: String,
    pub timeout: u64,
    pub cors_allow_origin: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            unix_socket: None,
            host: Some("0.0.0.0:3001".to_string()),
            path: String::new(),
            timeout: 30,
            cors_allow_origin: Some("*".to_string()),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct GpioConfig {
    pub chip: String,
    pub consumer: String,
    pub operation_timeout_ms: u64,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            chip: "/dev/gpiochip0".to_string(),
            consumer: env!("CARGO_PKG_NAME").to_string(),
            operation_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub gpio: GpioConfig,
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Invalid config json: {e}")))
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.http.host.is_none() && self.http.unix_socket.is_none() {
            return Err(AppError::Config(
                "http needs a 'host' or a 'unix_socket' to listen on".into(),
            ));
        }
        if self.gpio.operation_timeout_ms == 0 {
            return Err(AppError::Config(
                "gpio.operation_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// An explicitly named file must load. Without one, `config.json` is used
    /// if present and the built-in defaults otherwise.
    pub fn load(explicit: Option<&str>) -> Result<Self, AppError> {
        match explicit {
            Some(path) => Self::load_from_file(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::load_from_file(DEFAULT_CONFIG_PATH)
            }
            None => Ok(Self::default()),
        }
    }
}
