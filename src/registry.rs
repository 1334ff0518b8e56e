//! Static table of the pins this board exposes for remote control.
//!
//! Identifiers use BCM numbering. On the target board the BCM number is also
//! the line offset on the first GPIO chip, while the header position is only
//! kept for operators reading the logs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinEntry {
    pub bcm: u32,
    pub line: u32,
    pub header: u8,
}

const fn pin(bcm: u32, header: u8) -> PinEntry {
    PinEntry {
        bcm,
        line: bcm,
        header,
    }
}

pub const PINS: [PinEntry; 17] = [
    pin(2, 3),
    pin(3, 5),
    pin(4, 7),
    pin(7, 26),
    pin(8, 24),
    pin(9, 21),
    pin(10, 19),
    pin(11, 23),
    pin(14, 8),
    pin(15, 10),
    pin(17, 11),
    pin(18, 12),
    pin(22, 15),
    pin(23, 16),
    pin(24, 18),
    pin(25, 22),
    pin(27, 13),
];

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinMode {
    Input,
    Output,
}

impl PinMode {
    pub const ALL: [PinMode; 2] = [PinMode::Input, PinMode::Output];

    pub fn as_str(&self) -> &'static str {
        match self {
            PinMode::Input => "input",
            PinMode::Output => "output",
        }
    }
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PinMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PinMode::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| AppError::InvalidMode(s.to_string()))
    }
}

pub fn lookup(id: u32) -> Option<&'static PinEntry> {
    PINS.iter().find(|p| p.bcm == id)
}

pub fn is_valid_pin(id: u32) -> bool {
    lookup(id).is_some()
}

pub fn is_valid_mode(mode: &str) -> bool {
    mode.parse::<PinMode>().is_ok()
}

pub fn pin_ids() -> impl Iterator<Item = u32> {
    PINS.iter().map(|p| p.bcm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_every_legal_pin() {
        for id in [2, 3, 4, 7, 8, 9, 10, 11, 14, 15, 17, 18, 22, 23, 24, 25, 27] {
            assert!(is_valid_pin(id), "pin {id} should be legal");
        }
    }

    #[test]
    fn rejects_pins_outside_the_table() {
        for id in [0, 1, 5, 6, 12, 13, 16, 19, 20, 21, 26, 28, 99, u32::MAX] {
            assert!(!is_valid_pin(id), "pin {id} should be rejected");
        }
    }

    #[test]
    fn table_has_no_duplicates() {
        let mut ids: Vec<u32> = pin_ids().collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), PINS.len());
    }

    #[test]
    fn header_positions_use_physical_numbering() {
        let entry = lookup(17).unwrap();
        assert_eq!(entry.header, 11);
        assert_eq!(entry.line, 17);
    }

    #[test]
    fn mode_validation() {
        assert!(is_valid_mode("input"));
        assert!(is_valid_mode("output"));
        assert!(!is_valid_mode("pwm"));
        assert!(!is_valid_mode("Output"));
        assert!(!is_valid_mode(""));
    }

    #[test]
    fn mode_parse_matches_validation() {
        for mode in PinMode::ALL {
            assert!(is_valid_mode(mode.as_str()));
            assert_eq!(mode.as_str().parse::<PinMode>().unwrap(), mode);
            assert_eq!(serde_json::to_value(mode).unwrap(), mode.as_str());
        }
        assert!(matches!(
            "pwm".parse::<PinMode>(),
            Err(AppError::InvalidMode(m)) if m == "pwm"
        ));
    }
}
