//! Protocol commands
//!
//! Defines the subset of the UD-CO2S command set used by the driver.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{DriverError, FRC_RANGE, LINE_DELIMITER};

/// Commands understood by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Query the device identifier (`ID?`)
    QueryDeviceId,

    /// Query the firmware version (`VER?`)
    QueryFirmwareVersion,

    /// Start continuous measurement (`STA`)
    StartMeasurement,

    /// Stop continuous measurement (`STP`)
    StopMeasurement,

    /// Query the forced recalibration value (`FRC?`)
    QueryFrc,

    /// Set the forced recalibration value (`FRC=<n>`)
    SetFrc(i32),
}

impl Command {
    /// Build a validated `FRC=<n>` command
    pub fn set_frc(value: i32) -> Result<Self, DriverError> {
        if FRC_RANGE.contains(&value) {
            Ok(Command::SetFrc(value))
        } else {
            Err(DriverError::InvalidFrcValue(value))
        }
    }

    /// Key carried by the reply of a `KEY=value` query
    pub fn reply_key(&self) -> Option<&'static str> {
        match self {
            Command::QueryDeviceId => Some("ID"),
            Command::QueryFirmwareVersion => Some("VER"),
            Command::QueryFrc => Some("FRC"),
            _ => None,
        }
    }

    /// Whether an `OK` payload answers this command
    ///
    /// A query takes a bare value or tokens that include its own key. Any
    /// other `KEY=value` payload is a measurement line still being streamed.
    pub fn accepts(&self, payload: &str) -> bool {
        let Some(key) = self.reply_key() else {
            return true;
        };
        if !payload.contains('=') {
            return true;
        }
        payload
            .split(',')
            .filter_map(|token| token.split_once('='))
            .any(|(k, _)| k.trim() == key)
    }

    /// The command text without terminator
    pub fn text(&self) -> String {
        match self {
            Command::QueryDeviceId => "ID?".to_string(),
            Command::QueryFirmwareVersion => "VER?".to_string(),
            Command::StartMeasurement => "STA".to_string(),
            Command::StopMeasurement => "STP".to_string(),
            Command::QueryFrc => "FRC?".to_string(),
            Command::SetFrc(value) => format!("FRC={}", value),
        }
    }

    /// Encode the command as sent on the wire, CR+LF included
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = self.text().into_bytes();
        bytes.extend_from_slice(LINE_DELIMITER);
        bytes
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_encoding() {
        assert_eq!(Command::QueryDeviceId.encode(), b"ID?\r\n");
        assert_eq!(Command::QueryFirmwareVersion.encode(), b"VER?\r\n");
        assert_eq!(Command::StartMeasurement.encode(), b"STA\r\n");
        assert_eq!(Command::StopMeasurement.encode(), b"STP\r\n");
        assert_eq!(Command::QueryFrc.encode(), b"FRC?\r\n");
        assert_eq!(Command::SetFrc(415).encode(), b"FRC=415\r\n");
    }

    #[test]
    fn test_set_frc_bounds_are_inclusive() {
        assert_eq!(Command::set_frc(400).unwrap(), Command::SetFrc(400));
        assert_eq!(Command::set_frc(2000).unwrap(), Command::SetFrc(2000));
    }

    #[test]
    fn test_set_frc_out_of_range() {
        for value in [399, 2001, 0, -400] {
            match Command::set_frc(value) {
                Err(DriverError::InvalidFrcValue(v)) => assert_eq!(v, value),
                other => panic!("expected validation error for {value}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_queries_accept_only_their_own_key() {
        assert!(Command::QueryDeviceId.accepts("ID=ABC123"));
        assert!(Command::QueryDeviceId.accepts("ABC123"));
        assert!(!Command::QueryDeviceId.accepts("CO2=400,HUM=50.0,TMP=20.0"));
        assert!(Command::QueryFrc.accepts("FRC=450"));
        assert!(Command::QueryFrc.accepts("450"));
        assert!(!Command::QueryFrc.accepts("CO2=410"));
        assert!(Command::QueryFirmwareVersion.accepts("1.2.3"));
        assert!(!Command::QueryFirmwareVersion.accepts("ID=ABC123"));
    }

    #[test]
    fn test_other_commands_accept_any_payload() {
        assert!(Command::StartMeasurement.accepts(""));
        assert!(Command::StartMeasurement.accepts("CO2=400"));
        assert!(Command::SetFrc(400).accepts(""));
        assert_eq!(Command::StopMeasurement.reply_key(), None);
    }

    #[test]
    fn test_display_matches_wire_text() {
        assert_eq!(Command::SetFrc(1000).to_string(), "FRC=1000");
        assert_eq!(Command::StopMeasurement.to_string(), "STP");
    }
}
