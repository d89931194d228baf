//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the sensor
#[derive(Error, Debug)]
pub enum DriverError {
    /// The serial device could not be opened
    #[error("Failed to open serial port '{path}': {source}")]
    TransportOpen {
        /// Device path passed to `open`
        path: String,
        /// Error reported by the serial backend
        #[source]
        source: serialport::Error,
    },

    /// Port settings could not be applied
    #[error("Serial port error: {0}")]
    SerialError(#[from] serialport::Error),

    /// A read failed with something other than a timeout
    #[error("Serial read failed: {0}")]
    TransportRead(#[source] std::io::Error),

    /// A command could not be written
    #[error("Serial write failed: {0}")]
    TransportWrite(#[source] std::io::Error),

    /// The transport was closed by an earlier fault or by `close`
    #[error("Serial port is closed")]
    TransportClosed,

    /// The sensor did not acknowledge a command
    #[error("Command '{command}' failed, last reply: '{reply}'")]
    CommandFailed {
        /// Command text as sent
        command: String,
        /// Last non-`OK` line received, empty if nothing arrived
        reply: String,
    },

    /// An `OK` payload did not have the expected shape
    #[error("Unexpected reply from sensor: '{0}'")]
    UnexpectedReply(String),

    /// `FRC=` value outside 400..=2000
    #[error("FRC value {0} is out of range (400..=2000)")]
    InvalidFrcValue(i32),

    /// The operation needs the link while a measurement session owns it
    #[error("A measurement session is active")]
    SessionActive,

    /// The streaming thread could not be started
    #[error("Failed to spawn streaming thread: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// The streaming thread panicked
    #[error("Streaming thread panicked")]
    StreamPanicked,
}

/// Errors raised while decoding a single protocol line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LineError {
    /// A recognized key carried a missing or unparseable value
    #[error("Malformed token '{token}': {reason}")]
    Malformed {
        /// The offending `KEY=VALUE` token
        token: String,
        /// Why the value was rejected
        reason: String,
    },
}
