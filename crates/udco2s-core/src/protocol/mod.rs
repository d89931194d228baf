//! Serial Protocol Communication
//!
//! Implements the UD-CO2S line protocol: ASCII commands terminated by CR+LF,
//! `OK`-prefixed replies, and unsolicited `KEY=VALUE` measurement lines once
//! streaming has started.

pub mod commands;
mod connection;
mod error;
pub mod parser;
pub mod reader;
pub mod serial;
mod session;
pub mod stream;

pub use commands::Command;
pub use connection::{DriverConfig, Reply, Udco2s};
pub use error::{DriverError, LineError};
pub use reader::{read_lines, read_lines_with, Interrupt, LineBuffer};
pub use serial::{clear_buffers, configure_port, list_ports, open_port, sort_ports, PortInfo};
pub use session::SessionState;
pub use stream::{SerialChannel, Transport};

/// Default baud rate of the sensor's USB CDC interface
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default timeout of a single transport read in milliseconds
///
/// Bounds how long a cancelled reader can stay blocked.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Default deadline for a whole command/response exchange in milliseconds
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 2000;

/// Maximum number of read cycles spent looking for a command reply
pub const DEFAULT_COMMAND_READ_CYCLES: usize = 10;

/// Size of a single transport read
pub const READ_CHUNK_SIZE: usize = 128;

/// Line terminator used in both directions
pub const LINE_DELIMITER: &[u8] = b"\r\n";

/// Inclusive range accepted by `FRC=<n>`
pub const FRC_RANGE: std::ops::RangeInclusive<i32> = 400..=2000;
