//! # UD-CO2S Core Library
//!
//! Driver for the UD-CO2S environmental sensor (CO2 concentration, humidity,
//! temperature) attached over a USB serial link.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Line reassembly for the sensor's CR+LF text protocol
//! - Command/response exchanges (`ID?`, `VER?`, `STA`, `STP`, `FRC?`, `FRC=`)
//! - A background streaming session that keeps the latest measurement current
//! - A mutex-guarded measurement record safe to poll from other threads
//!
//! ## Example
//!
//! ```rust,ignore
//! use udco2s_core::protocol::Udco2s;
//! use tokio_util::sync::CancellationToken;
//!
//! let device = Udco2s::open("/dev/ttyACM0")?;
//! device.query_device_id()?;
//! device.query_firmware_version()?;
//!
//! let cancel = CancellationToken::new();
//! device.start_measurement(&cancel)?;
//!
//! let snapshot = device.snapshot();
//! println!("CO2: {} ppm", snapshot.co2);
//! ```

pub mod measurement;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::measurement::{Measurement, SharedMeasurement};
    pub use crate::protocol::{
        Command, DriverConfig, DriverError, LineError, Reply, SessionState, Transport, Udco2s,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
