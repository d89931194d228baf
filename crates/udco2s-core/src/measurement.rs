//! Measurement State
//!
//! The latest values reported by the sensor, shared between the streaming
//! thread (single writer) and any number of pollers.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::protocol::parser::apply_line;
use crate::protocol::LineError;

/// Snapshot of everything known about the sensor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Device identifier (`ID=`)
    pub device_id: String,
    /// Firmware version (`VER=`)
    pub firmware_version: String,
    /// Last known forced recalibration value (`FRC=`)
    pub frc_value: i32,
    /// When CO2, humidity or temperature last changed
    pub timestamp: Option<DateTime<Utc>>,
    /// CO2 concentration in ppm
    pub co2: i32,
    /// Relative humidity in percent
    pub humidity: f64,
    /// Temperature in degrees Celsius
    pub temperature: f64,
}

/// Measurement record behind a single lock
///
/// Every accessor takes the lock, so readers never observe a half-applied line.
#[derive(Debug, Default)]
pub struct SharedMeasurement {
    inner: Mutex<Measurement>,
}

impl SharedMeasurement {
    /// Empty record with every field zeroed
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a protocol line into the record, stamped with the current time
    pub fn parse_line(&self, line: &str) -> Result<usize, LineError> {
        let mut record = self.inner.lock();
        debug!(line, "parsing line");
        let result = apply_line(&mut record, line, Utc::now());
        if matches!(result, Ok(n) if n > 0) {
            debug!(
                co2 = record.co2,
                humidity = record.humidity,
                temperature = record.temperature,
                "measurement updated"
            );
        }
        result
    }

    /// Run `f` with exclusive access to the record
    pub fn update<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut Measurement) -> T,
    {
        f(&mut *self.inner.lock())
    }

    /// Copy of the whole record taken under one lock
    pub fn snapshot(&self) -> Measurement {
        self.inner.lock().clone()
    }

    /// Device identifier, empty until `ID?` succeeds
    pub fn device_id(&self) -> String {
        self.inner.lock().device_id.clone()
    }

    /// Firmware version, empty until `VER?` succeeds
    pub fn firmware_version(&self) -> String {
        self.inner.lock().firmware_version.clone()
    }

    /// Last known forced recalibration value
    pub fn frc_value(&self) -> i32 {
        self.inner.lock().frc_value
    }

    /// Time of the last CO2, humidity or temperature update
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().timestamp
    }

    /// CO2 concentration in ppm
    pub fn co2(&self) -> i32 {
        self.inner.lock().co2
    }

    /// Relative humidity in percent
    pub fn humidity(&self) -> f64 {
        self.inner.lock().humidity
    }

    /// Temperature in degrees Celsius
    pub fn temperature(&self) -> f64 {
        self.inner.lock().temperature
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_starts_zeroed() {
        let shared = SharedMeasurement::new();
        assert_eq!(shared.snapshot(), Measurement::default());
        assert_eq!(shared.timestamp(), None);
        assert_eq!(shared.co2(), 0);
    }

    #[test]
    fn test_parse_line_updates_getters() {
        let shared = SharedMeasurement::new();
        shared.parse_line("CO2=415,HUM=45.2,TMP=23.1").unwrap();
        let stamped = shared.timestamp().expect("live values stamp the record");

        shared.parse_line("ID=ABC123").unwrap();
        assert_eq!(shared.device_id(), "ABC123");
        assert_eq!(shared.co2(), 415);
        assert_eq!(shared.humidity(), 45.2);
        assert_eq!(shared.temperature(), 23.1);
        assert_eq!(shared.timestamp(), Some(stamped));
    }

    #[test]
    fn test_timestamp_advances() {
        let shared = SharedMeasurement::new();
        shared.parse_line("CO2=400").unwrap();
        let first = shared.timestamp().unwrap();
        thread::sleep(std::time::Duration::from_millis(5));
        shared.parse_line("CO2=401").unwrap();
        assert!(shared.timestamp().unwrap() > first);
    }

    #[test]
    fn test_concurrent_readers_see_whole_lines() {
        let shared = Arc::new(SharedMeasurement::new());
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let shared = Arc::clone(&shared);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for i in 0..5000 {
                    let line = format!("CO2={i},HUM={i}.0,TMP={i}.0");
                    shared.parse_line(&line).unwrap();
                }
                done.store(true, Ordering::Release);
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let shared = Arc::clone(&shared);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut observed = 0usize;
                    while !done.load(Ordering::Acquire) {
                        let snap = shared.snapshot();
                        assert_eq!(snap.co2 as f64, snap.humidity);
                        assert_eq!(snap.humidity, snap.temperature);
                        observed += 1;
                    }
                    observed
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(shared.co2(), 4999);
    }
}
