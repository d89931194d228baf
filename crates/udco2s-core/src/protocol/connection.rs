//! Connection management
//!
//! Owns the serial transport, runs command/response exchanges and hands the
//! link over to the streaming session once measurement starts.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    parser::ok_payload,
    reader::{read_lines, Interrupt, LineBuffer},
    serial::{clear_buffers, configure_port, open_port},
    session::{Session, SessionState},
    Command, DriverError, SerialChannel, Transport, DEFAULT_BAUD_RATE,
    DEFAULT_COMMAND_READ_CYCLES, DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_READ_TIMEOUT_MS,
};
use crate::measurement::{Measurement, SharedMeasurement};

/// Driver configuration
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Baud rate
    pub baud_rate: u32,
    /// Upper bound of a single blocking read
    pub read_timeout: Duration,
    /// Deadline for a whole command/response exchange
    pub command_timeout: Duration,
    /// Maximum read cycles spent looking for an `OK` reply
    pub command_read_cycles: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
            command_read_cycles: DEFAULT_COMMAND_READ_CYCLES,
        }
    }
}

/// Outcome of a command/response exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Payload after `OK `, or the last non-`OK` line seen
    pub result: String,
    /// Whether an `OK` line arrived within the retry budget
    pub success: bool,
}

/// State shared with the streaming thread
pub(crate) struct DriverInner {
    transport: Mutex<Option<Box<dyn Transport>>>,
    pub(crate) measurement: SharedMeasurement,
}

impl DriverInner {
    /// One bounded read, releasing the transport lock fairly afterwards so a
    /// waiting writer gets in before the next read.
    pub(crate) fn read_chunk(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.transport.lock();
        let result = match guard.as_mut() {
            Some(port) => port.read(buf),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "serial port closed",
            )),
        };
        MutexGuard::unlock_fair(guard);
        result
    }

    /// Write a command without waiting for its reply
    pub(crate) fn post(&self, command: &Command) -> Result<(), DriverError> {
        let mut guard = self.transport.lock();
        let port = guard.as_mut().ok_or(DriverError::TransportClosed)?;
        debug!(%command, "posting command");
        if let Err(e) = port.write_all(&command.encode()) {
            error!(%command, error = %e, "write failed, closing serial port");
            *guard = None;
            return Err(DriverError::TransportWrite(e));
        }
        Ok(())
    }

    pub(crate) fn close(&self) {
        if self.transport.lock().take().is_some() {
            info!("serial port closed");
        }
    }

    fn is_open(&self) -> bool {
        self.transport.lock().is_some()
    }
}

/// UD-CO2S sensor driver
///
/// One instance owns one serial link. Share it behind an `Arc` to poll the
/// measurement getters from other threads while a session is streaming.
pub struct Udco2s {
    config: DriverConfig,
    inner: Arc<DriverInner>,
    session: Mutex<Session>,
    /// Interrupts in-flight command exchanges on close
    shutdown: CancellationToken,
}

impl Udco2s {
    /// Open the sensor at `path` with default settings
    pub fn open(path: &str) -> Result<Self, DriverError> {
        Self::open_with(path, DriverConfig::default())
    }

    /// Open the sensor at `path`
    pub fn open_with(path: &str, config: DriverConfig) -> Result<Self, DriverError> {
        let mut port = open_port(path, Some(config.baud_rate), Some(config.read_timeout))?;
        configure_port(port.as_mut())?;
        clear_buffers(port.as_mut())?;
        info!(path, baud = config.baud_rate, "opened sensor port");

        Ok(Self::with_transport(
            Box::new(SerialChannel::new(port)),
            config,
        ))
    }

    /// Drive the sensor over an already open transport
    pub fn with_transport(transport: Box<dyn Transport>, config: DriverConfig) -> Self {
        Self {
            config,
            inner: Arc::new(DriverInner {
                transport: Mutex::new(Some(transport)),
                measurement: SharedMeasurement::new(),
            }),
            session: Mutex::new(Session::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Get the driver configuration
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Whether the transport is still open
    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// Cancel any session and close the transport
    pub fn close(&self) {
        self.shutdown.cancel();
        self.session.lock().cancel();
        self.inner.close();
    }

    /// Get current session state
    pub fn session_state(&self) -> SessionState {
        self.session.lock().state
    }

    /// Send a command and wait for its reply
    ///
    /// `Err` is reserved for transport faults; a missing or non-`OK` reply is
    /// reported through [`Reply::success`]. Not available while streaming,
    /// since the streaming thread consumes every incoming line.
    pub fn send_command(&self, command: &Command) -> Result<Reply, DriverError> {
        let session = self.session.lock();
        if session.is_streaming() {
            return Err(DriverError::SessionActive);
        }
        let (reply, _) = self.exchange(command)?;
        Ok(reply)
    }

    /// Exchange under the transport lock, returning the unconsumed bytes
    fn exchange(&self, command: &Command) -> Result<(Reply, LineBuffer), DriverError> {
        let interrupt =
            Interrupt::new(self.shutdown.clone()).with_timeout(self.config.command_timeout);

        let mut guard = self.inner.transport.lock();
        let port = guard.as_mut().ok_or(DriverError::TransportClosed)?;

        debug!(%command, "sending command");
        let result = transact(
            port.as_mut(),
            command,
            self.config.command_read_cycles,
            &interrupt,
            &self.inner.measurement,
        );

        match &result {
            Ok((reply, _)) if !reply.success => {
                debug!(%command, reply = %reply.result, "command not acknowledged");
            }
            Err(e @ (DriverError::TransportRead(_) | DriverError::TransportWrite(_))) => {
                error!(%command, error = %e, "transport fault, closing serial port");
                *guard = None;
            }
            _ => {}
        }
        result
    }

    fn expect_ok(&self, command: &Command) -> Result<String, DriverError> {
        let reply = self.send_command(command)?;
        if reply.success {
            Ok(reply.result)
        } else {
            Err(DriverError::CommandFailed {
                command: command.to_string(),
                reply: reply.result,
            })
        }
    }

    /// Store an identity reply, either `KEY=value` tokens or a bare value
    fn store_identity(
        &self,
        payload: &str,
        set: fn(&mut Measurement, String),
    ) -> Result<(), DriverError> {
        if payload.contains('=') {
            self.inner
                .measurement
                .parse_line(payload)
                .map_err(|_| DriverError::UnexpectedReply(payload.to_string()))?;
        } else {
            self.inner
                .measurement
                .update(|record| set(record, payload.to_string()));
        }
        Ok(())
    }

    /// Query and store the device identifier (`ID?`)
    pub fn query_device_id(&self) -> Result<String, DriverError> {
        let payload = self.expect_ok(&Command::QueryDeviceId)?;
        self.store_identity(&payload, |record, value| record.device_id = value)?;
        Ok(self.device_id())
    }

    /// Query and store the firmware version (`VER?`)
    pub fn query_firmware_version(&self) -> Result<String, DriverError> {
        let payload = self.expect_ok(&Command::QueryFirmwareVersion)?;
        self.store_identity(&payload, |record, value| record.firmware_version = value)?;
        Ok(self.firmware_version())
    }

    /// Query the forced recalibration value (`FRC?`)
    ///
    /// Returns `None` while streaming: the command is only posted and the
    /// streaming thread picks up the `FRC=` reply.
    pub fn query_frc_value(&self) -> Result<Option<i32>, DriverError> {
        if self.session.lock().is_streaming() {
            self.inner.post(&Command::QueryFrc)?;
            return Ok(None);
        }

        let payload = self.expect_ok(&Command::QueryFrc)?;
        let value = match payload.split_once('=') {
            Some(("FRC", value)) => value.trim().parse::<i32>(),
            Some(_) => return Err(DriverError::UnexpectedReply(payload.clone())),
            None => payload.trim().parse::<i32>(),
        }
        .map_err(|_| DriverError::UnexpectedReply(payload.clone()))?;

        self.inner
            .measurement
            .update(|record| record.frc_value = value);
        Ok(Some(value))
    }

    /// Set the forced recalibration value (`FRC=<n>`, 400..=2000)
    ///
    /// Out-of-range values are rejected before anything is written.
    pub fn set_frc_value(&self, value: i32) -> Result<(), DriverError> {
        let command = Command::set_frc(value)?;

        if self.session.lock().is_streaming() {
            return self.inner.post(&command);
        }

        self.expect_ok(&command)?;
        self.inner
            .measurement
            .update(|record| record.frc_value = value);
        Ok(())
    }

    /// Send `STA` and hand the link to a background streaming thread
    ///
    /// The thread runs until `cancel` (or [`stop_measurement`](Self::stop_measurement))
    /// fires or the transport fails. A rejected handshake closes the transport.
    pub fn start_measurement(&self, cancel: &CancellationToken) -> Result<(), DriverError> {
        let mut session = self.session.lock();
        if session.is_streaming() {
            if let Err(e) = session.reap() {
                warn!(error = %e, "previous measurement stream ended with an error");
            }
            if session.is_streaming() {
                return Err(DriverError::SessionActive);
            }
        }

        session.state = SessionState::Starting;
        info!("starting measurement");

        let (reply, buffer) = match self.exchange(&Command::StartMeasurement) {
            Ok(exchanged) => exchanged,
            Err(e) => {
                session.state = SessionState::Idle;
                return Err(e);
            }
        };

        if !reply.success {
            error!(reply = %reply.result, "failed to start measurement");
            self.inner.close();
            session.state = SessionState::Idle;
            return Err(DriverError::CommandFailed {
                command: Command::StartMeasurement.to_string(),
                reply: reply.result,
            });
        }

        if let Err(e) = session.spawn(Arc::clone(&self.inner), buffer, cancel.child_token()) {
            session.state = SessionState::Idle;
            return Err(e);
        }
        Ok(())
    }

    /// Send `STP` and stop the streaming thread
    ///
    /// Returns the streaming thread's fault if it had already failed.
    pub fn stop_measurement(&self) -> Result<(), DriverError> {
        let mut session = self.session.lock();
        info!("stopping measurement");
        let posted = self.inner.post(&Command::StopMeasurement);
        session.stop()?;
        posted
    }

    /// Surface a fault of a streaming thread that has already exited
    pub fn check_session(&self) -> Result<SessionState, DriverError> {
        let mut session = self.session.lock();
        session.reap()?;
        Ok(session.state)
    }

    /// The shared measurement record
    pub fn measurement(&self) -> &SharedMeasurement {
        &self.inner.measurement
    }

    /// Copy of the whole measurement record
    pub fn snapshot(&self) -> Measurement {
        self.inner.measurement.snapshot()
    }

    /// Device identifier, empty until `ID?` succeeds
    pub fn device_id(&self) -> String {
        self.inner.measurement.device_id()
    }

    /// Firmware version, empty until `VER?` succeeds
    pub fn firmware_version(&self) -> String {
        self.inner.measurement.firmware_version()
    }

    /// Last known forced recalibration value
    pub fn frc_value(&self) -> i32 {
        self.inner.measurement.frc_value()
    }

    /// Time of the last CO2, humidity or temperature update
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.inner.measurement.timestamp()
    }

    /// CO2 concentration in ppm
    pub fn co2(&self) -> i32 {
        self.inner.measurement.co2()
    }

    /// Relative humidity in percent
    pub fn humidity(&self) -> f64 {
        self.inner.measurement.humidity()
    }

    /// Temperature in degrees Celsius
    pub fn temperature(&self) -> f64 {
        self.inner.measurement.temperature()
    }
}

impl Drop for Udco2s {
    fn drop(&mut self) {
        self.session.get_mut().cancel();
    }
}

/// Write `command` and collect lines until its `OK` reply or the budget runs out
///
/// `OK KEY=value` lines that do not answer `command` were streamed by the
/// sensor; they are applied to `measurement` and the search goes on.
fn transact(
    port: &mut dyn Transport,
    command: &Command,
    read_cycles: usize,
    interrupt: &Interrupt,
    measurement: &SharedMeasurement,
) -> Result<(Reply, LineBuffer), DriverError> {
    port.clear_input_buffer()
        .map_err(DriverError::TransportRead)?;
    port.write_all(&command.encode())
        .map_err(DriverError::TransportWrite)?;

    let mut buffer = LineBuffer::new();
    let mut last = String::new();

    for _ in 0..read_cycles {
        let lines = read_lines(port, &mut buffer, interrupt)?;
        if lines.is_empty() {
            break;
        }

        let mut lines = lines.into_iter();
        while let Some(line) = lines.next() {
            if let Some(payload) = ok_payload(&line) {
                if !command.accepts(payload) {
                    debug!(%command, line = payload, "applying unsolicited line");
                    if let Err(e) = measurement.parse_line(payload) {
                        warn!(error = %e, line = payload, "skipping malformed line");
                    }
                    continue;
                }
                let reply = Reply {
                    result: payload.to_string(),
                    success: true,
                };
                // Lines after the reply belong to whoever reads next
                buffer.unread(lines);
                return Ok((reply, buffer));
            }
            last = line.trim_end().to_string();
        }
    }

    Ok((
        Reply {
            result: last,
            success: false,
        },
        buffer,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_config_default() {
        let config = DriverConfig::default();
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.read_timeout, Duration::from_millis(100));
        assert_eq!(config.command_read_cycles, 10);
    }

    #[test]
    fn test_open_missing_device_fails() {
        let result = Udco2s::open("/dev/udco2s-does-not-exist");
        assert!(matches!(result, Err(DriverError::TransportOpen { .. })));
    }
}
