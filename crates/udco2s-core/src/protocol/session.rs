//! Streaming measurement session
//!
//! After `STA` is acknowledged the sensor pushes a measurement line every few
//! seconds. A dedicated thread consumes them until cancelled.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::connection::DriverInner;
use super::parser::strip_ok_echo;
use super::reader::{read_lines_with, Interrupt, LineBuffer};
use super::DriverError;

/// Lifecycle of a measurement session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No session has been started
    Idle,
    /// `STA` sent, waiting for the acknowledgement
    Starting,
    /// Background thread is consuming measurement lines
    Streaming,
    /// Session ended by `stop_measurement` or a transport fault
    Stopped,
}

struct StreamTask {
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), DriverError>>,
}

pub(crate) struct Session {
    pub(crate) state: SessionState,
    task: Option<StreamTask>,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            state: SessionState::Idle,
            task: None,
        }
    }

    pub(crate) fn is_streaming(&self) -> bool {
        self.state == SessionState::Streaming
    }

    /// Launch the streaming thread, seeded with the handshake remainder
    pub(crate) fn spawn(
        &mut self,
        inner: Arc<DriverInner>,
        buffer: LineBuffer,
        cancel: CancellationToken,
    ) -> Result<(), DriverError> {
        let interrupt = Interrupt::new(cancel.clone());
        let handle = thread::Builder::new()
            .name("udco2s-stream".to_string())
            .spawn(move || run_stream(inner, buffer, interrupt))
            .map_err(DriverError::SpawnFailed)?;

        self.task = Some(StreamTask { cancel, handle });
        self.state = SessionState::Streaming;
        Ok(())
    }

    /// Signal the streaming thread without waiting for it
    pub(crate) fn cancel(&self) {
        if let Some(task) = &self.task {
            task.cancel.cancel();
        }
    }

    /// Cancel and join the streaming thread, returning how it ended
    pub(crate) fn stop(&mut self) -> Result<(), DriverError> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        task.cancel.cancel();
        self.state = SessionState::Stopped;
        join(task.handle)
    }

    /// Join the streaming thread if it has already exited
    pub(crate) fn reap(&mut self) -> Result<(), DriverError> {
        let finished = self
            .task
            .as_ref()
            .is_some_and(|task| task.handle.is_finished());
        if !finished {
            return Ok(());
        }
        self.stop()
    }
}

fn join(handle: JoinHandle<Result<(), DriverError>>) -> Result<(), DriverError> {
    handle.join().map_err(|_| DriverError::StreamPanicked)?
}

fn run_stream(
    inner: Arc<DriverInner>,
    mut buffer: LineBuffer,
    interrupt: Interrupt,
) -> Result<(), DriverError> {
    info!(pending = buffer.len(), "measurement stream started");

    while !interrupt.is_triggered() {
        let lines = match read_lines_with(&mut buffer, &interrupt, |chunk| inner.read_chunk(chunk))
        {
            Ok(lines) => lines,
            Err(e) => {
                error!(error = %e, "measurement stream lost the sensor");
                inner.close();
                return Err(e);
            }
        };

        for line in &lines {
            let line = strip_ok_echo(line);
            if let Err(e) = inner.measurement.parse_line(line) {
                warn!(error = %e, line, "skipping malformed line");
            }
        }
    }

    debug!("measurement stream cancelled");
    Ok(())
}
