//! UD-CO2S Prometheus exporter
//!
//! Opens the sensor named by `TTY`, starts a measurement session and
//! publishes the latest values on `LISTEN_ADDR` at `/metrics`.

mod config;
mod gauges;

use anyhow::{anyhow, Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use udco2s_core::protocol::{list_ports, DriverError, SessionState, Udco2s};

use config::ExporterConfig;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = ExporterConfig::from_env()?;

    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .install()
        .with_context(|| format!("failed to serve metrics on {}", config.listen_addr))?;
    gauges::describe();
    info!(addr = %config.listen_addr, "serving /metrics");

    let device = Arc::new(open_device(&config.tty).await?);
    let cancel = CancellationToken::new();

    {
        let device = Arc::clone(&device);
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || -> Result<(), DriverError> {
            let id = device.query_device_id()?;
            let version = device.query_firmware_version()?;
            info!(%id, %version, "sensor identified");
            device.start_measurement(&cancel)
        })
        .await?
        .context("failed to start measurement")?;
    }
    info!(interval = ?config.poll_interval, "udco2s-exporter is running");

    let result = poll(&device, config.poll_interval).await;

    cancel.cancel();
    let stopping = Arc::clone(&device);
    match tokio::task::spawn_blocking(move || stopping.stop_measurement()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "measurement did not stop cleanly"),
        Err(e) => warn!(error = %e, "stop task failed"),
    }
    device.close();

    result
}

async fn open_device(tty: &str) -> Result<Udco2s> {
    let path = tty.to_string();
    match tokio::task::spawn_blocking(move || Udco2s::open(&path)).await? {
        Ok(device) => Ok(device),
        Err(e) => {
            let ports: Vec<String> = list_ports().into_iter().map(|p| p.name).collect();
            warn!(?ports, "available serial ports");
            Err(e).with_context(|| format!("failed to open sensor on {}", tty))
        }
    }
}

/// Publish snapshots until shutdown or until the stream dies
async fn poll(device: &Udco2s, interval: std::time::Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutting down");
                return Ok(());
            }
            _ = ticker.tick() => {
                gauges::record(&device.snapshot());
                match device.check_session().context("measurement stream failed")? {
                    SessionState::Streaming => {}
                    state => return Err(anyhow!("measurement stream ended ({:?})", state)),
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}
