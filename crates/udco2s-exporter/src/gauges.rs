//! Gauges exposed on `/metrics`

use metrics::{describe_gauge, gauge, Unit};
use udco2s_core::measurement::Measurement;

pub const CO2_CONCENTRATION: &str = "udco2s_co2_concentration";
pub const HUMIDITY: &str = "udco2s_humidity";
pub const TEMPERATURE: &str = "udco2s_temperature";
pub const LAST_MEASUREMENT: &str = "udco2s_last_measurement_timestamp_seconds";

/// Register gauge descriptions with the installed recorder
pub fn describe() {
    describe_gauge!(CO2_CONCENTRATION, "CO2 concentration");
    describe_gauge!(HUMIDITY, Unit::Percent, "Humidity");
    describe_gauge!(TEMPERATURE, "Temperature");
    describe_gauge!(
        LAST_MEASUREMENT,
        Unit::Seconds,
        "Unix time of the last measurement line received from the sensor"
    );
}

/// Publish a measurement snapshot
pub fn record(measurement: &Measurement) {
    gauge!(CO2_CONCENTRATION).set(f64::from(measurement.co2));
    gauge!(HUMIDITY).set(measurement.humidity);
    gauge!(TEMPERATURE).set(measurement.temperature);

    if let Some(at) = measurement.timestamp {
        gauge!(LAST_MEASUREMENT).set(at.timestamp_millis() as f64 / 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use metrics_exporter_prometheus::PrometheusBuilder;

    fn render(measurement: &Measurement) -> String {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            describe();
            record(measurement);
        });
        handle.render()
    }

    fn value(output: &str, name: &str) -> Option<f64> {
        output
            .lines()
            .filter(|line| !line.starts_with('#'))
            .find_map(|line| line.strip_prefix(name)?.strip_prefix(' '))
            .and_then(|v| v.trim().parse().ok())
    }

    #[test]
    fn test_record_sets_gauges() {
        let output = render(&Measurement {
            co2: 415,
            humidity: 45.5,
            temperature: 23.25,
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).single(),
            ..Measurement::default()
        });

        assert_eq!(value(&output, CO2_CONCENTRATION), Some(415.0), "{}", output);
        assert_eq!(value(&output, HUMIDITY), Some(45.5), "{}", output);
        assert_eq!(value(&output, TEMPERATURE), Some(23.25), "{}", output);
        assert_eq!(value(&output, LAST_MEASUREMENT), Some(1_700_000_000.0), "{}", output);
    }

    #[test]
    fn test_timestamp_gauge_waits_for_first_measurement() {
        let output = render(&Measurement::default());
        assert_eq!(value(&output, CO2_CONCENTRATION), Some(0.0), "{}", output);
        assert_eq!(value(&output, LAST_MEASUREMENT), None, "{}", output);
    }
}
