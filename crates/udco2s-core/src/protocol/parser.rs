//! Protocol line decoding
//!
//! Measurement and identity lines are comma-separated `KEY=VALUE` tokens,
//! e.g. `CO2=415,HUM=45.2,TMP=23.1`. Replies to commands carry an `OK` prefix.

use chrono::{DateTime, Utc};
use std::str::FromStr;

use super::LineError;
use crate::measurement::Measurement;

/// Prefix of a successful reply
pub const OK_PREFIX: &str = "OK";

/// Payload of a successful reply, or `None` for any other line
///
/// Accepts both `OK <payload>` and a bare `OK`.
pub fn ok_payload(line: &str) -> Option<&str> {
    let line = line.trim_end();
    if line == OK_PREFIX {
        return Some("");
    }
    line.strip_prefix("OK ").map(str::trim)
}

/// Drop the `OK` echo the sensor puts in front of streamed lines
pub fn strip_ok_echo(line: &str) -> &str {
    ok_payload(line).unwrap_or(line)
}

fn parse_value<T: FromStr>(key: &str, value: Option<&str>, token: &str) -> Result<T, LineError>
where
    T::Err: std::fmt::Display,
{
    let value = value.ok_or_else(|| LineError::Malformed {
        token: token.to_string(),
        reason: format!("missing value for {}", key),
    })?;
    value.trim().parse::<T>().map_err(|e| LineError::Malformed {
        token: token.to_string(),
        reason: e.to_string(),
    })
}

/// Apply one line to `record`, stamping live values with `now`
///
/// Returns the number of fields updated. Processing stops at the first
/// malformed token of a recognized key; tokens before it stay applied.
pub fn apply_line(
    record: &mut Measurement,
    line: &str,
    now: DateTime<Utc>,
) -> Result<usize, LineError> {
    let mut updated = 0;

    for token in line.split(',') {
        let mut parts = token.splitn(2, '=');
        let key = parts.next().unwrap_or_default().trim();
        let value = parts.next();

        match key {
            "CO2" => {
                record.co2 = parse_value(key, value, token)?;
                record.timestamp = Some(now);
            }
            "HUM" => {
                record.humidity = parse_value(key, value, token)?;
                record.timestamp = Some(now);
            }
            "TMP" => {
                record.temperature = parse_value(key, value, token)?;
                record.timestamp = Some(now);
            }
            "FRC" => {
                record.frc_value = parse_value(key, value, token)?;
            }
            "ID" => {
                record.device_id = parse_value::<String>(key, value, token)?;
            }
            "VER" => {
                record.firmware_version = parse_value::<String>(key, value, token)?;
            }
            _ => continue,
        }
        updated += 1;
    }

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn test_full_measurement_line() {
        let mut record = Measurement::default();
        let n = apply_line(&mut record, "CO2=415,HUM=45.2,TMP=23.1", at(100)).unwrap();
        assert_eq!(n, 3);
        assert_eq!(record.co2, 415);
        assert_eq!(record.humidity, 45.2);
        assert_eq!(record.temperature, 23.1);
        assert_eq!(record.timestamp, Some(at(100)));
    }

    #[test]
    fn test_identity_does_not_touch_timestamp() {
        let mut record = Measurement::default();
        apply_line(&mut record, "CO2=415,HUM=45.2,TMP=23.1", at(100)).unwrap();
        apply_line(&mut record, "ID=ABC123", at(200)).unwrap();
        apply_line(&mut record, "VER=1.2.3", at(300)).unwrap();
        apply_line(&mut record, "FRC=450", at(400)).unwrap();
        assert_eq!(record.device_id, "ABC123");
        assert_eq!(record.firmware_version, "1.2.3");
        assert_eq!(record.frc_value, 450);
        assert_eq!(record.timestamp, Some(at(100)));
    }

    #[test]
    fn test_malformed_token_aborts_rest_of_line() {
        let mut record = Measurement::default();
        apply_line(&mut record, "CO2=400,HUM=40.0", at(1)).unwrap();

        let err = apply_line(&mut record, "CO2=bad,HUM=45.2", at(2)).unwrap_err();
        assert!(matches!(err, LineError::Malformed { ref token, .. } if token == "CO2=bad"));
        assert_eq!(record.co2, 400);
        assert_eq!(record.humidity, 40.0);
        assert_eq!(record.timestamp, Some(at(1)));
    }

    #[test]
    fn test_earlier_tokens_are_not_rolled_back() {
        let mut record = Measurement::default();
        let result = apply_line(&mut record, "CO2=420,HUM=oops,TMP=21.0", at(5));
        assert!(result.is_err());
        assert_eq!(record.co2, 420);
        assert_eq!(record.humidity, 0.0);
        assert_eq!(record.temperature, 0.0);
        assert_eq!(record.timestamp, Some(at(5)));
    }

    #[test]
    fn test_missing_value_is_malformed() {
        let mut record = Measurement::default();
        assert!(apply_line(&mut record, "CO2", at(1)).is_err());
        assert_eq!(record.timestamp, None);
    }

    #[test]
    fn test_unknown_keys_and_empty_tokens_ignored() {
        let mut record = Measurement::default();
        let n = apply_line(&mut record, "FOO=1,,TMP=19.5,BAR", at(9)).unwrap();
        assert_eq!(n, 1);
        assert_eq!(record.temperature, 19.5);
        assert_eq!(apply_line(&mut record, "", at(10)).unwrap(), 0);
        assert_eq!(record.timestamp, Some(at(9)));
    }

    #[test]
    fn test_token_order_and_subsets() {
        let mut record = Measurement::default();
        apply_line(&mut record, "TMP=22.0,CO2=500", at(1)).unwrap();
        assert_eq!(record.co2, 500);
        assert_eq!(record.temperature, 22.0);
        assert_eq!(record.humidity, 0.0);
    }

    #[test]
    fn test_ok_payload() {
        assert_eq!(ok_payload("OK 1.2.3"), Some("1.2.3"));
        assert_eq!(ok_payload("OK 1.2.3 \r"), Some("1.2.3"));
        assert_eq!(ok_payload("OK"), Some(""));
        assert_eq!(ok_payload("NG"), None);
        assert_eq!(ok_payload("OKAY"), None);
    }

    #[test]
    fn test_strip_ok_echo() {
        assert_eq!(strip_ok_echo("OK CO2=400,HUM=50.0"), "CO2=400,HUM=50.0");
        assert_eq!(strip_ok_echo("CO2=400"), "CO2=400");
        assert_eq!(strip_ok_echo("OK"), "");
    }
}
