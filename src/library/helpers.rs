//! Various small helper functions

use std::num::ParseIntError;
use std::time::Duration;

const HOSTNAME_VARIABLE: &str = "HOSTNAME";
const HOSTNAME_FILE: &str = "/etc/hostname";
const FALLBACK_HOSTNAME: &str = "localhost";

/// Parses a Duration from a string containing milliseconds.
/// Useful for command line parsing
pub fn parse_millis(src: &str) -> Result<Duration, ParseIntError> {
    let millis = src.parse::<u64>()?;
    Ok(Duration::from_millis(millis))
}

/// Best-effort name of the machine this process runs on.
///
/// Reads the `HOSTNAME` env variable, then `/etc/hostname` and falls back to `localhost`.
pub fn local_hostname() -> String {
    if let Ok(name) = std::env::var(HOSTNAME_VARIABLE) {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }

    std::fs::read_to_string(HOSTNAME_FILE)
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_HOSTNAME.to_string())
}

/// Interprets a JSON value the way a loosely typed runtime would in a boolean context
pub fn is_truthy(value: &serde_json::Value) -> bool {
    use serde_json::Value;

    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
