use cag_common::Money;
use chrono::{DateTime, Utc};

/// The timestamp format the conversion upload endpoint expects: `yyyy-mm-dd hh:mm:ss+00:00`.
pub fn format_conversion_time(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%:z").to_string()
}

/// Conversion values are reported in major units as a float.
pub fn conversion_value(value: Money) -> f64 {
    value.value() as f64 / 100.0
}
