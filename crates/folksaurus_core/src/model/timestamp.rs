//! Conversion between Unix seconds and the normalized datetime text stored
//! in `term_data.last_retrieved`.

use chrono::{DateTime, NaiveDateTime, Utc};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current time in Unix seconds.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Formats Unix seconds as `YYYY-MM-DD HH:MM:SS` (UTC).
///
/// Values outside chrono's representable range collapse to epoch zero.
pub fn epoch_to_datetime(epoch_secs: i64) -> String {
    DateTime::from_timestamp(epoch_secs, 0)
        .or_else(|| DateTime::from_timestamp(0, 0))
        .map(|value| value.format(DATETIME_FORMAT).to_string())
        .unwrap_or_else(|| "1970-01-01 00:00:00".to_string())
}

/// Parses stored datetime text back to Unix seconds (UTC).
///
/// Missing or zero dates (`0000-00-00 00:00:00`) read as epoch zero.
pub fn datetime_to_epoch(value: Option<&str>) -> Option<i64> {
    let Some(text) = value.map(str::trim).filter(|text| !text.is_empty()) else {
        return Some(0);
    };
    if text.starts_with("0000-00-00") {
        return Some(0);
    }
    NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
        .ok()
        .map(|value| value.and_utc().timestamp())
}
