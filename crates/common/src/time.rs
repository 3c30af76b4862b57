//! Millisecond epoch timestamps.
//!
//! Every persisted timestamp in switchboard is an `i64` count of milliseconds
//! since the Unix epoch. Rendering to calendar time goes through `chrono`.

use chrono::{DateTime, Utc};

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert epoch milliseconds to a UTC datetime.
///
/// Out-of-range values clamp to the Unix epoch rather than failing.
pub fn to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Compact elapsed-time label such as `+45s`, `+12m`, `+3h` or `+2d`.
///
/// Negative spans (clock skew between transports) render as `+0s`.
pub fn format_elapsed(from_ms: i64, to_ms: i64) -> String {
    let secs = to_ms.saturating_sub(from_ms).max(0) / 1000;
    match secs {
        s if s < 60 => format!("+{s}s"),
        s if s < 3_600 => format!("+{}m", s / 60),
        s if s < 86_400 => format!("+{}h", s / 3_600),
        s => format!("+{}d", s / 86_400),
    }
}
