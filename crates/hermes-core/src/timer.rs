//! Countdown arithmetic for the token timers.
//!
//! The expiry timestamp is the source of truth; the persisted
//! remaining-seconds checkpoint is a display nicety only. Reload
//! recovery recomputes from `expires_at - now`, never from the
//! possibly-stale checkpoint.

use chrono::{DateTime, Utc};

/// Rendered value once a timer reaches zero (or no token exists).
pub const TIMER_EXPIRED: &str = "--:--";

/// Whole seconds remaining until `expires_at`, rounded up and clamped at
/// zero. Rounding up keeps a countdown started at `now + 125s` reading
/// `02:05` on its first tick rather than `02:04`.
pub fn remaining_seconds(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let ms = (expires_at - now).num_milliseconds();
    ((ms + 999) / 1000).max(0)
}

/// Render remaining seconds as `mm:ss`. Minutes grow past two digits for
/// long windows (the 8-hour refresh timer starts at `480:00`). Zero or
/// negative renders as [`TIMER_EXPIRED`].
pub fn format_mm_ss(seconds: i64) -> String {
    if seconds <= 0 {
        return TIMER_EXPIRED.to_string();
    }
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Display for a timer recovered from a stored record: `mm:ss` while the
/// expiry is in the future, [`TIMER_EXPIRED`] otherwise.
pub fn restore_display(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match expires_at {
        Some(at) if now < at => format_mm_ss(remaining_seconds(at, now)),
        _ => TIMER_EXPIRED.to_string(),
    }
}
