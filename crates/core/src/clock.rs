//! Timestamps for outbound records.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};

/// UTC clock whose readings never go backwards.
///
/// The wall clock may step back (NTP adjustments); readings are clamped to the
/// latest value handed out so consumers always see non-decreasing timestamps.
/// Clones share the same high-water mark.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    last: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.observe(Utc::now())
    }

    /// `now()` rendered as RFC 3339 with millisecond precision and a `Z` suffix.
    pub fn timestamp(&self) -> String {
        format_timestamp(self.now())
    }

    fn observe(&self, reading: DateTime<Utc>) -> DateTime<Utc> {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let value = match *last {
            Some(previous) if previous > reading => previous,
            _ => reading,
        };
        *last = Some(value);
        value
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
