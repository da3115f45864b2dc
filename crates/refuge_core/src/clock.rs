use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Microseconds since the Unix epoch.
///
/// `now()` is strictly increasing within a process so rows written in one
/// session keep their insertion order when sorted by timestamp.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

static LAST_TIMESTAMP: Lazy<Mutex<i64>> = Lazy::new(|| Mutex::new(0));

impl Timestamp {
    pub fn now() -> Self {
        let physical = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as i64;
        let mut guard = match LAST_TIMESTAMP.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = if physical > *guard { physical } else { *guard + 1 };
        *guard = next;
        Timestamp(next)
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }

    pub fn from_micros(value: i64) -> Self {
        Timestamp(value)
    }

    pub fn to_rfc3339(self) -> Option<String> {
        let nanos = i128::from(self.0) * 1_000;
        OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .ok()
            .and_then(|value| value.format(&Rfc3339).ok())
    }
}
