//! Absolute time anchoring for recordings.
//!
//! A recording's start is resolved once per run into a [`RecordingStart`]
//! normalized to a single timezone. Everything downstream only adds relative
//! seconds to it.

use crate::error::{ConfigError, InputError};
use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use std::fmt;

/// Absolute timestamp of a window or feature row.
pub type Timestamp = DateTime<Tz>;

/// Timezone used when none is configured.
pub const DEFAULT_TIMEZONE: &str = "America/Los_Angeles";

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz, ConfigError> {
    name.parse::<Tz>()
        .map_err(|_| ConfigError::UnknownTimezone(name.to_string()))
}

/// Start instant of a recording in the run's timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordingStart(DateTime<Tz>);

impl RecordingStart {
    /// Build from seconds since the Unix epoch.
    pub fn from_epoch_seconds(secs: f64, tz: Tz) -> Result<Self, InputError> {
        if !secs.is_finite() {
            return Err(InputError::InvalidStartTime(format!(
                "epoch seconds {secs} is not finite"
            )));
        }
        let whole = secs.floor();
        let mut seconds = whole as i64;
        let mut nanos = ((secs - whole) * 1e9).round() as u32;
        // A fraction that rounds to a full second belongs to the next one
        if nanos >= 1_000_000_000 {
            seconds = seconds.saturating_add(1);
            nanos -= 1_000_000_000;
        }
        DateTime::from_timestamp(seconds, nanos)
            .map(|utc| Self(utc.with_timezone(&tz)))
            .ok_or_else(|| InputError::InvalidStartTime(format!("epoch seconds {secs} out of range")))
    }

    /// Build from a wall-clock datetime read in `tz`.
    ///
    /// Recording devices store local clock time without an offset. When the
    /// wall-clock time is ambiguous (DST fall-back) the earlier instant is
    /// used; a time inside a DST gap is rejected.
    pub fn from_naive_datetime_assumed_local(
        naive: NaiveDateTime,
        tz: Tz,
    ) -> Result<Self, InputError> {
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => Ok(Self(dt)),
            LocalResult::Ambiguous(earliest, _) => Ok(Self(earliest)),
            LocalResult::None => Err(InputError::InvalidStartTime(format!(
                "{naive} does not exist in {}",
                tz.name()
            ))),
        }
    }

    /// The start instant.
    pub fn datetime(&self) -> DateTime<Tz> {
        self.0
    }

    /// The timezone every derived timestamp is expressed in.
    pub fn timezone(&self) -> Tz {
        self.0.timezone()
    }

    /// Absolute time `secs` seconds after the start, to the nanosecond.
    pub fn at_offset_seconds(&self, secs: f64) -> Timestamp {
        self.0 + Duration::nanoseconds((secs * 1e9).round() as i64)
    }

    /// Absolute time of sample `index` at `sample_rate` Hz.
    pub fn at_sample(&self, index: usize, sample_rate: f64) -> Timestamp {
        self.at_offset_seconds(index as f64 / sample_rate)
    }
}

impl fmt::Display for RecordingStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
