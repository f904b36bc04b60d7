use std::cmp::Ordering;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use crate::error::{invalid_argument, DbResult};

/// Point in time with nanosecond precision, as stored by the database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    pub fn new(seconds: i64, nanos: i32) -> Self {
        let extra_seconds = nanos.div_euclid(1_000_000_000);
        Self {
            seconds: seconds + extra_seconds as i64,
            nanos: nanos.rem_euclid(1_000_000_000),
        }
    }

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn from_millis(millis: i64) -> Self {
        Self::new(
            millis.div_euclid(1000),
            (millis.rem_euclid(1000) * 1_000_000) as i32,
        )
    }

    pub fn to_millis(&self) -> i64 {
        self.seconds * 1000 + (self.nanos / 1_000_000) as i64
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(duration) => Self::new(duration.as_secs() as i64, duration.subsec_nanos() as i32),
            Err(err) => {
                let duration = err.duration();
                Self::new(
                    -(duration.as_secs() as i64),
                    -(duration.subsec_nanos() as i32),
                )
            }
        }
    }

    pub fn to_system_time(&self) -> SystemTime {
        if self.seconds >= 0 {
            UNIX_EPOCH + Duration::new(self.seconds as u64, self.nanos as u32)
        } else {
            UNIX_EPOCH - Duration::from_secs(self.seconds.unsigned_abs())
                + Duration::from_nanos(self.nanos as u64)
        }
    }

    pub fn from_datetime(datetime: DateTime<Utc>) -> Self {
        Self::new(datetime.timestamp(), datetime.timestamp_subsec_nanos() as i32)
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.seconds, self.nanos as u32)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// RFC 3339 text with nanosecond precision, the REST wire format.
    pub fn to_rfc3339(&self) -> String {
        self.to_datetime()
            .to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    pub fn parse_rfc3339(value: &str) -> DbResult<Self> {
        let datetime = DateTime::parse_from_rfc3339(value)
            .map_err(|err| invalid_argument(format!("Invalid timestamp '{value}': {err}")))?;
        Ok(Self::from_datetime(datetime.with_timezone(&Utc)))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self::from_datetime(value)
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(value: Timestamp) -> Self {
        value.to_datetime()
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seconds
            .cmp(&other.seconds)
            .then(self.nanos.cmp(&other.nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_nanoseconds() {
        let timestamp = Timestamp::new(1, 1_500_000_000);
        assert_eq!(timestamp.seconds, 2);
        assert_eq!(timestamp.nanos, 500_000_000);

        let negative = Timestamp::new(0, -1);
        assert_eq!(negative.seconds, -1);
        assert_eq!(negative.nanos, 999_999_999);
    }

    #[test]
    fn millis_conversion() {
        let timestamp = Timestamp::from_millis(1_700_000_000_123);
        assert_eq!(timestamp.seconds, 1_700_000_000);
        assert_eq!(timestamp.nanos, 123_000_000);
        assert_eq!(timestamp.to_millis(), 1_700_000_000_123);
    }

    #[test]
    fn rfc3339_text() {
        let timestamp = Timestamp::new(0, 5);
        assert_eq!(timestamp.to_rfc3339(), "1970-01-01T00:00:00.000000005Z");
        assert_eq!(
            Timestamp::parse_rfc3339("1970-01-01T00:00:00.000000005Z").unwrap(),
            timestamp
        );
        assert!(Timestamp::parse_rfc3339("yesterday").is_err());
    }
}
