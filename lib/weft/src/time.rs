use chrono::{DateTime, Utc};
use std::time::SystemTime;

/// Returns the current unix timestamp (seconds elapsed since 1970-01-01)
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("System clock predates the unix epoch")
        .as_secs()
}

/// Returns the current unix timestamp in milliseconds.
#[inline]
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("System clock predates the unix epoch")
        .as_millis() as u64
}

/// Formats the supplied time as an IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`),
/// the only date shape emitted on the wire.
#[inline]
pub fn http_date(time: SystemTime) -> String {
    let datetime: DateTime<Utc> = time.into();
    datetime.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timestamp_secs_tracks_millis() {
        let secs = timestamp_secs();
        let millis = timestamp_millis();

        assert!(millis / 1000 >= secs);
        assert!(millis / 1000 - secs <= 1);
    }

    #[test]
    fn test_http_date_epoch() {
        let date = http_date(SystemTime::UNIX_EPOCH);
        assert_eq!(date, "Thu, 01 Jan 1970 00:00:00 GMT");
    }

    #[test]
    fn test_http_date_known_instant() {
        let instant = SystemTime::UNIX_EPOCH + Duration::from_secs(784_111_777);
        assert_eq!(http_date(instant), "Sun, 06 Nov 1994 08:49:37 GMT");
    }
}
