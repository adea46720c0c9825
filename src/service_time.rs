//! Service-day time arithmetic.
//!
//! GTFS clock times run past 24:00:00 for post-midnight service, and a
//! service day runs roughly 03:00 to 03:00 local time. Everything here is
//! plain arithmetic on seconds after midnight of the service date.

use crate::error::HeadwayError;
use chrono::{Datelike, Days, NaiveDate, TimeZone, Timelike};
use chrono_tz::Tz;

/// Local hour before which a wall clock time still belongs to the previous
/// service date.
pub const SERVICE_DAY_CUTOFF_HOUR: u32 = 3;

/// Parse an `HH:MM:SS` string into seconds after midnight. Hours of 24 and
/// above are valid and stay un-wrapped, so `25:30:00` is 91800.
pub fn seconds_after_midnight(hhmmss: &str) -> Result<u32, HeadwayError> {
    let mut parts = hhmmss.split(':');

    let mut next_part = |original: &str| {
        parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(|| HeadwayError::InvalidTime(original.to_string()))
    };

    let hour = next_part(hhmmss)?;
    let minute = next_part(hhmmss)?;
    let second = next_part(hhmmss)?;

    if minute > 59 || second > 59 || parts.next().is_some() {
        return Err(HeadwayError::InvalidTime(hhmmss.to_string()));
    }

    Ok(hour * 3600 + minute * 60 + second)
}

/// Format seconds after midnight back into `HH:MM:SS`, without wrapping
/// hours of 24 and above.
pub fn format_hhmmss(seconds: u32) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// Parse a GTFS `YYYYMMDD` start date.
pub fn parse_start_date(yyyymmdd: &str) -> Option<NaiveDate> {
    if yyyymmdd.len() != 8 {
        return None;
    }

    NaiveDate::from_ymd_opt(
        yyyymmdd[0..4].parse().ok()?,
        yyyymmdd[4..6].parse().ok()?,
        yyyymmdd[6..8].parse().ok()?,
    )
}

/// Service date for a unix timestamp. Times after local midnight but before
/// the 03:00 cutoff belong to the previous service date.
pub fn service_date_for_unix(unix_seconds: i64, tz: Tz) -> Option<NaiveDate> {
    let local = tz.timestamp_opt(unix_seconds, 0).single()?;

    if local.hour() < SERVICE_DAY_CUTOFF_HOUR {
        local.date_naive().checked_sub_days(Days::new(1))
    } else {
        Some(local.date_naive())
    }
}

/// Convert a unix timestamp into seconds after midnight of the given
/// service date, so a 00:45 local observation on the service date's
/// following calendar day comes out as 24:45 worth of seconds.
pub fn start_time_from_unix(unix_seconds: i64, service_date: NaiveDate, tz: Tz) -> Option<u32> {
    let service_midnight = tz
        .with_ymd_and_hms(
            service_date.year(),
            service_date.month(),
            service_date.day(),
            0,
            0,
            0,
        )
        .single()?;

    u32::try_from(unix_seconds - service_midnight.timestamp()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;

    #[test]
    fn parses_ordinary_times() {
        assert_eq!(seconds_after_midnight("00:00:00").unwrap(), 0);
        assert_eq!(seconds_after_midnight("05:30:15").unwrap(), 19815);
        assert_eq!(seconds_after_midnight("23:59:59").unwrap(), 86399);
    }

    #[test]
    fn accepts_post_midnight_hours() {
        // 24:xx and 25:xx are real GTFS times on the previous service date
        assert_eq!(seconds_after_midnight("24:00:00").unwrap(), 86400);
        assert_eq!(seconds_after_midnight("25:30:00").unwrap(), 91800);
    }

    #[test]
    fn rejects_malformed_times() {
        assert!(seconds_after_midnight("12:00").is_err());
        assert!(seconds_after_midnight("12:61:00").is_err());
        assert!(seconds_after_midnight("").is_err());
        assert!(seconds_after_midnight("12:00:00:00").is_err());
        assert!(seconds_after_midnight("ab:cd:ef").is_err());
    }

    #[test]
    fn round_trips_seconds_after_midnight() {
        for s in [0u32, 1, 59, 3600, 86399, 86400, 91800, 172799] {
            assert_eq!(seconds_after_midnight(&format_hhmmss(s)).unwrap(), s);
        }
    }

    #[test]
    fn service_date_cutoff() {
        // 2024-06-15 12:00 EDT
        let noon = 1718467200;
        assert_eq!(
            service_date_for_unix(noon, New_York).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
        );

        // 2024-06-16 01:30 EDT is still service date 2024-06-15
        let one_thirty_am = 1718515800;
        assert_eq!(
            service_date_for_unix(one_thirty_am, New_York).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
        );

        // 03:00 exactly flips to the new service date
        let three_am = 1718521200;
        assert_eq!(
            service_date_for_unix(three_am, New_York).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 16).unwrap()
        );
    }

    #[test]
    fn start_time_spans_midnight() {
        let service_date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();

        // 2024-06-16 01:30 EDT relative to midnight of 2024-06-15
        let one_thirty_am = 1718515800;
        assert_eq!(
            start_time_from_unix(one_thirty_am, service_date, New_York).unwrap(),
            25 * 3600 + 30 * 60
        );
    }

    #[test]
    fn parses_start_dates() {
        assert_eq!(
            parse_start_date("20240615").unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
        );
        assert!(parse_start_date("2024-06-15").is_none());
        assert!(parse_start_date("garbage").is_none());
    }
}
