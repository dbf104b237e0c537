use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Europe::Budapest;

/// Seconds elapsed since midnight (Budapest local time) of the given
/// service day. Trains running past midnight keep counting upward, so a
/// 00:30 position on the day after `service_date` yields 86400 + 1800.
///
/// The day offset is the real elapsed time between the two local midnights
/// floored to whole days, so the 23-hour spring-forward day contributes
/// zero.
///
/// An unparseable service date falls back to plain seconds-since-midnight.
pub fn seconds_since_day(service_date: &str, now: DateTime<Utc>) -> i64 {
    let local = now.with_timezone(&Budapest);
    let seconds_since_midnight = local.num_seconds_from_midnight() as i64;

    let Ok(date) = NaiveDate::parse_from_str(service_date, "%Y-%m-%d") else {
        return seconds_since_midnight;
    };

    let midnight =
        |d: NaiveDate| Budapest.from_local_datetime(&d.and_time(NaiveTime::MIN)).earliest();

    match (midnight(local.date_naive()), midnight(date)) {
        (Some(today), Some(service_day)) => {
            let days_since = (today - service_day).num_seconds().div_euclid(86400);
            seconds_since_midnight + days_since * 86400
        }
        _ => seconds_since_midnight,
    }
}

/// Formats a seconds-since-midnight value as "HH:MM", wrapping past-midnight
/// values back into the 24h clock.
pub fn format_seconds_as_time(seconds: i64) -> String {
    let hours = (seconds / 3600).rem_euclid(24);
    let minutes = (seconds % 3600) / 60;
    format!("{:02}:{:02}", hours, minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_seconds_since_day_same_day() {
        // 10:00 UTC in June is 12:00 in Budapest (CEST, UTC+2)
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        assert_eq!(seconds_since_day("2024-06-15", now), 12 * 3600);
    }

    #[test]
    fn test_seconds_since_day_overnight() {
        // 22:30 UTC on the 15th is 00:30 Budapest on the 16th; relative to
        // the 15th's service day the clock keeps counting past 86400.
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 22, 30, 0).unwrap();
        assert_eq!(seconds_since_day("2024-06-15", now), 86400 + 1800);
        // Relative to its own calendar day it is just half an hour.
        assert_eq!(seconds_since_day("2024-06-16", now), 1800);
    }

    #[test]
    fn test_seconds_since_day_spring_forward() {
        // DST started 2024-03-31 in Budapest: that day is 23 hours long.
        // At 12:00 Budapest on April 1st (10:00 UTC, CEST), only 23h have
        // elapsed since the March 31st midnight, so the day offset is zero.
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 10, 0, 0).unwrap();
        assert_eq!(seconds_since_day("2024-03-31", now), 12 * 3600);
        assert_eq!(seconds_since_day("2024-04-01", now), 12 * 3600);
    }

    #[test]
    fn test_seconds_since_day_fall_back() {
        // DST ended 2024-10-27: a 25-hour day still counts as one day.
        let now = Utc.with_ymd_and_hms(2024, 10, 28, 11, 0, 0).unwrap();
        assert_eq!(seconds_since_day("2024-10-27", now), 86400 + 12 * 3600);
    }

    #[test]
    fn test_seconds_since_day_bad_date_falls_back() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 11, 0, 0).unwrap();
        // 11:00 UTC in January is 12:00 Budapest (CET, UTC+1)
        assert_eq!(seconds_since_day("not-a-date", now), 12 * 3600);
    }

    #[test]
    fn test_format_seconds_as_time() {
        assert_eq!(format_seconds_as_time(0), "00:00");
        assert_eq!(format_seconds_as_time(5 * 3600 + 7 * 60), "05:07");
        assert_eq!(format_seconds_as_time(86400 + 1800), "00:30");
    }
}
