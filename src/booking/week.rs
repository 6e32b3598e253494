//! Facility-local calendar windows.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use super::interval::Interval;

/// Resolve a local wall-clock time to UTC.
///
/// Ambiguous times (DST fall-back) take the earlier instant; times inside a
/// spring-forward gap are pushed to the first valid instant after the gap.
fn resolve_local(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    if let Some(t) = tz.from_local_datetime(&naive).earliest() {
        return t.with_timezone(&Utc);
    }
    tz.from_local_datetime(&(naive + Duration::hours(1)))
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    resolve_local(date.and_time(NaiveTime::MIN), tz)
}

/// The local calendar day `date` as a UTC interval.
pub fn day_bounds(date: NaiveDate, tz: Tz) -> Interval {
    let next = date.succ_opt().unwrap_or(date);
    Interval {
        start: local_midnight(date, tz),
        end: local_midnight(next, tz),
    }
}

/// The facility week (Monday 00:00 to the following Monday 00:00, local time)
/// containing `instant`.
pub fn week_bounds(instant: DateTime<Utc>, tz: Tz) -> Interval {
    let local_date = instant.with_timezone(&tz).date_naive();
    let monday =
        local_date - Duration::days(i64::from(local_date.weekday().num_days_from_monday()));
    Interval {
        start: local_midnight(monday, tz),
        end: local_midnight(monday + Duration::days(7), tz),
    }
}

/// Hour-long intervals covering `[opening_hour, closing_hour)` local time on `date`.
///
/// Hours that do not exist locally (DST gap) are skipped.
pub fn hourly_slots(date: NaiveDate, opening_hour: u32, closing_hour: u32, tz: Tz) -> Vec<Interval> {
    (opening_hour..closing_hour)
        .filter_map(|hour| {
            let start = tz.from_local_datetime(&date.and_hms_opt(hour, 0, 0)?).earliest()?;
            let start = start.with_timezone(&Utc);
            Some(Interval {
                start,
                end: start + Duration::hours(1),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::Chicago;

    #[test]
    fn week_starts_monday_local_midnight() {
        // Sunday 2026-03-08 23:30 local (Chicago, CDT starts that morning) = Monday 04:30 UTC.
        let sunday_night = Utc.with_ymd_and_hms(2026, 3, 9, 4, 30, 0).unwrap();
        let week = week_bounds(sunday_night, Chicago);
        // Monday 2026-03-02 00:00 CST = 06:00 UTC
        assert_eq!(week.start, Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap());
        // Monday 2026-03-09 00:00 CDT = 05:00 UTC
        assert_eq!(week.end, Utc.with_ymd_and_hms(2026, 3, 9, 5, 0, 0).unwrap());
        assert!(week.contains(sunday_night));
    }

    #[test]
    fn monday_morning_belongs_to_new_week() {
        let monday = Utc.with_ymd_and_hms(2026, 6, 15, 5, 0, 0).unwrap(); // 00:00 CDT
        let week = week_bounds(monday, Chicago);
        assert_eq!(week.start, monday);
        assert_eq!(week.minutes(), 7 * 24 * 60);
    }

    #[test]
    fn day_bounds_follow_local_offset() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();
        let day = day_bounds(date, Chicago);
        assert_eq!(day.start, Utc.with_ymd_and_hms(2026, 1, 10, 6, 0, 0).unwrap());
        assert_eq!(day.minutes(), 24 * 60);
    }

    #[test]
    fn hourly_slots_cover_opening_hours() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 4).unwrap();
        let slots = hourly_slots(date, 6, 22, Chicago);
        assert_eq!(slots.len(), 16);
        assert_eq!(slots[0].start, Utc.with_ymd_and_hms(2026, 7, 4, 11, 0, 0).unwrap());
        assert!(slots.windows(2).all(|w| w[0].end == w[1].start));
    }

    #[test]
    fn hourly_slots_skip_missing_dst_hour() {
        // 02:00 does not exist in Chicago on 2026-03-08.
        let date = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();
        let slots = hourly_slots(date, 0, 4, Chicago);
        assert_eq!(slots.len(), 3);
    }
}
