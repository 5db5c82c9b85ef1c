//! Business-timezone date math.
//!
//! Every "today" and every due-time in the system goes through these
//! helpers with an explicit `Tz` — materializer, evaluator, and bucket
//! math must agree on instance identity, so nothing reads the ambient
//! system timezone.

use chrono::{DateTime, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Calendar date of `now` in the business timezone.
pub fn business_today(tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// Parse a template's HH:MM scheduled time. Malformed values fall back
/// to start of day rather than poisoning a sweep.
pub fn parse_hhmm(s: &str) -> NaiveTime {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s.trim(), "%H:%M:%S"))
        .unwrap_or(NaiveTime::MIN)
}

/// UTC instant a subtask is due: `run_date` at `scheduled_time` in the
/// business timezone. DST-ambiguous local times resolve to the earlier
/// instant; times inside a DST gap shift forward an hour.
pub fn due_at_utc(tz: Tz, run_date: NaiveDate, scheduled_time: &str) -> DateTime<Utc> {
    let local = run_date.and_time(parse_hhmm(scheduled_time));
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earlier, _) => earlier.with_timezone(&Utc),
        LocalResult::None => {
            let shifted = local + chrono::Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&local))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_today_crosses_midnight() {
        let tz: Tz = "Asia/Ho_Chi_Minh".parse().unwrap();
        // 18:30 UTC = 01:30 next day in +07:00.
        let now = Utc.with_ymd_and_hms(2026, 8, 5, 18, 30, 0).unwrap();
        assert_eq!(business_today(tz, now), NaiveDate::from_ymd_opt(2026, 8, 6).unwrap());
    }

    #[test]
    fn test_due_at_utc() {
        let tz: Tz = "Asia/Ho_Chi_Minh".parse().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();
        let due = due_at_utc(tz, date, "06:00");
        // 06:00 +07:00 == 23:00 UTC the previous day.
        assert_eq!(due, Utc.with_ymd_and_hms(2026, 8, 5, 23, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_hhmm_fallback() {
        assert_eq!(parse_hhmm("06:15"), NaiveTime::from_hms_opt(6, 15, 0).unwrap());
        assert_eq!(parse_hhmm(" 23:59 "), NaiveTime::from_hms_opt(23, 59, 0).unwrap());
        assert_eq!(parse_hhmm("garbage"), NaiveTime::MIN);
    }
}
