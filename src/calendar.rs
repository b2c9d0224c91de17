//! NFL season calendar
//!
//! The league's week convention is Tuesday-to-Monday buckets in US Eastern
//! time, anchored to Labor Day. Week boundaries are a zone-local rule, so all
//! comparisons happen on Eastern wall-clock time, not UTC.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc, Weekday};
use chrono_tz::America::New_York;

use crate::{OddsValueError, Result};

/// Number of regular-season week buckets for a season year.
///
/// The league moved from a 17-game to an 18-week schedule in 2021.
pub fn regular_season_weeks(season_year: i32) -> i64 {
    if season_year >= 2021 {
        18
    } else {
        17
    }
}

/// Start of the Week 1 bucket as Eastern wall-clock time: Tuesday 00:00
/// after Labor Day (the first Monday on or after September 1).
pub fn week1_bucket_start_et(season_year: i32) -> NaiveDateTime {
    let mut labor_day = NaiveDate::from_ymd_opt(season_year, 9, 1)
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(1970, 1, 1).unwrap());
    while labor_day.weekday() != Weekday::Mon {
        labor_day += Duration::days(1);
    }
    let tuesday = labor_day + Duration::days(1);
    tuesday.and_hms_opt(0, 0, 0).unwrap_or_default()
}

fn to_eastern_wall_clock(dt: DateTime<Utc>) -> NaiveDateTime {
    dt.with_timezone(&New_York).naive_local()
}

/// Whether `dt` falls inside the regular-season window for `season_year`.
///
/// Excludes preseason and playoffs. Never fails; out-of-window timestamps
/// simply return false.
pub fn in_regular_season_window(dt: DateTime<Utc>, season_year: i32) -> bool {
    let dt_et = to_eastern_wall_clock(dt);
    let start = week1_bucket_start_et(season_year);
    let end = start + Duration::weeks(regular_season_weeks(season_year));
    start <= dt_et && dt_et <= end
}

/// 1-based week bucket index for `dt` within the regular-season window.
///
/// Errors when `dt` is outside the window. The inclusive window end (exactly
/// the final Monday-to-Tuesday boundary) is folded into the last bucket.
pub fn regular_season_week(dt: DateTime<Utc>, season_year: i32) -> Result<u32> {
    if !in_regular_season_window(dt, season_year) {
        return Err(OddsValueError::WeekOutOfRange { season_year });
    }
    let dt_et = to_eastern_wall_clock(dt);
    let start = week1_bucket_start_et(season_year);
    let week = (dt_et - start).num_days() / 7 + 1;
    Ok(week.min(regular_season_weeks(season_year)) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_week1_start_is_tuesday_after_labor_day() {
        // Sep 1 2025 is itself a Monday.
        assert_eq!(
            week1_bucket_start_et(2025),
            NaiveDate::from_ymd_opt(2025, 9, 2).unwrap().and_hms_opt(0, 0, 0).unwrap()
        );
        // Labor Day 2024 is Sep 2.
        assert_eq!(
            week1_bucket_start_et(2024),
            NaiveDate::from_ymd_opt(2024, 9, 3).unwrap().and_hms_opt(0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_window_membership() {
        // Kickoff Sunday of week 1, 2025.
        assert!(in_regular_season_window(utc(2025, 9, 7, 17, 0), 2025));
        // August preseason.
        assert!(!in_regular_season_window(utc(2025, 8, 15, 0, 0), 2025));
        // February playoffs.
        assert!(!in_regular_season_window(utc(2026, 2, 1, 0, 0), 2025));
    }

    #[test]
    fn test_week_buckets() {
        // Tue Sep 30 -> Mon Oct 6 is the week 5 bucket in 2025.
        assert_eq!(regular_season_week(utc(2025, 10, 1, 17, 0), 2025).unwrap(), 5);
        // Tue Oct 7 -> Mon Oct 13 is week 6.
        assert_eq!(regular_season_week(utc(2025, 10, 8, 17, 0), 2025).unwrap(), 6);
        // First instant of the window is week 1 (04:00 UTC = midnight ET).
        assert_eq!(regular_season_week(utc(2025, 9, 2, 4, 0), 2025).unwrap(), 1);
    }

    #[test]
    fn test_window_end_boundary_folds_into_final_week() {
        // The 2025 window ends exactly 18 weeks after Tue Sep 2 00:00 ET,
        // i.e. Tue Jan 6 2026 00:00 ET (05:00 UTC under EST).
        let end = utc(2026, 1, 6, 5, 0);
        assert!(in_regular_season_window(end, 2025));
        assert_eq!(regular_season_week(end, 2025).unwrap(), 18);

        // The final Monday night slate is plainly week 18.
        assert_eq!(regular_season_week(utc(2026, 1, 6, 1, 0), 2025).unwrap(), 18);

        // One minute past the boundary is outside the window.
        let past = utc(2026, 1, 6, 5, 1);
        assert!(!in_regular_season_window(past, 2025));
        assert!(regular_season_week(past, 2025).is_err());
    }

    #[test]
    fn test_week_out_of_range_is_error_membership_is_false() {
        let preseason = utc(2025, 8, 15, 0, 0);
        assert!(!in_regular_season_window(preseason, 2025));
        assert!(matches!(
            regular_season_week(preseason, 2025),
            Err(OddsValueError::WeekOutOfRange { season_year: 2025 })
        ));
    }

    #[test]
    fn test_season_length_rule_change() {
        assert_eq!(regular_season_weeks(2020), 17);
        assert_eq!(regular_season_weeks(2021), 18);

        // 18 weeks after the 2021 start (Tue Sep 7) is inside; the 2020
        // window (17 weeks from Tue Sep 8) ends a week earlier relative to
        // its own start.
        let start_2021 = week1_bucket_start_et(2021);
        assert_eq!(start_2021.date(), NaiveDate::from_ymd_opt(2021, 9, 7).unwrap());
        assert!(in_regular_season_window(utc(2022, 1, 9, 18, 0), 2021));
        assert!(!in_regular_season_window(utc(2022, 1, 20, 18, 0), 2021));
    }
}
