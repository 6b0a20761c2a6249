//! Age-based staleness checks for the cached price data
//!
//! A cache can be perfectly well-formed and still too old to trust. The
//! thresholds distinguish severe staleness (refresh no matter what), normal
//! staleness during the afternoon publication window, and a freshly crossed
//! quarter-hour boundary.

use chrono::{Duration, NaiveDateTime, Timelike};

/// Cache older than this is severely stale regardless of time of day
pub const SEVERELY_STALE_HOURS: i64 = 12;

/// Cache older than this is stale during active hours
pub const STALE_MINUTES: i64 = 60;

/// Minutes after a quarter-hour boundary during which a crossed boundary
/// still warrants a refresh
pub const QUARTER_HOUR_GRACE_MINUTES: u32 = 5;

/// Hour of day from which tomorrow's prices may be published
pub const AFTERNOON_HOUR: u32 = 13;

/// Result of a staleness check
#[derive(Debug, Clone)]
pub struct StalenessReport {
    pub is_stale: bool,
    pub reason: Option<String>,
    pub needs_refresh: bool,
}

impl StalenessReport {
    fn fresh() -> Self {
        Self {
            is_stale: false,
            reason: None,
            needs_refresh: false,
        }
    }

    fn stale(reason: String) -> Self {
        Self {
            is_stale: true,
            reason: Some(reason),
            needs_refresh: true,
        }
    }
}

/// Checks whether the cache is stale relative to the last full update
///
/// Rules are evaluated in order, first match wins: no prior update, severe
/// age, moderate age during active hours, and a quarter-hour bucket crossed
/// while `now` is still within the grace window past the boundary.
pub fn check_stale(last_full_update: Option<NaiveDateTime>, now: NaiveDateTime) -> StalenessReport {
    let Some(last) = last_full_update else {
        return StalenessReport::stale("no previous update timestamp".to_string());
    };

    let age = now - last;

    if age > Duration::hours(SEVERELY_STALE_HOURS) {
        let hours = age.num_seconds() as f64 / 3600.0;
        return StalenessReport::stale(format!("cache is severely stale ({hours:.1} hours old)"));
    }

    if age > Duration::minutes(STALE_MINUTES) && now.hour() >= AFTERNOON_HOUR {
        let minutes = age.num_seconds() as f64 / 60.0;
        return StalenessReport::stale(format!(
            "cache is stale during active hours ({minutes:.1} minutes old)"
        ));
    }

    if now.minute() / 15 != last.minute() / 15 && now.minute() % 15 < QUARTER_HOUR_GRACE_MINUTES {
        return StalenessReport::stale("passed a quarter-hour boundary since last update".to_string());
    }

    StalenessReport::fresh()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 15)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn no_previous_update_is_stale() {
        let report = check_stale(None, at(9, 0));
        assert!(report.is_stale);
        assert!(report.needs_refresh);
        assert!(report.reason.unwrap().contains("no previous update"));
    }

    #[test]
    fn thirteen_hours_old_is_severely_stale() {
        let now = at(14, 0);
        let last = now - Duration::hours(13);
        let report = check_stale(Some(last), now);

        assert!(report.is_stale);
        assert!(report.reason.unwrap().contains("severely stale"));
    }

    #[test]
    fn ten_minutes_old_in_the_morning_is_fresh() {
        let now = at(9, 0);
        let last = now - Duration::minutes(10);
        let report = check_stale(Some(last), now);

        assert!(!report.is_stale);
        assert!(!report.needs_refresh);
        assert!(report.reason.is_none());
    }

    #[test]
    fn ninety_minutes_old_in_the_afternoon_is_stale() {
        let now = at(14, 20);
        let last = now - Duration::minutes(90);
        let report = check_stale(Some(last), now);

        assert!(report.is_stale);
        assert!(report.reason.unwrap().contains("active hours"));
    }

    #[test]
    fn ninety_minutes_old_in_the_morning_is_fresh() {
        // Moderate staleness only matters once the publication window opens
        let now = at(9, 20);
        let last = now - Duration::minutes(90);
        let report = check_stale(Some(last), now);

        assert!(!report.is_stale);
    }

    #[test]
    fn crossed_quarter_boundary_within_grace_is_stale() {
        let report = check_stale(Some(at(9, 12)), at(9, 17));
        assert!(report.is_stale);
        assert!(report.reason.unwrap().contains("quarter-hour boundary"));
    }

    #[test]
    fn crossed_quarter_boundary_past_grace_is_fresh() {
        let report = check_stale(Some(at(9, 12)), at(9, 22));
        assert!(!report.is_stale);
    }

    #[test]
    fn same_quarter_bucket_is_fresh() {
        let report = check_stale(Some(at(9, 16)), at(9, 18));
        assert!(!report.is_stale);
    }
}
