//! Day-completeness and current-hour validation
//!
//! These checks decide whether the cached curves actually cover the current
//! local day: every expected hour present (23/24/25 depending on daylight
//! saving), the current hour present and priced, and duplicate hours only
//! where a fall-back day legitimately repeats one.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Timelike;
use tracing::{debug, warn};

use super::dst::{DstTransition, HOURS_IN_DAY};
use super::staleness::AFTERNOON_HOUR;
use crate::data::{HomePriceInfo, PricePoint};

/// Number of times the repeated hour appears on a fall-back day
const DUPLICATE_HOUR_COUNT: usize = 2;

/// Wall-clock context shared by the day-level checks
#[derive(Debug, Clone, Copy)]
pub struct DayContext {
    pub current_date: chrono::NaiveDate,
    pub current_hour: u32,
    pub dst: DstTransition,
}

/// Validation outcome for a single home
#[derive(Debug, Clone)]
pub struct HomeCheck {
    pub valid: bool,
    pub issues: Vec<String>,
}

impl HomeCheck {
    fn ok() -> Self {
        Self {
            valid: true,
            issues: Vec::new(),
        }
    }

    fn fail(issue: String) -> Self {
        Self {
            valid: false,
            issues: vec![issue],
        }
    }

    fn merge(&mut self, other: HomeCheck) {
        if !other.valid {
            self.valid = false;
        }
        self.issues.extend(other.issues);
    }
}

/// Aggregated validation outcome across all homes
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub valid: bool,
    pub total_homes: usize,
    pub homes_with_issues: usize,
    pub issues: Vec<String>,
}

/// Validates every home's price data for the current day
pub fn validate_price_data(
    price_info: &BTreeMap<String, HomePriceInfo>,
    ctx: &DayContext,
) -> ValidationReport {
    let mut report = ValidationReport {
        valid: true,
        total_homes: price_info.len(),
        homes_with_issues: 0,
        issues: Vec::new(),
    };

    for (home_id, info) in price_info {
        let home_check = validate_home(home_id, info, ctx);
        if !home_check.valid {
            report.valid = false;
            report.homes_with_issues += 1;
            report.issues.extend(home_check.issues);
        }
    }

    report
}

/// Validates one home's price data: presence, date, current hour, coverage
pub fn validate_home(home_id: &str, info: &HomePriceInfo, ctx: &DayContext) -> HomeCheck {
    if info.today.is_empty() {
        return HomeCheck::fail(format!("home {home_id} has no 'today' data at all"));
    }

    // The date of the first entry decides whether the curve belongs to today
    let first_date = info.today[0].starts_at.date_naive();
    let date_difference = (ctx.current_date - first_date).num_days();
    if date_difference > 0 {
        warn!(home_id, days = date_difference, "home has outdated price data");
        return HomeCheck::fail(format!(
            "home {home_id} has outdated data from {date_difference} day(s) ago"
        ));
    }
    if date_difference < 0 {
        warn!(home_id, "home has unexpected future price data");
        return HomeCheck::fail(format!("home {home_id} has unexpected future data"));
    }

    validate_current_hour(home_id, &info.today, ctx)
}

/// Checks that the current hour exists with a usable price, then verifies
/// day completeness
///
/// A missing current hour is reported on its own and takes precedence over
/// the completeness check.
pub fn validate_current_hour(home_id: &str, today: &[PricePoint], ctx: &DayContext) -> HomeCheck {
    let current = today.iter().find(|price| {
        price.starts_at.date_naive() == ctx.current_date && price.starts_at.hour() == ctx.current_hour
    });

    match current {
        Some(price) => {
            if !price.total.is_finite() {
                warn!(home_id, hour = ctx.current_hour, "home has invalid price for current hour");
                return HomeCheck::fail(format!(
                    "home {home_id} has corrupt price data for hour {}",
                    ctx.current_hour
                ));
            }
        }
        None => {
            return HomeCheck::fail(format!(
                "home {home_id} is missing current hour ({}:00) data",
                ctx.current_hour
            ));
        }
    }

    validate_day_completeness(home_id, today, ctx)
}

/// Verifies hour coverage for the current day, with DST-aware expectations
pub fn validate_day_completeness(home_id: &str, today: &[PricePoint], ctx: &DayContext) -> HomeCheck {
    let mut check = HomeCheck::ok();
    let expected_hours = ctx.dst.expected_hours();

    let unique_hours: BTreeSet<u32> = today
        .iter()
        .filter(|price| price.starts_at.date_naive() == ctx.current_date)
        .map(|price| price.starts_at.hour())
        .collect();

    if unique_hours.len() < expected_hours {
        warn!(
            home_id,
            found = unique_hours.len(),
            expected = expected_hours,
            "home has incomplete data for today"
        );

        // Only fail once the clock has moved past the data we do have;
        // hours still ahead of us may simply not be published yet
        let max_hour = unique_hours.iter().max().copied().unwrap_or(0);
        if ctx.current_hour > max_hour {
            check.merge(HomeCheck::fail(format!(
                "home {home_id} has incomplete day data ({}/{expected_hours} hours)",
                unique_hours.len()
            )));
        }
    }

    if ctx.dst.is_transition() {
        check.merge(validate_dst_day(home_id, today, ctx));
    }

    check
}

/// Validates the hour pattern specific to a DST transition day
fn validate_dst_day(home_id: &str, today: &[PricePoint], ctx: &DayContext) -> HomeCheck {
    let mut check = HomeCheck::ok();
    let expected_hours = ctx.dst.expected_hours();

    let mut entry_count = 0usize;
    let mut hour_frequency: HashMap<u32, usize> = HashMap::new();
    for price in today {
        if price.starts_at.date_naive() != ctx.current_date {
            continue;
        }
        entry_count += 1;
        *hour_frequency.entry(price.starts_at.hour()).or_insert(0) += 1;
    }

    if entry_count != expected_hours {
        warn!(
            home_id,
            found = entry_count,
            expected = expected_hours,
            "unexpected hour count on DST transition day"
        );
        check.merge(HomeCheck::fail(format!(
            "home {home_id} has incorrect hour count for DST transition: {entry_count}/{expected_hours}"
        )));
    }

    let mut duplicate_hours: Vec<u32> = hour_frequency
        .iter()
        .filter(|(_, frequency)| **frequency > 1)
        .map(|(hour, _)| *hour)
        .collect();
    duplicate_hours.sort_unstable();

    match ctx.dst {
        DstTransition::SpringForward => {
            if !duplicate_hours.is_empty() {
                check.merge(HomeCheck::fail(format!(
                    "home {home_id} has unexpected duplicate hours during DST spring forward: {duplicate_hours:?}"
                )));
            }
        }
        DstTransition::FallBack => {
            // Exactly one hour must repeat, exactly twice
            let duplicate_count = duplicate_hours
                .first()
                .and_then(|hour| hour_frequency.get(hour))
                .copied()
                .unwrap_or(0);
            if duplicate_hours.len() != 1 || duplicate_count != DUPLICATE_HOUR_COUNT {
                check.merge(HomeCheck::fail(format!(
                    "home {home_id} has incorrect duplicate hours during DST fall back: {duplicate_hours:?}"
                )));
            }
        }
        DstTransition::None => {}
    }

    check
}

/// Cross-home completeness sweep
#[derive(Debug, Clone)]
pub struct CompletenessReport {
    pub complete: bool,
    pub total_homes: usize,
    pub homes_with_incomplete_data: usize,
    pub homes_with_missing_today: usize,
    pub homes_with_missing_tomorrow: usize,
    /// Human-readable missing-hour ranges, one entry per affected home
    pub missing_hour_ranges: Vec<String>,
    /// Hours absent from more than half of the homes, hinting at a
    /// systematic gap rather than per-home damage
    pub critical_missing_hours: Vec<u32>,
    pub needs_refresh: bool,
}

/// Checks completeness of today's data across all homes
pub fn check_data_completeness(
    price_info: &BTreeMap<String, HomePriceInfo>,
    ctx: &DayContext,
) -> CompletenessReport {
    let mut report = CompletenessReport {
        complete: true,
        total_homes: price_info.len(),
        homes_with_incomplete_data: 0,
        homes_with_missing_today: 0,
        homes_with_missing_tomorrow: 0,
        missing_hour_ranges: Vec::new(),
        critical_missing_hours: Vec::new(),
        needs_refresh: false,
    };

    debug!(homes = price_info.len(), "checking price data completeness");

    // Tomorrow's curve is only expected once the publication window opens
    let expect_tomorrow = ctx.current_hour >= AFTERNOON_HOUR;

    let mut all_homes_hour_counts: HashMap<u32, usize> = HashMap::new();

    for (home_id, info) in price_info {
        if info.today.is_empty() {
            report.complete = false;
            report.homes_with_missing_today += 1;
            report.needs_refresh = true;
        } else {
            let hours_found: BTreeSet<u32> = info
                .today
                .iter()
                .filter(|price| price.starts_at.date_naive() == ctx.current_date)
                .map(|price| price.starts_at.hour())
                .collect();
            for hour in &hours_found {
                *all_homes_hour_counts.entry(*hour).or_insert(0) += 1;
            }

            let expected = expected_hour_set(ctx, &hours_found);
            let current_missing: Vec<u32> = expected
                .difference(&hours_found)
                .copied()
                .filter(|hour| *hour <= ctx.current_hour)
                .collect();

            if !current_missing.is_empty() {
                report.complete = false;
                report.homes_with_incomplete_data += 1;
                report.needs_refresh = true;

                let ranges = format_hour_ranges(&current_missing);
                report
                    .missing_hour_ranges
                    .push(format!("home {home_id}: hours {}", ranges.join(", ")));
            }
        }

        if expect_tomorrow && info.tomorrow.is_empty() {
            report.complete = false;
            report.homes_with_missing_tomorrow += 1;
        }
    }

    // An hour absent from more than half of the homes points to a
    // systematic gap rather than per-home damage
    let mut critical: Vec<u32> = all_homes_hour_counts
        .iter()
        .filter(|(_, count)| (**count as f64) < report.total_homes as f64 * 0.5)
        .map(|(hour, _)| *hour)
        .collect();
    critical.sort_unstable();
    if !critical.is_empty() {
        report.critical_missing_hours = critical;
        report.needs_refresh = true;
    }

    report
}

/// The set of hours a home should cover today
///
/// On a spring-forward day the skipped hour is excluded: the gap is
/// recognized as a single missing hour flanked by present neighbors.
fn expected_hour_set(ctx: &DayContext, hours_found: &BTreeSet<u32>) -> BTreeSet<u32> {
    let mut expected: BTreeSet<u32> = (0..HOURS_IN_DAY).collect();

    if ctx.dst == DstTransition::SpringForward {
        for hour in 0..HOURS_IN_DAY {
            if !hours_found.contains(&hour)
                && hour > 0
                && hours_found.contains(&(hour - 1))
                && hour < HOURS_IN_DAY - 1
                && hours_found.contains(&(hour + 1))
            {
                expected.remove(&hour);
                break;
            }
        }
    }

    expected
}

/// Collapses sorted hours into compact range strings, e.g. `["2-4", "7"]`
fn format_hour_ranges(hours: &[u32]) -> Vec<String> {
    let mut ranges = Vec::new();
    let mut iter = hours.iter().copied();
    let Some(first) = iter.next() else {
        return ranges;
    };

    let mut start = first;
    let mut prev = first;
    for hour in iter {
        if hour != prev + 1 {
            ranges.push(range_label(start, prev));
            start = hour;
        }
        prev = hour;
    }
    ranges.push(range_label(start, prev));
    ranges
}

fn range_label(start: u32, end: u32) -> String {
    if start == end {
        format!("{start}")
    } else {
        format!("{start}-{end}")
    }
}
