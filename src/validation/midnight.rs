//! Midnight rotation: moving tomorrow's prices into today
//!
//! The rotation normally runs at local midnight. When the process was down
//! over midnight, the detector recognizes the drift from the dates inside
//! the cached curves and the coordinator performs the rotation reactively on
//! startup.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::data::{HomePriceInfo, PriceCache};

/// Analysis of whether a midnight rotation was missed
#[derive(Debug, Clone, Default)]
pub struct RotationCheck {
    /// Whether any home's today data is from an earlier date
    pub needs_rotation: bool,
    /// Homes whose today data is outdated
    pub outdated_homes: usize,
    /// All homes with price info
    pub total_homes: usize,
    /// Per-home staleness in days, only for homes more than one day behind
    pub days_old_by_home: BTreeMap<String, i64>,
    /// Mean staleness across the homes in `days_old_by_home`
    ///
    /// Homes exactly one day behind are the expected post-midnight case and
    /// are excluded, so the average can stay 0 even when rotation is needed.
    pub avg_days_old: f64,
    /// Whether the average unexplained staleness exceeds one day
    pub severely_outdated: bool,
}

/// Checks each home's today data against the current date
pub fn detect_missed_rotation(
    price_info: &BTreeMap<String, HomePriceInfo>,
    current_date: NaiveDate,
) -> RotationCheck {
    let mut check = RotationCheck {
        total_homes: price_info.len(),
        ..RotationCheck::default()
    };

    for (home_id, info) in price_info {
        // No today data means there is nothing to date-compare
        let Some(first) = info.today.first() else {
            continue;
        };

        let first_date = first.starts_at.date_naive();
        if first_date < current_date {
            check.needs_rotation = true;
            check.outdated_homes += 1;

            let days_old = (current_date - first_date).num_days();
            if days_old > 1 {
                check.days_old_by_home.insert(home_id.clone(), days_old);
            }
        }
    }

    if !check.days_old_by_home.is_empty() {
        let total: i64 = check.days_old_by_home.values().sum();
        check.avg_days_old = total as f64 / check.days_old_by_home.len() as f64;
        check.severely_outdated = check.avg_days_old > 1.0;
    }

    check
}

/// Moves tomorrow's prices into today for every home and clears tomorrow
///
/// Idempotent in the sense that a second call with no intervening fetch
/// leaves every home with an empty today list.
pub fn rotate(cache: &mut PriceCache) {
    let Some(price_info) = cache.price_info.as_mut() else {
        warn!("no price data available for midnight rotation");
        return;
    };

    let homes_with_tomorrow = price_info.values().filter(|info| !info.tomorrow.is_empty()).count();
    info!(
        homes_with_tomorrow,
        total_homes = price_info.len(),
        "rotating tomorrow's prices into today"
    );

    for info in price_info.values_mut() {
        info.today = std::mem::take(&mut info.tomorrow);
    }
}
