//! Core data model for the Tibber price cache
//!
//! This module contains the persisted cache types: per-home price curves for
//! today/tomorrow, rolling range prices, and the hourly/daily/monthly price
//! ratings, all keyed by home id.

pub mod tibber;

pub use tibber::{PricesGateway, TibberClient, TibberError};

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Relative price level reported by the API for a single price point
///
/// Unrecognized strings deserialize to `Unknown` so a new API level never
/// poisons an otherwise valid cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceLevel {
    VeryCheap,
    Cheap,
    Normal,
    Expensive,
    VeryExpensive,
    #[serde(other)]
    Unknown,
}

/// Relative rating level for a rating entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RatingLevel {
    Low,
    Normal,
    High,
    #[serde(other)]
    Unknown,
}

impl PriceLevel {
    const fn unknown() -> Self {
        PriceLevel::Unknown
    }
}

impl RatingLevel {
    const fn unknown() -> Self {
        RatingLevel::Unknown
    }
}

/// One hourly price observation, stored verbatim from the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Start of the hour this price applies to, with the provider's UTC offset
    #[serde(rename = "startsAt")]
    pub starts_at: DateTime<FixedOffset>,
    /// Total price including tax
    pub total: f64,
    /// Energy component of the price
    pub energy: f64,
    /// Tax component of the price
    pub tax: f64,
    /// Relative price level
    #[serde(default = "PriceLevel::unknown")]
    pub level: PriceLevel,
}

/// One price rating observation (hourly, daily or monthly resolution)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingEntry {
    /// Start of the rating period
    pub time: DateTime<FixedOffset>,
    pub total: f64,
    pub energy: f64,
    pub tax: f64,
    /// Percent difference against the trailing average
    pub difference: f64,
    #[serde(default = "RatingLevel::unknown")]
    pub level: RatingLevel,
}

/// Threshold percentages separating low/normal/high ratings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingThresholds {
    pub low: f64,
    pub high: f64,
}

/// Rating entries for one resolution, with their currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingPeriod {
    pub currency: String,
    #[serde(default)]
    pub entries: Vec<RatingEntry>,
}

/// The rating resolutions the API exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingResolution {
    Hourly,
    Daily,
    Monthly,
}

impl RatingResolution {
    /// Lowercase name used in log output
    pub fn as_str(self) -> &'static str {
        match self {
            RatingResolution::Hourly => "hourly",
            RatingResolution::Daily => "daily",
            RatingResolution::Monthly => "monthly",
        }
    }
}

/// Per-home price rating data across all resolutions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceRating {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<RatingThresholds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hourly: Option<RatingPeriod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily: Option<RatingPeriod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly: Option<RatingPeriod>,
}

impl PriceRating {
    /// Returns the rating period for the given resolution, if cached
    pub fn period(&self, resolution: RatingResolution) -> Option<&RatingPeriod> {
        match resolution {
            RatingResolution::Hourly => self.hourly.as_ref(),
            RatingResolution::Daily => self.daily.as_ref(),
            RatingResolution::Monthly => self.monthly.as_ref(),
        }
    }

    /// Stores the rating period for the given resolution
    pub fn set_period(&mut self, resolution: RatingResolution, period: RatingPeriod) {
        match resolution {
            RatingResolution::Hourly => self.hourly = Some(period),
            RatingResolution::Daily => self.daily = Some(period),
            RatingResolution::Monthly => self.monthly = Some(period),
        }
    }
}

/// Postal address of a home
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address1: Option<String>,
    #[serde(default, rename = "postalCode", skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// A single metering point under the account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Home {
    pub id: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub home_type: Option<String>,
    #[serde(default, rename = "appNickname", skip_serializing_if = "Option::is_none")]
    pub app_nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

/// Account identity returned by the user-info query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
}

/// Price curves for one home
///
/// `today` and `tomorrow` are always sequences: a missing key in the
/// persisted blob deserializes to an empty list, which downstream checks
/// treat as "needs data" rather than an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HomePriceInfo {
    #[serde(default)]
    pub today: Vec<PricePoint>,
    #[serde(default)]
    pub tomorrow: Vec<PricePoint>,
    #[serde(default)]
    pub range_prices: Vec<PricePoint>,
}

/// The whole persisted cache for one installation
///
/// Sections are optional so that a partially built cache round-trips without
/// inventing empty sections: absence is meaningful to the structure
/// validator and to the fetch-state machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceCache {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<UserInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homes: Option<BTreeMap<String, Home>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_info: Option<BTreeMap<String, HomePriceInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_rating: Option<BTreeMap<String, PriceRating>>,
}

impl PriceCache {
    /// Whether the account identity and home list have been fetched
    pub fn has_basic_data(&self) -> bool {
        self.user_info.is_some() && self.homes.as_ref().is_some_and(|homes| !homes.is_empty())
    }

    /// Whether any home is missing today's price curve
    ///
    /// A cache with no price-info section at all reports `false` here: that
    /// situation is covered by the basic-data check instead.
    pub fn is_missing_today_data(&self) -> bool {
        self.price_infos().any(|(_, info)| info.today.is_empty())
    }

    /// Iterates over per-home price info, empty when the section is absent
    pub fn price_infos(&self) -> impl Iterator<Item = (&String, &HomePriceInfo)> {
        self.price_info.iter().flat_map(|map| map.iter())
    }

    /// Number of homes with price info
    pub fn price_info_count(&self) -> usize {
        self.price_info.as_ref().map_or(0, BTreeMap::len)
    }

    /// Returns the price-info section, creating it when absent
    pub fn price_info_mut(&mut self) -> &mut BTreeMap<String, HomePriceInfo> {
        self.price_info.get_or_insert_with(BTreeMap::new)
    }

    /// Returns the price-rating section, creating it when absent
    pub fn price_rating_mut(&mut self) -> &mut BTreeMap<String, PriceRating> {
        self.price_rating.get_or_insert_with(BTreeMap::new)
    }

    /// Whether at least one home has rating data at the given resolution
    pub fn has_rating(&self, resolution: RatingResolution) -> bool {
        self.price_rating
            .as_ref()
            .is_some_and(|map| map.values().any(|rating| rating.period(resolution).is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(starts_at: &str, total: f64) -> PricePoint {
        PricePoint {
            starts_at: starts_at.parse().expect("valid RFC3339 timestamp"),
            total,
            energy: total * 0.8,
            tax: total * 0.2,
            level: PriceLevel::Normal,
        }
    }

    #[test]
    fn price_point_roundtrip_keeps_offset() {
        let original = point("2026-03-15T07:00:00+01:00", 0.31);

        let json = serde_json::to_string(&original).expect("serialize");
        assert!(json.contains("\"startsAt\""));
        assert!(json.contains("+01:00"));

        let back: PricePoint = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, original);
    }

    #[test]
    fn unknown_price_level_falls_back() {
        let json = r#"{
            "startsAt": "2026-03-15T07:00:00+01:00",
            "total": 0.31,
            "energy": 0.25,
            "tax": 0.06,
            "level": "ASTRONOMICAL"
        }"#;

        let parsed: PricePoint = serde_json::from_str(json).expect("deserialize");
        assert_eq!(parsed.level, PriceLevel::Unknown);
    }

    #[test]
    fn missing_level_defaults_to_unknown() {
        let json = r#"{
            "startsAt": "2026-03-15T07:00:00+01:00",
            "total": 0.31,
            "energy": 0.25,
            "tax": 0.06
        }"#;

        let parsed: PricePoint = serde_json::from_str(json).expect("deserialize");
        assert_eq!(parsed.level, PriceLevel::Unknown);
    }

    #[test]
    fn rating_level_roundtrip() {
        let json = serde_json::to_string(&RatingLevel::High).expect("serialize");
        assert_eq!(json, "\"HIGH\"");
        let back: RatingLevel = serde_json::from_str("\"LOW\"").expect("deserialize");
        assert_eq!(back, RatingLevel::Low);
        let unknown: RatingLevel = serde_json::from_str("\"WILD\"").expect("deserialize");
        assert_eq!(unknown, RatingLevel::Unknown);
    }

    #[test]
    fn empty_cache_serializes_without_sections() {
        let cache = PriceCache::default();
        let json = serde_json::to_string(&cache).expect("serialize");
        assert_eq!(json, "{}");
    }

    #[test]
    fn absent_price_lists_deserialize_to_empty() {
        let json = r#"{"price_info": {"home-1": {}}}"#;
        let cache: PriceCache = serde_json::from_str(json).expect("deserialize");

        let info = &cache.price_info.as_ref().expect("section")["home-1"];
        assert!(info.today.is_empty());
        assert!(info.tomorrow.is_empty());
        assert!(info.range_prices.is_empty());
        assert!(cache.is_missing_today_data());
    }

    #[test]
    fn has_basic_data_requires_nonempty_homes() {
        let mut cache = PriceCache {
            user_info: Some(UserInfo::default()),
            homes: Some(BTreeMap::new()),
            ..PriceCache::default()
        };
        assert!(!cache.has_basic_data());

        cache.homes.as_mut().expect("homes").insert(
            "home-1".to_string(),
            Home {
                id: "home-1".to_string(),
                home_type: None,
                app_nickname: Some("Cabin".to_string()),
                address: None,
            },
        );
        assert!(cache.has_basic_data());
    }

    #[test]
    fn has_rating_checks_resolution_across_homes() {
        let mut cache = PriceCache::default();
        assert!(!cache.has_rating(RatingResolution::Daily));

        let rating = PriceRating {
            daily: Some(RatingPeriod {
                currency: "NOK".to_string(),
                entries: vec![],
            }),
            ..PriceRating::default()
        };
        cache.price_rating_mut().insert("home-1".to_string(), rating);

        assert!(cache.has_rating(RatingResolution::Daily));
        assert!(!cache.has_rating(RatingResolution::Monthly));
    }

    #[test]
    fn missing_today_detected_per_home() {
        let mut cache = PriceCache::default();
        cache.price_info_mut().insert(
            "home-1".to_string(),
            HomePriceInfo {
                today: vec![point("2026-03-15T00:00:00+01:00", 0.2)],
                ..HomePriceInfo::default()
            },
        );
        assert!(!cache.is_missing_today_data());

        cache
            .price_info_mut()
            .insert("home-2".to_string(), HomePriceInfo::default());
        assert!(cache.is_missing_today_data());
    }
}
