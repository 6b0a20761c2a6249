//! Structural validation of the raw cache blob
//!
//! The checks run against the JSON value as loaded from disk, before the
//! typed model is built, so a corrupted blob can be diagnosed instead of
//! aborting deserialization. Checks run in order; fatal layout damage sets
//! `needs_full_refresh` and may stop further inspection, while
//! cross-referential drift (home ids out of sync) is reported but repaired
//! through the normal scoped-refresh path.

use std::collections::BTreeSet;

use serde_json::Value;

/// Result of inspecting the raw cache blob
#[derive(Debug, Clone)]
pub struct StructureReport {
    /// Whether the blob passed every check
    pub valid: bool,
    /// Issues with the top-level layout
    pub structural_issues: Vec<String>,
    /// Issues inside per-home price data
    pub price_structure_issues: Vec<String>,
    /// Whether the damage is beyond repair and the cache must be rebuilt
    pub needs_full_refresh: bool,
}

impl StructureReport {
    fn clean() -> Self {
        Self {
            valid: true,
            structural_issues: Vec::new(),
            price_structure_issues: Vec::new(),
            needs_full_refresh: false,
        }
    }

    /// All recorded issues, top-level first
    pub fn issues(&self) -> impl Iterator<Item = &String> {
        self.structural_issues.iter().chain(self.price_structure_issues.iter())
    }
}

/// Required top-level sections of the cache blob
const REQUIRED_SECTIONS: [&str; 3] = ["user_info", "homes", "price_info"];

/// Performs deep validation of the cache blob structure
pub fn validate_structure(blob: &Value) -> StructureReport {
    let mut report = StructureReport::clean();

    // An empty or non-object blob means there is nothing to salvage
    let Some(root) = blob.as_object() else {
        report.valid = false;
        report.structural_issues.push("cache is not an object".to_string());
        report.needs_full_refresh = true;
        return report;
    };
    if root.is_empty() {
        report.valid = false;
        report.structural_issues.push("empty data cache".to_string());
        report.needs_full_refresh = true;
        return report;
    }

    let missing: Vec<&str> = REQUIRED_SECTIONS
        .iter()
        .copied()
        .filter(|section| !root.contains_key(*section))
        .collect();
    if !missing.is_empty() {
        report.valid = false;
        report
            .structural_issues
            .push(format!("missing required sections: {}", missing.join(", ")));
        report.needs_full_refresh = true;
        return report;
    }

    if !root["user_info"].is_object() {
        report.valid = false;
        report
            .structural_issues
            .push("invalid user_info structure - not an object".to_string());
        report.needs_full_refresh = true;
    }

    if !root["homes"].is_object() {
        report.valid = false;
        report
            .structural_issues
            .push("invalid homes structure - not an object".to_string());
        report.needs_full_refresh = true;
    }

    let Some(price_info) = root["price_info"].as_object() else {
        report.valid = false;
        report
            .structural_issues
            .push("invalid price_info structure - not an object".to_string());
        report.needs_full_refresh = true;
        return report;
    };

    // Home ids in `homes` and `price_info` must stay in sync; divergence is
    // repairable without rebuilding, so it does not force a full refresh
    if let Some(homes) = root["homes"].as_object() {
        let home_ids: BTreeSet<&String> = homes.keys().collect();
        let price_ids: BTreeSet<&String> = price_info.keys().collect();

        let missing_prices: Vec<&str> =
            home_ids.difference(&price_ids).map(|id| id.as_str()).collect();
        if !missing_prices.is_empty() {
            report.valid = false;
            report
                .structural_issues
                .push(format!("homes missing from price_info: {}", missing_prices.join(", ")));
        }

        let unknown_homes: Vec<&str> =
            price_ids.difference(&home_ids).map(|id| id.as_str()).collect();
        if !unknown_homes.is_empty() {
            report.valid = false;
            report
                .structural_issues
                .push(format!("unknown home ids in price_info: {}", unknown_homes.join(", ")));
        }
    }

    for (home_id, info) in price_info {
        let Some(info) = info.as_object() else {
            report.valid = false;
            report
                .price_structure_issues
                .push(format!("invalid price_info structure for home {home_id} - not an object"));
            continue;
        };

        for key in ["today", "tomorrow"] {
            if let Some(value) = info.get(key) {
                if !value.is_array() {
                    report.valid = false;
                    report
                        .price_structure_issues
                        .push(format!("invalid {key} structure for home {home_id} - not a list"));
                }
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_blob() -> Value {
        json!({
            "user_info": {"userId": "user-1", "name": "Ada"},
            "homes": {
                "home-1": {"id": "home-1", "appNickname": "Cabin"}
            },
            "price_info": {
                "home-1": {"today": [], "tomorrow": []}
            }
        })
    }

    #[test]
    fn valid_blob_passes() {
        let report = validate_structure(&valid_blob());
        assert!(report.valid);
        assert!(!report.needs_full_refresh);
        assert_eq!(report.issues().count(), 0);
    }

    #[test]
    fn empty_blob_needs_full_refresh() {
        let report = validate_structure(&json!({}));
        assert!(!report.valid);
        assert!(report.needs_full_refresh);
    }

    #[test]
    fn non_object_blob_needs_full_refresh() {
        let report = validate_structure(&json!([1, 2, 3]));
        assert!(!report.valid);
        assert!(report.needs_full_refresh);
    }

    #[test]
    fn each_missing_section_needs_full_refresh() {
        for section in ["user_info", "homes", "price_info"] {
            let mut blob = valid_blob();
            blob.as_object_mut().expect("object").remove(section);

            let report = validate_structure(&blob);
            assert!(!report.valid, "removing {section} should invalidate");
            assert!(report.needs_full_refresh, "removing {section} should force refresh");
            assert!(report.structural_issues[0].contains(section));
        }
    }

    #[test]
    fn wrong_user_info_type_continues_checking() {
        let mut blob = valid_blob();
        blob["user_info"] = json!("not a map");
        blob["homes"] = json!(42);

        let report = validate_structure(&blob);
        assert!(!report.valid);
        assert!(report.needs_full_refresh);
        // Both type problems are reported, not just the first
        assert_eq!(report.structural_issues.len(), 2);
    }

    #[test]
    fn wrong_price_info_type_stops_checking() {
        let mut blob = valid_blob();
        blob["price_info"] = json!([1, 2]);

        let report = validate_structure(&blob);
        assert!(!report.valid);
        assert!(report.needs_full_refresh);
        assert!(report
            .structural_issues
            .iter()
            .any(|issue| issue.contains("price_info")));
    }

    #[test]
    fn key_set_mismatch_does_not_force_full_refresh() {
        let mut blob = valid_blob();
        blob["price_info"]
            .as_object_mut()
            .expect("object")
            .insert("home-9".to_string(), json!({"today": []}));
        blob["homes"]
            .as_object_mut()
            .expect("object")
            .insert("home-2".to_string(), json!({"id": "home-2"}));

        let report = validate_structure(&blob);
        assert!(!report.valid);
        assert!(!report.needs_full_refresh);
        assert!(report
            .structural_issues
            .iter()
            .any(|issue| issue.contains("homes missing from price_info: home-2")));
        assert!(report
            .structural_issues
            .iter()
            .any(|issue| issue.contains("unknown home ids in price_info: home-9")));
    }

    #[test]
    fn per_home_type_damage_is_reported_per_home() {
        let mut blob = valid_blob();
        let price_info = blob["price_info"].as_object_mut().expect("object");
        price_info.insert("home-1".to_string(), json!("garbage"));
        blob["homes"]
            .as_object_mut()
            .expect("object")
            .remove("home-1");
        // Keep key sets matched so only per-home issues fire
        blob["homes"]
            .as_object_mut()
            .expect("object")
            .insert("home-1".to_string(), json!({"id": "home-1"}));

        let report = validate_structure(&blob);
        assert!(!report.valid);
        assert!(!report.needs_full_refresh);
        assert_eq!(report.price_structure_issues.len(), 1);
        assert!(report.price_structure_issues[0].contains("home-1"));
    }

    #[test]
    fn non_list_today_is_reported() {
        let mut blob = valid_blob();
        blob["price_info"]["home-1"]["today"] = json!({"not": "a list"});

        let report = validate_structure(&blob);
        assert!(!report.valid);
        assert!(!report.needs_full_refresh);
        assert!(report.price_structure_issues[0].contains("today"));
    }
}
