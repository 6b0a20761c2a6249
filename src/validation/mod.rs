//! Cache validation and repair checks
//!
//! Pure checks the coordinator runs against the cached price data: daylight
//! saving transitions, per-day completeness, cache staleness and missed
//! midnight rotations. None of these functions perform I/O or fail; they
//! return structured reports the coordinator folds into refresh decisions.

pub mod completeness;
pub mod dst;
pub mod midnight;
pub mod staleness;

pub use completeness::{
    check_data_completeness, validate_day_completeness, validate_home, validate_price_data,
    CompletenessReport, DayContext, HomeCheck, ValidationReport,
};
pub use dst::DstTransition;
pub use midnight::{detect_missed_rotation, rotate, RotationCheck};
pub use staleness::{check_stale, StalenessReport};
