//! Tibber price cache and time-aware fetch scheduler
//!
//! Decides, hour by hour, whether to call the Tibber pricing API, caches
//! the result durably, and repairs the cache when time has passed without
//! the process running (missed midnight rotations, daylight-saving
//! anomalies, structural damage, stale or incomplete data).

pub mod cache;
pub mod cli;
pub mod coordinator;
pub mod data;
pub mod validation;
