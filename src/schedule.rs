//! Adaptive scheduler.
//!
//! Derives how long the next relay pulse holds and how many ticks pass
//! until the next enforced actuation. Both derivations scale their base
//! value by a per-category multiplier, and only while the temperature is
//! rising: a falling or static temperature carries no overshoot risk and
//! uses the baseline timings unchanged.
//!
//! Multiplier direction is deployment policy, not code. A multiplier
//! below 1 shortens the relay burst to avoid overshoot; one above 1
//! lengthens it to correct faster.

use crate::category::TempChangeCategory;
use crate::config::SharedConfig;

fn scaled(config: &SharedConfig, base: i64, high_key: &str, medium_key: &str) -> i64 {
    if !config.get_bool("temp_increasing", false) {
        return base;
    }
    let category = TempChangeCategory::parse(&config.get_str("temp_change_category", "LOW"));
    let multiplier = match category {
        TempChangeCategory::High => config.get_float(high_key, 1.0),
        TempChangeCategory::Medium => config.get_float(medium_key, 1.0),
        TempChangeCategory::Low => return base,
    };
    (base as f64 * multiplier).floor() as i64
}

/// Ticks until the next enforced relay action.
pub fn next_update_time(config: &SharedConfig) -> i64 {
    let base = config.get_int("update_time", 120);
    scaled(
        config,
        base,
        "update_time_high_multiplier",
        "update_time_medium_multiplier",
    )
}

/// Milliseconds the next relay pulse stays active.
pub fn next_relay_time(config: &SharedConfig) -> i64 {
    let base = config.get_int("relay_time", 2000);
    scaled(
        config,
        base,
        "relay_time_high_multiplier",
        "relay_time_medium_multiplier",
    )
}
