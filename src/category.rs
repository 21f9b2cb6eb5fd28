//! Temperature-change classification.
//!
//! Two consecutive readings collapse into one of three categories; the
//! scheduler widens or narrows the actuation cadence from it. The
//! classifier also records whether the temperature is currently rising,
//! which gates the scheduler's fast-reaction scaling.

use crate::config::SharedConfig;
use crate::display::Display;
use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempChangeCategory {
    Low,
    Medium,
    High,
}

impl TempChangeCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            TempChangeCategory::Low => "LOW",
            TempChangeCategory::Medium => "MEDIUM",
            TempChangeCategory::High => "HIGH",
        }
    }

    /// Stored form back to category; anything unrecognized reads as LOW.
    pub fn parse(s: &str) -> TempChangeCategory {
        match s {
            "HIGH" => TempChangeCategory::High,
            "MEDIUM" => TempChangeCategory::Medium,
            _ => TempChangeCategory::Low,
        }
    }
}

/// Pure classification: boundaries are inclusive on the `>=` side.
pub fn categorize(delta: f64, high_threshold: f64, medium_threshold: f64) -> TempChangeCategory {
    if delta.abs() >= high_threshold {
        TempChangeCategory::High
    } else if delta.abs() >= medium_threshold {
        TempChangeCategory::Medium
    } else {
        TempChangeCategory::Low
    }
}

/// Classify `delta`, persist category + rising flag, render row 2.
pub fn classify_change(config: &SharedConfig, display: &Display, delta: f64) -> TempChangeCategory {
    let high = config.get_float("temp_change_high_threshold", 1.0);
    let medium = config.get_float("temp_change_medium_threshold", 0.3);
    let category = categorize(delta, high, medium);

    config.set("temp_change_category", category.as_str());
    config.set("temp_increasing", delta > 0.0);

    let label = match category {
        TempChangeCategory::High => "Temperatur      HIGH",
        TempChangeCategory::Medium => "Temperatur    MEDIUM",
        TempChangeCategory::Low => "Temperatur       LOW",
    };
    display.print(2, 0, label);
    display.print_char(2, 11, if delta > 0.0 { '^' } else { 'v' });

    info!("temp change {delta:+.2} °C -> {}", category.as_str());
    category
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::tempdir;

    fn shared_config() -> SharedConfig {
        let dir = tempdir().unwrap();
        let mut config = Config::load(dir.path().join("c.json"), dir.path().join("b.json"));
        config.apply_defaults();
        SharedConfig::new(config)
    }

    #[test]
    fn thresholds_are_inclusive() {
        assert_eq!(categorize(1.0, 1.0, 0.3), TempChangeCategory::High);
        assert_eq!(categorize(0.999, 1.0, 0.3), TempChangeCategory::Medium);
        assert_eq!(categorize(0.3, 1.0, 0.3), TempChangeCategory::Medium);
        assert_eq!(categorize(0.299, 1.0, 0.3), TempChangeCategory::Low);
        assert_eq!(categorize(0.0, 1.0, 0.3), TempChangeCategory::Low);
    }

    #[test]
    fn falling_temperature_classifies_on_magnitude() {
        assert_eq!(categorize(-1.5, 1.0, 0.3), TempChangeCategory::High);
        assert_eq!(categorize(-0.5, 1.0, 0.3), TempChangeCategory::Medium);
    }

    #[test]
    fn classify_persists_category_and_rising_flag() {
        let config = shared_config();
        let display = Display::new();

        let category = classify_change(&config, &display, 1.5);
        assert_eq!(category, TempChangeCategory::High);
        assert_eq!(config.get_str("temp_change_category", ""), "HIGH");
        assert!(config.get_bool("temp_increasing", false));

        let category = classify_change(&config, &display, -1.5);
        assert_eq!(category, TempChangeCategory::High);
        assert!(!config.get_bool("temp_increasing", true));

        classify_change(&config, &display, 0.0);
        assert_eq!(config.get_str("temp_change_category", ""), "LOW");
        assert!(!config.get_bool("temp_increasing", true));
    }

    #[test]
    fn classify_renders_category_row() {
        let config = shared_config();
        let display = Display::new();
        classify_change(&config, &display, 0.5);
        assert_eq!(display.lines()[2], "Temperatur ^  MEDIUM");
    }

    #[test]
    fn parse_round_trips_and_defaults_to_low() {
        assert_eq!(TempChangeCategory::parse("HIGH"), TempChangeCategory::High);
        assert_eq!(TempChangeCategory::parse("MEDIUM"), TempChangeCategory::Medium);
        assert_eq!(TempChangeCategory::parse("LOW"), TempChangeCategory::Low);
        assert_eq!(TempChangeCategory::parse("garbage"), TempChangeCategory::Low);
    }
}
