//! The control loop proper: BOOT -> WAIT_INITIAL -> STEADY.
//!
//! STEADY is a single 100 ms tick over monotonic millis. Nested
//! busy-waits from older firmware lines collapse into relative deadlines
//! checked against the tick clock: one for resampling, one for the
//! per-second countdown that ends in an enforced relay actuation.
//!
//! Operator-editable values (band, intervals, multipliers) are re-read
//! from the shared store every time they are needed. The web task may
//! rewrite them between two reads of the same tick; last write wins.

use crate::category::classify_change;
use crate::config::SharedConfig;
use crate::display::{Display, COLS};
use crate::net;
use crate::relay::Actuator;
use crate::schedule;
use crate::sensor::{TemperatureSensor, INVALID_TEMP};
use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;

pub struct ControlLoop {
    config: SharedConfig,
    sensor: Box<dyn TemperatureSensor>,
    actuator: Arc<Actuator>,
    display: Arc<Display>,
    previous_millis: i64,
    update_time: i64,
}

impl ControlLoop {
    pub fn new(
        config: SharedConfig,
        sensor: Box<dyn TemperatureSensor>,
        actuator: Arc<Actuator>,
        display: Arc<Display>,
    ) -> ControlLoop {
        let update_time = config.get_int("update_time", 120);
        ControlLoop {
            config,
            sensor,
            actuator,
            display,
            previous_millis: 0,
            update_time,
        }
    }

    /// BOOT and WAIT_INITIAL: seed the measurement state, show the band,
    /// run the two start countdowns around the valve priming pulse, then
    /// one initial regulation pulse before entering STEADY.
    pub async fn boot(&mut self) -> Result<()> {
        info!("boot()");
        let current = self.read_temp();
        self.config.set("temp_last_measurement", current);
        self.config.set("temp_last_measurement_time", 0i64);
        self.print_nominal_temp();

        self.wait_start(self.config.get_int("delay_before_start_1", 30))
            .await;
        let prime_ms = self.config.get_int("init_relay_time", 2000).max(0) as u64;
        self.actuator.prime(prime_ms).await?;
        self.wait_start(self.config.get_int("delay_before_start_2", 30))
            .await;

        self.update_time = self.config.get_int("update_time", 120);
        self.config.set("stop_timer", self.update_time);

        let hold_ms = self.config.get_int("relay_time", 2000).max(0) as u64;
        self.actuator.regulate(hold_ms).await?;

        self.config.set("boot_normal", true);
        self.config.save();
        Ok(())
    }

    /// STEADY. Runs until an unhandled fault propagates out.
    pub async fn run(&mut self) -> Result<()> {
        info!("steady loop()");
        let started = Instant::now();
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let now_ms = started.elapsed().as_millis() as i64;
            self.tick(now_ms).await?;
        }
    }

    /// One tick of the steady state machine at monotonic time `now_ms`.
    pub async fn tick(&mut self, now_ms: i64) -> Result<()> {
        let sampling_due = now_ms - self.config.get_int("temp_last_measurement_time", 0)
            >= self.config.get_int("temp_sampling_interval", 10_000);
        if sampling_due {
            self.sample_and_classify(now_ms);
        }

        if now_ms - self.previous_millis > self.config.get_int("interval", 1000) {
            if self.update_time > 0 {
                self.show_countdown("WARTE:", self.update_time);
                let refresh_every = self.config.get_int("temp_update_interval", 5).max(1);
                if self.update_time % refresh_every == 0 {
                    self.read_temp();
                }
                self.update_time -= 1;
            }

            if self.update_time <= 0 {
                let hold_ms = schedule::next_relay_time(&self.config).max(0) as u64;
                self.actuator.regulate(hold_ms).await?;
                self.update_time = schedule::next_update_time(&self.config);
                self.config.create_backup();
                net::ensure_connected(&self.config).await;
            }

            self.previous_millis = now_ms;
            // Guard value for remote actuation requests.
            self.config.set("stop_timer", self.update_time);
        }
        Ok(())
    }

    /// Take a reading, classify the delta against the previous one and
    /// persist the new measurement state.
    fn sample_and_classify(&mut self, now_ms: i64) {
        let current = self.read_temp();
        let last = self.config.get_float("temp_last_measurement", 0.0);
        classify_change(&self.config, &self.display, current - last);
        self.config.set("temp_last_measurement", current);
        self.config.set("temp_last_measurement_time", now_ms);
    }

    /// Read the sensor into `current_temp`, substituting the sentinel on
    /// a fault, and refresh display row 0.
    fn read_temp(&mut self) -> f64 {
        let temp = match self.sensor.read() {
            Ok(temp) => temp,
            Err(err) => {
                warn!("sensor: {err}");
                INVALID_TEMP
            }
        };
        self.config.set("current_temp", temp);

        let text = format!("{temp:.1} °C");
        self.display.print(0, 0, "Aktuell:");
        self.display
            .print(0, COLS.saturating_sub(text.chars().count()), &text);
        temp
    }

    fn print_nominal_temp(&self) {
        let (min, max) = self.actuator.nominal_band();
        let text = format!("{min:.1} - {max:.1} °C");
        self.display.print(1, 0, "Soll:");
        self.display
            .print(1, COLS.saturating_sub(text.chars().count()), &text);
    }

    fn show_countdown(&self, message: &str, secs: i64) {
        let time = format_time(secs);
        self.display.print(3, 0, message);
        self.display
            .print(3, COLS.saturating_sub(time.chars().count()), &time);
    }

    /// Countdown-with-display phase before steady operation, with
    /// periodic resampling.
    async fn wait_start(&mut self, secs: i64) {
        if secs <= 0 {
            return;
        }
        info!("wait_start({secs})");
        let refresh_every = self.config.get_int("temp_update_interval", 5).max(1);
        let mut remaining = secs;
        while remaining >= 0 {
            if remaining % refresh_every == 0 {
                self.read_temp();
            }
            self.show_countdown("STARTE IN:", remaining);
            remaining -= 1;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

fn format_time(secs: i64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    if hours > 0 {
        format!("{hours:02}h {mins:02}m {secs:02}s")
    } else {
        format!("{mins:02}m {secs:02}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::relay::{RelayChannel, RelayDriver};
    use crate::sensor::SensorError;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct ScriptedSensor {
        temps: Vec<Result<f64, ()>>,
        next: usize,
    }

    impl ScriptedSensor {
        fn new(temps: Vec<Result<f64, ()>>) -> ScriptedSensor {
            ScriptedSensor { temps, next: 0 }
        }
    }

    impl TemperatureSensor for ScriptedSensor {
        fn read(&mut self) -> Result<f64, SensorError> {
            let index = self.next.min(self.temps.len() - 1);
            self.next += 1;
            self.temps[index].map_err(|()| SensorError::NoDevice)
        }
    }

    #[derive(Default)]
    struct RecordingRelay {
        events: Arc<Mutex<Vec<(RelayChannel, bool)>>>,
    }

    impl RelayDriver for RecordingRelay {
        fn set(&self, channel: RelayChannel, active: bool) -> anyhow::Result<()> {
            self.events.lock().unwrap().push((channel, active));
            Ok(())
        }
    }

    struct Fixture {
        control: ControlLoop,
        config: SharedConfig,
        events: Arc<Mutex<Vec<(RelayChannel, bool)>>>,
        backup_path: std::path::PathBuf,
        _dir: tempfile::TempDir,
    }

    fn fixture(temps: Vec<Result<f64, ()>>) -> Fixture {
        let dir = tempdir().unwrap();
        let backup_path = dir.path().join("backup.json");
        let mut config = Config::load(dir.path().join("config.json"), &backup_path);
        config.apply_defaults();
        config.set("relay_time", 1i64);
        let config = SharedConfig::new(config);

        let driver = RecordingRelay::default();
        let events = driver.events.clone();
        let display = Arc::new(Display::new());
        let actuator = Arc::new(Actuator::new(
            config.clone(),
            Box::new(driver),
            display.clone(),
        ));
        let control = ControlLoop::new(
            config.clone(),
            Box::new(ScriptedSensor::new(temps)),
            actuator,
            display,
        );
        Fixture {
            control,
            config,
            events,
            backup_path,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn sampling_classifies_delta_against_previous_reading() {
        let mut fx = fixture(vec![Ok(43.5)]);
        fx.config.set("temp_last_measurement", 42.0);

        fx.control.tick(10_000).await.unwrap();

        assert_eq!(fx.config.get_str("temp_change_category", ""), "HIGH");
        assert!(fx.config.get_bool("temp_increasing", false));
        assert_eq!(fx.config.get_float("temp_last_measurement", 0.0), 43.5);
        assert_eq!(fx.config.get_int("temp_last_measurement_time", -1), 10_000);
    }

    #[tokio::test]
    async fn no_sampling_before_the_interval_elapses() {
        let mut fx = fixture(vec![Ok(43.5)]);
        fx.config.set("temp_last_measurement_time", 0i64);

        fx.control.tick(500).await.unwrap();

        assert_eq!(fx.config.get_float("current_temp", INVALID_TEMP), INVALID_TEMP);
        assert_eq!(fx.config.get_str("temp_change_category", ""), "LOW");
    }

    #[tokio::test]
    async fn countdown_reaching_zero_actuates_and_rearms() {
        let mut fx = fixture(vec![Ok(40.0)]);
        fx.config.set("current_temp", 40.0);
        // Keep the sampling branch quiet for this tick.
        fx.config.set("temp_sampling_interval", 60_000i64);
        fx.control.update_time = 1;

        fx.control.tick(1_001).await.unwrap();

        // Below the band: one increase pulse, raised then dropped.
        assert_eq!(
            *fx.events.lock().unwrap(),
            vec![(RelayChannel::Increase, true), (RelayChannel::Increase, false)]
        );
        // Not rising, so the countdown re-arms to the unscaled base.
        assert_eq!(fx.control.update_time, 120);
        assert_eq!(fx.config.get_int("stop_timer", -1), 120);
        // Every enforced actuation snapshots the configuration.
        assert!(fx.backup_path.exists());
    }

    #[tokio::test]
    async fn fast_rise_halves_the_rearmed_countdown() {
        let mut fx = fixture(vec![Ok(43.5)]);
        fx.config.set("temp_last_measurement", 42.0);
        fx.config.set("nominal_min_temp", 50.0);
        fx.control.update_time = 1;

        // Samples 42.0 -> 43.5 (HIGH, rising), then the countdown hits
        // zero in the same tick and actuates.
        fx.control.tick(10_000).await.unwrap();

        assert_eq!(fx.config.get_str("temp_change_category", ""), "HIGH");
        assert_eq!(
            fx.events.lock().unwrap().first(),
            Some(&(RelayChannel::Increase, true))
        );
        assert_eq!(fx.control.update_time, 60);
        assert_eq!(fx.config.get_int("stop_timer", -1), 60);
    }

    #[tokio::test]
    async fn sensor_dropout_substitutes_sentinel_and_skips_actuation() {
        let mut fx = fixture(vec![Err(())]);
        fx.control.update_time = 1;

        fx.control.tick(10_000).await.unwrap();

        assert_eq!(fx.config.get_float("current_temp", 0.0), INVALID_TEMP);
        assert!(fx.events.lock().unwrap().is_empty());
        // The loop keeps running; the countdown re-armed regardless.
        assert!(fx.control.update_time > 0);
    }

    #[tokio::test]
    async fn countdown_ticks_only_once_per_interval() {
        let mut fx = fixture(vec![Ok(48.0)]);
        fx.config.set("temp_sampling_interval", 60_000i64);
        fx.control.update_time = 10;

        fx.control.tick(1_001).await.unwrap();
        assert_eq!(fx.control.update_time, 9);

        // Same interval window: no second decrement.
        fx.control.tick(1_050).await.unwrap();
        assert_eq!(fx.control.update_time, 9);

        fx.control.tick(2_100).await.unwrap();
        assert_eq!(fx.control.update_time, 8);
    }

    #[test]
    fn format_time_matches_display_layout() {
        assert_eq!(format_time(59), "00m 59s");
        assert_eq!(format_time(120), "02m 00s");
        assert_eq!(format_time(3_725), "01h 02m 05s");
    }
}
