//! Relay channels and the actuation safety wrapper.
//!
//! Hardware wiring makes the two channels mutually exclusive, so the
//! actuator serializes every pulse through one async mutex and never
//! raises a channel without a plausible temperature reading. An
//! in-progress hold always runs to completion; nothing cancels it.

use crate::config::SharedConfig;
use crate::display::Display;
use crate::sensor::INVALID_TEMP;
use anyhow::{Context, Result};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayChannel {
    /// Opens the valve further, raising the circuit temperature.
    Increase,
    /// Closes the valve, lowering the circuit temperature.
    Decrease,
}

impl RelayChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayChannel::Increase => "increase",
            RelayChannel::Decrease => "decrease",
        }
    }
}

pub trait RelayDriver: Send + Sync {
    fn set(&self, channel: RelayChannel, active: bool) -> Result<()>;
}

/// GPIO lines through the Linux sysfs interface.
pub struct SysfsRelay {
    base: PathBuf,
    increase_gpio: i64,
    decrease_gpio: i64,
}

impl SysfsRelay {
    pub fn new(base: impl Into<PathBuf>, increase_gpio: i64, decrease_gpio: i64) -> SysfsRelay {
        SysfsRelay {
            base: base.into(),
            increase_gpio,
            decrease_gpio,
        }
    }
}

impl RelayDriver for SysfsRelay {
    fn set(&self, channel: RelayChannel, active: bool) -> Result<()> {
        let gpio = match channel {
            RelayChannel::Increase => self.increase_gpio,
            RelayChannel::Decrease => self.decrease_gpio,
        };
        let path = self.base.join(format!("gpio{gpio}/value"));
        std::fs::write(&path, if active { "1" } else { "0" })
            .with_context(|| format!("gpio write {}", path.display()))
    }
}

/// Outcome of a regulation or manual actuation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actuation {
    Actuated(RelayChannel),
    /// Temperature is inside the nominal band, nothing to do.
    TargetReached,
    /// Reading outside the safe range, hardware untouched.
    TempFault,
    /// GPIO driver reported an error; the channel state is uncertain.
    DriverFault,
}

/// Manual request refused because the scheduled actuation is too close.
#[derive(Debug, thiserror::Error)]
#[error("scheduled actuation in {stop_timer} ticks (buffer {buffer}), request rejected")]
pub struct ManualRejected {
    pub stop_timer: i64,
    pub buffer: i64,
}

pub struct Actuator {
    config: SharedConfig,
    driver: Box<dyn RelayDriver>,
    display: Arc<Display>,
    // One channel at a time; also serializes manual against scheduled pulses.
    hold: Mutex<()>,
}

impl Actuator {
    pub fn new(config: SharedConfig, driver: Box<dyn RelayDriver>, display: Arc<Display>) -> Actuator {
        Actuator {
            config,
            driver,
            display,
            hold: Mutex::new(()),
        }
    }

    /// Nominal band as displayed and as used: clamped into `[0, 120]`
    /// with `min <= max` enforced at the moment of use, not at write
    /// time.
    pub fn nominal_band(&self) -> (f64, f64) {
        let min = self.config.get_float("nominal_min_temp", 42.0).clamp(0.0, 120.0);
        let max = self.config.get_float("nominal_max_temp", 55.0).clamp(min, 120.0);
        (min, max)
    }

    /// Compare the current reading against the nominal band and pulse
    /// the matching channel for `duration_ms`.
    pub async fn regulate(&self, duration_ms: u64) -> Result<Actuation> {
        let current = self.config.get_float("current_temp", INVALID_TEMP);
        let (min, max) = self.nominal_band();

        if current < min {
            self.set_relay(RelayChannel::Increase, duration_ms).await
        } else if current > max {
            self.set_relay(RelayChannel::Decrease, duration_ms).await
        } else {
            info!("regulate: {current:.1} °C inside band {min:.1}..{max:.1}, no action");
            self.display.print(3, 0, "Soll Temp erreicht !");
            Ok(Actuation::TargetReached)
        }
    }

    /// Pulse one channel, refusing when the reading is outside the safe
    /// range `(0, safe_temp_max]`.
    pub async fn set_relay(&self, channel: RelayChannel, duration_ms: u64) -> Result<Actuation> {
        let current = self.config.get_float("current_temp", INVALID_TEMP);
        let safe_max = self.config.get_float("safe_temp_max", 150.0);
        if !(current > 0.0 && current <= safe_max) {
            warn!("refusing {} relay: current_temp {current:.1} outside (0, {safe_max:.1}]", channel.as_str());
            self.display.print(3, 0, "Fehler: Temp Fehler!");
            return Ok(Actuation::TempFault);
        }

        match channel {
            RelayChannel::Increase => self.display.print(3, 0, "öffne Ventil     >>>"),
            RelayChannel::Decrease => self.display.print(3, 0, "schließe Ventil: <<<"),
        }
        self.pulse(channel, duration_ms).await?;
        Ok(Actuation::Actuated(channel))
    }

    /// Boot-time priming pulse on the decrease channel to seed the valve
    /// position. Goes through the same safe-range refusal as every other
    /// actuation: a sensor that is already down at boot must not drive
    /// the valve.
    pub async fn prime(&self, duration_ms: u64) -> Result<Actuation> {
        info!("priming valve for {duration_ms} ms");
        self.set_relay(RelayChannel::Decrease, duration_ms).await
    }

    /// Remote actuation request. Refused while the scheduled countdown is
    /// within the configured buffer of firing itself; the check is
    /// advisory, the pulse mutex is what actually protects the hardware.
    pub async fn manual(&self, channel: RelayChannel, duration_ms: u64) -> Result<Actuation, ManualRejected> {
        let stop_timer = self.config.get_int("stop_timer", 0);
        let buffer = self.config.get_int("stop_timer_buffer", 5);
        if stop_timer < buffer {
            warn!("manual {} relay rejected: stop_timer {stop_timer} < buffer {buffer}", channel.as_str());
            return Err(ManualRejected { stop_timer, buffer });
        }
        info!("manual {} relay for {duration_ms} ms", channel.as_str());
        match self.set_relay(channel, duration_ms).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                // Driver faults stay on this side of the HTTP surface.
                warn!("manual actuation failed: {err:#}");
                Ok(Actuation::DriverFault)
            }
        }
    }

    /// Raise, hold, drop. The hold is the one intentional suspension in
    /// the control loop.
    async fn pulse(&self, channel: RelayChannel, duration_ms: u64) -> Result<()> {
        let _hold = self.hold.lock().await;
        self.driver.set(channel, true)?;
        tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        self.driver.set(channel, false)
    }
}
