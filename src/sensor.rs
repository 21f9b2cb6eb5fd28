//! Temperature sensor adapter.
//!
//! The production driver reads DS18B20 probes through the Linux one-wire
//! sysfs interface. The control loop only sees the [`TemperatureSensor`]
//! trait; tests inject scripted sensors.

use log::warn;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Sentinel stored under `current_temp` while the sensor is unreadable.
pub const INVALID_TEMP: f64 = -127.0;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("no temperature sensor found")]
    NoDevice,
    #[error("sensor i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("sensor reported bad checksum")]
    Checksum,
    #[error("unparseable sensor payload")]
    Malformed,
}

pub trait TemperatureSensor: Send {
    fn read(&mut self) -> Result<f64, SensorError>;
}

/// DS18B20 family probes under `<base>/28-*/w1_slave`.
pub struct Ds18b20 {
    base: PathBuf,
}

impl Ds18b20 {
    pub fn new(base: impl Into<PathBuf>) -> Ds18b20 {
        Ds18b20 { base: base.into() }
    }
}

impl TemperatureSensor for Ds18b20 {
    /// Scan the bus and return the first valid reading. A probe that
    /// fails its checksum is skipped rather than failing the scan.
    fn read(&mut self) -> Result<f64, SensorError> {
        let entries = fs::read_dir(&self.base)?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with("28-") {
                continue;
            }
            match read_slave(&entry.path().join("w1_slave")) {
                Ok(temp) => return Ok(temp),
                Err(err) => warn!("probe {}: {err}", name.to_string_lossy()),
            }
        }
        Err(SensorError::NoDevice)
    }
}

/// Parse the kernel's w1_slave report:
///
/// ```text
/// 6a 01 4b 46 7f ff 06 10 5e : crc=5e YES
/// 6a 01 4b 46 7f ff 06 10 5e t=22625
/// ```
fn read_slave(path: &Path) -> Result<f64, SensorError> {
    let raw = fs::read_to_string(path)?;
    let mut lines = raw.lines();
    let crc_line = lines.next().ok_or(SensorError::Malformed)?;
    if !crc_line.trim_end().ends_with("YES") {
        return Err(SensorError::Checksum);
    }
    let temp_line = lines.next().ok_or(SensorError::Malformed)?;
    let millidegrees: i64 = temp_line
        .rsplit_once("t=")
        .and_then(|(_, t)| t.trim().parse().ok())
        .ok_or(SensorError::Malformed)?;
    // One decimal is all the controller works with.
    Ok((millidegrees as f64 / 100.0).round() / 10.0)
}
