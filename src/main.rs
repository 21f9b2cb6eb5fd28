mod category;
mod config;
mod control;
mod display;
mod net;
mod relay;
mod schedule;
mod sensor;
mod web;

use crate::config::SharedConfig;
use crate::control::ControlLoop;
use crate::display::Display;
use crate::relay::{Actuator, SysfsRelay};
use crate::sensor::Ds18b20;
use anyhow::Result;
use chrono::Local;
use log::{error, info, warn, LevelFilter};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

const CONFIG_PATH: &str = "config.json";
const CONFIG_BACKUP_PATH: &str = "config_backup.json";

fn init_logging(config: &SharedConfig) {
    let level = match config
        .get_str("log_level", "info")
        .to_ascii_lowercase()
        .as_str()
    {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "verbose" | "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    // RUST_LOG still wins over the configured level when set.
    builder.parse_default_env();
    builder.init();
}

/// Append a timestamped record to the durable error log. Best effort;
/// the restart happens either way.
fn record_fault(config: &SharedConfig, err: &anyhow::Error) {
    let path = config.get_str("error_log_path", "error.log");
    let line = format!(
        "{} ERROR: {err:#}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    let appended = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut file| file.write_all(line.as_bytes()));
    if let Err(io_err) = appended {
        warn!("error log {path}: {io_err}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = SharedConfig::load(CONFIG_PATH, CONFIG_BACKUP_PATH);
    init_logging(&config);
    if !config.get_bool("boot_normal", true) {
        warn!("previous run did not shut down cleanly");
    }

    let display = Arc::new(Display::new());
    let driver = SysfsRelay::new(
        config.get_str("gpio_base_path", "/sys/class/gpio"),
        config.get_int("relay_increase_gpio", 14),
        config.get_int("relay_decrease_gpio", 15),
    );
    let actuator = Arc::new(Actuator::new(
        config.clone(),
        Box::new(driver),
        display.clone(),
    ));

    tokio::spawn(web::serve(web::WebState {
        config: config.clone(),
        display: display.clone(),
        actuator: actuator.clone(),
    }));

    // Supervisor: an unhandled fault anywhere in the loop marks the boot
    // unclean, leaves a durable error record and restarts from BOOT.
    loop {
        let sensor = Box::new(Ds18b20::new(
            config.get_str("w1_base_path", "/sys/bus/w1/devices"),
        ));
        let mut control = ControlLoop::new(
            config.clone(),
            sensor,
            actuator.clone(),
            display.clone(),
        );
        let result = async {
            control.boot().await?;
            control.run().await
        }
        .await;
        if let Err(err) = result {
            error!("control loop fault: {err:#}");
            config.set("boot_normal", false);
            config.save();
            record_fault(&config, &err);
            tokio::time::sleep(Duration::from_secs(5)).await;
            info!("restarting control loop");
        }
    }
}
