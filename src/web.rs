//! Status/config HTTP surface.
//!
//! Runs as its own tokio task next to the control loop; the shared
//! configuration store is the only state the two exchange. Internal
//! control faults never surface as 5xx here, they come back as JSON
//! payloads with `success: false`; only unknown routes 404.

use crate::config::SharedConfig;
use crate::display::Display;
use crate::relay::{Actuation, Actuator, RelayChannel};
use axum::{
    extract::{Form, State},
    response::Html,
    routing::{get, post},
    Json, Router,
};
use log::{info, warn};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::services::ServeDir;

#[derive(Clone)]
pub struct WebState {
    pub config: SharedConfig,
    pub display: Arc<Display>,
    pub actuator: Arc<Actuator>,
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/", get(status_page))
        .route("/api/status", get(api_status))
        .route("/save_config", post(save_config))
        .route("/open_relay", post(open_relay))
        .route("/close_relay", post(close_relay))
        .route("/reset", post(reset))
        .nest_service("/static", ServeDir::new("static"))
        .with_state(state)
}

pub async fn serve(state: WebState) {
    let port = state.config.get_int("http_port", 8080);
    let addr = format!("0.0.0.0:{port}");
    info!("web surface on http://{addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, router(state)).await.unwrap();
}

async fn status_page(State(state): State<WebState>) -> Html<String> {
    let template = match tokio::fs::read_to_string("static/index.html").await {
        Ok(content) => content,
        Err(err) => {
            warn!("static/index.html: {err}");
            return Html("<h1>Fehler beim Laden der Seite</h1>".to_string());
        }
    };

    let lcd_lines = state
        .display
        .lines()
        .into_iter()
        .map(|line| format!("<div class='lcd-line'>{line}</div>"))
        .collect::<String>();

    let config_rows = state
        .config
        .snapshot()
        .iter()
        .map(|(key, value)| {
            let value = escape_html(&value.render());
            format!("<tr><td>{key}</td><td><input name='{key}' value='{value}'></td></tr>")
        })
        .collect::<String>();

    Html(
        template
            .replace("<!--LCD_LINES_PLACEHOLDER-->", &lcd_lines)
            .replace("<!--CONFIG_ROWS_PLACEHOLDER-->", &config_rows),
    )
}

/// Escape a string for interpolation into HTML text or a quoted
/// attribute. Config values can hold arbitrary operator input.
fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[derive(Serialize)]
struct StatusResponse {
    current_temp: f64,
    nominal_min_temp: f64,
    nominal_max_temp: f64,
    temp_change_category: String,
    temp_increasing: bool,
    stop_timer: i64,
    boot_normal: bool,
    lcd: Vec<String>,
}

async fn api_status(State(state): State<WebState>) -> Json<StatusResponse> {
    let (min, max) = state.actuator.nominal_band();
    Json(StatusResponse {
        current_temp: state.config.get_float("current_temp", -127.0),
        nominal_min_temp: min,
        nominal_max_temp: max,
        temp_change_category: state.config.get_str("temp_change_category", "LOW"),
        temp_increasing: state.config.get_bool("temp_increasing", false),
        stop_timer: state.config.get_int("stop_timer", 0),
        boot_normal: state.config.get_bool("boot_normal", true),
        lcd: state.display.lines(),
    })
}

/// Apply `key=value&...` pairs. A key that does not already exist in the
/// store is the schema violation this surface knows about; nothing is
/// applied unless every pair passes, then the store is persisted.
async fn save_config(
    State(state): State<WebState>,
    Form(pairs): Form<BTreeMap<String, String>>,
) -> Json<serde_json::Value> {
    let mut updates = Vec::with_capacity(pairs.len());
    for (key, raw) in &pairs {
        let Some(existing) = state.config.get(key) else {
            warn!("save_config: unknown key '{key}'");
            return Json(json!({ "success": false, "error": format!("unknown key '{key}'") }));
        };
        let Some(value) = existing.coerce_like(raw) else {
            warn!("save_config: bad value '{raw}' for '{key}'");
            return Json(json!({ "success": false, "error": format!("invalid value for '{key}'") }));
        };
        updates.push((key, value));
    }
    for (key, value) in updates {
        state.config.set(key, value);
    }
    state.config.save();
    info!("save_config: {} keys updated", pairs.len());
    Json(json!({ "success": true }))
}

async fn open_relay(State(state): State<WebState>) -> Json<serde_json::Value> {
    manual_actuation(state, RelayChannel::Increase).await
}

async fn close_relay(State(state): State<WebState>) -> Json<serde_json::Value> {
    manual_actuation(state, RelayChannel::Decrease).await
}

async fn manual_actuation(state: WebState, channel: RelayChannel) -> Json<serde_json::Value> {
    let hold_ms = state.config.get_int("relay_time", 2000).max(0) as u64;
    match state.actuator.manual(channel, hold_ms).await {
        Ok(Actuation::Actuated(channel)) => {
            Json(json!({ "success": true, "channel": channel.as_str() }))
        }
        Ok(Actuation::DriverFault) => Json(json!({
            "success": false,
            "warning": "relay driver fault, channel state uncertain"
        })),
        Ok(_) => Json(json!({
            "success": false,
            "warning": "temperature reading invalid, relay untouched"
        })),
        Err(rejected) => Json(json!({ "success": false, "warning": rejected.to_string() })),
    }
}

/// Mark the boot as unclean and exit; the process supervisor brings the
/// controller back up from BOOT.
async fn reset(State(state): State<WebState>) -> Json<serde_json::Value> {
    warn!("remote reset requested");
    state.config.set("boot_normal", false);
    state.config.save();
    tokio::spawn(async {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        std::process::exit(1);
    });
    Json(json!({ "success": true }))
}
