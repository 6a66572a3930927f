use crate::application::ticker::DEFAULT_PING_EVERY_TICKS;
use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const TIMER_JSON: &str = "timer.json";
const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8080/api";
const DEFAULT_TICK_MILLIS: u64 = 1_000;

pub const API_BASE_URL_ENV: &str = "STUDYROOM_API_BASE_URL";
pub const ROOM_ID_ENV: &str = "STUDYROOM_ROOM_ID";
pub const API_TOKEN_ENV: &str = "STUDYROOM_API_TOKEN";

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigBundle {
    pub app: serde_json::Value,
    pub timer: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub room_id: Option<String>,
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSettings {
    pub tick_millis: u64,
    pub ping_every_ticks: u32,
    pub query_max_attempts: u8,
    pub query_base_delay_ms: u64,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            tick_millis: DEFAULT_TICK_MILLIS,
            ping_every_ticks: DEFAULT_PING_EVERY_TICKS,
            query_max_attempts: 3,
            query_base_delay_ms: 200,
        }
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "apiBaseUrl": DEFAULT_API_BASE_URL,
                "roomId": null
            }),
        ),
        (
            TIMER_JSON,
            serde_json::json!({
                "schema": 1,
                "tickMillis": DEFAULT_TICK_MILLIS,
                "pingEveryTicks": DEFAULT_PING_EVERY_TICKS,
                "queryRetry": {
                    "maxAttempts": 3,
                    "baseDelayMs": 200
                }
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            write_config(&path, &value)?;
        }
    }
    Ok(())
}

fn write_config(path: &Path, value: &serde_json::Value) -> Result<(), InfraError> {
    let formatted = serde_json::to_string_pretty(value)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    Ok(ConfigBundle {
        app: read_config(&config_dir.join(APP_JSON))?,
        timer: read_config(&config_dir.join(TIMER_JSON))?,
    })
}

fn non_empty_str<'a>(value: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

// Room ids may be stored as numbers when written by hand.
fn room_id_value(value: &serde_json::Value) -> Option<String> {
    match value.get("roomId") {
        Some(serde_json::Value::Number(number)) => Some(number.to_string()),
        _ => non_empty_str(value, "roomId").map(ToOwned::to_owned),
    }
}

pub fn read_client_settings(config_dir: &Path) -> Result<ClientSettings, InfraError> {
    load_client_settings_from_lookup(config_dir, |key| std::env::var(key).ok())
}

pub fn load_client_settings_from_lookup<F>(
    config_dir: &Path,
    lookup: F,
) -> Result<ClientSettings, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let app = read_config(&config_dir.join(APP_JSON))?;
    let api_base_url = lookup_value(&lookup, API_BASE_URL_ENV)
        .or_else(|| non_empty_str(&app, "apiBaseUrl").map(ToOwned::to_owned))
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
    url::Url::parse(&api_base_url).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid apiBaseUrl {api_base_url}: {error}"))
    })?;

    Ok(ClientSettings {
        api_base_url,
        room_id: lookup_value(&lookup, ROOM_ID_ENV).or_else(|| room_id_value(&app)),
        api_token: lookup_value(&lookup, API_TOKEN_ENV),
    })
}

fn lookup_value<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn read_timer_settings(config_dir: &Path) -> Result<TimerSettings, InfraError> {
    let timer = read_config(&config_dir.join(TIMER_JSON))?;
    let defaults = TimerSettings::default();

    let tick_millis = timer
        .get("tickMillis")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(defaults.tick_millis);
    if tick_millis == 0 {
        return Err(InfraError::InvalidConfig(
            "tickMillis must be > 0".to_string(),
        ));
    }
    let ping_every_ticks = timer
        .get("pingEveryTicks")
        .and_then(serde_json::Value::as_u64)
        .map(|value| u32::try_from(value).unwrap_or(u32::MAX))
        .unwrap_or(defaults.ping_every_ticks);
    if ping_every_ticks == 0 {
        return Err(InfraError::InvalidConfig(
            "pingEveryTicks must be > 0".to_string(),
        ));
    }

    let retry = timer.get("queryRetry");
    let query_max_attempts = retry
        .and_then(|value| value.get("maxAttempts"))
        .and_then(serde_json::Value::as_u64)
        .map(|value| u8::try_from(value).unwrap_or(u8::MAX))
        .unwrap_or(defaults.query_max_attempts);
    let query_base_delay_ms = retry
        .and_then(|value| value.get("baseDelayMs"))
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(defaults.query_base_delay_ms);

    Ok(TimerSettings {
        tick_millis,
        ping_every_ticks,
        query_max_attempts,
        query_base_delay_ms,
    })
}

pub fn save_client_settings(
    config_dir: &Path,
    api_base_url: Option<&str>,
    room_id: Option<&str>,
) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    let mut app = read_config(&path)?;
    let object = app.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;

    if let Some(api_base_url) = api_base_url {
        let api_base_url = api_base_url.trim();
        url::Url::parse(api_base_url).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid apiBaseUrl {api_base_url}: {error}"))
        })?;
        object.insert(
            "apiBaseUrl".to_string(),
            serde_json::Value::String(api_base_url.to_string()),
        );
    }
    if let Some(room_id) = room_id {
        let room_id = room_id.trim();
        if room_id.is_empty() {
            return Err(InfraError::InvalidConfig(
                "roomId must not be empty".to_string(),
            ));
        }
        object.insert(
            "roomId".to_string(),
            serde_json::Value::String(room_id.to_string()),
        );
    }

    write_config(&path, &app)
}
