use std::{collections::HashMap, fs};

use locker_core::is_valid_pin;
use tracing::warn;

#[derive(Debug)]
pub struct Settings {
    pub server_bind: String,
    pub default_pin: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8443".into(),
            default_pin: "1234".into(),
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("bind_addr") {
                settings.server_bind = v.clone();
            }
            if let Some(v) = file_cfg.get("default_pin") {
                settings.default_pin = v.clone();
            }
        }
    }

    if let Ok(v) = std::env::var("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Ok(v) = std::env::var("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Ok(v) = std::env::var("DEFAULT_PIN") {
        settings.default_pin = v;
    }
    if let Ok(v) = std::env::var("APP__DEFAULT_PIN") {
        settings.default_pin = v;
    }

    settings.default_pin = sanitize_default_pin(&settings.default_pin);
    settings
}

/// A configured default PIN must be exactly four ASCII digits; anything else
/// falls back to the stock PIN so fresh sessions stay usable.
fn sanitize_default_pin(raw: &str) -> String {
    let trimmed = raw.trim();
    if is_valid_pin(trimmed) {
        return trimmed.to_string();
    }
    warn!(configured = %raw, "default PIN is not four digits, falling back to 1234");
    Settings::default().default_pin
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
