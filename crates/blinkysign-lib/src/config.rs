//! Application configuration — TOML file, platform-aware path, environment overrides.
//!
//! Precedence: environment variables > config file > built-in defaults.
//! Environment variable names match the sign's deployment `.env` files
//! (`LED_COUNT`, `PORT`, `IOT_ENDPOINT`, ...); the binary loads a `.env`
//! from the working directory into the environment before reading config.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::parse_endpoint;
use crate::led::StripSettings;

/// Longest device name accepted as a client id and topic prefix.
pub const MAX_THING_NAME_LEN: usize = 128;

/// Header comment prepended to saved config files.
const CONFIG_HEADER: &str =
    "# BlinkySign configuration. Environment variables override these values.\n\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Pixels per strip. Env: `LED_COUNT`.
    #[serde(default = "default_led_count")]
    pub led_count: usize,

    /// Default brightness, 0.0 to 1.0. Env: `LED_BRIGHTNESS`.
    #[serde(default = "default_led_brightness")]
    pub led_brightness: f32,

    /// GPIO pin of the strip data line (10 = SPI MOSI). Env: `LED_PIN`.
    #[serde(default = "default_led_pin")]
    pub led_pin: i32,

    /// Address the HTTP server binds. Env: `BIND_ADDRESS`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP server port. Env: `PORT`.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL the button and polling clients talk to. Env: `API_ENDPOINT`.
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,

    /// Shared secret sent and checked as `X-Api-Key`. Empty = disabled. Env: `API_KEY`.
    #[serde(default)]
    pub api_key: String,

    /// GPIO pin of the push button. Env: `BUTTON_PIN`.
    #[serde(default = "default_button_pin")]
    pub button_pin: u32,

    /// Presses closer together than this are dropped. Env: `BUTTON_DEBOUNCE_MS`.
    #[serde(default = "default_button_debounce_ms")]
    pub button_debounce_ms: u64,

    /// Seconds between toggles in `client loop`. Env: `TOGGLE_INTERVAL_SECS`.
    #[serde(default = "default_toggle_interval_secs")]
    pub toggle_interval_secs: u64,

    /// MQTT broker host. Empty = not configured. Env: `IOT_ENDPOINT`.
    #[serde(default)]
    pub iot_endpoint: String,

    /// MQTT broker port. Unset = 8883 with TLS, 1883 without. Env: `IOT_PORT`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iot_port: Option<u16>,

    /// CA bundle (PEM) for a TLS broker. Set = connect over TLS. Env: `IOT_CA_PATH`.
    #[serde(default)]
    pub iot_ca_path: String,

    /// Client certificate (PEM) for mutual TLS. Env: `IOT_CERT_PATH`.
    #[serde(default)]
    pub iot_cert_path: String,

    /// Client private key (PEM) for mutual TLS. Env: `IOT_KEY_PATH`.
    #[serde(default)]
    pub iot_key_path: String,

    /// Device name used as client id and topic prefix. Env: `IOT_THING_NAME`.
    #[serde(default = "default_iot_thing_name")]
    pub iot_thing_name: String,

    /// Env: `IOT_USERNAME`.
    #[serde(default)]
    pub iot_username: String,

    /// Env: `IOT_PASSWORD`.
    #[serde(default)]
    pub iot_password: String,

    /// Cloud region of the broker. Informational only. Env: `AWS_REGION`.
    #[serde(default = "default_aws_region")]
    pub aws_region: String,

    /// Seconds between heartbeats. Env: `HEARTBEAT_SECS`.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Seconds before retrying a failed heartbeat. Env: `HEARTBEAT_RETRY_SECS`.
    #[serde(default = "default_heartbeat_retry_secs")]
    pub heartbeat_retry_secs: u64,
}

fn default_led_count() -> usize {
    30
}
fn default_led_brightness() -> f32 {
    0.5
}
fn default_led_pin() -> i32 {
    10
}
fn default_bind_address() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    5000
}
fn default_api_endpoint() -> String {
    "http://localhost:5000".into()
}
fn default_button_pin() -> u32 {
    17
}
fn default_button_debounce_ms() -> u64 {
    300
}
fn default_toggle_interval_secs() -> u64 {
    5
}
fn default_iot_thing_name() -> String {
    "blinkysign".into()
}
fn default_aws_region() -> String {
    "us-east-1".into()
}
fn default_heartbeat_secs() -> u64 {
    60
}
fn default_heartbeat_retry_secs() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Config {
            led_count: default_led_count(),
            led_brightness: default_led_brightness(),
            led_pin: default_led_pin(),
            bind_address: default_bind_address(),
            port: default_port(),
            api_endpoint: default_api_endpoint(),
            api_key: String::new(),
            button_pin: default_button_pin(),
            button_debounce_ms: default_button_debounce_ms(),
            toggle_interval_secs: default_toggle_interval_secs(),
            iot_endpoint: String::new(),
            iot_port: None,
            iot_ca_path: String::new(),
            iot_cert_path: String::new(),
            iot_key_path: String::new(),
            iot_thing_name: default_iot_thing_name(),
            iot_username: String::new(),
            iot_password: String::new(),
            aws_region: default_aws_region(),
            heartbeat_secs: default_heartbeat_secs(),
            heartbeat_retry_secs: default_heartbeat_retry_secs(),
        }
    }
}

/// Validation errors that [`Config::validate`] can return.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// `led_brightness` is outside `0.0..=1.0`.
    InvalidBrightness(f32),
    ZeroLedCount,
    /// `iot_thing_name` is empty, too long, or contains topic separators/wildcards.
    InvalidThingName(String),
    /// TLS file settings that cannot be used together.
    IncompleteTls(&'static str),
    /// An interval field is zero.
    ZeroInterval(&'static str),
    InvalidEndpoint { field: &'static str, reason: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidBrightness(b) => {
                write!(f, "led_brightness must be between 0.0 and 1.0, got {b}")
            }
            ValidationError::ZeroLedCount => write!(f, "led_count must be at least 1"),
            ValidationError::InvalidThingName(name) => {
                write!(
                    f,
                    "Invalid iot_thing_name \"{name}\": must be 1 to {MAX_THING_NAME_LEN} characters without '/', '+' or '#'"
                )
            }
            ValidationError::IncompleteTls(reason) => write!(f, "Invalid TLS settings: {reason}"),
            ValidationError::ZeroInterval(field) => write!(f, "{field} must be at least 1"),
            ValidationError::InvalidEndpoint { field, reason } => {
                write!(f, "Invalid {field}: {reason}")
            }
        }
    }
}

/// Parse `key` from the environment into `slot`, warning on bad values.
fn env_parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
    warnings: &mut Vec<String>,
) where
    T: FromStr,
    T::Err: fmt::Display,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(e) => warnings.push(format!("ignoring {key}={raw:?}: {e}")),
        }
    }
}

fn env_string(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut String) {
    if let Some(raw) = lookup(key) {
        *slot = raw.trim().to_string();
    }
}

impl Config {
    /// Platform-specific config directory.
    pub fn dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("blinkysign"))
    }

    /// Full path to config file.
    pub fn path() -> Option<PathBuf> {
        Self::dir().map(|d| d.join("config.toml"))
    }

    /// Save config to an arbitrary path atomically (write to temp file, then rename).
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let serialized = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        let contents = format!("{CONFIG_HEADER}{serialized}");
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, &contents)?;
        match std::fs::rename(&tmp, path) {
            Ok(()) => Ok(()),
            Err(_) => {
                // Rename can fail across filesystems; fall back to direct write + cleanup
                let result = std::fs::write(path, &contents);
                let _ = std::fs::remove_file(&tmp);
                result
            }
        }
    }

    /// Load config from an arbitrary path, returning the config and any parse warnings.
    ///
    /// Returns `(defaults, [])` if the file doesn't exist.
    /// Returns `(defaults, [warning])` if the file exists but can't be parsed.
    pub fn load_from(path: &Path) -> (Self, Vec<String>) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => (config, vec![]),
                Err(e) => {
                    let warning = format!(
                        "config parse error ({}), using defaults: {e}",
                        path.display()
                    );
                    (Self::default(), vec![warning])
                }
            },
            Err(_) => (Self::default(), vec![]),
        }
    }

    /// Load from `custom` (or the default path), then apply environment overrides.
    ///
    /// `lookup` reads one environment variable; pass `|k| std::env::var(k).ok()`.
    pub fn load(
        custom: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> (Self, Vec<String>) {
        let (mut config, mut warnings) = match custom {
            Some(path) => {
                let (config, mut warnings) = Self::load_from(path);
                if !path.exists() {
                    warnings.push(format!(
                        "config file {} not found, using defaults",
                        path.display()
                    ));
                }
                (config, warnings)
            }
            None => match Self::path() {
                Some(path) => Self::load_from(&path),
                None => (Self::default(), vec![]),
            },
        };
        warnings.extend(config.apply_env(lookup));
        (config, warnings)
    }

    /// Override fields from environment variables. Returns a warning per unparseable value.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
        let mut warnings = Vec::new();
        let w = &mut warnings;
        env_parse(&lookup, "LED_COUNT", &mut self.led_count, w);
        env_parse(&lookup, "LED_BRIGHTNESS", &mut self.led_brightness, w);
        env_parse(&lookup, "LED_PIN", &mut self.led_pin, w);
        env_string(&lookup, "BIND_ADDRESS", &mut self.bind_address);
        env_parse(&lookup, "PORT", &mut self.port, w);
        env_string(&lookup, "API_ENDPOINT", &mut self.api_endpoint);
        env_string(&lookup, "API_KEY", &mut self.api_key);
        env_parse(&lookup, "BUTTON_PIN", &mut self.button_pin, w);
        env_parse(&lookup, "BUTTON_DEBOUNCE_MS", &mut self.button_debounce_ms, w);
        env_parse(&lookup, "TOGGLE_INTERVAL_SECS", &mut self.toggle_interval_secs, w);
        env_string(&lookup, "IOT_ENDPOINT", &mut self.iot_endpoint);
        if let Some(raw) = lookup("IOT_PORT") {
            match raw.trim().parse::<u16>() {
                Ok(port) => self.iot_port = Some(port),
                Err(e) => w.push(format!("ignoring IOT_PORT={raw:?}: {e}")),
            }
        }
        env_string(&lookup, "IOT_THING_NAME", &mut self.iot_thing_name);
        env_string(&lookup, "IOT_USERNAME", &mut self.iot_username);
        env_string(&lookup, "IOT_PASSWORD", &mut self.iot_password);
        env_string(&lookup, "IOT_CA_PATH", &mut self.iot_ca_path);
        env_string(&lookup, "IOT_CERT_PATH", &mut self.iot_cert_path);
        env_string(&lookup, "IOT_KEY_PATH", &mut self.iot_key_path);
        env_string(&lookup, "AWS_REGION", &mut self.aws_region);
        env_parse(&lookup, "HEARTBEAT_SECS", &mut self.heartbeat_secs, w);
        env_parse(&lookup, "HEARTBEAT_RETRY_SECS", &mut self.heartbeat_retry_secs, w);
        warnings
    }

    /// Validate the entire config, collecting all errors.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if !(0.0..=1.0).contains(&self.led_brightness) {
            errors.push(ValidationError::InvalidBrightness(self.led_brightness));
        }
        if self.led_count == 0 {
            errors.push(ValidationError::ZeroLedCount);
        }

        let name = self.iot_thing_name.trim();
        if name.is_empty()
            || name.chars().count() > MAX_THING_NAME_LEN
            || name.contains(['/', '+', '#'])
        {
            errors.push(ValidationError::InvalidThingName(self.iot_thing_name.clone()));
        }

        if self.iot_cert_path.is_empty() != self.iot_key_path.is_empty() {
            errors.push(ValidationError::IncompleteTls(
                "iot_cert_path and iot_key_path must be set together",
            ));
        } else if !self.iot_cert_path.is_empty() && self.iot_ca_path.is_empty() {
            errors.push(ValidationError::IncompleteTls(
                "a client certificate needs iot_ca_path",
            ));
        }

        for (field, value) in [
            ("heartbeat_secs", self.heartbeat_secs),
            ("heartbeat_retry_secs", self.heartbeat_retry_secs),
            ("toggle_interval_secs", self.toggle_interval_secs),
        ] {
            if value == 0 {
                errors.push(ValidationError::ZeroInterval(field));
            }
        }

        if let Err(e) = parse_endpoint(&self.api_endpoint) {
            errors.push(ValidationError::InvalidEndpoint {
                field: "api_endpoint",
                reason: e.client_message(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Broker port: `iot_port` if set, else 8883 with TLS and 1883 without.
    pub fn mqtt_port(&self) -> u16 {
        match self.iot_port {
            Some(port) => port,
            None if !self.iot_ca_path.is_empty() => 8883,
            None => 1883,
        }
    }

    /// The shared secret, if one is configured.
    pub fn api_key(&self) -> Option<&str> {
        Some(self.api_key.as_str()).filter(|k| !k.is_empty())
    }

    pub fn strip_settings(&self) -> StripSettings {
        StripSettings {
            pin: self.led_pin,
            count: self.led_count,
            brightness: self.led_brightness,
        }
    }

    pub fn button_debounce(&self) -> Duration {
        Duration::from_millis(self.button_debounce_ms)
    }

    pub fn toggle_interval(&self) -> Duration {
        Duration::from_secs(self.toggle_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn heartbeat_retry(&self) -> Duration {
        Duration::from_secs(self.heartbeat_retry_secs)
    }
}
