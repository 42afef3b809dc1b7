//! CLI subcommands — the sign's services, its remote triggers, and bench tools.

mod button;
mod client;
mod colors;
mod config_cmd;
mod iot;
mod serve;
mod test_strip;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use clap::{ArgAction, Subcommand};
use serde::Serialize;

pub(super) use crate::RUNNING;
pub(super) use blinkysign_lib::config::Config;
pub(super) use blinkysign_lib::controller::{Controller, ControllerOptions};
pub(super) use blinkysign_lib::error::{BlinkyError, Result};
pub(super) use blinkysign_lib::led;
pub(super) use blinkysign_lib::state::DeviceState;

const PADDING: usize = 2;

/// Compute alignment width for a command's key-value output.
/// Ensures at least PADDING spaces after the longest key in either level,
/// with top-level and indent values aligned to the same column.
pub(super) fn kv_width(top: &[&str], indent: &[&str]) -> usize {
    let top_max = top.iter().map(|k| k.len()).max().unwrap_or(0);
    let indent_max = indent.iter().map(|k| k.len()).max().unwrap_or(0);
    let top_need = if top.is_empty() { 0 } else { top_max + PADDING };
    // Indent keys lose 2 chars of inner width to the "  " prefix
    let indent_need = if indent.is_empty() {
        0
    } else {
        indent_max + PADDING + 2
    };
    top_need.max(indent_need)
}

pub(super) fn format_kv(key: &str, value: impl std::fmt::Display, w: usize) -> String {
    format!("{key:<width$}{value}", width = w)
}

pub(super) fn kv(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("{}", format_kv(key, value, w));
}

pub(super) fn kv_indent(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("  {key:<width$}{value}", width = w - 2);
}

/// Pretty-print a value as JSON on stdout.
pub(super) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── JSON output structs ──

#[derive(Serialize)]
pub(super) struct ConfigOutput {
    pub config_file: Option<String>,
    pub config_file_exists: bool,
    pub settings: Config,
    pub problems: Vec<String>,
}

#[derive(Serialize)]
pub(super) struct ColorJson {
    pub name: &'static str,
    pub rgb: [u8; 3],
    pub hex: String,
    pub default: bool,
}

#[derive(Serialize)]
pub(super) struct ClientStatusOutput {
    pub endpoint: String,
    pub state: DeviceState,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the sign with the HTTP API
    Serve {
        /// Port to listen on (default: config `port`)
        #[arg(long)]
        port: Option<u16>,
        /// Address to bind (default: config `bind_address`)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run the sign driven by an MQTT broker
    Iot,

    /// Toggle a sign from a GPIO push button
    Button {
        /// GPIO pin of the button (default: config `button_pin`)
        #[arg(long)]
        pin: Option<u32>,
    },

    /// Send commands to a running sign
    Client {
        #[command(subcommand)]
        action: ClientAction,
    },

    /// Cycle colors and effects on the local strip
    TestStrip,

    /// List named effect colors
    Colors,

    /// Show current configuration and file paths
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        write: bool,
    },
}

#[derive(Subcommand)]
pub enum ClientAction {
    /// Flip the mute state
    Toggle,
    /// Set the mute state explicitly
    Set {
        #[arg(long, action = ArgAction::Set)]
        muted: bool,
    },
    /// Show the sign's current state
    Status,
    /// Toggle repeatedly until interrupted
    Loop {
        /// Seconds between toggles (default: config `toggle_interval_secs`)
        #[arg(long)]
        interval: Option<u64>,
    },
}

/// Warn if `--json` was passed to a command that doesn't support it.
fn warn_json_unsupported(cmd_name: &str) {
    log::warn!("--json is not supported for `{cmd_name}` (ignored)");
}

/// Load config from `custom_path` or the default location, logging warnings.
pub(super) fn load_config(custom_path: Option<&Path>) -> Config {
    let (config, warnings) = Config::load(custom_path, |k| std::env::var(k).ok());
    for w in &warnings {
        log::warn!("[config] {w}");
    }
    config
}

/// Refuse to start a service on an invalid configuration.
pub(super) fn check_config(config: &Config) -> Result<()> {
    config.validate().map_err(|errors| {
        let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        BlinkyError::Config(joined.join("; "))
    })
}

/// Controller over the configured hardware strips.
pub(super) fn open_controller(config: &Config) -> Arc<Controller> {
    let driver = led::open_strips(&config.strip_settings());
    Arc::new(Controller::new(driver, ControllerOptions::default()))
}

/// Run `fut` to completion on a fresh multi-threaded runtime.
pub(super) fn block_on<T>(fut: impl Future<Output = Result<T>>) -> Result<T> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(fut)
}

/// Run a controller call on the blocking pool.
pub(super) async fn blocking<T, F>(controller: &Arc<Controller>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Controller) -> T + Send + 'static,
{
    let controller = Arc::clone(controller);
    tokio::task::spawn_blocking(move || f(&controller))
        .await
        .map_err(|e| BlinkyError::Io(std::io::Error::other(e)))
}

pub fn run(cmd: Command, json: bool, config_path: Option<&Path>) -> Result<()> {
    match cmd {
        Command::Serve { port, bind } => {
            if json {
                warn_json_unsupported("serve");
            }
            serve::cmd_serve(&load_config(config_path), port, bind)
        }
        Command::Iot => {
            if json {
                warn_json_unsupported("iot");
            }
            iot::cmd_iot(&load_config(config_path))
        }
        Command::Button { pin } => {
            if json {
                warn_json_unsupported("button");
            }
            button::cmd_button(&load_config(config_path), pin)
        }
        Command::Client { action } => client::cmd_client(&load_config(config_path), action, json),
        Command::TestStrip => {
            if json {
                warn_json_unsupported("test-strip");
            }
            test_strip::cmd_test_strip(&load_config(config_path))
        }
        Command::Colors => colors::cmd_colors(json),
        Command::Config { write } => config_cmd::cmd_config(json, config_path, write),
    }
}

#[cfg(test)]
mod format_tests {
    use super::*;

    #[test]
    fn kv_width_top_only() {
        let w = kv_width(&["Muted:", "Endpoint:"], &[]);
        // "Endpoint:" = 9 + PADDING = 11
        assert_eq!(w, 11);
    }

    #[test]
    fn kv_width_indent_drives_width() {
        let w = kv_width(&["A:"], &["heartbeat_retry_secs:"]);
        // 21 + PADDING + 2 = 25
        assert_eq!(w, 25);
    }

    #[test]
    fn values_align_across_levels() {
        let w = kv_width(&["Config file:"], &["led_count:"]);
        let top = format_kv("Config file:", "V", w);
        let indent = format!("  {:<width$}{}", "led_count:", "V", width = w - 2);
        assert_eq!(top.find('V'), indent.find('V'));
    }

    #[test]
    fn format_kv_overlong_key_gets_no_padding() {
        assert_eq!(format_kv("ExactWidth:", "val", 10), "ExactWidth:val");
        assert_eq!(format_kv("Key:", "value", 10), "Key:      value");
    }

    #[test]
    fn kv_width_empty_both() {
        assert_eq!(kv_width(&[], &[]), 0);
    }
}
