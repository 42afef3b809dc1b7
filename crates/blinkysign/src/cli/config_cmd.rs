//! `config` subcommand — show current configuration and file paths.

use std::path::Path;

use super::{BlinkyError, Config, ConfigOutput, Result, kv, kv_indent, kv_width, print_json};

fn secret_label(value: &str) -> &'static str {
    if value.is_empty() { "(not set)" } else { "(set)" }
}

fn or_unset(value: &str) -> &str {
    if value.is_empty() { "(not set)" } else { value }
}

pub(super) fn cmd_config(json: bool, custom_path: Option<&Path>, write: bool) -> Result<()> {
    let config = super::load_config(custom_path);
    let config_path = custom_path.map(Path::to_path_buf).or_else(Config::path);

    if write {
        let path = config_path
            .as_ref()
            .ok_or_else(|| BlinkyError::Config("no config directory".into()))?;
        config.save_to(path)?;
        log::info!("wrote {}", path.display());
    }

    let config_exists = config_path.as_ref().is_some_and(|p| p.exists());
    let problems: Vec<String> = match config.validate() {
        Ok(()) => vec![],
        Err(errors) => errors.iter().map(|e| e.to_string()).collect(),
    };

    if json {
        let mut settings = config.clone();
        settings.api_key = secret_label(&config.api_key).into();
        settings.iot_password = secret_label(&config.iot_password).into();
        return print_json(&ConfigOutput {
            config_file: config_path.as_ref().map(|p| p.display().to_string()),
            config_file_exists: config_exists,
            settings,
            problems,
        });
    }

    // Human-readable output
    let w = kv_width(
        &["Config file:"],
        &[
            "led_count:",
            "led_brightness:",
            "led_pin:",
            "bind_address:",
            "port:",
            "api_endpoint:",
            "api_key:",
            "button_pin:",
            "button_debounce_ms:",
            "toggle_interval_secs:",
            "iot_endpoint:",
            "iot_port:",
            "iot_ca_path:",
            "iot_cert_path:",
            "iot_key_path:",
            "iot_thing_name:",
            "iot_username:",
            "iot_password:",
            "aws_region:",
            "heartbeat_secs:",
            "heartbeat_retry_secs:",
        ],
    );

    match &config_path {
        Some(p) => {
            if config_exists {
                kv("Config file:", format_args!("{} (loaded)", p.display()), w);
            } else {
                kv(
                    "Config file:",
                    format_args!("{} (not found, using defaults)", p.display()),
                    w,
                );
            }
        }
        None => kv("Config file:", "(no config directory)", w),
    }
    println!();

    println!("Strip:");
    kv_indent("led_count:", config.led_count, w);
    kv_indent("led_brightness:", config.led_brightness, w);
    kv_indent("led_pin:", config.led_pin, w);
    println!();

    println!("HTTP:");
    kv_indent("bind_address:", &config.bind_address, w);
    kv_indent("port:", config.port, w);
    kv_indent("api_endpoint:", &config.api_endpoint, w);
    kv_indent("api_key:", secret_label(&config.api_key), w);
    println!();

    println!("Button:");
    kv_indent("button_pin:", config.button_pin, w);
    kv_indent("button_debounce_ms:", config.button_debounce_ms, w);
    kv_indent("toggle_interval_secs:", config.toggle_interval_secs, w);
    println!();

    println!("MQTT:");
    kv_indent("iot_endpoint:", or_unset(&config.iot_endpoint), w);
    kv_indent("iot_port:", config.mqtt_port(), w);
    kv_indent("iot_ca_path:", or_unset(&config.iot_ca_path), w);
    kv_indent("iot_cert_path:", or_unset(&config.iot_cert_path), w);
    kv_indent("iot_key_path:", or_unset(&config.iot_key_path), w);
    kv_indent("iot_thing_name:", &config.iot_thing_name, w);
    kv_indent("iot_username:", or_unset(&config.iot_username), w);
    kv_indent("iot_password:", secret_label(&config.iot_password), w);
    kv_indent("aws_region:", &config.aws_region, w);
    kv_indent("heartbeat_secs:", config.heartbeat_secs, w);
    kv_indent("heartbeat_retry_secs:", config.heartbeat_retry_secs, w);

    if !problems.is_empty() {
        println!();
        println!("Problems:");
        for p in &problems {
            println!("  {p}");
        }
    }
    Ok(())
}
