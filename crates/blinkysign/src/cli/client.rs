//! `client` subcommand — send commands to a running sign over HTTP.

use std::time::Duration;

use blinkysign_lib::http::ApiClient;
use serde_json::Value;

use super::{
    ClientAction, ClientStatusOutput, Config, DeviceState, Result, block_on, kv, kv_width,
    print_json,
};

pub(super) fn cmd_client(config: &Config, action: ClientAction, json: bool) -> Result<()> {
    let client = ApiClient::new(&config.api_endpoint, config.api_key())?;
    block_on(async {
        match action {
            ClientAction::Toggle => print_reply(&client.toggle().await?, json),
            ClientAction::Set { muted } => print_reply(&client.set(muted).await?, json),
            ClientAction::Status => {
                let state = client.status().await?;
                if json {
                    return print_json(&ClientStatusOutput {
                        endpoint: client.endpoint().to_string(),
                        state,
                    });
                }
                print_state(&client.endpoint().to_string(), &state);
                Ok(())
            }
            ClientAction::Loop { interval } => {
                let interval = interval
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| config.toggle_interval());
                tokio::select! {
                    () = toggle_loop(&client, interval, json) => Ok(()),
                    _ = tokio::signal::ctrl_c() => {
                        log::info!("Client stopped");
                        Ok(())
                    }
                }
            }
        }
    })
}

/// Toggle every `interval`, logging failures and carrying on.
async fn toggle_loop(client: &ApiClient, interval: Duration, json: bool) {
    log::info!(
        "Toggling {} every {}s (Ctrl+C to stop)",
        client.endpoint(),
        interval.as_secs()
    );
    loop {
        match client.toggle().await {
            Ok(reply) => {
                if let Err(e) = print_reply(&reply, json) {
                    log::warn!("{e}");
                }
            }
            Err(e) => log::error!("Error toggling mute: {e}"),
        }
        tokio::time::sleep(interval).await;
    }
}

fn print_reply(reply: &Value, json: bool) -> Result<()> {
    if json {
        return print_json(reply);
    }
    if let Some(message) = reply.get("message").and_then(Value::as_str) {
        println!("{message}");
    }
    if let Some(state) = reply
        .get("state")
        .and_then(|s| serde_json::from_value::<DeviceState>(s.clone()).ok())
    {
        let w = kv_width(&["Muted:", "LEDs:"], &[]);
        kv("Muted:", state.muted, w);
        kv("LEDs:", if state.led_on { "on" } else { "off" }, w);
    }
    Ok(())
}

fn print_state(endpoint: &str, state: &DeviceState) {
    let w = kv_width(&["Endpoint:", "Muted:", "LEDs:"], &[]);
    kv("Endpoint:", endpoint, w);
    kv("Muted:", state.muted, w);
    kv("LEDs:", if state.led_on { "on" } else { "off" }, w);
}
