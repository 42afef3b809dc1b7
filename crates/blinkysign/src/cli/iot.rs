//! `iot` subcommand — run the sign driven by an MQTT broker.

use std::sync::Arc;

use blinkysign_lib::mqtt::MqttService;

use super::{Config, Result, block_on, blocking, check_config, open_controller};

pub(super) fn cmd_iot(config: &Config) -> Result<()> {
    check_config(config)?;
    let controller = open_controller(config);
    let service = MqttService::from_config(Arc::clone(&controller), config)?;
    log::info!(
        "thing {} (region {})",
        config.iot_thing_name,
        config.aws_region
    );

    block_on(async {
        tokio::select! {
            result = service.run() => result,
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutting down");
                blocking(&controller, |c| {
                    c.off();
                })
                .await
            }
        }
    })
}
