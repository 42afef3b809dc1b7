//! `serve` subcommand — run the sign behind the HTTP API.

use std::sync::Arc;

use blinkysign_lib::http::HttpServer;
use tokio::net::TcpListener;

use super::{BlinkyError, Config, Result, block_on, blocking, check_config, open_controller};

pub(super) fn cmd_serve(config: &Config, port: Option<u16>, bind: Option<String>) -> Result<()> {
    check_config(config)?;
    let controller = open_controller(config);
    let addr = format!(
        "{}:{}",
        bind.as_deref().unwrap_or(&config.bind_address),
        port.unwrap_or(config.port)
    );

    block_on(async {
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("cannot listen on {addr}: {e}");
                blocking(&controller, |c| c.fail_startup()).await?;
                return Err(BlinkyError::Io(e));
            }
        };

        let state = blocking(&controller, |c| c.startup()).await?;
        log::info!(
            "sign ready ({}, {} strip(s))",
            state.label(),
            controller.active_strips()
        );
        if config.api_key().is_none() {
            log::warn!("no api_key configured; the API is open to anyone who can reach it");
        }

        let server = HttpServer::new(Arc::clone(&controller), config.api_key());
        tokio::select! {
            result = server.serve(listener) => result.map_err(BlinkyError::Io),
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
