//! `button` subcommand — toggle a sign from a GPIO push button.

use blinkysign_lib::button::{Debouncer, GpioButton, run_button};
use blinkysign_lib::http::ApiClient;

use super::{Config, Result, block_on};

pub(super) fn cmd_button(config: &Config, pin: Option<u32>) -> Result<()> {
    let client = ApiClient::new(&config.api_endpoint, config.api_key())?;
    let pin = pin.unwrap_or(config.button_pin);
    let mut debouncer = Debouncer::new(config.button_debounce());
    let mut input = GpioButton::open(pin)?;
    log::info!(
        "Button client started on GPIO {pin}, debounce {:?}, sign at {}",
        debouncer.window(),
        client.endpoint()
    );

    block_on(async {
        tokio::select! {
            result = run_button(&mut input, &mut debouncer, &client) => result,
            _ = tokio::signal::ctrl_c() => {
                log::info!("Button client stopped");
                Ok(())
            }
        }
    })
}
