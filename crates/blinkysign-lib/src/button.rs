//! Physical push button that toggles the sign over HTTP.
//!
//! The button pulls the GPIO line low when pressed against the pin's
//! internal pull-up, so a press is a falling edge. Presses closer together
//! than the debounce window are dropped.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{BlinkyError, Result};
use crate::http::ApiClient;

/// Drops presses that arrive within `window` of the last accepted one.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether a press at `now` counts.
    pub fn accept(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last
            && now.saturating_duration_since(last) < self.window
        {
            return false;
        }
        self.last = Some(now);
        true
    }
}

/// A source of button presses.
pub trait ButtonInput {
    /// Wait for the next press and return when it happened.
    fn next_press(&mut self) -> impl Future<Output = Result<Instant>> + Send;
}

/// GPIO push button with the internal pull-up enabled, reported through a
/// falling-edge interrupt.
#[derive(Debug)]
pub struct GpioButton {
    pin: u8,
    presses: mpsc::UnboundedReceiver<Instant>,
    #[cfg(target_os = "linux")]
    _input: Option<rppal::gpio::InputPin>,
}

fn bcm_pin(pin: u32) -> Result<u8> {
    u8::try_from(pin).map_err(|_| BlinkyError::Config(format!("GPIO pin {pin} out of range")))
}

impl GpioButton {
    /// Configure BCM `pin` as a pulled-up input and listen for falling edges.
    #[cfg(target_os = "linux")]
    pub fn open(pin: u32) -> Result<Self> {
        use rppal::gpio::{Gpio, Trigger};

        let pin = bcm_pin(pin)?;
        let gpio_error = |e: rppal::gpio::Error| BlinkyError::Config(format!("GPIO {pin}: {e}"));
        let mut input = Gpio::new()
            .and_then(|gpio| gpio.get(pin))
            .map_err(gpio_error)?
            .into_input_pullup();

        let (tx, presses) = mpsc::unbounded_channel();
        input
            .set_async_interrupt(Trigger::FallingEdge, None, move |_event| {
                let _ = tx.send(Instant::now());
            })
            .map_err(gpio_error)?;

        log::info!("button on GPIO {pin} ready");
        Ok(Self {
            pin,
            presses,
            _input: Some(input),
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn open(pin: u32) -> Result<Self> {
        let pin = bcm_pin(pin)?;
        Err(BlinkyError::Config(format!(
            "GPIO {pin}: buttons are only supported on Linux"
        )))
    }

    /// A button fed from `presses` instead of a GPIO line.
    pub fn from_channel(pin: u8, presses: mpsc::UnboundedReceiver<Instant>) -> Self {
        Self {
            pin,
            presses,
            #[cfg(target_os = "linux")]
            _input: None,
        }
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }
}

impl ButtonInput for GpioButton {
    async fn next_press(&mut self) -> Result<Instant> {
        self.presses.recv().await.ok_or_else(|| {
            BlinkyError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("GPIO {} interrupt stopped", self.pin),
            ))
        })
    }
}

/// Toggle the sign on every debounced press until the input fails.
///
/// Failed toggle requests are logged and the loop keeps listening.
pub async fn run_button<B: ButtonInput>(
    input: &mut B,
    debouncer: &mut Debouncer,
    client: &ApiClient,
) -> Result<()> {
    loop {
        let at = input.next_press().await?;
        if !debouncer.accept(at) {
            log::debug!("button: bounce ignored");
            continue;
        }
        log::info!("Button pressed!");
        match client.toggle().await {
            Ok(reply) => log::info!("Toggle response: {reply}"),
            Err(e) => log::error!("Toggle request failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use super::*;
    use crate::controller::{Controller, ControllerOptions};
    use crate::http::HttpServer;
    use crate::led::mock;

    #[test]
    fn debouncer_drops_presses_inside_window() {
        let mut d = Debouncer::new(Duration::from_millis(300));
        let t0 = Instant::now();
        assert!(d.accept(t0));
        assert!(!d.accept(t0 + Duration::from_millis(100)));
        assert!(!d.accept(t0 + Duration::from_millis(299)));
        assert!(d.accept(t0 + Duration::from_millis(300)));
        // The window restarts from the last accepted press.
        assert!(!d.accept(t0 + Duration::from_millis(500)));
        assert!(d.accept(t0 + Duration::from_millis(650)));
    }

    #[test]
    fn pin_outside_bcm_range_is_config_error() {
        let err = GpioButton::open(300).unwrap_err();
        assert!(matches!(err, BlinkyError::Config(_)));
        assert!(err.to_string().contains("out of range"), "{err}");
    }

    #[tokio::test]
    async fn interrupt_presses_are_delivered_in_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut button = GpioButton::from_channel(17, rx);
        let t0 = Instant::now();
        tx.send(t0).unwrap();
        tx.send(t0 + Duration::from_millis(5)).unwrap();
        assert_eq!(button.next_press().await.unwrap(), t0);
        assert_eq!(
            button.next_press().await.unwrap(),
            t0 + Duration::from_millis(5)
        );
        drop(tx);
        assert!(matches!(button.next_press().await, Err(BlinkyError::Io(_))));
    }

    /// Replays fixed press times, then fails to end the loop.
    struct Scripted(VecDeque<Instant>);

    impl ButtonInput for Scripted {
        async fn next_press(&mut self) -> Result<Instant> {
            self.0
                .pop_front()
                .ok_or_else(|| BlinkyError::Io(io::ErrorKind::UnexpectedEof.into()))
        }
    }

    #[tokio::test]
    async fn accepted_presses_toggle_the_sign() {
        let (driver, _) = mock::driver(1, 4, 0.5);
        let controller = Arc::new(Controller::new(driver, ControllerOptions::immediate()));
        controller.startup();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(HttpServer::new(Arc::clone(&controller), None).serve(listener));

        let t0 = Instant::now();
        let ms = Duration::from_millis;
        let mut input = Scripted(VecDeque::from([t0, t0 + ms(100), t0 + ms(400), t0 + ms(800)]));
        let mut debouncer = Debouncer::new(ms(300));
        let client = ApiClient::new(&format!("http://{addr}"), None).unwrap();

        let err = run_button(&mut input, &mut debouncer, &client).await.unwrap_err();
        assert!(matches!(err, BlinkyError::Io(_)));
        // Three accepted presses from unmuted.
        assert!(controller.status().muted);
    }
}
