//! WS281x backend via the rpi_ws281x C driver (PWM/DMA on a Raspberry Pi).

use rgb::RGB8;
use rs_ws281x::{ChannelBuilder, Controller, ControllerBuilder, StripType};

use super::{LedStrip, StripError};

const CHANNEL: usize = 0;
const FREQ_HZ: u32 = 800_000;
const DMA_CHANNEL: i32 = 10;

pub(super) struct Ws281xStrip {
    controller: Controller,
    count: usize,
    brightness: f32,
}

// The controller owns raw pointers into the C driver state. It is only
// ever touched from behind the render lock, one thread at a time.
unsafe impl Send for Ws281xStrip {}

fn to_u8(brightness: f32) -> u8 {
    (brightness.clamp(0.0, 1.0) * 255.0).round() as u8
}

impl Ws281xStrip {
    pub(super) fn open(pin: i32, count: usize, brightness: f32) -> Result<Self, StripError> {
        let channel = ChannelBuilder::new()
            .pin(pin)
            .count(count as i32)
            .strip_type(StripType::Ws2811Grb)
            .brightness(to_u8(brightness))
            .build();
        let controller = ControllerBuilder::new()
            .freq(FREQ_HZ)
            .dma(DMA_CHANNEL)
            .channel(CHANNEL, channel)
            .build()
            .map_err(|e| StripError::InitFailed(format!("ws281x on GPIO {pin}: {e}")))?;
        Ok(Self {
            controller,
            count,
            brightness,
        })
    }
}

impl LedStrip for Ws281xStrip {
    fn len(&self) -> usize {
        self.count
    }

    fn set_pixel(&mut self, index: usize, color: RGB8) {
        if let Some(led) = self.controller.leds_mut(CHANNEL).get_mut(index) {
            // Driver word layout is 0xWWRRGGBB, little-endian.
            *led = [color.b, color.g, color.r, 0];
        }
    }

    fn brightness(&self) -> f32 {
        self.brightness
    }

    fn set_brightness(&mut self, brightness: f32) {
        self.brightness = brightness;
        self.controller.set_brightness(CHANNEL, to_u8(brightness));
    }

    fn show(&mut self) -> Result<(), StripError> {
        self.controller
            .render()
            .map_err(|e| StripError::WriteFailed(e.to_string()))
    }
}
