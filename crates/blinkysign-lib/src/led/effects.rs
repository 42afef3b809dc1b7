//! Blocking animations rendered through a [`StripDriver`].
//!
//! Every effect runs to completion on the calling thread. Waits go through a
//! [`Sleeper`] so tests can run animations without real delays.

use std::time::Duration;

use rgb::RGB8;

use super::{StripDriver, StripError, color};

/// Number of frames in one rainbow cycle.
pub const RAINBOW_FRAMES: usize = 255;

/// Blocks the current thread between animation frames.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Frame timing for every effect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectTiming {
    pub rainbow_wait: Duration,
    pub chase_wait: Duration,
    pub chase_iterations: usize,
    pub wipe_wait: Duration,
    /// Length of one fade-in plus fade-out.
    pub pulse_duration: Duration,
    /// Brightness steps per fade direction.
    pub pulse_steps: u32,
}

impl Default for EffectTiming {
    fn default() -> Self {
        Self {
            rainbow_wait: Duration::from_millis(10),
            chase_wait: Duration::from_millis(50),
            chase_iterations: 10,
            wipe_wait: Duration::from_millis(50),
            pulse_duration: Duration::from_secs(1),
            pulse_steps: 50,
        }
    }
}

impl EffectTiming {
    /// Default frame counts with every wait set to zero.
    pub fn instant() -> Self {
        Self {
            rainbow_wait: Duration::ZERO,
            chase_wait: Duration::ZERO,
            wipe_wait: Duration::ZERO,
            pulse_duration: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Map a position on the color wheel to a fully saturated color.
///
/// `0` is red, `85` green, `170` blue, blending linearly between them.
pub fn wheel(pos: u8) -> RGB8 {
    match pos {
        0..=84 => RGB8::new(pos * 3, 255 - pos * 3, 0),
        85..=169 => {
            let p = pos - 85;
            RGB8::new(255 - p * 3, 0, p * 3)
        }
        _ => {
            let p = pos - 170;
            RGB8::new(0, p * 3, 255 - p * 3)
        }
    }
}

/// Scroll the color wheel across the strip. Returns the number of frames shown.
pub fn rainbow_cycle(
    driver: &mut StripDriver,
    wait: Duration,
    sleeper: &dyn Sleeper,
) -> Result<usize, StripError> {
    for j in 0..RAINBOW_FRAMES {
        driver.paint(|i| wheel(((i + j) & 0xFF) as u8));
        driver.show_all()?;
        sleeper.sleep(wait);
    }
    Ok(RAINBOW_FRAMES)
}

/// Theater-marquee chase: every third pixel lit, stepping along.
/// Returns the number of frames shown.
pub fn theater_chase(
    driver: &mut StripDriver,
    color: RGB8,
    wait: Duration,
    iterations: usize,
    sleeper: &dyn Sleeper,
) -> Result<usize, StripError> {
    let n = driver.pixel_count();
    let mut frames = 0;
    for _ in 0..iterations {
        for q in 0..3 {
            for i in (q..n).step_by(3) {
                driver.set_pixel_all(i, color);
            }
            driver.show_all()?;
            frames += 1;
            sleeper.sleep(wait);
            for i in (q..n).step_by(3) {
                driver.set_pixel_all(i, color::OFF);
            }
        }
    }
    Ok(frames)
}

/// Light pixels one at a time until the strip is filled.
/// Returns the number of frames shown.
pub fn color_wipe(
    driver: &mut StripDriver,
    color: RGB8,
    wait: Duration,
    sleeper: &dyn Sleeper,
) -> Result<usize, StripError> {
    let n = driver.pixel_count();
    for i in 0..n {
        driver.set_pixel_all(i, color);
        driver.show_all()?;
        sleeper.sleep(wait);
    }
    Ok(n)
}

/// Fade a solid color in and out `cycles` times.
///
/// Each cycle ramps brightness up through `i / steps` for `i` in `0..steps`,
/// then down for `i` in `steps..=1`. Brightness is restored to the driver
/// default afterwards, even if a frame fails. Returns the number of
/// brightness steps shown.
pub fn pulse(
    driver: &mut StripDriver,
    color: RGB8,
    cycles: u32,
    timing: &EffectTiming,
    sleeper: &dyn Sleeper,
) -> Result<usize, StripError> {
    let result = pulse_frames(driver, color, cycles, timing, sleeper);
    driver.reset_brightness();
    result
}

fn pulse_frames(
    driver: &mut StripDriver,
    color: RGB8,
    cycles: u32,
    timing: &EffectTiming,
    sleeper: &dyn Sleeper,
) -> Result<usize, StripError> {
    let steps = timing.pulse_steps.max(1);
    let step_wait = timing.pulse_duration / (2 * steps);
    let mut shown = 0;
    let ramp_up = 0..steps;
    let ramp_down = (1..=steps).rev();
    for _ in 0..cycles {
        for i in ramp_up.clone().chain(ramp_down.clone()) {
            driver.set_brightness(i as f32 / steps as f32);
            driver.fill_all(color)?;
            shown += 1;
            sleeper.sleep(step_wait);
        }
    }
    Ok(shown)
}
