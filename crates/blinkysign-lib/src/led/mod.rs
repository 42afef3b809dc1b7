//! LED strip abstraction and the multi-strip driver.
//!
//! A [`LedStrip`] is one addressable strip on one data pin. The
//! [`StripDriver`] fans every write out to all active strips. When the
//! hardware backend can't be initialized the driver holds zero strips and
//! every render call is a successful no-op, so the command surface keeps
//! working on a bench machine.

pub mod color;
pub mod effects;
#[cfg(all(feature = "ws281x", target_os = "linux"))]
mod ws281x;

use std::fmt;

use rgb::RGB8;

pub use color::{NamedColor, format_hex, parse_named, resolve};

/// LED strip errors.
#[derive(Debug, Clone, PartialEq)]
pub enum StripError {
    /// No hardware backend was compiled in.
    Unsupported,
    /// Bus or driver initialization failed.
    InitFailed(String),
    /// A frame could not be pushed to the strip.
    WriteFailed(String),
}

impl fmt::Display for StripError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StripError::Unsupported => {
                write!(f, "LED strip backend not available (built without `ws281x`)")
            }
            StripError::InitFailed(e) => write!(f, "LED strip init failed: {e}"),
            StripError::WriteFailed(e) => write!(f, "LED strip write failed: {e}"),
        }
    }
}

impl std::error::Error for StripError {}

/// One addressable LED strip.
///
/// Pixel writes are buffered; nothing reaches the LEDs until [`show`](LedStrip::show).
pub trait LedStrip: Send {
    /// Number of pixels on the strip.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffer a pixel color. Out-of-range indices are ignored.
    fn set_pixel(&mut self, index: usize, color: RGB8);

    /// Buffer the same color on every pixel.
    fn fill(&mut self, color: RGB8) {
        for i in 0..self.len() {
            self.set_pixel(i, color);
        }
    }

    /// Global brightness scale in `[0.0, 1.0]`.
    fn brightness(&self) -> f32;

    fn set_brightness(&mut self, brightness: f32);

    /// Push the buffered frame to the LEDs.
    fn show(&mut self) -> Result<(), StripError>;
}

/// Fans writes out to every active strip.
pub struct StripDriver {
    strips: Vec<Box<dyn LedStrip>>,
    default_brightness: f32,
}

impl StripDriver {
    /// Wrap the given strips, applying `default_brightness` to each.
    pub fn new(strips: Vec<Box<dyn LedStrip>>, default_brightness: f32) -> Self {
        let default_brightness = default_brightness.clamp(0.0, 1.0);
        let mut driver = Self {
            strips,
            default_brightness,
        };
        driver.set_brightness(default_brightness);
        driver
    }

    /// A driver with no strips. Every render call succeeds without effect.
    pub fn empty(default_brightness: f32) -> Self {
        Self::new(Vec::new(), default_brightness)
    }

    pub fn active_strips(&self) -> usize {
        self.strips.len()
    }

    /// Pixel count of the shortest active strip (0 with no strips).
    pub fn pixel_count(&self) -> usize {
        self.strips.iter().map(|s| s.len()).min().unwrap_or(0)
    }

    pub fn default_brightness(&self) -> f32 {
        self.default_brightness
    }

    /// Set brightness on every strip, clamped to `[0.0, 1.0]`.
    pub fn set_brightness(&mut self, brightness: f32) {
        let brightness = brightness.clamp(0.0, 1.0);
        for strip in &mut self.strips {
            strip.set_brightness(brightness);
        }
    }

    pub fn reset_brightness(&mut self) {
        self.set_brightness(self.default_brightness);
    }

    /// Buffer one pixel on every strip.
    pub fn set_pixel_all(&mut self, index: usize, color: RGB8) {
        for strip in &mut self.strips {
            strip.set_pixel(index, color);
        }
    }

    /// Buffer a color computed per pixel index, using each strip's own length.
    pub fn paint(&mut self, color_at: impl Fn(usize) -> RGB8) {
        for strip in &mut self.strips {
            for i in 0..strip.len() {
                strip.set_pixel(i, color_at(i));
            }
        }
    }

    /// Show the buffered frame on every strip.
    ///
    /// Every strip is attempted; the first failure is returned.
    pub fn show_all(&mut self) -> Result<(), StripError> {
        let mut first_err = None;
        for (i, strip) in self.strips.iter_mut().enumerate() {
            if let Err(e) = strip.show() {
                log::warn!("strip {i}: {e}");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Fill every strip with one color and show it.
    pub fn fill_all(&mut self, color: RGB8) -> Result<(), StripError> {
        for strip in &mut self.strips {
            strip.fill(color);
        }
        self.show_all()
    }

    /// Fill and show a single strip. Invalid indices are logged and ignored.
    pub fn set_strip(&mut self, index: usize, color: RGB8) -> Result<(), StripError> {
        match self.strips.get_mut(index) {
            Some(strip) => {
                strip.fill(color);
                strip.show()
            }
            None => {
                log::error!(
                    "invalid strip index {index} ({} active)",
                    self.strips.len()
                );
                Ok(())
            }
        }
    }
}

impl fmt::Debug for StripDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripDriver")
            .field("active_strips", &self.strips.len())
            .field("pixel_count", &self.pixel_count())
            .field("default_brightness", &self.default_brightness)
            .finish()
    }
}

/// Hardware settings for [`open_strips`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StripSettings {
    /// GPIO pin of the data line.
    pub pin: i32,
    pub count: usize,
    pub brightness: f32,
}

/// Initialize the hardware strips.
///
/// Never fails: if the backend can't be brought up the error is logged and
/// a driver with zero active strips is returned.
pub fn open_strips(settings: &StripSettings) -> StripDriver {
    match open_backend(settings) {
        Ok(strips) => {
            log::info!(
                "initialized {} LED strip(s) with {} pixels on GPIO {}",
                strips.len(),
                settings.count,
                settings.pin
            );
            StripDriver::new(strips, settings.brightness)
        }
        Err(e) => {
            log::error!("{e}; continuing with no active strips");
            StripDriver::empty(settings.brightness)
        }
    }
}

#[cfg(all(feature = "ws281x", target_os = "linux"))]
fn open_backend(settings: &StripSettings) -> Result<Vec<Box<dyn LedStrip>>, StripError> {
    let strip = ws281x::Ws281xStrip::open(settings.pin, settings.count, settings.brightness)?;
    Ok(vec![Box::new(strip)])
}

#[cfg(not(all(feature = "ws281x", target_os = "linux")))]
fn open_backend(_settings: &StripSettings) -> Result<Vec<Box<dyn LedStrip>>, StripError> {
    Err(StripError::Unsupported)
}

/// In-memory strip for unit and integration tests.
///
/// Always compiled (zero runtime cost), hidden from public docs.
#[doc(hidden)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Everything a [`MockStrip`] has been asked to do.
    #[derive(Debug, Clone, Default)]
    pub struct MockLog {
        /// Pixel snapshot taken at every successful `show()`.
        pub frames: Vec<Vec<RGB8>>,
        /// Every brightness value applied, in order.
        pub brightness: Vec<f32>,
    }

    /// A strip that records frames instead of driving LEDs.
    ///
    /// The strip moves into a [`StripDriver`]; tests keep a [`MockHandle`]
    /// to inspect what was shown and to inject failures.
    pub struct MockStrip {
        pixels: Vec<RGB8>,
        brightness: f32,
        log: Arc<Mutex<MockLog>>,
        fail_show: Arc<AtomicBool>,
    }

    impl MockStrip {
        pub fn new(len: usize) -> Self {
            MockStrip {
                pixels: vec![color::OFF; len],
                brightness: 1.0,
                log: Arc::new(Mutex::new(MockLog::default())),
                fail_show: Arc::new(AtomicBool::new(false)),
            }
        }

        pub fn handle(&self) -> MockHandle {
            MockHandle {
                log: Arc::clone(&self.log),
                fail_show: Arc::clone(&self.fail_show),
            }
        }
    }

    impl LedStrip for MockStrip {
        fn len(&self) -> usize {
            self.pixels.len()
        }

        fn set_pixel(&mut self, index: usize, color: RGB8) {
            if let Some(p) = self.pixels.get_mut(index) {
                *p = color;
            }
        }

        fn brightness(&self) -> f32 {
            self.brightness
        }

        fn set_brightness(&mut self, brightness: f32) {
            self.brightness = brightness;
            lock(&self.log).brightness.push(brightness);
        }

        fn show(&mut self) -> Result<(), StripError> {
            if self.fail_show.load(Ordering::SeqCst) {
                return Err(StripError::WriteFailed(
                    "mock: show failure injected".into(),
                ));
            }
            lock(&self.log).frames.push(self.pixels.clone());
            Ok(())
        }
    }

    /// Inspection side of a [`MockStrip`].
    #[derive(Clone)]
    pub struct MockHandle {
        log: Arc<Mutex<MockLog>>,
        fail_show: Arc<AtomicBool>,
    }

    impl MockHandle {
        pub fn log(&self) -> MockLog {
            lock(&self.log).clone()
        }

        pub fn show_count(&self) -> usize {
            lock(&self.log).frames.len()
        }

        pub fn last_frame(&self) -> Option<Vec<RGB8>> {
            lock(&self.log).frames.last().cloned()
        }

        /// The color of every pixel in the last frame, if the frame was uniform.
        pub fn last_fill(&self) -> Option<RGB8> {
            let frame = self.last_frame()?;
            let first = *frame.first()?;
            frame.iter().all(|p| *p == first).then_some(first)
        }

        pub fn brightness_changes(&self) -> Vec<f32> {
            lock(&self.log).brightness.clone()
        }

        pub fn set_fail_show(&self, fail: bool) {
            self.fail_show.store(fail, Ordering::SeqCst);
        }

        pub fn clear(&self) {
            *lock(&self.log) = MockLog::default();
        }
    }

    fn lock(log: &Mutex<MockLog>) -> std::sync::MutexGuard<'_, MockLog> {
        log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A driver over `strips` mock strips of `len` pixels, plus their handles.
    pub fn driver(strips: usize, len: usize, brightness: f32) -> (StripDriver, Vec<MockHandle>) {
        let mocks: Vec<MockStrip> = (0..strips).map(|_| MockStrip::new(len)).collect();
        let handles = mocks.iter().map(MockStrip::handle).collect();
        let boxed = mocks
            .into_iter()
            .map(|m| Box::new(m) as Box<dyn LedStrip>)
            .collect();
        (StripDriver::new(boxed, brightness), handles)
    }
}

#[cfg(test)]
mod tests {
    use super::mock::driver;
    use super::*;

    #[test]
    fn new_applies_default_brightness() {
        let (_driver, handles) = driver(2, 4, 0.5);
        for h in &handles {
            assert_eq!(h.brightness_changes(), vec![0.5]);
        }
    }

    #[test]
    fn default_brightness_is_clamped() {
        let (driver, _) = driver(1, 4, 1.7);
        assert_eq!(driver.default_brightness(), 1.0);
    }

    #[test]
    fn fill_all_shows_on_every_strip() {
        let (mut driver, handles) = driver(2, 3, 0.5);
        driver.fill_all(color::RED).unwrap();
        for h in &handles {
            assert_eq!(h.last_frame(), Some(vec![color::RED; 3]));
        }
    }

    #[test]
    fn set_brightness_clamps() {
        let (mut driver, handles) = driver(1, 3, 0.5);
        driver.set_brightness(-0.3);
        driver.set_brightness(2.0);
        assert_eq!(handles[0].brightness_changes(), vec![0.5, 0.0, 1.0]);
    }

    #[test]
    fn set_strip_invalid_index_is_ignored() {
        let (mut driver, handles) = driver(1, 3, 0.5);
        driver.set_strip(5, color::GREEN).unwrap();
        assert_eq!(handles[0].show_count(), 0);
        driver.set_strip(0, color::GREEN).unwrap();
        assert_eq!(handles[0].last_fill(), Some(color::GREEN));
    }

    #[test]
    fn empty_driver_is_noop() {
        let mut driver = StripDriver::empty(0.5);
        assert_eq!(driver.active_strips(), 0);
        assert_eq!(driver.pixel_count(), 0);
        driver.fill_all(color::RED).unwrap();
        driver.set_pixel_all(3, color::RED);
        driver.show_all().unwrap();
    }

    #[test]
    fn show_all_attempts_every_strip_before_failing() {
        let (mut driver, handles) = driver(2, 2, 0.5);
        handles[0].set_fail_show(true);
        let err = driver.fill_all(color::BLUE).unwrap_err();
        assert!(matches!(err, StripError::WriteFailed(_)));
        assert_eq!(handles[0].show_count(), 0);
        assert_eq!(handles[1].last_fill(), Some(color::BLUE));
    }

    #[test]
    fn pixel_count_is_shortest_strip() {
        let strips: Vec<Box<dyn LedStrip>> = vec![
            Box::new(mock::MockStrip::new(30)),
            Box::new(mock::MockStrip::new(12)),
        ];
        let driver = StripDriver::new(strips, 0.5);
        assert_eq!(driver.pixel_count(), 12);
    }

    #[test]
    fn paint_uses_each_strip_length() {
        let short = mock::MockStrip::new(2);
        let long = mock::MockStrip::new(4);
        let (hs, hl) = (short.handle(), long.handle());
        let mut driver = StripDriver::new(vec![Box::new(short), Box::new(long)], 1.0);
        driver.paint(|i| RGB8::new(i as u8, 0, 0));
        driver.show_all().unwrap();
        assert_eq!(hs.last_frame().unwrap().len(), 2);
        assert_eq!(hl.last_frame().unwrap()[3], RGB8::new(3, 0, 0));
    }

    #[test]
    fn open_without_backend_yields_empty_driver() {
        if cfg!(all(feature = "ws281x", target_os = "linux")) {
            return;
        }
        let driver = open_strips(&StripSettings {
            pin: 10,
            count: 30,
            brightness: 0.5,
        });
        assert_eq!(driver.active_strips(), 0);
        assert_eq!(driver.default_brightness(), 0.5);
    }

    #[test]
    fn strip_error_display() {
        assert_eq!(
            StripError::WriteFailed("spi".into()).to_string(),
            "LED strip write failed: spi"
        );
        assert!(StripError::Unsupported.to_string().contains("ws281x"));
    }
}
