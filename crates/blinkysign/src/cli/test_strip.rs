//! `test-strip` subcommand — cycle colors and effects on the local strip.

use std::sync::atomic::Ordering;
use std::time::Duration;

use blinkysign_lib::controller::DEFAULT_CYCLES;
use blinkysign_lib::led::effects::{self, EffectTiming, ThreadSleeper};
use blinkysign_lib::led::{StripDriver, color};
use blinkysign_lib::state::Indicator;

use super::{BlinkyError, Config, RUNNING, Result, led};

const HOLD: Duration = Duration::from_secs(1);
const ERROR_HOLD: Duration = Duration::from_secs(2);

enum Step {
    Solid(&'static str, rgb::RGB8),
    Rainbow,
    /// Blue pulse with this many cycles.
    Pulse(u32),
}

const STEPS: [Step; 8] = [
    Step::Solid("RED", color::RED),
    Step::Solid("GREEN", color::GREEN),
    Step::Solid("BLUE", color::BLUE),
    Step::Solid("YELLOW", color::YELLOW),
    Step::Solid("MUTED state", color::RED),
    Step::Solid("UNMUTED state", color::GREEN),
    Step::Rainbow,
    Step::Pulse(DEFAULT_CYCLES),
];

pub(super) fn cmd_test_strip(config: &Config) -> Result<()> {
    ctrlc::set_handler(|| RUNNING.store(false, Ordering::SeqCst))
        .map_err(|e| BlinkyError::Config(format!("cannot install Ctrl+C handler: {e}")))?;

    let mut driver = led::open_strips(&config.strip_settings());
    if driver.active_strips() == 0 {
        return Err(BlinkyError::Config(
            "no LED strips available (see the log above)".into(),
        ));
    }
    log::info!("Testing LED strips...");

    let result = run_steps(&mut driver);
    match &result {
        Ok(true) => log::info!("Test complete"),
        Ok(false) => log::info!("Test interrupted"),
        Err(e) => {
            log::error!("Test error: {e}");
            let _ = driver.fill_all(Indicator::Error.color());
            std::thread::sleep(ERROR_HOLD);
        }
    }
    driver.fill_all(color::OFF)?;
    result.map(|_| ())
}

/// Run every step; `Ok(false)` if interrupted.
fn run_steps(driver: &mut StripDriver) -> Result<bool> {
    let timing = EffectTiming::default();
    for step in &STEPS {
        if !RUNNING.load(Ordering::SeqCst) {
            return Ok(false);
        }
        match step {
            Step::Solid(label, rgb) => {
                log::info!("Testing {label}");
                driver.fill_all(*rgb)?;
                std::thread::sleep(HOLD);
            }
            Step::Rainbow => {
                log::info!("Testing rainbow cycle");
                effects::rainbow_cycle(driver, timing.rainbow_wait, &ThreadSleeper)?;
            }
            Step::Pulse(cycles) => {
                log::info!("Testing pulse effect");
                effects::pulse(driver, color::BLUE, *cycles, &timing, &ThreadSleeper)?;
            }
        }
    }
    Ok(RUNNING.load(Ordering::SeqCst))
}
