//! Transport-independent command surface.
//!
//! [`Controller`] owns the device state and the strip driver. HTTP and MQTT
//! both translate their requests into calls on it and serialize its replies.
//!
//! Locking: every mutator takes the render lock first, then the state lock
//! for the mutation and the steady-state render. Effects hold the render
//! lock for their whole run, so concurrent commands queue behind them while
//! [`Controller::status`] (state lock only) keeps answering.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rgb::RGB8;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::error::{BlinkyError, Result};
use crate::led::effects::{self, EffectTiming, Sleeper, ThreadSleeper};
use crate::led::{StripDriver, StripError, color};
use crate::state::{DeviceState, Indicator, Phase, PhaseEvent};

/// Reply message for a `set` body without a usable `muted` field.
pub const SET_BODY_ERROR: &str = "Invalid request. Expected JSON with 'muted' field.";

/// Pulse cycles when a request doesn't name any.
pub const DEFAULT_CYCLES: u32 = 3;

// ── Replies ──

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandReply {
    pub status: &'static str,
    pub message: String,
    pub state: DeviceState,
}

impl CommandReply {
    fn success(message: impl Into<String>, state: DeviceState) -> Self {
        Self {
            status: "success",
            message: message.into(),
            state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectReply {
    pub status: &'static str,
    pub message: String,
}

impl EffectReply {
    fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success",
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReply {
    pub status: &'static str,
    pub message: String,
}

impl ErrorReply {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReply {
    pub status: &'static str,
}

// ── Effect requests ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectKind {
    Rainbow,
    Pulse,
    Chase,
    Wipe,
    Off,
}

impl EffectKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "rainbow" => Some(EffectKind::Rainbow),
            "pulse" => Some(EffectKind::Pulse),
            "chase" => Some(EffectKind::Chase),
            "wipe" => Some(EffectKind::Wipe),
            "off" => Some(EffectKind::Off),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EffectKind::Rainbow => "rainbow",
            EffectKind::Pulse => "pulse",
            EffectKind::Chase => "chase",
            EffectKind::Wipe => "wipe",
            EffectKind::Off => "off",
        }
    }
}

/// A validated effect command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectRequest {
    pub kind: EffectKind,
    /// Requested color name, as sent.
    pub color: Option<String>,
    /// Requested cycle count, always at least 1 when present.
    pub cycles: Option<u32>,
}

impl EffectRequest {
    pub fn new(kind: EffectKind) -> Self {
        Self {
            kind,
            color: None,
            cycles: None,
        }
    }

    /// Parse an HTTP body (`{color?, cycles?}`) for an effect named by the path.
    /// An empty or absent body uses the defaults.
    pub fn from_body(kind: EffectKind, body: Option<&[u8]>) -> Result<Self> {
        let Some(body) = body.filter(|b| !b.trim_ascii().is_empty()) else {
            return Ok(Self::new(kind));
        };
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| BlinkyError::Validation(format!("Invalid JSON body: {e}")))?;
        match value {
            Value::Object(fields) => Self::from_fields(kind, &fields),
            Value::Null => Ok(Self::new(kind)),
            _ => Err(BlinkyError::Validation(
                "Effect body must be a JSON object".into(),
            )),
        }
    }

    /// Parse a message-bus payload (`{"effect": "...", "color": ..., "cycles": ...}`).
    pub fn from_message(payload: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| BlinkyError::Validation(format!("Invalid JSON payload: {e}")))?;
        let Value::Object(fields) = value else {
            return Err(BlinkyError::Validation(
                "Effect payload must be a JSON object".into(),
            ));
        };
        let name = match fields.get("effect") {
            Some(Value::String(s)) => s.as_str(),
            Some(_) => return Err(BlinkyError::Validation("effect must be a string".into())),
            None => return Err(BlinkyError::Validation("Missing 'effect' field".into())),
        };
        let kind = EffectKind::from_name(name)
            .ok_or_else(|| BlinkyError::Validation(format!("Unknown effect: {name}")))?;
        Self::from_fields(kind, &fields)
    }

    fn from_fields(kind: EffectKind, fields: &Map<String, Value>) -> Result<Self> {
        let color = match fields.get("color") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(BlinkyError::Validation("color must be a string".into())),
        };
        let cycles = match fields.get("cycles") {
            None | Some(Value::Null) => None,
            Some(v) => Some(parse_cycles(v)?),
        };
        Ok(Self {
            kind,
            color,
            cycles,
        })
    }

    /// Lowercased color name, or `"blue"` when none was given.
    pub fn color_name(&self) -> String {
        match &self.color {
            Some(c) => c.trim().to_lowercase(),
            None => color::DEFAULT_COLOR.name().to_string(),
        }
    }

    pub fn color(&self) -> RGB8 {
        color::resolve(&self.color_name())
    }

    pub fn cycles(&self) -> u32 {
        self.cycles.unwrap_or(DEFAULT_CYCLES)
    }
}

/// Accepts an integer, a float (truncated) or a numeric string.
fn parse_cycles(v: &Value) -> Result<u32> {
    let n = match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    let n = n.ok_or_else(|| BlinkyError::Validation("cycles must be an integer".into()))?;
    if n < 1 {
        return Err(BlinkyError::Validation("cycles must be at least 1".into()));
    }
    u32::try_from(n).map_err(|_| BlinkyError::Validation(format!("cycles too large: {n}")))
}

/// JSON truthiness: null, false, 0, "", [] and {} are false.
fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Extract the `muted` flag from a set request body.
pub fn parse_set_body(body: Option<&[u8]>) -> Result<bool> {
    let invalid = || BlinkyError::Validation(SET_BODY_ERROR.into());
    let body = body
        .filter(|b| !b.trim_ascii().is_empty())
        .ok_or_else(invalid)?;
    let value: Value = serde_json::from_slice(body).map_err(|_| invalid())?;
    let muted = value
        .as_object()
        .and_then(|o| o.get("muted"))
        .ok_or_else(invalid)?;
    Ok(truthy(muted))
}

// ── Controller ──

/// Delays and effect timing used by a [`Controller`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerOptions {
    pub timing: EffectTiming,
    /// How long the connecting indicator stays up during [`Controller::startup`].
    pub connecting_delay: Duration,
    /// How long the error indicator stays up during [`Controller::fail_startup`].
    pub error_delay: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            timing: EffectTiming::default(),
            connecting_delay: Duration::from_secs(1),
            error_delay: Duration::from_secs(2),
        }
    }
}

impl ControllerOptions {
    /// No delays anywhere.
    pub fn immediate() -> Self {
        Self {
            timing: EffectTiming::instant(),
            connecting_delay: Duration::ZERO,
            error_delay: Duration::ZERO,
        }
    }
}

struct Shared {
    state: DeviceState,
    phase: Phase,
}

impl Shared {
    fn advance(&mut self, event: PhaseEvent) {
        match self.phase.transition(event) {
            Some(next) => {
                if next != self.phase {
                    log::debug!("phase {:?} -> {next:?}", self.phase);
                }
                self.phase = next;
            }
            None => log::warn!("ignoring {event:?} in phase {:?}", self.phase),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn render(driver: &mut StripDriver, indicator: Indicator) {
    match driver.fill_all(indicator.color()) {
        Ok(()) => log::info!("LEDs set to {} state", indicator.label()),
        Err(e) => log::warn!("could not show {} state: {e}", indicator.label()),
    }
}

/// Owns the device state and the strips. Shared across transports behind an `Arc`.
pub struct Controller {
    shared: Mutex<Shared>,
    render: Mutex<StripDriver>,
    sleeper: Box<dyn Sleeper>,
    options: ControllerOptions,
    updates: broadcast::Sender<DeviceState>,
}

impl Controller {
    pub fn new(driver: StripDriver, options: ControllerOptions) -> Self {
        Self::with_sleeper(driver, options, Box::new(ThreadSleeper))
    }

    pub fn with_sleeper(
        driver: StripDriver,
        options: ControllerOptions,
        sleeper: Box<dyn Sleeper>,
    ) -> Self {
        let (updates, _) = broadcast::channel(16);
        Self {
            shared: Mutex::new(Shared {
                state: DeviceState::default(),
                phase: Phase::Disconnected,
            }),
            render: Mutex::new(driver),
            sleeper,
            options,
            updates,
        }
    }

    /// Snapshot of the current state. Never waits on a running effect.
    pub fn status(&self) -> DeviceState {
        lock(&self.shared).state
    }

    pub fn phase(&self) -> Phase {
        lock(&self.shared).phase
    }

    pub fn health(&self) -> HealthReply {
        HealthReply { status: "healthy" }
    }

    /// Receives the state after every mute change, off command and effect.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceState> {
        self.updates.subscribe()
    }

    pub fn active_strips(&self) -> usize {
        lock(&self.render).active_strips()
    }

    fn publish(&self, state: DeviceState) {
        // No receivers is fine.
        let _ = self.updates.send(state);
    }

    // ── Lifecycle ──

    /// Show the connecting indicator.
    pub fn begin_connecting(&self) {
        let mut driver = lock(&self.render);
        lock(&self.shared).advance(PhaseEvent::Connect);
        log::info!("connecting");
        render(&mut driver, Indicator::Connecting);
    }

    /// Leave the connecting indicator and show the steady state.
    pub fn finish_connecting(&self) -> DeviceState {
        let mut driver = lock(&self.render);
        let state = {
            let mut shared = lock(&self.shared);
            let muted = shared.state.muted;
            shared.state.show(muted);
            shared.advance(PhaseEvent::Ready { muted });
            render(&mut driver, shared.state.indicator());
            shared.state
        };
        drop(driver);
        self.publish(state);
        state
    }

    /// Connecting indicator for the configured delay, then the steady state.
    pub fn startup(&self) -> DeviceState {
        self.begin_connecting();
        self.sleeper.sleep(self.options.connecting_delay);
        self.finish_connecting()
    }

    /// Error indicator for the configured delay, then everything off.
    pub fn fail_startup(&self) {
        let mut driver = lock(&self.render);
        lock(&self.shared).advance(PhaseEvent::Fail);
        render(&mut driver, Indicator::Error);
        self.sleeper.sleep(self.options.error_delay);
        let state = {
            let mut shared = lock(&self.shared);
            shared.state.turn_off();
            shared.advance(PhaseEvent::Recover);
            render(&mut driver, Indicator::Off);
            shared.state
        };
        drop(driver);
        self.publish(state);
    }

    // ── Commands ──

    fn update(&self, next_muted: impl FnOnce(&DeviceState) -> bool) -> DeviceState {
        let mut driver = lock(&self.render);
        let state = {
            let mut shared = lock(&self.shared);
            let muted = next_muted(&shared.state);
            shared.state.show(muted);
            shared.advance(PhaseEvent::Set { muted });
            render(&mut driver, shared.state.indicator());
            shared.state
        };
        drop(driver);
        self.publish(state);
        state
    }

    pub fn toggle(&self) -> CommandReply {
        let state = self.update(|s| !s.muted);
        CommandReply::success(format!("Mute toggled to {}", state.label()), state)
    }

    pub fn set_muted(&self, muted: bool) -> CommandReply {
        let state = self.update(|_| muted);
        CommandReply::success(format!("Status set to {}", state.label()), state)
    }

    /// Set the mute flag from a JSON body with a `muted` field.
    ///
    /// A missing body, invalid JSON or a missing key leaves the state untouched.
    pub fn set(&self, body: Option<&[u8]>) -> Result<CommandReply> {
        let muted = parse_set_body(body)?;
        Ok(self.set_muted(muted))
    }

    pub fn off(&self) -> CommandReply {
        let mut driver = lock(&self.render);
        let state = {
            let mut shared = lock(&self.shared);
            shared.state.turn_off();
            shared.advance(PhaseEvent::TurnOff);
            render(&mut driver, Indicator::Off);
            shared.state
        };
        drop(driver);
        self.publish(state);
        CommandReply::success("LEDs turned off", state)
    }

    /// Run an effect to completion, then restore the steady-state color.
    ///
    /// `off` is handled like [`Controller::off`] and does not restore.
    pub fn run_effect(&self, request: &EffectRequest) -> Result<EffectReply> {
        let color = request.color();
        let name = request.color_name();
        match request.kind {
            EffectKind::Off => Ok(EffectReply::success(self.off().message)),
            EffectKind::Rainbow => self.animate(EffectKind::Rainbow, |d, t, s| {
                effects::rainbow_cycle(d, t.rainbow_wait, s)
                    .map(|_| "Rainbow effect completed".to_string())
            }),
            EffectKind::Pulse => {
                let cycles = request.cycles();
                self.animate(EffectKind::Pulse, move |d, t, s| {
                    effects::pulse(d, color, cycles, t, s)
                        .map(|_| format!("Pulse effect completed with color {name}"))
                })
            }
            EffectKind::Chase => self.animate(EffectKind::Chase, move |d, t, s| {
                effects::theater_chase(d, color, t.chase_wait, t.chase_iterations, s)
                    .map(|_| format!("Chase effect completed with color {name}"))
            }),
            EffectKind::Wipe => self.animate(EffectKind::Wipe, move |d, t, s| {
                effects::color_wipe(d, color, t.wipe_wait, s)
                    .map(|_| format!("Wipe effect completed with color {name}"))
            }),
        }
    }

    fn animate(
        &self,
        kind: EffectKind,
        effect: impl FnOnce(
            &mut StripDriver,
            &EffectTiming,
            &dyn Sleeper,
        ) -> std::result::Result<String, StripError>,
    ) -> Result<EffectReply> {
        let mut driver = lock(&self.render);
        lock(&self.shared).advance(PhaseEvent::EffectStart);
        log::info!("running {} effect", kind.name());

        let result = effect(&mut driver, &self.options.timing, self.sleeper.as_ref());

        // Restore the steady state even if the effect failed part way.
        let state = {
            let mut shared = lock(&self.shared);
            let muted = shared.state.muted;
            shared.state.show(muted);
            shared.advance(PhaseEvent::EffectEnd { muted });
            render(&mut driver, shared.state.indicator());
            shared.state
        };
        drop(driver);
        self.publish(state);

        match result {
            Ok(message) => {
                log::info!("{message}");
                Ok(EffectReply::success(message))
            }
            Err(e) => {
                log::error!("error in {} effect: {e}", kind.name());
                Err(e.into())
            }
        }
    }
}
