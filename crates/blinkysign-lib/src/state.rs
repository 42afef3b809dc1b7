//! Device state, indicator colors, and the lifecycle phase machine.

use rgb::RGB8;
use serde::{Deserialize, Serialize};

use crate::led::color;

/// The sign's authoritative state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceState {
    pub muted: bool,
    /// Whether the strip is currently showing the steady-state color.
    pub led_on: bool,
}

impl DeviceState {
    /// Set the mute flag; the steady-state color will be shown.
    pub fn show(&mut self, muted: bool) {
        self.muted = muted;
        self.led_on = true;
    }

    pub fn turn_off(&mut self) {
        self.led_on = false;
    }

    /// The steady-state indicator for the current mute flag.
    pub fn indicator(&self) -> Indicator {
        if self.muted {
            Indicator::Muted
        } else {
            Indicator::Unmuted
        }
    }

    /// `"muted"` or `"unmuted"`.
    pub fn label(&self) -> &'static str {
        if self.muted { "muted" } else { "unmuted" }
    }
}

/// Solid colors the sign shows outside of effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    Muted,
    Unmuted,
    Connecting,
    Error,
    Off,
}

impl Indicator {
    pub fn color(self) -> RGB8 {
        match self {
            Indicator::Muted => color::RED,
            Indicator::Unmuted => color::GREEN,
            Indicator::Connecting => color::BLUE,
            Indicator::Error => color::YELLOW,
            Indicator::Off => color::OFF,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Indicator::Muted => "MUTED",
            Indicator::Unmuted => "UNMUTED",
            Indicator::Connecting => "CONNECTING",
            Indicator::Error => "ERROR",
            Indicator::Off => "OFF",
        }
    }
}

/// Lifecycle phase of the sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Disconnected,
    Connecting,
    Muted,
    Unmuted,
    EffectRunning,
    Error,
    Off,
}

/// Something that moves the sign between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// Startup began.
    Connect,
    /// Startup finished; show the current mute state.
    Ready { muted: bool },
    /// Startup failed.
    Fail,
    /// The error indicator has been shown long enough.
    Recover,
    /// A toggle or set command.
    Set { muted: bool },
    EffectStart,
    EffectEnd { muted: bool },
    TurnOff,
}

impl Phase {
    fn steady(muted: bool) -> Phase {
        if muted { Phase::Muted } else { Phase::Unmuted }
    }

    /// The phase after `event`, or `None` if the transition is not allowed.
    pub fn transition(self, event: PhaseEvent) -> Option<Phase> {
        use Phase::*;
        match (self, event) {
            (Disconnected, PhaseEvent::Connect) => Some(Connecting),
            (Connecting, PhaseEvent::Ready { muted }) => Some(Phase::steady(muted)),
            (Disconnected | Connecting, PhaseEvent::Fail) => Some(Error),
            (Error, PhaseEvent::Recover | PhaseEvent::TurnOff) => Some(Off),
            (Muted | Unmuted | Off, PhaseEvent::Set { muted }) => Some(Phase::steady(muted)),
            (Muted | Unmuted | Off, PhaseEvent::EffectStart) => Some(EffectRunning),
            (EffectRunning, PhaseEvent::EffectEnd { muted }) => Some(Phase::steady(muted)),
            (Muted | Unmuted | Off, PhaseEvent::TurnOff) => Some(Off),
            _ => None,
        }
    }
}
