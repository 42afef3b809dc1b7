//! BlinkySign — an LED strip that shows whether you are muted.
//!
//! The [`Controller`] owns the state and the strip; the [`http`] and
//! [`mqtt`] surfaces translate requests into controller calls, and the
//! [`button`] module toggles a remote sign through its HTTP API.

pub mod button;
pub mod config;
pub mod controller;
pub mod error;
pub mod http;
pub mod led;
pub mod mqtt;
pub mod reconnect;
pub mod state;

pub use controller::Controller;
pub use error::{BlinkyError, Result};
