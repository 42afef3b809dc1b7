//! MQTT command surface.
//!
//! The device subscribes to `{thing}/status`, `{thing}/toggle` and
//! `{thing}/effect`, publishes its state to `{thing}/state` after every
//! change and a heartbeat to `{thing}/heartbeat`. The session runs on
//! `rumqttc`; with `iot_ca_path` set it connects over TLS (port 8883 by
//! default), adding a client certificate when `iot_cert_path` and
//! `iot_key_path` are given.

pub mod client;

pub use client::{
    HeartbeatSettings, Inbound, MqttOptions, MqttService, Publisher, TlsFiles, Topics, dispatch,
    parse_inbound,
};

use std::fmt;

use rumqttc::{ClientError, ConnectReturnCode, ConnectionError};

use crate::error::BlinkyError;

#[derive(Debug)]
pub enum MqttError {
    /// No broker session is up.
    NotConnected,
    /// The client's request queue rejected the request.
    Client(ClientError),
    /// The network or protocol layer failed.
    Connection(ConnectionError),
    /// The broker answered CONNECT with a non-zero return code.
    Refused(ConnectReturnCode),
    Timeout,
}

fn refused_reason(code: ConnectReturnCode) -> &'static str {
    match code {
        ConnectReturnCode::Success => "accepted",
        ConnectReturnCode::RefusedProtocolVersion => "unacceptable protocol version",
        ConnectReturnCode::BadClientId => "identifier rejected",
        ConnectReturnCode::ServiceUnavailable => "server unavailable",
        ConnectReturnCode::BadUserNamePassword => "bad user name or password",
        ConnectReturnCode::NotAuthorized => "not authorized",
    }
}

impl fmt::Display for MqttError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MqttError::NotConnected => write!(f, "not connected"),
            MqttError::Client(e) => write!(f, "client error: {e}"),
            MqttError::Connection(e) => write!(f, "{e}"),
            MqttError::Refused(code) => write!(f, "connection refused: {}", refused_reason(*code)),
            MqttError::Timeout => write!(f, "timed out"),
        }
    }
}

impl std::error::Error for MqttError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MqttError::Client(e) => Some(e),
            MqttError::Connection(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConnectionError> for MqttError {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::ConnectionRefused(code) => MqttError::Refused(code),
            other => MqttError::Connection(other),
        }
    }
}

impl From<ClientError> for MqttError {
    fn from(e: ClientError) -> Self {
        MqttError::Client(e)
    }
}

impl From<MqttError> for BlinkyError {
    fn from(e: MqttError) -> Self {
        BlinkyError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_code_maps_to_reason() {
        let e: MqttError = ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized).into();
        assert!(matches!(e, MqttError::Refused(ConnectReturnCode::NotAuthorized)));
        assert_eq!(e.to_string(), "connection refused: not authorized");
    }

    #[test]
    fn converts_to_transport_error() {
        let e: BlinkyError = MqttError::NotConnected.into();
        assert_eq!(e.to_string(), "Transport error: not connected");
    }
}
