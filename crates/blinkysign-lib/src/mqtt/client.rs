//! Broker session, command dispatch and heartbeat.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rumqttc::{
    AsyncClient, Event, EventLoop, Packet, QoS, SubscribeFilter, TlsConfiguration, Transport,
};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use super::MqttError;
use crate::config::Config;
use crate::controller::{Controller, EffectRequest, parse_set_body};
use crate::error::{BlinkyError, Result};
use crate::reconnect::{ReconnectConfig, ReconnectState};
use crate::state::DeviceState;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_CAPACITY: usize = 32;
const COMMAND_QUEUE: usize = 32;

/// PEM files for a TLS broker connection.
#[derive(Debug, Clone, PartialEq)]
pub struct TlsFiles {
    pub ca: PathBuf,
    /// Client certificate and private key.
    pub client_auth: Option<(PathBuf, PathBuf)>,
}

impl TlsFiles {
    pub fn load(&self) -> Result<TlsConfiguration> {
        let read = |path: &PathBuf| {
            std::fs::read(path).map_err(|e| {
                BlinkyError::Config(format!("cannot read {}: {e}", path.display()))
            })
        };
        let client_auth = match &self.client_auth {
            Some((cert, key)) => Some((read(cert)?, read(key)?)),
            None => None,
        };
        Ok(TlsConfiguration::Simple {
            ca: read(&self.ca)?,
            alpn: None,
            client_auth,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MqttOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: Option<TlsFiles>,
    pub connect_timeout: Duration,
}

impl MqttOptions {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(60),
            username: None,
            password: None,
            tls: None,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Broker settings from the `iot_*` config keys.
    pub fn from_config(config: &Config) -> Result<Self> {
        let host = config
            .iot_endpoint
            .trim()
            .trim_start_matches("mqtts://")
            .trim_start_matches("mqtt://")
            .trim_start_matches("tcp://")
            .trim_end_matches('/');
        if host.is_empty() {
            return Err(BlinkyError::Config(
                "iot_endpoint is not set (IOT_ENDPOINT)".into(),
            ));
        }
        let mut options = Self::new(host, config.mqtt_port(), config.iot_thing_name.clone());
        options.username = Some(config.iot_username.clone()).filter(|s| !s.is_empty());
        options.password = Some(config.iot_password.clone()).filter(|s| !s.is_empty());
        if !config.iot_ca_path.is_empty() {
            let client_auth = (!config.iot_cert_path.is_empty() && !config.iot_key_path.is_empty())
                .then(|| {
                    (
                        PathBuf::from(&config.iot_cert_path),
                        PathBuf::from(&config.iot_key_path),
                    )
                });
            options.tls = Some(TlsFiles {
                ca: PathBuf::from(&config.iot_ca_path),
                client_auth,
            });
        }
        Ok(options)
    }

    /// Options for the `rumqttc` client, reading the TLS files if any.
    pub fn client_options(&self) -> Result<rumqttc::MqttOptions> {
        let mut options =
            rumqttc::MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        if let Some(username) = &self.username {
            options.set_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }
        if let Some(tls) = &self.tls {
            options.set_transport(Transport::Tls(tls.load()?));
        }
        Ok(options)
    }
}

/// Topic names for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub status: String,
    pub toggle: String,
    pub effect: String,
    pub state: String,
    pub heartbeat: String,
}

impl Topics {
    pub fn new(thing: &str) -> Self {
        Self {
            status: format!("{thing}/status"),
            toggle: format!("{thing}/toggle"),
            effect: format!("{thing}/effect"),
            state: format!("{thing}/state"),
            heartbeat: format!("{thing}/heartbeat"),
        }
    }

    /// Topics the device listens on.
    pub fn subscriptions(&self) -> [&str; 3] {
        [&self.status, &self.toggle, &self.effect]
    }
}

/// A command received from the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Set { muted: bool },
    Toggle,
    Effect(EffectRequest),
}

/// Map a publish to a command. `Ok(None)` for topics the device ignores.
pub fn parse_inbound(topics: &Topics, topic: &str, payload: &[u8]) -> Result<Option<Inbound>> {
    if topic == topics.status {
        let muted = parse_set_body(Some(payload))?;
        Ok(Some(Inbound::Set { muted }))
    } else if topic == topics.toggle {
        Ok(Some(Inbound::Toggle))
    } else if topic == topics.effect {
        Ok(Some(Inbound::Effect(EffectRequest::from_message(payload)?)))
    } else {
        Ok(None)
    }
}

/// Apply a command. Blocks for the length of an effect.
pub fn dispatch(controller: &Controller, inbound: &Inbound) -> Result<String> {
    let message = match inbound {
        Inbound::Set { muted } => controller.set_muted(*muted).message,
        Inbound::Toggle => controller.toggle().message,
        Inbound::Effect(request) => controller.run_effect(request)?.message,
    };
    Ok(message)
}

pub fn state_payload(state: &DeviceState) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(state)?)
}

pub fn heartbeat_payload(state: &DeviceState, at: SystemTime) -> Result<Vec<u8>> {
    let timestamp = at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    Ok(serde_json::to_vec(&json!({
        "timestamp": timestamp,
        "state": state,
    }))?)
}

/// Handle for QoS 0 publishes through whichever session is currently up.
#[derive(Clone)]
pub struct Publisher {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl Publisher {
    /// Queue a publish. Fails with [`MqttError::NotConnected`] while the broker is away.
    pub fn publish(&self, topic: &str, payload: Vec<u8>) -> std::result::Result<(), MqttError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(MqttError::NotConnected);
        }
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)?;
        Ok(())
    }
}

/// Queue a command for the worker without waiting. A full queue drops it.
fn enqueue(commands: &mpsc::Sender<Inbound>, inbound: Inbound) -> bool {
    match commands.try_send(inbound) {
        Ok(()) => true,
        Err(TrySendError::Full(dropped)) => {
            log::warn!("mqtt: command queue full, dropping {dropped:?}");
            false
        }
        Err(TrySendError::Closed(_)) => {
            log::warn!("mqtt: command worker gone, dropping message");
            false
        }
    }
}

/// Apply broker commands one at a time, in arrival order.
async fn command_worker(controller: Arc<Controller>, mut commands: mpsc::Receiver<Inbound>) {
    while let Some(inbound) = commands.recv().await {
        let controller = Arc::clone(&controller);
        match tokio::task::spawn_blocking(move || dispatch(&controller, &inbound)).await {
            Ok(Ok(message)) => log::info!("mqtt: {message}"),
            Ok(Err(e)) => log::warn!("mqtt: command failed: {e}"),
            Err(e) => log::error!("mqtt: command task failed: {e}"),
        }
    }
}

/// Publish a heartbeat every `interval`, retrying after `retry` on failure.
pub async fn heartbeat(
    controller: Arc<Controller>,
    publisher: Publisher,
    topic: String,
    interval: Duration,
    retry: Duration,
) {
    loop {
        let sent = match heartbeat_payload(&controller.status(), SystemTime::now()) {
            Ok(payload) => publisher.publish(&topic, payload).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match sent {
            Ok(()) => {
                log::debug!("mqtt: heartbeat sent");
                tokio::time::sleep(interval).await;
            }
            Err(e) => {
                log::warn!("Error sending heartbeat: {e}");
                tokio::time::sleep(retry).await;
            }
        }
    }
}

/// Publish every state change while a session is up.
async fn state_updates(
    controller: Arc<Controller>,
    publisher: Publisher,
    mut updates: broadcast::Receiver<DeviceState>,
    topic: String,
) {
    loop {
        let state = match updates.recv().await {
            Ok(state) => state,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::debug!("mqtt: skipped {n} state updates");
                controller.status()
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        match state_payload(&state) {
            Ok(payload) => match publisher.publish(&topic, payload) {
                Ok(()) => log::debug!("mqtt: published state to {topic}"),
                Err(MqttError::NotConnected) => log::debug!("mqtt: offline, state not published"),
                Err(e) => log::warn!("mqtt: state publish failed: {e}"),
            },
            Err(e) => log::warn!("mqtt: {e}"),
        }
    }
}

/// Heartbeat schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartbeatSettings {
    pub interval: Duration,
    pub retry: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            retry: Duration::from_secs(5),
        }
    }
}

/// Background tasks of a running service, aborted together.
struct Tasks(Vec<JoinHandle<()>>);

impl Drop for Tasks {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

async fn wait_for_connack(events: &mut EventLoop) -> std::result::Result<(), MqttError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = events.poll().await? {
            return Ok(());
        }
    }
}

/// The device's MQTT side: connects, serves commands, publishes state and
/// heartbeats, and reconnects with backoff when the broker goes away.
pub struct MqttService {
    controller: Arc<Controller>,
    options: MqttOptions,
    topics: Topics,
    heartbeat: HeartbeatSettings,
    reconnect: ReconnectConfig,
}

impl MqttService {
    pub fn new(controller: Arc<Controller>, options: MqttOptions, topics: Topics) -> Self {
        Self {
            controller,
            options,
            topics,
            heartbeat: HeartbeatSettings::default(),
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn from_config(controller: Arc<Controller>, config: &Config) -> Result<Self> {
        let options = MqttOptions::from_config(config)?;
        let topics = Topics::new(&config.iot_thing_name);
        Ok(Self::new(controller, options, topics)
            .with_heartbeat(HeartbeatSettings {
                interval: config.heartbeat_interval(),
                retry: config.heartbeat_retry(),
            }))
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatSettings) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Subscribe to the command topics and publish the current state.
    fn on_connected(&self, client: &AsyncClient) {
        let filters = self
            .topics
            .subscriptions()
            .map(|t| SubscribeFilter::new(t.to_string(), QoS::AtLeastOnce));
        if let Err(e) = client.try_subscribe_many(filters) {
            log::warn!("mqtt: subscribe failed: {e}");
        }
        match state_payload(&self.controller.status()) {
            Ok(payload) => {
                if let Err(e) =
                    client.try_publish(self.topics.state.as_str(), QoS::AtMostOnce, false, payload)
                {
                    log::warn!("mqtt: state publish failed: {e}");
                }
            }
            Err(e) => log::warn!("mqtt: {e}"),
        }
    }

    /// Run until the process stops.
    ///
    /// A failed first connect shows the error indicator, turns the strip
    /// off and returns the error. Later drops are retried forever.
    pub async fn run(self) -> Result<()> {
        let controller = Arc::clone(&self.controller);
        blocking(&controller, |c| c.begin_connecting()).await;

        log::info!(
            "mqtt: connecting to {}:{} as {}{}",
            self.options.host,
            self.options.port,
            self.options.client_id,
            if self.options.tls.is_some() { " (TLS)" } else { "" }
        );
        let connect_failed = |e: String| {
            BlinkyError::Transport(format!(
                "MQTT connect to {}:{} failed: {e}",
                self.options.host, self.options.port
            ))
        };
        let client_options = match self.options.client_options() {
            Ok(options) => options,
            Err(e) => {
                log::error!("mqtt: {e}");
                blocking(&controller, |c| c.fail_startup()).await;
                return Err(connect_failed(e.to_string()));
            }
        };
        let (client, mut events) = AsyncClient::new(client_options, REQUEST_CAPACITY);
        let connected =
            tokio::time::timeout(self.options.connect_timeout, wait_for_connack(&mut events))
                .await
                .unwrap_or(Err(MqttError::Timeout));
        if let Err(e) = connected {
            log::error!("mqtt: connection failed: {e}");
            blocking(&controller, |c| c.fail_startup()).await;
            return Err(connect_failed(e.to_string()));
        }

        let online = Arc::new(AtomicBool::new(true));
        blocking(&controller, |c| {
            c.finish_connecting();
        })
        .await;
        let updates = controller.subscribe();
        self.on_connected(&client);
        log::info!(
            "mqtt: connected, subscribing to {}",
            self.topics.subscriptions().join(", ")
        );

        let publisher = Publisher {
            client: client.clone(),
            connected: Arc::clone(&online),
        };
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let _tasks = Tasks(vec![
            tokio::spawn(command_worker(Arc::clone(&controller), command_rx)),
            tokio::spawn(heartbeat(
                Arc::clone(&controller),
                publisher.clone(),
                self.topics.heartbeat.clone(),
                self.heartbeat.interval,
                self.heartbeat.retry,
            )),
            tokio::spawn(state_updates(
                Arc::clone(&controller),
                publisher,
                updates,
                self.topics.state.clone(),
            )),
        ]);

        let mut backoff = ReconnectState::new(self.reconnect.clone());
        loop {
            match events.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    online.store(true, Ordering::Release);
                    backoff.record_success();
                    log::info!("mqtt: reconnected");
                    self.on_connected(&client);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match parse_inbound(&self.topics, &publish.topic, &publish.payload) {
                        Ok(Some(inbound)) => {
                            log::info!("mqtt: message on {}", publish.topic);
                            enqueue(&commands, inbound);
                        }
                        Ok(None) => log::debug!("mqtt: ignoring message on {}", publish.topic),
                        Err(e) => log::warn!("mqtt: ignoring message on {}: {e}", publish.topic),
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    log::debug!("mqtt: subscribed: {:?}", ack.return_codes);
                }
                Ok(_) => {}
                Err(e) => {
                    online.store(false, Ordering::Release);
                    let e = MqttError::from(e);
                    let delay = backoff.current_delay();
                    if backoff.consecutive_failures() == 0 {
                        log::warn!("mqtt: connection lost: {e}");
                    } else {
                        log::warn!(
                            "mqtt: reconnect attempt {} failed: {e}",
                            backoff.consecutive_failures()
                        );
                    }
                    log::info!("mqtt: reconnecting in {delay:?}");
                    tokio::time::sleep(delay).await;
                    backoff.record_failure();
                }
            }
        }
    }
}

async fn blocking<F>(controller: &Arc<Controller>, f: F)
where
    F: FnOnce(&Controller) + Send + 'static,
{
    let controller = Arc::clone(controller);
    if let Err(e) = tokio::task::spawn_blocking(move || f(&controller)).await {
        log::error!("mqtt: controller task failed: {e}");
    }
}
