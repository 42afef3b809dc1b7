//! Integration tests: the MQTT service against an in-process fake broker.
//!
//! The broker speaks just enough MQTT 3.1.1 over a plain socket to drive
//! one client: CONNACK, SUBACK, PUBLISH, PUBACK and PINGRESP.

use std::sync::Arc;
use std::time::Duration;

use blinkysign_lib::controller::ControllerOptions;
use blinkysign_lib::led::mock;
use blinkysign_lib::mqtt::{HeartbeatSettings, MqttOptions, MqttService, Topics};
use blinkysign_lib::reconnect::ReconnectConfig;
use blinkysign_lib::state::Phase;
use blinkysign_lib::{BlinkyError, Controller};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn controller() -> Arc<Controller> {
    let (driver, _) = mock::driver(1, 4, 0.5);
    Arc::new(Controller::new(driver, ControllerOptions::immediate()))
}

fn service(controller: &Arc<Controller>, port: u16) -> MqttService {
    MqttService::new(
        Arc::clone(controller),
        MqttOptions::new("127.0.0.1", port, "sign"),
        Topics::new("sign"),
    )
    .with_heartbeat(HeartbeatSettings {
        interval: Duration::from_secs(3600),
        retry: Duration::from_millis(50),
    })
    .with_reconnect(ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
        multiplier: 2.0,
    })
}

// ── Wire helpers ──

#[derive(Debug)]
enum Frame {
    Connect { client_id: String },
    Subscribe { packet_id: u16, filters: Vec<(String, u8)> },
    Publish { topic: String, qos: u8, payload: Vec<u8> },
    PubAck { packet_id: u16 },
    Other(u8),
}

fn take_u16(body: &[u8], at: &mut usize) -> u16 {
    let v = u16::from_be_bytes([body[*at], body[*at + 1]]);
    *at += 2;
    v
}

fn take_str(body: &[u8], at: &mut usize) -> String {
    let len = take_u16(body, at) as usize;
    let s = String::from_utf8(body[*at..*at + len].to_vec()).unwrap();
    *at += len;
    s
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn frame(header: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![header];
    let mut len = body.len();
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
    out.extend_from_slice(body);
    out
}

struct Broker {
    stream: TcpStream,
}

impl Broker {
    async fn read_frame(&mut self) -> Frame {
        let header = self.stream.read_u8().await.expect("client closed");
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = self.stream.read_u8().await.unwrap();
            len |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await.unwrap();

        let mut at = 0;
        match header >> 4 {
            1 => {
                // Protocol name, level, flags and keep-alive precede the client id.
                take_str(&body, &mut at);
                at += 4;
                Frame::Connect {
                    client_id: take_str(&body, &mut at),
                }
            }
            3 => {
                let qos = (header >> 1) & 0x03;
                let topic = take_str(&body, &mut at);
                if qos > 0 {
                    take_u16(&body, &mut at);
                }
                Frame::Publish {
                    topic,
                    qos,
                    payload: body[at..].to_vec(),
                }
            }
            4 => Frame::PubAck {
                packet_id: take_u16(&body, &mut at),
            },
            8 => {
                let packet_id = take_u16(&body, &mut at);
                let mut filters = Vec::new();
                while at < body.len() {
                    let topic = take_str(&body, &mut at);
                    filters.push((topic, body[at]));
                    at += 1;
                }
                Frame::Subscribe { packet_id, filters }
            }
            kind => Frame::Other(kind),
        }
    }

    /// Next frame, answering keep-alive pings along the way.
    async fn next(&mut self) -> Frame {
        loop {
            let next = timeout(WAIT, self.read_frame()).await.expect("broker timed out");
            if let Frame::Other(12) = next {
                self.write(&frame(0xd0, &[])).await;
                continue;
            }
            return next;
        }
    }

    async fn write(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    async fn connack(&mut self, code: u8) {
        self.write(&frame(0x20, &[0, code])).await;
    }

    async fn send(&mut self, topic: &str, payload: &[u8], packet_id: Option<u16>) {
        let mut body = Vec::new();
        put_str(&mut body, topic);
        let header = match packet_id {
            Some(id) => {
                body.extend_from_slice(&id.to_be_bytes());
                0x32
            }
            None => 0x30,
        };
        body.extend_from_slice(payload);
        self.write(&frame(header, &body)).await;
    }

    /// Next publish on `topic`, skipping everything else.
    async fn publish_on(&mut self, topic: &str) -> Value {
        loop {
            if let Frame::Publish { topic: t, qos, payload } = self.next().await
                && t == topic
            {
                assert_eq!(qos, 0);
                return serde_json::from_slice(&payload).unwrap();
            }
        }
    }
}

/// Accept one client and complete CONNECT/SUBSCRIBE.
async fn accept(listener: &TcpListener) -> Broker {
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut broker = Broker { stream };

    let Frame::Connect { client_id } = broker.next().await else {
        panic!("expected CONNECT");
    };
    assert_eq!(client_id, "sign");
    broker.connack(0).await;

    // Publishes queued before the reconnect may arrive ahead of SUBSCRIBE.
    let (packet_id, filters) = loop {
        match broker.next().await {
            Frame::Subscribe { packet_id, filters } => break (packet_id, filters),
            Frame::Publish { .. } => {}
            other => panic!("expected SUBSCRIBE, got {other:?}"),
        }
    };
    let topics: Vec<&str> = filters.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(topics, ["sign/status", "sign/toggle", "sign/effect"]);
    assert!(filters.iter().all(|(_, qos)| *qos == 1));

    let mut suback = packet_id.to_be_bytes().to_vec();
    suback.extend_from_slice(&[1, 1, 1]);
    broker.write(&frame(0x90, &suback)).await;
    broker
}

#[tokio::test]
async fn session_publishes_state_and_applies_commands() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let c = controller();
    tokio::spawn(service(&c, port).run());

    let mut broker = accept(&listener).await;
    assert_eq!(
        broker.publish_on("sign/state").await,
        json!({"muted": false, "led_on": true})
    );
    assert_eq!(c.phase(), Phase::Unmuted);

    // QoS 1 toggle is acknowledged and applied.
    broker.send("sign/toggle", b"", Some(7)).await;
    loop {
        match broker.next().await {
            Frame::PubAck { packet_id } => {
                assert_eq!(packet_id, 7);
                break;
            }
            Frame::Publish { .. } => {}
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(
        broker.publish_on("sign/state").await,
        json!({"muted": true, "led_on": true})
    );

    broker.send("sign/status", br#"{"muted": false}"#, None).await;
    assert_eq!(
        broker.publish_on("sign/state").await,
        json!({"muted": false, "led_on": true})
    );

    // Malformed messages are dropped; the session keeps going.
    broker.send("sign/status", b"{}", None).await;
    broker.send("sign/effect", br#"{"effect": "strobe"}"#, None).await;
    broker.send("sign/effect", br#"{"effect": "off"}"#, None).await;
    assert_eq!(
        broker.publish_on("sign/state").await,
        json!({"muted": false, "led_on": false})
    );
}

#[tokio::test]
async fn heartbeat_carries_timestamp_and_state() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let c = controller();
    tokio::spawn(service(&c, port).run());

    let mut broker = accept(&listener).await;
    let beat = broker.publish_on("sign/heartbeat").await;
    assert!(beat["timestamp"].as_f64().unwrap() > 1.0e9);
    assert_eq!(beat["state"], json!({"muted": false, "led_on": true}));
}

#[tokio::test]
async fn reconnects_after_broker_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let c = controller();
    tokio::spawn(service(&c, port).run());

    let mut broker = accept(&listener).await;
    broker.publish_on("sign/state").await;
    drop(broker);

    // A command applied while disconnected shows up after reconnect.
    c.set_muted(true);
    let mut broker = accept(&listener).await;
    assert_eq!(
        broker.publish_on("sign/state").await,
        json!({"muted": true, "led_on": true})
    );
}

#[tokio::test]
async fn unreachable_broker_fails_startup() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let c = controller();
    let err = timeout(WAIT, service(&c, port).run())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, BlinkyError::Transport(_)));
    assert_eq!(c.phase(), Phase::Off);
    assert!(!c.status().led_on);
}

#[tokio::test]
async fn refused_connect_fails_startup() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let c = controller();
    let run = tokio::spawn(service(&c, port).run());

    let (stream, _) = listener.accept().await.unwrap();
    let mut broker = Broker { stream };
    assert!(matches!(broker.next().await, Frame::Connect { .. }));
    // 5 = not authorized
    broker.connack(5).await;

    let err = timeout(WAIT, run).await.unwrap().unwrap().unwrap_err();
    assert!(err.to_string().contains("not authorized"), "{err}");
    assert_eq!(c.phase(), Phase::Off);
}
