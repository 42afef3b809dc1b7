//! Integration tests: the HTTP API over a real loopback socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use blinkysign_lib::Controller;
use blinkysign_lib::controller::ControllerOptions;
use blinkysign_lib::http::{ApiClient, HttpServer, Method};
use blinkysign_lib::led::{color, mock};
use blinkysign_lib::state::DeviceState;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

struct Sign {
    addr: SocketAddr,
    controller: Arc<Controller>,
    strip: mock::MockHandle,
}

async fn spawn_sign(api_key: Option<&str>) -> Sign {
    spawn_sign_with(HttpServer::new, api_key).await
}

async fn spawn_sign_with(
    build: impl FnOnce(Arc<Controller>, Option<&str>) -> HttpServer,
    api_key: Option<&str>,
) -> Sign {
    let (driver, mut handles) = mock::driver(1, 8, 0.5);
    let controller = Arc::new(Controller::new(driver, ControllerOptions::immediate()));
    controller.startup();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = build(Arc::clone(&controller), api_key);
    tokio::spawn(server.serve(listener));
    Sign {
        addr,
        controller,
        strip: handles.remove(0),
    }
}

impl Sign {
    fn client(&self, api_key: Option<&str>) -> ApiClient {
        ApiClient::new(&format!("http://{}", self.addr), api_key).unwrap()
    }
}

/// Send raw bytes and return the status code and full response text.
async fn raw(addr: SocketAddr, request: &[u8]) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    let text = String::from_utf8_lossy(&out).into_owned();
    let status = text
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    (status, text)
}

// ── Commands ──

#[tokio::test]
async fn status_reports_initial_state() {
    let sign = spawn_sign(None).await;
    let state = sign.client(None).status().await.unwrap();
    assert_eq!(state, DeviceState { muted: false, led_on: true });
}

#[tokio::test]
async fn toggle_flips_and_reports() {
    let sign = spawn_sign(None).await;
    let reply = sign.client(None).toggle().await.unwrap();
    assert_eq!(
        reply,
        json!({
            "status": "success",
            "message": "Mute toggled to muted",
            "state": {"muted": true, "led_on": true}
        })
    );
    assert_eq!(sign.strip.last_fill(), Some(color::RED));
}

#[tokio::test]
async fn set_muted_true() {
    let sign = spawn_sign(None).await;
    let reply = sign.client(None).set(true).await.unwrap();
    assert_eq!(reply["state"], json!({"muted": true, "led_on": true}));
    assert!(sign.controller.status().muted);
}

#[tokio::test]
async fn set_without_body_is_400_and_state_unchanged() {
    let sign = spawn_sign(None).await;
    let resp = sign
        .client(None)
        .request(Method::PUT, "/set", None)
        .await
        .unwrap();
    assert_eq!(resp.status, 400);
    assert_eq!(
        resp.json().unwrap()["message"],
        "Invalid request. Expected JSON with 'muted' field."
    );
    assert_eq!(
        sign.controller.status(),
        DeviceState { muted: false, led_on: true }
    );
}

#[tokio::test]
async fn off_visible_through_status() {
    let sign = spawn_sign(None).await;
    let client = sign.client(None);
    let reply = client
        .request(Method::PUT, "/off", None)
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(reply["message"], "LEDs turned off");
    let state = client.status().await.unwrap();
    assert!(!state.led_on);
    assert_eq!(sign.strip.last_fill(), Some(color::OFF));
}

#[tokio::test]
async fn health_is_healthy() {
    let sign = spawn_sign(None).await;
    let resp = sign
        .client(None)
        .request(Method::GET, "/health", None)
        .await
        .unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.json().unwrap(), json!({"status": "healthy"}));
}

// ── Effects ──

#[tokio::test]
async fn pulse_with_color_and_cycles() {
    let sign = spawn_sign(None).await;
    let body = json!({"color": "RED", "cycles": 2});
    let resp = sign
        .client(None)
        .request(Method::PUT, "/effects/pulse", Some(&body))
        .await
        .unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(
        resp.json().unwrap(),
        json!({"status": "success", "message": "Pulse effect completed with color red"})
    );
    // Steady color is back afterwards.
    assert_eq!(sign.strip.last_fill(), Some(color::GREEN));
}

#[tokio::test]
async fn effect_without_body_uses_defaults() {
    let sign = spawn_sign(None).await;
    let resp = sign
        .client(None)
        .request(Method::PUT, "/effects/chase", None)
        .await
        .unwrap();
    let body: Value = resp.json().unwrap();
    assert_eq!(body["message"], "Chase effect completed with color blue");
}

#[tokio::test]
async fn effect_failure_is_500() {
    let sign = spawn_sign(None).await;
    sign.strip.set_fail_show(true);
    let resp = sign
        .client(None)
        .request(Method::PUT, "/effects/wipe", None)
        .await
        .unwrap();
    assert_eq!(resp.status, 500);
    assert_eq!(resp.json().unwrap()["status"], "error");
}

// ── Protocol edges ──

#[tokio::test]
async fn unknown_route_and_wrong_method() {
    let sign = spawn_sign(None).await;
    let (status, _) = raw(sign.addr, b"GET /nope HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
    assert_eq!(status, 404);
    let (status, _) = raw(sign.addr, b"DELETE /status HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
    assert_eq!(status, 405);
}

#[tokio::test]
async fn preflight_has_cors_headers() {
    let sign = spawn_sign(Some("key")).await;
    let (status, text) = raw(sign.addr, b"OPTIONS /toggle HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
    assert_eq!(status, 200);
    let text = text.to_ascii_lowercase();
    assert!(text.contains("access-control-allow-origin: *"));
    assert!(text.contains("access-control-allow-methods"));
    assert!(text.contains("put"));
}

#[tokio::test]
async fn oversized_body_is_413() {
    let sign = spawn_sign(None).await;
    let (status, _) = raw(
        sign.addr,
        b"PUT /set HTTP/1.1\r\nHost: x\r\nConnection: close\r\nContent-Length: 1000000\r\n\r\n",
    )
    .await;
    assert_eq!(status, 413);
}

#[tokio::test]
async fn rainbow_ignores_non_json_body() {
    let sign = spawn_sign(None).await;
    let (status, text) = raw(
        sign.addr,
        b"PUT /effects/rainbow HTTP/1.1\r\nHost: x\r\nConnection: close\r\nContent-Length: 8\r\n\r\nnot json",
    )
    .await;
    assert_eq!(status, 200);
    assert!(text.contains("Rainbow effect completed"));
}

#[tokio::test]
async fn silent_connection_is_closed() {
    let sign = spawn_sign_with(
        |c, key| HttpServer::new(c, key).with_idle_timeout(Duration::from_millis(200)),
        None,
    )
    .await;
    let mut stream = TcpStream::connect(sign.addr).await.unwrap();
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("server kept an idle connection open")
        .unwrap_or(0);
    assert_eq!(n, 0);

    // The server still answers new connections.
    let state = sign.client(None).status().await.unwrap();
    assert!(state.led_on);
}

#[tokio::test]
async fn stalled_request_head_is_closed() {
    let sign = spawn_sign_with(
        |c, key| HttpServer::new(c, key).with_idle_timeout(Duration::from_millis(200)),
        None,
    )
    .await;
    let mut stream = TcpStream::connect(sign.addr).await.unwrap();
    stream.write_all(b"GET /status HTTP/1.1\r\nHost: x\r\n").await.unwrap();
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("server kept a stalled connection open")
        .ok();
    assert!(!String::from_utf8_lossy(&out).contains("200 OK"));
}

#[tokio::test]
async fn garbage_request_is_400() {
    let sign = spawn_sign(None).await;
    let (status, _) = raw(sign.addr, b"hello\r\n\r\n").await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn api_key_enforced() {
    let sign = spawn_sign(Some("s3cret")).await;
    let err = sign.client(None).toggle().await.unwrap_err();
    assert!(err.to_string().contains("HTTP 403"));
    assert!(!sign.controller.status().muted);

    let reply = sign.client(Some("s3cret")).toggle().await.unwrap();
    assert_eq!(reply["state"]["muted"], true);
}
