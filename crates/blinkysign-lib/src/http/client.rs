//! HTTP client for the sign's API, used by the button and polling clients.

use std::time::Duration;

use reqwest::{Method, Url};
use serde_json::Value;

use super::{API_KEY_HEADER, MAX_BODY_BYTES};
use crate::error::{BlinkyError, Result};
use crate::state::DeviceState;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Parse an `http(s)://host[:port][/base]` endpoint. A missing scheme is taken as `http://`.
pub fn parse_endpoint(url: &str) -> Result<Url> {
    let url = url.trim();
    let full = if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{url}")
    };
    let parsed = Url::parse(&full)
        .map_err(|e| BlinkyError::Validation(format!("invalid endpoint \"{url}\": {e}")))?;
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(BlinkyError::Validation(format!(
                "unsupported scheme \"{scheme}\" in {url}"
            )));
        }
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(BlinkyError::Validation(format!("missing host in \"{url}\"")));
    }
    Ok(parsed)
}

/// Status and body of a completed request.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ClientResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// The body as JSON, or an error carrying the server's message for non-2xx replies.
    pub fn into_result(self) -> Result<Value> {
        if self.is_success() {
            return self.json();
        }
        let message = self
            .json()
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| String::from_utf8_lossy(&self.body).into_owned());
        Err(BlinkyError::Transport(format!(
            "HTTP {}: {message}",
            self.status
        )))
    }
}

pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    api_key: Option<String>,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(endpoint: &str, api_key: Option<&str>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| BlinkyError::Transport(format!("HTTP client setup failed: {e}")))?;
        Ok(Self {
            http,
            base: parse_endpoint(endpoint)?,
            api_key: api_key.map(str::to_string),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.base
    }

    /// `PUT /toggle`. Returns the reply body.
    pub async fn toggle(&self) -> Result<Value> {
        self.request(Method::PUT, "/toggle", None).await?.into_result()
    }

    /// `PUT /set` with `{"muted": muted}`. Returns the reply body.
    pub async fn set(&self, muted: bool) -> Result<Value> {
        let body = serde_json::json!({ "muted": muted });
        self.request(Method::PUT, "/set", Some(&body))
            .await?
            .into_result()
    }

    /// `GET /status`.
    pub async fn status(&self) -> Result<DeviceState> {
        let value = self.request(Method::GET, "/status", None).await?.into_result()?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send one request and read the response body, up to [`MAX_BODY_BYTES`].
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ClientResponse> {
        let url = format!("{}{path}", self.base.as_str().trim_end_matches('/'));
        log::debug!("{method} {url}");
        let failed = |e: reqwest::Error| {
            if e.is_timeout() {
                BlinkyError::Transport(format!("{method} {url} timed out after {:?}", self.timeout))
            } else {
                BlinkyError::Transport(format!("{method} {url} failed: {e}"))
            }
        };

        let mut request = self
            .http
            .request(method.clone(), &url)
            .timeout(self.timeout)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let mut response = request.send().await.map_err(failed)?;
        let status = response.status().as_u16();
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(failed)? {
            if body.len() + chunk.len() > MAX_BODY_BYTES {
                return Err(BlinkyError::Transport(format!(
                    "{method} {url}: response larger than {MAX_BODY_BYTES} bytes"
                )));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(ClientResponse { status, body })
    }
}
