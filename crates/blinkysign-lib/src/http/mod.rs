//! HTTP command surface and the matching API client.
//!
//! The server is an axum router over hyper; the client is `reqwest` with
//! rustls, so `https://` gateway endpoints work as well as a sign on the LAN.

pub mod client;
pub mod server;

pub use client::{ApiClient, ClientResponse, parse_endpoint};
pub use reqwest::Method;
pub use server::HttpServer;

/// Largest accepted request body, and largest response body the client reads.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Header carrying the shared secret.
pub const API_KEY_HEADER: &str = "X-Api-Key";
