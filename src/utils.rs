// General utility functions for the application
use axum::http::HeaderMap;
use reqwest::Client;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::AppError;

/// Create an HTTP client with appropriate configuration
pub fn create_http_client(timeout: Duration) -> Result<Client, AppError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("geolite-api/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AppError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

    Ok(client)
}

/// Apparent address of the caller: `X-Real-IP`, then the first entry of
/// `X-Forwarded-For`, then the transport peer
pub fn client_address(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(real_ip) = header_value(headers, "x-real-ip") {
        return real_ip.to_string();
    }

    if let Some(forwarded) = header_value(headers, "x-forwarded-for") {
        // Proxies append themselves, so the client is the first hop
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_string();
        }
    }

    peer.ip().to_string()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
