//! HTTP Tracker Client (§4.D): a best-effort rendezvous service for peers
//! reachable only through a NAT'd public address.

use std::time::Duration;

use mesh_types::DeviceCapabilities;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Default per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A peer entry as reported by `GET /peers`.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerPeer {
    /// The peer's node id.
    pub node_id: String,
    /// The peer's public IP.
    pub ip: String,
    /// The peer's public port.
    pub port: u16,
    /// The peer's declared capabilities.
    pub device_capabilities: DeviceCapabilities,
}

/// Errors talking to the tracker. Every variant is logged and swallowed by
/// [`crate::engine::DiscoveryEngine`] — a tracker outage never stops LAN
/// discovery.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// `base_url` did not parse.
    #[error("invalid tracker URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// Transport-level failure (connect refused, timeout, DNS, ...).
    #[error("tracker request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The tracker responded with an unexpected status code.
    #[error("tracker returned unexpected status {0}")]
    UnexpectedStatus(u16),
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    node_id: &'a str,
    ip: &'a str,
    port: u16,
    device_capabilities: std::collections::HashMap<String, serde_json::Value>,
}

#[derive(Serialize)]
struct DeregisterRequest<'a> {
    node_id: &'a str,
}

#[derive(Serialize)]
struct HeartbeatRequest<'a> {
    id: &'a str,
}

/// HTTP client for the discovery tracker's register/deregister/heartbeat/peers contract.
pub struct TrackerClient {
    base_url: Url,
    http: reqwest::Client,
}

impl TrackerClient {
    /// Build a client against `base_url` (e.g. `"http://localhost:8080"`).
    pub fn new(base_url: &str) -> Result<Self, TrackerError> {
        let base_url = Url::parse(base_url)?;
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self { base_url, http })
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let joined = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
        url
    }

    /// `POST /register`. Expects `201 Created` on success.
    pub async fn register(
        &self,
        node_id: &str,
        ip: &str,
        port: u16,
        caps: &DeviceCapabilities,
    ) -> Result<(), TrackerError> {
        let body = RegisterRequest {
            node_id,
            ip,
            port,
            device_capabilities: caps.to_map(),
        };
        let response = self
            .http
            .post(self.endpoint("register"))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 201 {
            debug!(node_id, "registered with tracker");
            Ok(())
        } else {
            warn!(node_id, %status, "tracker rejected registration");
            Err(TrackerError::UnexpectedStatus(status.as_u16()))
        }
    }

    /// `POST /deregister`. Expects `200 OK` on success.
    pub async fn deregister(&self, node_id: &str) -> Result<(), TrackerError> {
        let body = DeregisterRequest { node_id };
        let response = self
            .http
            .post(self.endpoint("deregister"))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 200 {
            debug!(node_id, "deregistered from tracker");
            Ok(())
        } else {
            warn!(node_id, %status, "tracker rejected deregistration");
            Err(TrackerError::UnexpectedStatus(status.as_u16()))
        }
    }

    /// `POST /heartbeat`. Expects `200 OK` on success.
    pub async fn heartbeat(&self, node_id: &str) -> Result<(), TrackerError> {
        let body = HeartbeatRequest { id: node_id };
        let response = self
            .http
            .post(self.endpoint("heartbeat"))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 200 {
            Ok(())
        } else {
            warn!(node_id, %status, "tracker rejected heartbeat");
            Err(TrackerError::UnexpectedStatus(status.as_u16()))
        }
    }

    /// `GET /peers`, filtering out `self_id`.
    pub async fn get_peers(&self, self_id: &str) -> Result<Vec<TrackerPeer>, TrackerError> {
        let response = self.http.get(self.endpoint("peers")).send().await?;
        let status = response.status();
        if status.as_u16() != 200 {
            warn!(%status, "failed to fetch peers from tracker");
            return Err(TrackerError::UnexpectedStatus(status.as_u16()));
        }
        let peers: Vec<TrackerPeer> = response.json().await?;
        Ok(peers.into_iter().filter(|p| p.node_id != self_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_base_and_path() {
        let client = TrackerClient::new("http://localhost:8080").unwrap();
        assert_eq!(
            client.endpoint("register").as_str(),
            "http://localhost:8080/register"
        );
    }

    #[test]
    fn endpoint_joins_base_with_trailing_slash() {
        let client = TrackerClient::new("http://localhost:8080/").unwrap();
        assert_eq!(
            client.endpoint("peers").as_str(),
            "http://localhost:8080/peers"
        );
    }

    #[test]
    fn new_rejects_invalid_url() {
        assert!(matches!(
            TrackerClient::new("not a url"),
            Err(TrackerError::InvalidUrl(_))
        ));
    }
}
