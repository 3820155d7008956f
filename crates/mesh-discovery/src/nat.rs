//! NAT probing (§4.A): a synchronous-contract, async-implemented lookup of
//! our best-known external address, via STUN.

mod stun;

use std::net::{IpAddr, SocketAddr};

use tokio::net::UdpSocket;
use tracing::debug;

/// Default public STUN servers tried in order.
pub fn default_stun_servers() -> Vec<SocketAddr> {
    vec![
        "stun.l.google.com:19302".parse().unwrap(),
        "stun1.l.google.com:19302".parse().unwrap(),
    ]
}

/// Result of a [`NatProbe::probe`] call. On total failure this is the
/// documented sentinel: no external address known, `behind_nat = false`
/// (the discovery engine treats an unknown external address as LAN-only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NatProbeResult {
    /// Our external IP, if a STUN server answered.
    pub external_ip: Option<IpAddr>,
    /// Our external port, `0` if unknown.
    pub external_port: u16,
    /// Whether our local address differs from the mapped external address.
    pub behind_nat: bool,
}

impl NatProbeResult {
    /// The "probe unavailable" sentinel: LAN-only, no NAT assumed.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            external_ip: None,
            external_port: 0,
            behind_nat: false,
        }
    }
}

/// Probes for our server-reflexive address via STUN.
#[derive(Debug, Clone, Default)]
pub struct NatProbe;

impl NatProbe {
    /// Construct a probe.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Try each server in `stun_servers` in order; the first that answers
    /// wins. On exhaustion (or if `stun_servers` is empty) returns
    /// [`NatProbeResult::unknown`] — a STUN failure is never fatal to
    /// discovery.
    pub async fn probe(&self, stun_servers: &[SocketAddr]) -> NatProbeResult {
        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(socket) => socket,
            Err(e) => {
                debug!(error = %e, "failed to bind local socket for NAT probe");
                return NatProbeResult::unknown();
            }
        };

        let local_addr = socket.local_addr().ok();

        for server in stun_servers {
            match stun::query(&socket, *server).await {
                Ok(mapped) => {
                    let behind_nat = local_addr
                        .map(|local| local.ip() != mapped.ip())
                        .unwrap_or(false);
                    return NatProbeResult {
                        external_ip: Some(mapped.ip()),
                        external_port: mapped.port(),
                        behind_nat,
                    };
                }
                Err(e) => {
                    debug!(server = %server, error = %e, "STUN query failed, trying next server");
                }
            }
        }

        NatProbeResult::unknown()
    }
}
