//! # Mesh Discovery
//!
//! LAN broadcast discovery with NAT-aware tracker fallback: a node
//! announces itself over UDP broadcast, listens for announcements from
//! others, evicts peers that go quiet, and — when it detects it's behind a
//! NAT via STUN — registers with an HTTP tracker so peers elsewhere can
//! still find it.

#![warn(missing_docs)]

mod engine;
mod iface;
mod nat;
mod peer;
mod tracker;
mod wire;

pub use engine::{DiscoveryConfig, DiscoveryEngine, DiscoveryError};
pub use nat::{default_stun_servers, NatProbe, NatProbeResult};
pub use peer::{CreatePeerHandle, PeerHandle};
pub use tracker::{TrackerClient, TrackerError, TrackerPeer};
pub use wire::Announcement;
