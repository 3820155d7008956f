//! Peer Handle (§4.B): an opaque per-peer object with liveness and
//! connectivity probes, created by a caller-supplied factory.

use std::sync::Arc;

use async_trait::async_trait;
use mesh_types::DeviceCapabilities;

/// An opaque handle to a discovered peer.
///
/// Handles are produced by a [`CreatePeerHandle`] factory the caller
/// injects via [`crate::engine::DiscoveryConfig`] — discovery never
/// constructs a concrete peer type itself.
#[async_trait]
pub trait PeerHandle: Send + Sync {
    /// The peer's advertised node id.
    fn id(&self) -> &str;

    /// The peer's wire address, `"host:port"`.
    fn addr(&self) -> String;

    /// The peer's declared capabilities.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Lightweight liveness probe. `false` means the peer should not be
    /// trusted (and, if already known, should be removed).
    async fn health_check(&self) -> bool;

    /// Whether the underlying transport connection is currently open.
    async fn is_connected(&self) -> bool;
}

/// Factory that builds a [`PeerHandle`] for a newly observed peer.
///
/// `is_wan` is `true` when the peer's advertised address came from its
/// public endpoint rather than the LAN broadcast source address.
pub type CreatePeerHandle = Arc<
    dyn Fn(&str, &str, DeviceCapabilities, bool) -> Box<dyn PeerHandle> + Send + Sync,
>;

#[cfg(test)]
pub(crate) mod mock {
    use super::{DeviceCapabilities, PeerHandle};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Test double whose health/connectivity are driven by shared flags.
    pub struct MockPeerHandle {
        id: String,
        addr: String,
        capabilities: DeviceCapabilities,
        healthy: Arc<AtomicBool>,
        connected: Arc<AtomicBool>,
    }

    impl MockPeerHandle {
        pub fn new(id: &str, addr: &str, capabilities: DeviceCapabilities) -> Self {
            Self {
                id: id.to_string(),
                addr: addr.to_string(),
                capabilities,
                healthy: Arc::new(AtomicBool::new(true)),
                connected: Arc::new(AtomicBool::new(true)),
            }
        }

        pub fn handles(&self) -> (Arc<AtomicBool>, Arc<AtomicBool>) {
            (self.healthy.clone(), self.connected.clone())
        }
    }

    #[async_trait]
    impl PeerHandle for MockPeerHandle {
        fn id(&self) -> &str {
            &self.id
        }

        fn addr(&self) -> String {
            self.addr.clone()
        }

        fn capabilities(&self) -> &DeviceCapabilities {
            &self.capabilities
        }

        async fn health_check(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }

        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }
}
