//! Discovery Engine (§4.E): LAN broadcast/listen/cleanup plus an optional
//! NAT-tracker heartbeat, orchestrating [`PeerHandle`]s through a
//! caller-supplied factory.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mesh_types::DeviceCapabilities;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::iface::local_ipv4_addresses;
use crate::nat::{default_stun_servers, NatProbe};
use crate::peer::{CreatePeerHandle, PeerHandle};
use crate::tracker::TrackerClient;
use crate::wire::Announcement;

/// How often the heartbeat task pings the tracker while registered.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
/// Poll interval while [`DiscoveryEngine::discover_peers`] waits for more peers.
const WAIT_FOR_PEERS_POLL: Duration = Duration::from_millis(100);
/// Maximum accepted announcement datagram size.
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Configuration for a [`DiscoveryEngine`].
pub struct DiscoveryConfig {
    /// This node's id, carried in every announcement and tracker call.
    pub node_id: String,
    /// This node's service port, announced to peers (historically a gRPC port).
    pub node_port: u16,
    /// UDP port this node listens for announcements on.
    pub listen_port: u16,
    /// UDP port announcements are broadcast to.
    pub broadcast_port: u16,
    /// Factory used to turn a discovered address into a [`PeerHandle`].
    pub create_peer_handle: CreatePeerHandle,
    /// Delay between broadcast/cleanup cycles.
    pub broadcast_interval: Duration,
    /// How long a peer may go unseen before it's evicted.
    pub discovery_timeout: Duration,
    /// This node's own declared capabilities, announced to peers.
    pub device_capabilities: DeviceCapabilities,
    /// Base URL of the tracker used when this node is behind a NAT.
    pub tracker_url: String,
    /// STUN servers tried, in order, for the NAT probe.
    pub stun_servers: Vec<SocketAddr>,
}

impl DiscoveryConfig {
    /// Build a config with the common defaults (1s broadcast interval, 30s
    /// discovery timeout, unknown capabilities, localhost tracker, Google STUN).
    pub fn new(node_id: impl Into<String>, node_port: u16, create_peer_handle: CreatePeerHandle) -> Self {
        Self {
            node_id: node_id.into(),
            node_port,
            listen_port: node_port,
            broadcast_port: 50000,
            create_peer_handle,
            broadcast_interval: Duration::from_secs(1),
            discovery_timeout: Duration::from_secs(30),
            device_capabilities: DeviceCapabilities::unknown(),
            tracker_url: "http://localhost:8080".to_string(),
            stun_servers: default_stun_servers(),
        }
    }
}

/// Errors constructing or starting a [`DiscoveryEngine`]. None of these
/// propagate out of the long-running background tasks themselves.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Socket setup failed.
    #[error("discovery I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A config field was unusable (e.g. empty node id).
    #[error("invalid discovery config: {0}")]
    InvalidConfig(String),
}

struct KnownPeer {
    handle: Arc<dyn PeerHandle>,
    connected_at: Instant,
    last_seen: Instant,
}

/// Orchestrates LAN peer discovery and (when behind a NAT) tracker rendezvous.
pub struct DiscoveryEngine {
    node_id: String,
    node_port: u16,
    listen_port: u16,
    broadcast_port: u16,
    create_peer_handle: CreatePeerHandle,
    broadcast_interval: Duration,
    discovery_timeout: Duration,
    device_capabilities: DeviceCapabilities,
    stun_servers: Vec<SocketAddr>,
    known_peers: Arc<Mutex<HashMap<String, KnownPeer>>>,
    tracker: Arc<TrackerClient>,
    public_addr: Option<(String, u16)>,
    behind_nat: bool,
    tasks: Vec<JoinHandle<()>>,
}

impl DiscoveryEngine {
    /// Construct the engine, probing for our NAT status via STUN.
    ///
    /// The STUN probe never fails the constructor — an unreachable STUN
    /// server just means this node is treated as LAN-only.
    pub async fn new(config: DiscoveryConfig) -> Result<Self, DiscoveryError> {
        if config.node_id.is_empty() {
            return Err(DiscoveryError::InvalidConfig(
                "node_id must not be empty".to_string(),
            ));
        }

        let tracker = TrackerClient::new(&config.tracker_url)
            .map_err(|e| DiscoveryError::InvalidConfig(e.to_string()))?;

        let probe = NatProbe::new().probe(&config.stun_servers).await;
        let public_addr = probe
            .external_ip
            .map(|ip| (ip.to_string(), probe.external_port));
        let behind_nat = probe.behind_nat;

        if behind_nat {
            info!(node_id = %config.node_id, ?public_addr, "node is behind NAT, tracker rendezvous enabled");
        } else {
            debug!(node_id = %config.node_id, "node appears to be LAN-reachable");
        }

        Ok(Self {
            node_id: config.node_id,
            node_port: config.node_port,
            listen_port: config.listen_port,
            broadcast_port: config.broadcast_port,
            create_peer_handle: config.create_peer_handle,
            broadcast_interval: config.broadcast_interval,
            discovery_timeout: config.discovery_timeout,
            device_capabilities: config.device_capabilities,
            stun_servers: config.stun_servers,
            known_peers: Arc::new(Mutex::new(HashMap::new())),
            tracker: Arc::new(tracker),
            public_addr,
            behind_nat,
            tasks: Vec::new(),
        })
    }

    /// Start the background broadcast, listen, and cleanup tasks, plus a
    /// tracker heartbeat task if this node is behind a NAT.
    pub async fn start(&mut self) -> Result<(), DiscoveryError> {
        let listen_socket = bind_listen_socket(self.listen_port)?;

        self.tasks.push(tokio::spawn(Self::task_broadcast_presence(
            self.node_id.clone(),
            self.node_port,
            self.broadcast_port,
            self.broadcast_interval,
            self.device_capabilities.clone(),
            self.public_addr.clone(),
        )));

        self.tasks.push(tokio::spawn(Self::task_listen_for_peers(
            listen_socket,
            self.node_id.clone(),
            self.create_peer_handle.clone(),
            self.known_peers.clone(),
        )));

        self.tasks.push(tokio::spawn(Self::task_cleanup_peers(
            self.known_peers.clone(),
            self.broadcast_interval,
            self.discovery_timeout,
        )));

        if self.behind_nat {
            if let Some((ip, port)) = &self.public_addr {
                if let Err(e) = self
                    .tracker
                    .register(&self.node_id, ip, *port, &self.device_capabilities)
                    .await
                {
                    warn!(error = %e, "failed to register with tracker");
                }
            }
            self.tasks.push(tokio::spawn(Self::task_heartbeat(
                self.tracker.clone(),
                self.node_id.clone(),
            )));
        }

        Ok(())
    }

    /// Stop all background tasks and, if registered, deregister from the tracker.
    pub async fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }

        if self.behind_nat {
            if let Err(e) = self.tracker.deregister(&self.node_id).await {
                warn!(error = %e, "failed to deregister from tracker");
            }
        }
    }

    /// Return every currently known peer, polling until at least
    /// `wait_for_peers` LAN peers are known (`0` returns immediately with
    /// whatever is already known).
    pub async fn discover_peers(&self, wait_for_peers: usize) -> Vec<Arc<dyn PeerHandle>> {
        if wait_for_peers > 0 {
            loop {
                let count = self.known_peers.lock().await.len();
                if count >= wait_for_peers {
                    break;
                }
                debug!(count, wait_for_peers, "waiting for more peers...");
                tokio::time::sleep(WAIT_FOR_PEERS_POLL).await;
            }
        }

        let lan_peers: Vec<Arc<dyn PeerHandle>> = self
            .known_peers
            .lock()
            .await
            .values()
            .map(|entry| entry.handle.clone())
            .collect();

        if !self.behind_nat {
            return lan_peers;
        }

        let wan_peers = match self.tracker.get_peers(&self.node_id).await {
            Ok(peers) => peers
                .into_iter()
                .map(|peer| {
                    let handle = (self.create_peer_handle)(
                        &peer.node_id,
                        &format!("{}:{}", peer.ip, peer.port),
                        peer.device_capabilities,
                        true,
                    );
                    Arc::from(handle)
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to fetch peers from tracker");
                Vec::new()
            }
        };

        lan_peers.into_iter().chain(wan_peers).collect()
    }

    async fn task_broadcast_presence(
        node_id: String,
        node_port: u16,
        broadcast_port: u16,
        broadcast_interval: Duration,
        device_capabilities: DeviceCapabilities,
        public_addr: Option<(String, u16)>,
    ) {
        let announcement = Announcement::new(&node_id, node_port, device_capabilities, public_addr);
        let payload = match serde_json::to_vec(&announcement) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode discovery announcement, broadcast loop exiting");
                return;
            }
        };

        let destination = SocketAddr::new(Ipv4Addr::BROADCAST.into(), broadcast_port);

        loop {
            for addr in local_ipv4_addresses() {
                match UdpSocket::bind((addr, 0)).await {
                    Ok(socket) => {
                        if let Err(e) = socket.set_broadcast(true) {
                            debug!(%addr, error = %e, "failed to enable SO_BROADCAST");
                            continue;
                        }
                        if let Err(e) = socket.send_to(&payload, destination).await {
                            debug!(%addr, error = %e, "failed to broadcast presence");
                        }
                    }
                    Err(e) => debug!(%addr, error = %e, "failed to bind broadcast socket"),
                }
            }
            tokio::time::sleep(broadcast_interval).await;
        }
    }

    async fn task_listen_for_peers(
        socket: UdpSocket,
        node_id: String,
        create_peer_handle: CreatePeerHandle,
        known_peers: Arc<Mutex<HashMap<String, KnownPeer>>>,
    ) {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, from) = match socket.recv_from(&mut buf).await {
                Ok(pair) => pair,
                Err(e) => {
                    debug!(error = %e, "discovery listen socket error");
                    continue;
                }
            };
            handle_announcement(
                &buf[..len],
                from,
                &node_id,
                &create_peer_handle,
                &known_peers,
            )
            .await;
        }
    }

    async fn task_cleanup_peers(
        known_peers: Arc<Mutex<HashMap<String, KnownPeer>>>,
        cleanup_interval: Duration,
        discovery_timeout: Duration,
    ) {
        loop {
            tokio::time::sleep(cleanup_interval).await;

            let mut to_remove = Vec::new();
            {
                let peers = known_peers.lock().await;
                for (peer_id, entry) in peers.iter() {
                    let connected_elapsed = entry.connected_at.elapsed();
                    let last_seen_elapsed = entry.last_seen.elapsed();
                    let connected = entry.handle.is_connected().await;
                    let healthy = entry.handle.health_check().await;

                    if (!connected && connected_elapsed > discovery_timeout)
                        || last_seen_elapsed > discovery_timeout
                        || !healthy
                    {
                        to_remove.push(peer_id.clone());
                    }
                }
            }

            if !to_remove.is_empty() {
                let mut peers = known_peers.lock().await;
                for peer_id in to_remove {
                    peers.remove(&peer_id);
                    debug!(peer_id, "removed peer due to inactivity or failed health check");
                }
            }
        }
    }

    async fn task_heartbeat(tracker: Arc<TrackerClient>, node_id: String) {
        loop {
            tokio::time::sleep(HEARTBEAT_INTERVAL).await;
            if let Err(e) = tracker.heartbeat(&node_id).await {
                warn!(error = %e, "failed to send heartbeat to tracker");
            }
        }
    }
}

/// Bind the announcement listen socket with `SO_REUSEADDR` (teacher idiom:
/// build via `socket2` for advanced options, then hand off to tokio).
fn bind_listen_socket(port: u16) -> Result<UdpSocket, DiscoveryError> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

async fn handle_announcement(
    data: &[u8],
    from: SocketAddr,
    self_node_id: &str,
    create_peer_handle: &CreatePeerHandle,
    known_peers: &Arc<Mutex<HashMap<String, KnownPeer>>>,
) {
    if data.is_empty() {
        return;
    }

    let announcement: Announcement = match serde_json::from_slice(data) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(%from, error = %e, "discarding malformed discovery announcement");
            return;
        }
    };

    if announcement.message_type != "discovery" || announcement.node_id == self_node_id {
        return;
    }

    let is_wan = announcement.public_ip.is_some();
    let (peer_host, peer_port) = if is_wan {
        (
            announcement.public_ip.clone().unwrap(),
            announcement.public_port.unwrap_or(announcement.grpc_port),
        )
    } else {
        (from.ip().to_string(), announcement.grpc_port)
    };
    let peer_addr = format!("{peer_host}:{peer_port}");
    let peer_id = announcement.node_id;

    let mut peers = known_peers.lock().await;
    let needs_new_handle = match peers.get(&peer_id) {
        Some(existing) => existing.handle.addr() != peer_addr,
        None => true,
    };

    if needs_new_handle {
        let handle: Arc<dyn PeerHandle> = Arc::from(create_peer_handle(
            &peer_id,
            &peer_addr,
            announcement.device_capabilities,
            is_wan,
        ));
        if !handle.health_check().await {
            debug!(peer_id, %peer_addr, "discovered peer failed health check, skipping");
            return;
        }
        let now = Instant::now();
        info!(peer_id, %peer_addr, replaced = peers.contains_key(&peer_id), "discovered new peer");
        peers.insert(
            peer_id,
            KnownPeer {
                handle,
                connected_at: now,
                last_seen: now,
            },
        );
    } else if let Some(existing) = peers.get_mut(&peer_id) {
        if !existing.handle.health_check().await {
            debug!(peer_id, %peer_addr, "known peer failed health check, removing");
            peers.remove(&peer_id);
        } else {
            existing.last_seen = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::mock::MockPeerHandle;
    use mesh_types::DeviceFlops;
    use std::sync::atomic::Ordering;

    fn caps() -> DeviceCapabilities {
        DeviceCapabilities {
            model: "m".to_string(),
            chip: "c".to_string(),
            memory: 1024,
            flops: DeviceFlops {
                fp32: 1.0,
                fp16: 0.0,
                int8: 0.0,
            },
        }
    }

    fn factory() -> CreatePeerHandle {
        Arc::new(|id, addr, caps, _is_wan| {
            Box::new(MockPeerHandle::new(id, addr, caps)) as Box<dyn PeerHandle>
        })
    }

    #[tokio::test]
    async fn self_announcements_are_ignored() {
        let known_peers = Arc::new(Mutex::new(HashMap::new()));
        let announcement = Announcement::new("node-a", 1234, caps(), None);
        let payload = serde_json::to_vec(&announcement).unwrap();

        handle_announcement(
            &payload,
            "127.0.0.1:9999".parse().unwrap(),
            "node-a",
            &factory(),
            &known_peers,
        )
        .await;

        assert!(known_peers.lock().await.is_empty());
    }

    #[tokio::test]
    async fn new_peer_is_added_and_health_checked() {
        let known_peers = Arc::new(Mutex::new(HashMap::new()));
        let announcement = Announcement::new("node-b", 1234, caps(), None);
        let payload = serde_json::to_vec(&announcement).unwrap();

        handle_announcement(
            &payload,
            "127.0.0.1:9999".parse().unwrap(),
            "node-a",
            &factory(),
            &known_peers,
        )
        .await;

        let peers = known_peers.lock().await;
        assert_eq!(peers.len(), 1);
        assert!(peers.contains_key("node-b"));
    }

    #[tokio::test]
    async fn malformed_payload_is_discarded() {
        let known_peers = Arc::new(Mutex::new(HashMap::new()));
        handle_announcement(
            b"not json",
            "127.0.0.1:9999".parse().unwrap(),
            "node-a",
            &factory(),
            &known_peers,
        )
        .await;
        assert!(known_peers.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unhealthy_known_peer_is_removed_on_reannouncement() {
        let known_peers = Arc::new(Mutex::new(HashMap::new()));
        let mock = MockPeerHandle::new("node-b", "1.2.3.4:1234", caps());
        let (healthy, _connected) = mock.handles();
        known_peers.lock().await.insert(
            "node-b".to_string(),
            KnownPeer {
                handle: Arc::new(mock),
                connected_at: Instant::now(),
                last_seen: Instant::now(),
            },
        );
        healthy.store(false, Ordering::SeqCst);

        let announcement = Announcement::new("node-b", 1234, caps(), None);
        let payload = serde_json::to_vec(&announcement).unwrap();
        handle_announcement(
            &payload,
            "1.2.3.4:9999".parse().unwrap(),
            "node-a",
            &factory(),
            &known_peers,
        )
        .await;

        assert!(known_peers.lock().await.is_empty());
    }
}
