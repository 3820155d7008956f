//! The UDP broadcast announcement wire format.

use mesh_types::DeviceCapabilities;
use serde::{Deserialize, Serialize};

/// A presence announcement broadcast on the LAN and parsed on receipt.
///
/// `public_ip`/`public_port` are present only when the sender is behind a
/// NAT and has a STUN-mapped external address; their presence is how a
/// receiver decides whether to dial the sender's LAN or WAN address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announcement {
    /// Always `"discovery"`; distinguishes this message from future wire
    /// message types sharing the same broadcast port.
    #[serde(rename = "type")]
    pub message_type: String,
    /// The sender's node id.
    pub node_id: String,
    /// The sender's service port (historically the peer's gRPC port).
    pub grpc_port: u16,
    /// The sender's declared capabilities.
    pub device_capabilities: DeviceCapabilities,
    /// The sender's STUN-mapped external IP, if behind a NAT.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    /// The sender's STUN-mapped external port, if behind a NAT.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_port: Option<u16>,
}

impl Announcement {
    /// Build the announcement this node broadcasts on its own behalf.
    pub fn new(
        node_id: &str,
        grpc_port: u16,
        device_capabilities: DeviceCapabilities,
        public_addr: Option<(String, u16)>,
    ) -> Self {
        let (public_ip, public_port) = match public_addr {
            Some((ip, port)) => (Some(ip), Some(port)),
            None => (None, None),
        };
        Self {
            message_type: "discovery".to_string(),
            node_id: node_id.to_string(),
            grpc_port,
            device_capabilities,
            public_ip,
            public_port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_types::DeviceFlops;

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

    #[test]
    fn lan_only_announcement_omits_public_fields() {
        let announcement = Announcement::new("node-a", 50051, caps(), None);
        let json = serde_json::to_string(&announcement).unwrap();
        assert!(!json.contains("public_ip"));
        assert!(!json.contains("public_port"));
    }

    #[test]
    fn wan_announcement_round_trips() {
        let announcement =
            Announcement::new("node-a", 50051, caps(), Some(("203.0.113.5".to_string(), 40000)));
        let json = serde_json::to_string(&announcement).unwrap();
        let decoded: Announcement = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.public_ip.as_deref(), Some("203.0.113.5"));
        assert_eq!(decoded.public_port, Some(40000));
    }

    #[test]
    fn rejects_non_object_payloads() {
        let err = serde_json::from_str::<Announcement>("[1,2,3]").unwrap_err();
        assert!(err.is_data());
    }
}
