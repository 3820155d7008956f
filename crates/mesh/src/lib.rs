//! # Mesh
//!
//! Facade over the mesh discovery and partitioning crates: peer discovery
//! (LAN broadcast + NAT-aware tracker fallback) and the partitioning
//! strategies that turn a discovered [`Topology`] into per-node layer
//! ranges.

#![warn(missing_docs)]

pub use mesh_discovery::{
    Announcement, CreatePeerHandle, DiscoveryConfig, DiscoveryEngine, DiscoveryError,
    NatProbe, NatProbeResult, PeerHandle, TrackerClient, TrackerError, TrackerPeer,
    default_stun_servers,
};
pub use mesh_partition::{
    MemoryFlopsStrategy, Partition, PartitionError, PartitionMode, PartitionStrategy,
    ScoreWeights, WeightedScoreStrategy,
};
pub use mesh_types::{CapabilitiesError, DeviceCapabilities, DeviceFlops, Topology};

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(memory: u64, fp32: f64) -> DeviceCapabilities {
        DeviceCapabilities {
            model: "m".to_string(),
            chip: "c".to_string(),
            memory,
            flops: DeviceFlops {
                fp32,
                fp16: 0.0,
                int8: 0.0,
            },
        }
    }

    #[test]
    fn three_uniform_nodes_partition_evenly_with_weighted_strategy() {
        let mut topology = Topology::new();
        topology.update_node("a", caps(8000, 10.0));
        topology.update_node("b", caps(8000, 10.0));
        topology.update_node("c", caps(8000, 10.0));

        let strategy = WeightedScoreStrategy::new();
        let partitions = strategy.partition(&topology, None).unwrap();

        assert_eq!(partitions.len(), 3);
        let total: f64 = partitions.iter().map(Partition::width).sum();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn two_nodes_latency_mode_gives_everything_to_the_faster_one() {
        let mut topology = Topology::new();
        topology.update_node("fast", caps(16 * 1024 * 1024 * 1024, 2e12));
        topology.update_node("slow", caps(16 * 1024 * 1024 * 1024, 0.5e12));

        let strategy = MemoryFlopsStrategy::new(PartitionMode::Latency);
        let partitions = strategy.partition(&topology, None).unwrap();

        let fast = partitions.iter().find(|p| p.node_id == "fast").unwrap();
        assert!((fast.width() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn memory_cap_forces_a_three_way_split() {
        let mut topology = Topology::new();
        topology.update_node("a", caps(2 * 1024 * 1024 * 1024, 1e12));
        topology.update_node("b", caps(2 * 1024 * 1024 * 1024, 1e12));
        topology.update_node("c", caps(2 * 1024 * 1024 * 1024, 1e12));

        let strategy = MemoryFlopsStrategy::new(PartitionMode::Balanced);
        let model_memory_requirement = 6.0 * 1024.0 * 1024.0 * 1024.0;
        let partitions = strategy
            .partition(&topology, Some(model_memory_requirement))
            .unwrap();

        assert_eq!(partitions.len(), 3);
        let total: f64 = partitions.iter().map(Partition::width).sum();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn capabilities_round_trip_through_the_wire_map() {
        let original = caps(8 * 1024 * 1024 * 1024, 5e12);
        let map = original.to_map();
        let decoded = DeviceCapabilities::from_map(&map).unwrap();
        assert_eq!(original, decoded);
    }
}
