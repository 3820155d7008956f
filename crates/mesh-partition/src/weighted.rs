//! Weighted node-score partitioning (4.F.1): one normalized score per
//! node combining memory, FLOPS, and average latency, followed by a
//! ring-latency swap optimization.

use mesh_types::{DeviceCapabilities, Topology};

use crate::partition::{coerce_last, round5, Partition, PartitionError, PartitionStrategy};

/// 1 TiB, the memory normalization cap.
const MAX_MEMORY_BYTES: f64 = (1u64 << 40) as f64;
/// 3 PetaFLOPS, the combined fp32+fp16+int8 normalization cap.
const MAX_TOTAL_FLOPS: f64 = 3.0 * 1e15;
/// Latency beyond which a node gets no latency credit at all.
const MAX_LATENCY_SECONDS: f64 = 1.0;

/// Relative weights for memory, FLOPS, and latency in the node score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    /// Weight applied to normalized average latency.
    pub latency: f64,
    /// Weight applied to normalized memory.
    pub memory: f64,
    /// Weight applied to normalized FLOPS.
    pub flops: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            latency: 0.4,
            memory: 0.3,
            flops: 0.3,
        }
    }
}

/// Descending-score assignment with a ring-latency swap optimization pass.
#[derive(Debug, Clone, Default)]
pub struct WeightedScoreStrategy {
    weights: ScoreWeights,
}

impl WeightedScoreStrategy {
    /// Build a strategy with the default weights (`latency=0.4, memory=0.3, flops=0.3`).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a strategy with explicit weights.
    #[must_use]
    pub fn with_weights(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    /// Normalized score for one node: a weighted sum of normalized memory,
    /// normalized FLOPS, and normalized average latency to every other node.
    fn node_score(&self, node_id: &str, caps: &DeviceCapabilities, topology: &Topology) -> f64 {
        let norm_mem = caps.memory as f64 / MAX_MEMORY_BYTES;
        let norm_flops = caps.flops.total() / MAX_TOTAL_FLOPS;

        let others: Vec<&str> = topology
            .all_nodes()
            .map(|(id, _)| id)
            .filter(|id| *id != node_id)
            .collect();

        let norm_lat = if others.is_empty() {
            1.0
        } else {
            let avg_latency: f64 = others
                .iter()
                .map(|other| topology.get_latency(node_id, other))
                .sum::<f64>()
                / others.len() as f64;
            (1.0 - avg_latency / MAX_LATENCY_SECONDS).clamp(0.0, 1.0)
        };

        self.weights.memory * norm_mem
            + self.weights.flops * norm_flops
            + self.weights.latency * norm_lat
    }

    /// Total ring latency traversing `order` and wrapping around to the start.
    fn ring_latency(order: &[Partition], topology: &Topology) -> f64 {
        let n = order.len();
        if n < 2 {
            return 0.0;
        }
        (0..n)
            .map(|i| topology.get_latency(&order[i].node_id, &order[(i + 1) % n].node_id))
            .sum()
    }

    /// Hill-climb the assignment order by swapping pairs whenever doing so
    /// lowers total ring latency, repeating until a full sweep finds no
    /// improvement. Swaps permute node order only; each node keeps its
    /// originally computed width.
    fn optimize_ring_latency(mut order: Vec<Partition>, topology: &Topology) -> Vec<Partition> {
        let n = order.len();
        if n < 3 {
            return order;
        }

        let mut current_latency = Self::ring_latency(&order, topology);
        let mut improved = true;
        while improved {
            improved = false;
            for i in 0..n {
                for j in (i + 1)..n {
                    order.swap(i, j);
                    let candidate_latency = Self::ring_latency(&order, topology);
                    if candidate_latency < current_latency {
                        current_latency = candidate_latency;
                        improved = true;
                    } else {
                        order.swap(i, j);
                    }
                }
            }
        }
        order
    }
}

impl PartitionStrategy for WeightedScoreStrategy {
    fn partition(
        &self,
        topology: &Topology,
        _model_memory_requirement: Option<f64>,
    ) -> Result<Vec<Partition>, PartitionError> {
        let nodes: Vec<(&str, &DeviceCapabilities)> = topology.all_nodes().collect();
        if nodes.is_empty() {
            return Err(PartitionError::EmptyTopology);
        }

        let mut scored: Vec<(&str, f64)> = nodes
            .iter()
            .map(|(id, caps)| (*id, self.node_score(id, caps, topology)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let total_score: f64 = scored.iter().map(|(_, score)| score).sum();
        let mut start = 0.0;
        let mut partitions = Vec::with_capacity(scored.len());
        for (node_id, score) in &scored {
            let share = round5(score / total_score);
            let end = round5(start + share);
            partitions.push(Partition::new(*node_id, start, end));
            start = end;
        }

        let optimized_order = Self::optimize_ring_latency(partitions, topology);

        let mut start = 0.0;
        let mut result = Vec::with_capacity(optimized_order.len());
        for partition in optimized_order {
            let width = partition.width();
            let end = round5(start + width);
            result.push(Partition::new(partition.node_id, start, end));
            start = end;
        }
        coerce_last(&mut result);

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_types::DeviceFlops;

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
    fn three_uniform_nodes_split_evenly() {
        let mut t = Topology::new();
        t.update_node("a", caps(8000, 10.0));
        t.update_node("b", caps(8000, 10.0));
        t.update_node("c", caps(8000, 10.0));

        let strategy = WeightedScoreStrategy::new();
        let partitions = strategy.partition(&t, None).unwrap();

        assert_eq!(partitions.len(), 3);
        let total: f64 = partitions.iter().map(Partition::width).sum();
        assert!((total - 1.0).abs() < 1e-4);
        for p in &partitions {
            assert!((p.width() - 0.33333).abs() < 1e-4);
        }
    }

    #[test]
    fn every_node_appears_exactly_once() {
        let mut t = Topology::new();
        t.update_node("a", caps(3 * 1024 * 1024 * 1024, 1e12));
        t.update_node("b", caps(1024 * 1024 * 1024, 0.5e12));
        t.update_node("c", caps(6 * 1024 * 1024 * 1024, 0.2e12));
        t.add_latency("a", "b", 0.1);
        t.add_latency("b", "c", 0.2);
        t.add_latency("c", "a", 0.15);

        let strategy = WeightedScoreStrategy::new();
        let partitions = strategy.partition(&t, None).unwrap();

        let mut ids: Vec<&str> = partitions.iter().map(|p| p.node_id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let total: f64 = partitions.iter().map(Partition::width).sum();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn empty_topology_errors() {
        let t = Topology::new();
        let strategy = WeightedScoreStrategy::new();
        assert_eq!(
            strategy.partition(&t, None).unwrap_err(),
            PartitionError::EmptyTopology
        );
    }

    #[test]
    fn single_node_has_no_latency_penalty() {
        let mut t = Topology::new();
        t.update_node("a", caps(8000, 10.0));
        let strategy = WeightedScoreStrategy::new();
        let partitions = strategy.partition(&t, None).unwrap();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].start, 0.0);
        assert_eq!(partitions[0].end, 1.0);
    }
}
