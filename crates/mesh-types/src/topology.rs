//! The node/capability/latency graph partitioning strategies consume.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::DeviceCapabilities;

/// Sentinel returned by [`Topology::get_latency`] for a pair with no
/// recorded measurement. Strategies treat "unknown" as "no penalty".
pub const UNKNOWN_LATENCY: f64 = 0.0;

/// The set of known nodes, their capabilities, and the directed pairwise
/// latencies between them.
///
/// Node iteration order is always ascending by id (a `BTreeMap` underneath)
/// so that partitioning strategies are reproducible given the same
/// insertion history, per the discovery/partitioning contract.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: BTreeMap<String, DeviceCapabilities>,
    edges: BTreeSet<(String, String)>,
    latency: HashMap<(String, String), f64>,
}

impl Topology {
    /// Create an empty topology.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a node's capabilities. Idempotent, last-write-wins.
    pub fn update_node(&mut self, id: impl Into<String>, capabilities: DeviceCapabilities) {
        self.nodes.insert(id.into(), capabilities);
    }

    /// Record an undirected edge between two nodes. A self-loop (`a == b`)
    /// is silently ignored rather than treated as an error: it's caller
    /// confusion, not a condition the graph needs to reject loudly.
    pub fn add_edge(&mut self, a: impl Into<String>, b: impl Into<String>) {
        let a = a.into();
        let b = b.into();
        if a == b {
            return;
        }
        let pair = if a < b { (a, b) } else { (b, a) };
        self.edges.insert(pair);
    }

    /// Record the directional latency, in seconds, from `src` to `dst`.
    /// Idempotent, last-write-wins; does not imply the reverse direction.
    pub fn add_latency(&mut self, src: impl Into<String>, dst: impl Into<String>, seconds: f64) {
        self.latency.insert((src.into(), dst.into()), seconds);
    }

    /// All known nodes, sorted by id for reproducibility.
    pub fn all_nodes(&self) -> impl Iterator<Item = (&str, &DeviceCapabilities)> {
        self.nodes.iter().map(|(id, caps)| (id.as_str(), caps))
    }

    /// Number of known nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if no nodes have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node's capabilities.
    #[must_use]
    pub fn get_node(&self, id: &str) -> Option<&DeviceCapabilities> {
        self.nodes.get(id)
    }

    /// Whether an edge has been recorded between `a` and `b` (order-insensitive).
    #[must_use]
    pub fn has_edge(&self, a: &str, b: &str) -> bool {
        let pair = if a < b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        self.edges.contains(&pair)
    }

    /// Directed latency from `src` to `dst`, in seconds, or
    /// [`UNKNOWN_LATENCY`] if never recorded.
    #[must_use]
    pub fn get_latency(&self, src: &str, dst: &str) -> f64 {
        self.latency
            .get(&(src.to_string(), dst.to_string()))
            .copied()
            .unwrap_or(UNKNOWN_LATENCY)
    }
}
