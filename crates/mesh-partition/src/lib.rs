//! # Mesh Partition
//!
//! Computes, from a [`mesh_types::Topology`], a contiguous partition of the
//! unit interval `[0, 1]` assigning each node a share of model layers.
//!
//! Two strategy families are provided, matching the two partitioners that
//! exist independently upstream:
//!
//! - [`WeightedScoreStrategy`]: a single normalized score per node
//!   (memory, FLOPS, average latency), descending-score assignment
//!   followed by a ring-latency swap optimization.
//! - [`MemoryFlopsStrategy`]: a FLOPS-proportional assignment in one of
//!   three modes (`throughput`, `latency`, `balanced`), respecting a
//!   per-node memory cap when a model memory requirement is given.

#![warn(missing_docs)]

mod memory_flops;
mod partition;
mod weighted;

pub use memory_flops::{MemoryFlopsStrategy, PartitionMode};
pub use partition::{Partition, PartitionError, PartitionStrategy};
pub use weighted::{ScoreWeights, WeightedScoreStrategy};
