//! The output type and trait shared by every partitioning strategy.

use mesh_types::Topology;
use thiserror::Error;

/// Tolerance within which the final partition's `end` is coerced to `1.0`.
const COVERAGE_TOLERANCE: f64 = 1e-4;

/// A contiguous share of `[0, 1]` assigned to one node.
///
/// `start` and `end` are always rounded to 5 decimal places.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// The node this share was assigned to.
    pub node_id: String,
    /// Start of the half-open range, `0 <= start <= end`.
    pub start: f64,
    /// End of the half-open range, `start <= end <= 1`.
    pub end: f64,
}

impl Partition {
    /// Construct a partition, rounding both bounds to 5 decimal places.
    #[must_use]
    pub fn new(node_id: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            node_id: node_id.into(),
            start: round5(start),
            end: round5(end),
        }
    }

    /// This partition's width, `end - start`.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.end - self.start
    }
}

/// Round to 5 decimal places, the precision every [`Partition`] bound is
/// stored at.
#[must_use]
pub fn round5(value: f64) -> f64 {
    (value * 100_000.0).round() / 100_000.0
}

/// If the last partition's `end` differs from `1.0` by no more than
/// [`COVERAGE_TOLERANCE`], coerce it to exactly `1.0`.
///
/// Floating point accumulation across many partitions can drift the final
/// edge away from `1.0` by a few parts in `10^5`; this closes that gap
/// without masking a genuinely incomplete partition set.
pub fn coerce_last(partitions: &mut [Partition]) {
    if let Some(last) = partitions.last_mut() {
        if (last.end - 1.0).abs() <= COVERAGE_TOLERANCE {
            last.end = 1.0;
        }
    }
}

/// Errors a partitioning strategy can report.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartitionError {
    /// The topology has no nodes; there is nothing to partition.
    #[error("cannot partition an empty topology")]
    EmptyTopology,
}

/// Computes an ordered, contiguous partition of `[0, 1]` from a topology.
pub trait PartitionStrategy {
    /// Compute the partition.
    ///
    /// `model_memory_requirement`, when given, caps each node's share at
    /// `min(1, memory / model_memory_requirement)`.
    ///
    /// # Errors
    ///
    /// Returns [`PartitionError::EmptyTopology`] if `topology` has no nodes.
    fn partition(
        &self,
        topology: &Topology,
        model_memory_requirement: Option<f64>,
    ) -> Result<Vec<Partition>, PartitionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round5_rounds_to_five_places() {
        assert_eq!(round5(0.333_333_333), 0.33333);
        assert_eq!(round5(1.0), 1.0);
    }

    #[test]
    fn coerce_last_snaps_close_end_to_one() {
        let mut parts = vec![Partition::new("a", 0.0, 0.5), Partition::new("b", 0.5, 0.99995)];
        coerce_last(&mut parts);
        assert_eq!(parts.last().unwrap().end, 1.0);
    }

    #[test]
    fn coerce_last_leaves_far_end_untouched() {
        let mut parts = vec![Partition::new("a", 0.0, 0.5)];
        coerce_last(&mut parts);
        assert_eq!(parts.last().unwrap().end, 0.5);
    }
}
