//! Memory/FLOPS partitioning (4.F.2): a mode-selected strategy that
//! assigns layer shares proportional to `fp32` throughput, subject to a
//! per-node memory cap derived from an optional model memory requirement.

use std::collections::BTreeMap;

use mesh_types::Topology;
use tracing::debug;

use crate::partition::{coerce_last, round5, Partition, PartitionError, PartitionStrategy};

/// Ring-latency threshold above which an edge disqualifies an ordering in
/// `balanced` mode.
const HIGH_LATENCY_THRESHOLD: f64 = 50.0;
/// Below this remainder, redistribution loops stop.
const CONVERGENCE_EPSILON: f64 = 1e-6;
/// Permutation search is only tractable up to this many nodes; beyond it a
/// greedy nearest-neighbor heuristic is used instead.
const MAX_PERMUTATION_NODES: usize = 8;

/// Which objective [`MemoryFlopsStrategy`] optimizes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionMode {
    /// Maximize aggregate throughput: FLOPS-proportional, capped by memory,
    /// remainder redistributed to devices with spare capacity.
    Throughput,
    /// FLOPS-proportional assignment as in `Throughput`, then reordered into
    /// the ring minimizing total latency (subject to the per-edge cap) and
    /// rescaled so no node exceeds its memory-derived share.
    #[default]
    Balanced,
    /// Minimize latency: hand as much as possible to the single fastest
    /// device, spill the remainder to the next-fastest devices in order.
    Latency,
}

#[derive(Debug, Clone)]
struct DeviceInfo {
    flops: f64,
    max_fraction: f64,
}

/// FLOPS-proportional assignment in one of three modes, respecting a
/// per-node memory cap.
#[derive(Debug, Clone)]
pub struct MemoryFlopsStrategy {
    mode: PartitionMode,
}

impl Default for MemoryFlopsStrategy {
    fn default() -> Self {
        Self {
            mode: PartitionMode::Balanced,
        }
    }
}

impl MemoryFlopsStrategy {
    /// Build a strategy selecting the given mode.
    #[must_use]
    pub fn new(mode: PartitionMode) -> Self {
        Self { mode }
    }

    fn device_info(
        topology: &Topology,
        model_memory_requirement: Option<f64>,
    ) -> BTreeMap<String, DeviceInfo> {
        topology
            .all_nodes()
            .map(|(id, caps)| {
                let max_fraction = match model_memory_requirement {
                    Some(requirement) if requirement > 0.0 => {
                        (caps.memory as f64 / requirement).min(1.0)
                    }
                    _ => 1.0,
                };
                (
                    id.to_string(),
                    DeviceInfo {
                        flops: caps.flops.fp32,
                        max_fraction,
                    },
                )
            })
            .collect()
    }

    fn optimize_throughput(device_info: &BTreeMap<String, DeviceInfo>) -> BTreeMap<String, f64> {
        let total_flops: f64 = device_info.values().map(|d| d.flops).sum();
        let mut shares: BTreeMap<String, f64> = BTreeMap::new();
        let mut unassigned = 1.0;

        for (id, info) in device_info {
            let initial = if total_flops > 0.0 {
                info.flops / total_flops
            } else {
                0.0
            };
            let assigned = initial.min(info.max_fraction);
            shares.insert(id.clone(), assigned);
            unassigned -= assigned;
        }

        redistribute_remainder(device_info, &mut shares, unassigned);
        shares
    }

    fn optimize_latency(device_info: &BTreeMap<String, DeviceInfo>) -> BTreeMap<String, f64> {
        let mut shares: BTreeMap<String, f64> =
            device_info.keys().map(|id| (id.clone(), 0.0)).collect();

        let Some((fastest_id, fastest)) = device_info
            .iter()
            .max_by(|a, b| a.1.flops.partial_cmp(&b.1.flops).unwrap())
        else {
            return shares;
        };

        let assigned = fastest.max_fraction.min(1.0);
        shares.insert(fastest_id.clone(), assigned);
        let mut remaining = 1.0 - assigned;

        if remaining > CONVERGENCE_EPSILON {
            let mut rest: Vec<(&String, &DeviceInfo)> =
                device_info.iter().filter(|(id, _)| *id != fastest_id).collect();
            rest.sort_by(|a, b| b.1.flops.partial_cmp(&a.1.flops).unwrap());
            for (id, info) in rest {
                if remaining <= CONVERGENCE_EPSILON {
                    break;
                }
                let take = info.max_fraction.min(remaining);
                shares.insert(id.clone(), take);
                remaining -= take;
            }
        }

        shares
    }

    fn optimize_balanced(
        device_info: &BTreeMap<String, DeviceInfo>,
        topology: &Topology,
    ) -> Vec<(String, f64)> {
        let mut shares = Self::optimize_throughput(device_info);

        let device_ids: Vec<String> = device_info.keys().cloned().collect();
        let order = min_latency_order(&device_ids, topology);

        let total_assigned: f64 = shares.values().sum();
        let scaling_factor = order
            .iter()
            .map(|id| {
                let fraction = shares.get(id).copied().unwrap_or(0.0);
                let max_fraction = device_info[id].max_fraction;
                if fraction > 0.0 {
                    max_fraction / fraction
                } else {
                    f64::INFINITY
                }
            })
            .fold(1.0 / total_assigned.max(f64::MIN_POSITIVE), f64::min);

        for id in &order {
            let share = shares.entry(id.clone()).or_insert(0.0);
            *share = (*share * scaling_factor).min(device_info[id].max_fraction);
        }

        let unassigned = 1.0 - shares.values().sum::<f64>();
        if unassigned > CONVERGENCE_EPSILON {
            redistribute_remainder(device_info, &mut shares, unassigned);
        }

        order
            .into_iter()
            .map(|id| {
                let share = shares.get(&id).copied().unwrap_or(0.0);
                (id, share)
            })
            .collect()
    }
}

/// Distribute `unassigned` share across devices still below their memory
/// cap, proportional to FLOPS, repeating until the remainder converges or
/// no device has spare capacity.
fn redistribute_remainder(
    device_info: &BTreeMap<String, DeviceInfo>,
    shares: &mut BTreeMap<String, f64>,
    mut unassigned: f64,
) {
    while unassigned > CONVERGENCE_EPSILON {
        let available: Vec<(&String, &DeviceInfo)> = device_info
            .iter()
            .filter(|(id, info)| shares[*id] < info.max_fraction - CONVERGENCE_EPSILON)
            .collect();
        if available.is_empty() {
            debug!(unassigned, "no device has spare capacity; stopping redistribution");
            break;
        }

        let total_available_flops: f64 = available.iter().map(|(_, info)| info.flops).sum();
        for (id, info) in available {
            let available_fraction = info.max_fraction - shares[id];
            let fraction_share = if total_available_flops > 0.0 {
                (info.flops / total_available_flops) * unassigned
            } else {
                0.0
            };
            let assignable = fraction_share.min(available_fraction);
            *shares.get_mut(id).unwrap() += assignable;
            unassigned -= assignable;
        }
    }

    for (id, info) in device_info {
        if let Some(share) = shares.get_mut(id) {
            *share = share.min(info.max_fraction);
        }
    }
}

/// Cyclic ordering of `device_ids` minimizing total ring latency, subject
/// to the hard rule that no consecutive edge may exceed
/// [`HIGH_LATENCY_THRESHOLD`]. Enumerates permutations for small `n`;
/// falls back to a greedy nearest-neighbor heuristic beyond
/// [`MAX_PERMUTATION_NODES`]. Falls back to insertion order if every
/// ordering violates the latency rule.
fn min_latency_order(device_ids: &[String], topology: &Topology) -> Vec<String> {
    if device_ids.len() <= MAX_PERMUTATION_NODES {
        min_latency_order_exhaustive(device_ids, topology)
    } else {
        min_latency_order_greedy(device_ids, topology)
    }
}

fn min_latency_order_exhaustive(device_ids: &[String], topology: &Topology) -> Vec<String> {
    let mut best: Option<(Vec<String>, f64)> = None;
    let mut perm: Vec<String> = device_ids.to_vec();
    permute(&mut perm, 0, &mut |candidate| {
        let mut total = 0.0;
        let mut disqualified = false;
        for pair in candidate.windows(2) {
            let latency = topology.get_latency(&pair[0], &pair[1]);
            if latency > HIGH_LATENCY_THRESHOLD {
                disqualified = true;
                break;
            }
            total += latency;
        }
        if disqualified {
            return;
        }
        if best.as_ref().is_none_or(|(_, best_total)| total < *best_total) {
            best = Some((candidate.to_vec(), total));
        }
    });

    best.map(|(order, _)| order)
        .unwrap_or_else(|| device_ids.to_vec())
}

/// Heap's algorithm, visiting every permutation of `items[k..]` in place.
fn permute(items: &mut Vec<String>, k: usize, visit: &mut impl FnMut(&[String])) {
    if k == items.len() {
        visit(items);
        return;
    }
    for i in k..items.len() {
        items.swap(k, i);
        permute(items, k + 1, visit);
        items.swap(k, i);
    }
}

fn min_latency_order_greedy(device_ids: &[String], topology: &Topology) -> Vec<String> {
    let mut remaining: Vec<String> = device_ids.to_vec();
    let mut order = vec![remaining.remove(0)];

    while !remaining.is_empty() {
        let current = order.last().unwrap();
        let (idx, _) = remaining
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                topology
                    .get_latency(current, a)
                    .partial_cmp(&topology.get_latency(current, b))
                    .unwrap()
            })
            .unwrap();
        order.push(remaining.remove(idx));
    }

    let has_high_latency = order
        .windows(2)
        .any(|pair| topology.get_latency(&pair[0], &pair[1]) > HIGH_LATENCY_THRESHOLD);
    if has_high_latency {
        device_ids.to_vec()
    } else {
        order
    }
}

impl PartitionStrategy for MemoryFlopsStrategy {
    fn partition(
        &self,
        topology: &Topology,
        model_memory_requirement: Option<f64>,
    ) -> Result<Vec<Partition>, PartitionError> {
        if topology.is_empty() {
            return Err(PartitionError::EmptyTopology);
        }

        let device_info = Self::device_info(topology, model_memory_requirement);

        let assignments: Vec<(String, f64)> = match self.mode {
            PartitionMode::Throughput => Self::optimize_throughput(&device_info).into_iter().collect(),
            PartitionMode::Latency => Self::optimize_latency(&device_info).into_iter().collect(),
            PartitionMode::Balanced => Self::optimize_balanced(&device_info, topology),
        };

        let mut sorted = assignments;
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut start = 0.0;
        let mut result = Vec::with_capacity(sorted.len());
        for (node_id, fraction) in sorted {
            let end = round5(start + fraction);
            result.push(Partition::new(node_id, round5(start), end));
            start = end;
        }
        coerce_last(&mut result);

        Ok(result)
    }
}
