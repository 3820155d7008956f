//! # Mesh Types
//!
//! Shared data model for the mesh discovery and partitioning core:
//! device capability descriptors and the topology graph they populate.

#![warn(missing_docs)]

mod capabilities;
mod topology;

pub use capabilities::{CapabilitiesError, DeviceCapabilities, DeviceFlops};
pub use topology::Topology;
