//! Domain model for projects, cluster nodes and feature-vector objects.
//!
//! # Responsibility
//! - Define the plain value types passed between repository and services.
//! - Keep vector math used by aggregates in one place.
//!
//! # Invariants
//! - Every node is identified by a stable integer `NodeId`.
//! - Cached aggregates are only exposed when the node cache is valid.

pub mod node;
pub mod object;
pub mod vector;
