//! Repository layer: SQL access to the four tree tables.
//!
//! # Responsibility
//! - Define the storage contract used by the tree services.
//! - Isolate SQLite query details from engine orchestration.
//!
//! # Invariants
//! - Repository methods never enforce tree-shape rules (cycles, unique root);
//!   services do.
//! - Read paths reject invalid persisted state instead of masking it.

pub mod tree_repo;
