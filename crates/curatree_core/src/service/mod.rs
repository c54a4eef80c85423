//! Tree engine services.
//!
//! # Responsibility
//! - Orchestrate repository calls into the query, cache, mutation,
//!   simplification, recommendation and import use-cases.
//! - Enforce tree-shape invariants the store does not enforce.
//!
//! All engines are `impl` blocks of one `TreeService`, split by concern.

pub mod cache;
pub mod import;
pub mod mutation;
pub mod recommend;
pub mod review;
pub mod simplify;
pub mod tree_service;
