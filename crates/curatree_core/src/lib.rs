//! Core engine for curating hierarchical clusterings of feature vectors.
//! This crate owns the tree invariants and the cached-aggregate protocol.

pub mod classifier;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod observer;
pub mod repo;
pub mod service;

pub use classifier::{Classifier, EuclideanClassifier};
pub use config::TreeConfig;
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::node::{
    parse_node_id, ChildOrder, ChildQuery, InvalidNodeId, NewNode, Node, NodeCache, NodeId,
    NodePatch, ParentRef, Project, ProjectId, SortDirection, StarFilter, CACHE_DEPTH_MAX,
    TYPE_OBJECT_COUNT,
};
pub use model::object::{ObjectId, ObjectRecord};
pub use model::vector::{Vector, VectorError};
pub use observer::{NoopObserver, SimplifyPass, TreeEvent, TreeObserver};
pub use repo::tree_repo::{SqliteTreeRepository, TreeRepoError, TreeRepoResult, TreeRepository};
pub use service::import::ImportRow;
pub use service::recommend::Ranked;
pub use service::tree_service::{
    TreeErrorKind, TreeService, TreeServiceError, TreeServiceResult,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
