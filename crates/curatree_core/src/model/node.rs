//! Project and cluster-node model.
//!
//! # Invariants
//! - A project owns exactly one root (`parent_id == None`).
//! - `Node::cache` is `None` whenever the persisted `cache_depth` is 0.
//! - `NodeCache::depth` is always > 0.

use crate::model::object::ObjectId;
use crate::model::vector::Vector;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Stable node identifier assigned by the store.
pub type NodeId = i64;

/// Stable project identifier assigned by the store.
pub type ProjectId = i64;

/// Largest cache depth ever persisted; requests above it are clamped.
pub const CACHE_DEPTH_MAX: u32 = 0x00FF_FFFF;

/// Number of representative objects kept per node.
pub const TYPE_OBJECT_COUNT: usize = 9;

/// Project read model joined with its root node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub project_id: ProjectId,
    pub name: String,
    pub root_node_id: NodeId,
}

/// Cached aggregates of a node subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCache {
    /// Number of descendant levels reflected in the values below.
    pub depth: u32,
    /// Unit-length mean vector; `None` when no vector exists in the subtree.
    pub centroid: Option<Vector>,
    pub type_objects: Vec<ObjectId>,
    pub own_type_objects: Vec<ObjectId>,
    pub recursive_object_count: i64,
}

impl NodeCache {
    /// Returns whether this cache satisfies a request for `depth`.
    pub fn satisfies(&self, depth: u32) -> bool {
        self.depth >= depth
    }
}

/// Cluster node read model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub project_id: ProjectId,
    /// `None` only for the project root.
    pub parent_id: Option<NodeId>,
    /// Identifier from the imported hierarchy, if any.
    pub orig_id: Option<i64>,
    pub name: Option<String>,
    pub starred: bool,
    pub approved: bool,
    /// Valid cached aggregates, `None` when stale.
    pub cache: Option<NodeCache>,
    /// Number of direct child nodes at read time.
    pub n_children: i64,
}

impl Node {
    /// Persisted cache depth; 0 means stale.
    pub fn cache_depth(&self) -> u32 {
        self.cache.as_ref().map_or(0, |cache| cache.depth)
    }

    pub fn centroid(&self) -> Option<&[f32]> {
        self.cache
            .as_ref()
            .and_then(|cache| cache.centroid.as_deref())
    }

    pub fn recursive_object_count(&self) -> Option<i64> {
        self.cache.as_ref().map(|cache| cache.recursive_object_count)
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// How the parent of a new node is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentRef {
    /// The new node becomes the project root.
    Root,
    /// Parent is an existing node id.
    Node(NodeId),
    /// Parent is the node of the same project carrying this `orig_id`.
    OrigId(i64),
}

/// Input for node creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNode {
    pub project_id: ProjectId,
    pub orig_id: Option<i64>,
    pub parent: ParentRef,
    pub object_ids: Vec<ObjectId>,
    pub name: Option<String>,
    pub starred: bool,
}

impl NewNode {
    /// Root node of `project_id`.
    pub fn root(project_id: ProjectId) -> Self {
        Self {
            project_id,
            orig_id: None,
            parent: ParentRef::Root,
            object_ids: Vec::new(),
            name: None,
            starred: false,
        }
    }

    /// Child of an existing node.
    pub fn child_of(project_id: ProjectId, parent_id: NodeId) -> Self {
        Self {
            parent: ParentRef::Node(parent_id),
            ..Self::root(project_id)
        }
    }

    /// Child resolved through the import-time identifier of its parent.
    pub fn child_of_orig(project_id: ProjectId, orig_parent_id: i64) -> Self {
        Self {
            parent: ParentRef::OrigId(orig_parent_id),
            ..Self::root(project_id)
        }
    }

    pub fn with_orig_id(mut self, orig_id: i64) -> Self {
        self.orig_id = Some(orig_id);
        self
    }

    pub fn with_objects<I, S>(mut self, object_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ObjectId>,
    {
        self.object_ids = object_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn starred(mut self, starred: bool) -> Self {
        self.starred = starred;
        self
    }
}

/// Field patch for `update_node`.
///
/// `None` leaves a field untouched; `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePatch {
    /// Present only to be rejected: node ids are immutable.
    pub node_id: Option<NodeId>,
    /// Accepted with a warning and a cycle check; prefer `relocate_nodes`.
    pub parent_id: Option<Option<NodeId>>,
    pub name: Option<Option<String>>,
    pub starred: Option<bool>,
    pub approved: Option<bool>,
}

impl NodePatch {
    pub fn is_empty(&self) -> bool {
        self.node_id.is_none()
            && self.parent_id.is_none()
            && self.name.is_none()
            && self.starred.is_none()
            && self.approved.is_none()
    }
}

/// Starred-state filter for child listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StarFilter {
    Starred,
    Unstarred,
}

/// Sort key for child listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildOrder {
    NodeId,
    Name,
    ChildCount,
    ObjectCount,
}

/// Sort direction for child listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Options for `get_children`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChildQuery {
    pub order_by: Option<(ChildOrder, SortDirection)>,
    pub include: Option<StarFilter>,
}

impl ChildQuery {
    pub fn ordered(order: ChildOrder, direction: SortDirection) -> Self {
        Self {
            order_by: Some((order, direction)),
            include: None,
        }
    }

    pub fn only(mut self, include: StarFilter) -> Self {
        self.include = Some(include);
        self
    }
}

/// A node id supplied as text could not be parsed as an integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidNodeId(pub String);

impl Display for InvalidNodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "node id is not an integer: `{}`", self.0)
    }
}

impl Error for InvalidNodeId {}

/// Parses a textual node id (from a URL, CLI argument or form field).
pub fn parse_node_id(value: &str) -> Result<NodeId, InvalidNodeId> {
    value
        .trim()
        .parse::<NodeId>()
        .map_err(|_| InvalidNodeId(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{parse_node_id, InvalidNodeId, NodeCache};

    #[test]
    fn parse_node_id_accepts_integers_only() {
        assert_eq!(parse_node_id(" 42 ").unwrap(), 42);
        assert_eq!(
            parse_node_id("4.2").unwrap_err(),
            InvalidNodeId("4.2".to_string())
        );
        assert!(parse_node_id("root").is_err());
    }

    #[test]
    fn cache_satisfies_requests_up_to_its_depth() {
        let cache = NodeCache {
            depth: 3,
            centroid: None,
            type_objects: Vec::new(),
            own_type_objects: Vec::new(),
            recursive_object_count: 0,
        };
        assert!(cache.satisfies(1));
        assert!(cache.satisfies(3));
        assert!(!cache.satisfies(4));
    }
}
