//! Cluster tree service: error taxonomy, construction and the query layer.
//!
//! # Responsibility
//! - Resolve parents and validate project/root rules on node creation.
//! - Provide read-path traversal (path, children, objects, projects).
//! - Own configuration, classifier, sampling RNG and progress observer.
//!
//! # Invariants
//! - A project never gets a second null-parent node.
//! - Node creation never produces an orphan: an unresolvable parent fails.
//! - Every returned node is cache-upgraded to at least the requested depth.

use crate::classifier::{Classifier, EuclideanClassifier};
use crate::config::TreeConfig;
use crate::model::node::{
    ChildQuery, InvalidNodeId, NewNode, Node, NodeId, ParentRef, Project, ProjectId,
};
use crate::model::object::ObjectRecord;
use crate::model::vector::VectorError;
use crate::observer::{NoopObserver, TreeEvent, TreeObserver};
use crate::repo::tree_repo::{TreeRepoError, TreeRepository};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::RefCell;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Coarse error classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeErrorKind {
    NotFound,
    InvalidArgument,
    StructuralViolation,
    /// Cached aggregates disagree with ground truth; not retryable.
    ConsistencyViolation,
    StorageFailure,
}

/// Errors from tree service operations.
#[derive(Debug)]
pub enum TreeServiceError {
    NodeNotFound(NodeId),
    ProjectNotFound(ProjectId),
    /// The project has no null-parent node.
    NoRoot(ProjectId),
    InvalidNodeId(InvalidNodeId),
    /// A patch tried to change a field that is never writable.
    ImmutableField(&'static str),
    InvalidConfig(&'static str),
    /// Vectors of different dimensions were combined.
    Vector(VectorError),
    /// Moving `node_id` under `parent_id` would create a cycle.
    CycleDetected { node_id: NodeId, parent_id: NodeId },
    /// No node with `orig_parent_id` exists in the project.
    NodeCreationFailed {
        project_id: ProjectId,
        orig_parent_id: i64,
    },
    /// Explicit parent does not exist in the node's project.
    ParentNotFound(NodeId),
    DuplicateRoot {
        project_id: ProjectId,
        root_id: NodeId,
    },
    /// Similarity search needs a centroid but the node has none.
    MissingCentroid(NodeId),
    ConsistencyViolation {
        node_id: NodeId,
        bottom_up: i64,
        ground_truth: i64,
    },
    /// Repository-level failure.
    Repo(TreeRepoError),
}

impl TreeServiceError {
    pub fn kind(&self) -> TreeErrorKind {
        match self {
            Self::NodeNotFound(_) | Self::ProjectNotFound(_) | Self::NoRoot(_) => {
                TreeErrorKind::NotFound
            }
            Self::InvalidNodeId(_)
            | Self::ImmutableField(_)
            | Self::InvalidConfig(_)
            | Self::Vector(_) => TreeErrorKind::InvalidArgument,
            Self::CycleDetected { .. }
            | Self::NodeCreationFailed { .. }
            | Self::ParentNotFound(_)
            | Self::DuplicateRoot { .. }
            | Self::MissingCentroid(_) => TreeErrorKind::StructuralViolation,
            Self::ConsistencyViolation { .. } => TreeErrorKind::ConsistencyViolation,
            Self::Repo(_) => TreeErrorKind::StorageFailure,
        }
    }
}

impl Display for TreeServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeNotFound(id) => write!(f, "node {id} is unknown"),
            Self::ProjectNotFound(id) => write!(f, "project {id} is unknown"),
            Self::NoRoot(id) => write!(f, "project {id} has no root node"),
            Self::InvalidNodeId(err) => write!(f, "{err}"),
            Self::ImmutableField(field) => write!(f, "field `{field}` cannot be updated"),
            Self::InvalidConfig(field) => write!(f, "invalid tree config: `{field}` must be > 0"),
            Self::Vector(err) => write!(f, "{err}"),
            Self::CycleDetected { node_id, parent_id } => write!(
                f,
                "relocating node {node_id} under {parent_id} would create a cycle"
            ),
            Self::NodeCreationFailed {
                project_id,
                orig_parent_id,
            } => write!(
                f,
                "node could not be created: no node with orig_id {orig_parent_id} in project {project_id}"
            ),
            Self::ParentNotFound(id) => write!(f, "parent node {id} is unknown"),
            Self::DuplicateRoot {
                project_id,
                root_id,
            } => write!(f, "project {project_id} already has root node {root_id}"),
            Self::MissingCentroid(id) => write!(f, "node {id} has no centroid"),
            Self::ConsistencyViolation {
                node_id,
                bottom_up,
                ground_truth,
            } => write!(
                f,
                "cache of node {node_id} is corrupt: bottom-up object count {bottom_up} != recursive count {ground_truth}"
            ),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TreeServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::Vector(err) => Some(err),
            Self::InvalidNodeId(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TreeRepoError> for TreeServiceError {
    fn from(value: TreeRepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<VectorError> for TreeServiceError {
    fn from(value: VectorError) -> Self {
        Self::Vector(value)
    }
}

impl From<InvalidNodeId> for TreeServiceError {
    fn from(value: InvalidNodeId) -> Self {
        Self::InvalidNodeId(value)
    }
}

pub type TreeServiceResult<T> = Result<T, TreeServiceError>;

/// Cluster tree service facade.
pub struct TreeService<R: TreeRepository, C: Classifier = EuclideanClassifier> {
    pub(crate) repo: R,
    pub(crate) classifier: C,
    pub(crate) config: TreeConfig,
    pub(crate) rng: RefCell<StdRng>,
    pub(crate) observer: Box<dyn TreeObserver>,
}

impl<R: TreeRepository> TreeService<R> {
    /// Creates service with default config and Euclidean classifier.
    pub fn new(repo: R) -> Self {
        Self::from_parts(repo, EuclideanClassifier, TreeConfig::default())
    }

    /// Creates service with a validated config.
    pub fn with_config(repo: R, config: TreeConfig) -> TreeServiceResult<Self> {
        config.validate().map_err(TreeServiceError::InvalidConfig)?;
        Ok(Self::from_parts(repo, EuclideanClassifier, config))
    }
}

impl<R: TreeRepository, C: Classifier> TreeService<R, C> {
    fn from_parts(repo: R, classifier: C, config: TreeConfig) -> Self {
        let rng = match config.sample_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            repo,
            classifier,
            config,
            rng: RefCell::new(rng),
            observer: Box::new(NoopObserver),
        }
    }

    /// Replaces the distance collaborator.
    pub fn with_classifier<C2: Classifier>(self, classifier: C2) -> TreeService<R, C2> {
        TreeService {
            repo: self.repo,
            classifier,
            config: self.config,
            rng: self.rng,
            observer: self.observer,
        }
    }

    /// Installs a progress observer.
    pub fn with_observer(mut self, observer: impl TreeObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub(crate) fn atomic<T>(
        &self,
        op: impl FnOnce() -> TreeServiceResult<T>,
    ) -> TreeServiceResult<T> {
        self.repo.atomically(op)
    }

    pub(crate) fn emit(&self, event: TreeEvent) {
        self.observer.on_event(&event);
    }

    /// Creates a project and returns its id. The root is created separately.
    pub fn create_project(&self, name: &str) -> TreeServiceResult<ProjectId> {
        let project_id = self.repo.insert_project(name)?;
        info!("event=project_create module=tree status=ok project_id={project_id}");
        Ok(project_id)
    }

    /// Deletes a project; its nodes and memberships cascade.
    pub fn delete_project(&self, project_id: ProjectId) -> TreeServiceResult<()> {
        if !self.repo.delete_project(project_id)? {
            return Err(TreeServiceError::ProjectNotFound(project_id));
        }
        info!("event=project_delete module=tree status=ok project_id={project_id}");
        Ok(())
    }

    /// Inserts object rows (vectors) that nodes can later reference.
    pub fn add_objects(&self, objects: &[ObjectRecord]) -> TreeServiceResult<usize> {
        self.atomic(|| Ok(self.repo.insert_objects(objects)?))
    }

    /// Creates a node, resolves its parent and attaches its objects.
    ///
    /// The new node's parent and ancestors are invalidated.
    pub fn create_node(&self, node: NewNode) -> TreeServiceResult<NodeId> {
        self.atomic(|| self.create_node_unguarded(&node, true))
    }

    /// Node creation inside an already open atomic scope.
    pub(crate) fn create_node_unguarded(
        &self,
        node: &NewNode,
        invalidate_parent: bool,
    ) -> TreeServiceResult<NodeId> {
        if !self.repo.project_exists(node.project_id)? {
            return Err(TreeServiceError::ProjectNotFound(node.project_id));
        }

        let parent_id = match node.parent {
            ParentRef::Root => {
                if let Some(root_id) = self.repo.root_id(node.project_id)? {
                    return Err(TreeServiceError::DuplicateRoot {
                        project_id: node.project_id,
                        root_id,
                    });
                }
                None
            }
            ParentRef::Node(parent_id) => {
                let parent = self
                    .repo
                    .get_node(parent_id)?
                    .filter(|parent| parent.project_id == node.project_id)
                    .ok_or(TreeServiceError::ParentNotFound(parent_id))?;
                Some(parent.node_id)
            }
            ParentRef::OrigId(orig_parent_id) => Some(
                self.repo
                    .node_id_by_orig_id(node.project_id, orig_parent_id)?
                    .ok_or(TreeServiceError::NodeCreationFailed {
                        project_id: node.project_id,
                        orig_parent_id,
                    })?,
            ),
        };

        let node_id = self.repo.insert_node(
            node.project_id,
            parent_id,
            node.orig_id,
            node.name.as_deref(),
            node.starred,
        )?;

        for batch in node.object_ids.chunks(self.config.object_batch_size) {
            self.repo.attach_objects(node_id, node.project_id, batch)?;
        }

        if invalidate_parent {
            if let Some(parent_id) = parent_id {
                self.repo.invalidate_path(parent_id)?;
            }
        }

        Ok(node_id)
    }

    /// Returns the unique null-parent node of a project.
    pub fn get_root_id(&self, project_id: ProjectId) -> TreeServiceResult<NodeId> {
        self.repo
            .root_id(project_id)?
            .ok_or(TreeServiceError::NoRoot(project_id))
    }

    /// Lists all projects that have a root.
    pub fn get_projects(&self) -> TreeServiceResult<Vec<Project>> {
        Ok(self.repo.list_projects(None)?)
    }

    /// Loads one project with its root id.
    pub fn get_project(&self, project_id: ProjectId) -> TreeServiceResult<Project> {
        self.repo
            .list_projects(Some(project_id))?
            .into_iter()
            .next()
            .ok_or(TreeServiceError::ProjectNotFound(project_id))
    }

    /// Loads one node, upgrading its cache to at least `cache_depth`.
    pub fn get_node(&self, node_id: NodeId, cache_depth: u32) -> TreeServiceResult<Node> {
        self.upgrade_node(node_id, cache_depth)
    }

    /// Lists children of a node, each upgraded to at least `cache_depth`.
    pub fn get_children(
        &self,
        node_id: NodeId,
        cache_depth: u32,
        query: &ChildQuery,
    ) -> TreeServiceResult<Vec<Node>> {
        self.require_node(node_id)?;
        self.repo
            .list_children(node_id, query)?
            .into_iter()
            .map(|child| self.ensure_cache(child, cache_depth))
            .collect()
    }

    /// Node ids from the project root down to `node_id`, inclusive.
    pub fn get_path_ids(&self, node_id: NodeId) -> TreeServiceResult<Vec<NodeId>> {
        let path = self.repo.path_ids(node_id)?;
        if path.is_empty() {
            return Err(TreeServiceError::NodeNotFound(node_id));
        }
        Ok(path)
    }

    /// Objects attached directly to a node.
    pub fn get_objects(
        &self,
        node_id: NodeId,
        offset: Option<u32>,
        limit: Option<u32>,
    ) -> TreeServiceResult<Vec<ObjectRecord>> {
        self.require_node(node_id)?;
        Ok(self.repo.list_objects(node_id, offset, limit)?)
    }

    /// Number of objects attached directly to a node (not recursive).
    pub fn get_n_objects(&self, node_id: NodeId) -> TreeServiceResult<i64> {
        self.require_node(node_id)?;
        Ok(self.repo.count_objects(node_id)?)
    }

    pub(crate) fn require_node(&self, node_id: NodeId) -> TreeServiceResult<Node> {
        self.repo
            .get_node(node_id)?
            .ok_or(TreeServiceError::NodeNotFound(node_id))
    }
}
