//! Review helpers: where to look next and which clusters are already marked.

use crate::classifier::Classifier;
use crate::model::node::{Node, NodeId};
use crate::repo::tree_repo::TreeRepository;
use crate::service::tree_service::{TreeService, TreeServiceResult};

impl<R: TreeRepository, C: Classifier> TreeService<R, C> {
    /// Deepest branching node reachable from `node_id` without entering an
    /// approved or starred node. Ties go to the lowest node id.
    ///
    /// Returns `None` when no reachable node has children.
    pub fn get_tip(&self, node_id: NodeId) -> TreeServiceResult<Option<NodeId>> {
        self.require_node(node_id)?;
        Ok(self.repo.tip_id(node_id)?)
    }

    /// Shallowest starred nodes below `root_id` (inclusive), upgraded to
    /// `cache_depth` and ordered by node id.
    pub fn get_minlevel_starred(
        &self,
        root_id: NodeId,
        cache_depth: u32,
    ) -> TreeServiceResult<Vec<Node>> {
        self.require_node(root_id)?;
        self.repo
            .minlevel_starred_ids(root_id)?
            .into_iter()
            .map(|node_id| self.upgrade_node(node_id, cache_depth))
            .collect()
    }
}
