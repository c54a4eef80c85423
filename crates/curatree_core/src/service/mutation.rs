//! Structural mutations: merge, relocation and field updates.
//!
//! # Invariants
//! - Every operation runs in one atomic scope; a failed guard writes nothing.
//! - Relocation never creates a cycle: the destination path is checked first.
//! - Relocation and merge invalidate the former parents/owners, so no
//!   valid cache overstates a subtree.

use crate::classifier::Classifier;
use crate::model::node::{Node, NodeId, NodePatch};
use crate::model::object::ObjectId;
use crate::observer::TreeEvent;
use crate::repo::tree_repo::TreeRepository;
use crate::service::tree_service::{TreeService, TreeServiceError, TreeServiceResult};
use log::{debug, info, warn};

impl<R: TreeRepository, C: Classifier> TreeService<R, C> {
    /// Merges `source` into `dest`: objects and children move to `dest`,
    /// then `source` is deleted.
    ///
    /// The former parent of `source` and its ancestors are invalidated;
    /// callers invalidate the path of `dest`.
    ///
    /// # Errors
    /// - `NodeNotFound` when either node is unknown.
    /// - `CycleDetected` when `dest` is `source` or lies below it.
    pub fn merge_node_into(&self, source: NodeId, dest: NodeId) -> TreeServiceResult<()> {
        self.atomic(|| {
            let source_node = self.require_node(source)?;
            let dest_path = self.get_path_ids(dest)?;
            if dest_path.contains(&source) {
                return Err(TreeServiceError::CycleDetected {
                    node_id: source,
                    parent_id: dest,
                });
            }

            let objects = self.repo.move_node_objects(source, dest)?;
            let children = self.repo.move_children(source, dest)?;
            self.repo.delete_node(source)?;
            if let Some(parent_id) = source_node.parent_id {
                self.repo.invalidate_path(parent_id)?;
            }

            debug!(
                "event=node_merge module=mutation status=ok source={source} dest={dest} objects={objects} children={children}"
            );
            Ok(())
        })?;

        self.emit(TreeEvent::NodeMerged { source, dest });
        Ok(())
    }

    /// Moves `node_ids` under `new_parent`. Returns the number of nodes moved.
    ///
    /// # Errors
    /// - `NodeNotFound` when `new_parent` is unknown.
    /// - `CycleDetected` when a moved node is `new_parent` or one of its
    ///   ancestors; nothing is written in that case.
    pub fn relocate_nodes(
        &self,
        node_ids: &[NodeId],
        new_parent: NodeId,
    ) -> TreeServiceResult<usize> {
        if node_ids.is_empty() {
            return Ok(0);
        }

        let moved = self.atomic(|| {
            let parent_path = self.get_path_ids(new_parent)?;
            if let Some(&node_id) = node_ids.iter().find(|id| parent_path.contains(id)) {
                warn!(
                    "event=node_relocate module=mutation status=error error_code=cycle_detected node_id={node_id} parent_id={new_parent}"
                );
                return Err(TreeServiceError::CycleDetected {
                    node_id,
                    parent_id: new_parent,
                });
            }

            let former_parents = self.repo.parent_ids_of(node_ids)?;
            let moved = self.repo.set_parent(node_ids, new_parent)?;

            self.repo.invalidate_path(new_parent)?;
            for parent_id in former_parents {
                self.repo.invalidate_path(parent_id)?;
            }
            Ok(moved)
        })?;

        info!("event=node_relocate module=mutation status=ok parent_id={new_parent} moved={moved}");
        Ok(moved)
    }

    /// Reassigns objects to `dest` within `dest`'s project.
    ///
    /// Memberships in other projects are left alone. Returns the number of
    /// memberships moved.
    pub fn relocate_objects(
        &self,
        object_ids: &[ObjectId],
        dest: NodeId,
    ) -> TreeServiceResult<usize> {
        if object_ids.is_empty() {
            return Ok(0);
        }

        let moved = self.atomic(|| {
            let dest_node = self.require_node(dest)?;
            let former_owners = self.repo.owner_ids_of(dest_node.project_id, object_ids)?;
            let moved = self
                .repo
                .move_objects(dest_node.project_id, object_ids, dest)?;

            self.repo.invalidate_path(dest)?;
            for owner_id in former_owners.into_iter().filter(|id| *id != dest) {
                self.repo.invalidate_path(owner_id)?;
            }
            Ok(moved)
        })?;

        info!("event=object_relocate module=mutation status=ok node_id={dest} moved={moved}");
        Ok(moved)
    }

    /// Applies a field patch to one node.
    ///
    /// A `parent_id` change is logged and guarded like `relocate_nodes`;
    /// prefer that operation.
    ///
    /// # Errors
    /// - `ImmutableField` when the patch carries `node_id`.
    /// - `NodeNotFound` when the node is unknown.
    /// - `ParentNotFound` when the new parent is not in the node's project.
    /// - `CycleDetected` when the new parent is the node or lies below it.
    /// - `DuplicateRoot` when a non-root node would lose its parent.
    pub fn update_node(&self, node_id: NodeId, patch: &NodePatch) -> TreeServiceResult<()> {
        if patch.node_id.is_some() {
            return Err(TreeServiceError::ImmutableField("node_id"));
        }

        let changed = self.atomic(|| {
            let node = self.require_node(node_id)?;
            if let Some(new_parent) = patch.parent_id {
                warn!("event=node_update module=mutation status=warn node_id={node_id} field=parent_id");
                self.check_new_parent(&node, new_parent)?;
            }

            let changed = self.repo.patch_node(node_id, patch)?;
            if let Some(Some(new_parent)) = patch.parent_id {
                if node.parent_id != Some(new_parent) {
                    self.repo.invalidate_path(new_parent)?;
                    if let Some(old_parent) = node.parent_id {
                        self.repo.invalidate_path(old_parent)?;
                    }
                }
            }
            Ok(changed)
        })?;
        if changed == 0 {
            return Err(TreeServiceError::NodeNotFound(node_id));
        }
        Ok(())
    }

    fn check_new_parent(
        &self,
        node: &Node,
        new_parent: Option<NodeId>,
    ) -> TreeServiceResult<()> {
        let Some(parent_id) = new_parent else {
            return match node.parent_id {
                None => Ok(()),
                Some(_) => Err(TreeServiceError::DuplicateRoot {
                    project_id: node.project_id,
                    root_id: self.get_root_id(node.project_id)?,
                }),
            };
        };

        self.repo
            .get_node(parent_id)?
            .filter(|parent| parent.project_id == node.project_id)
            .ok_or(TreeServiceError::ParentNotFound(parent_id))?;
        if self.get_path_ids(parent_id)?.contains(&node.node_id) {
            warn!(
                "event=node_update module=mutation status=error error_code=cycle_detected node_id={} parent_id={parent_id}",
                node.node_id
            );
            return Err(TreeServiceError::CycleDetected {
                node_id: node.node_id,
                parent_id,
            });
        }
        Ok(())
    }
}
