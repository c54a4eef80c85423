//! Bulk project import from `(orig_node_id, orig_parent_id, object_ids)` rows.
//!
//! # Invariants
//! - The whole import is one atomic scope: a failed row leaves no project.
//! - A node is created only after its parent, whatever the row order.
//! - Parent resolution goes through `orig_id`, so no node is ever orphaned.

use crate::classifier::Classifier;
use crate::model::node::{NewNode, ProjectId};
use crate::model::object::ObjectId;
use crate::observer::TreeEvent;
use crate::repo::tree_repo::TreeRepository;
use crate::service::tree_service::{TreeService, TreeServiceError, TreeServiceResult};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One node of an externally computed hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRow {
    pub orig_node_id: i64,
    pub orig_parent_id: i64,
    #[serde(default)]
    pub object_ids: Vec<ObjectId>,
}

impl<R: TreeRepository, C: Classifier> TreeService<R, C> {
    /// Creates project `name` with root `root_orig_id` and all `rows` below it.
    ///
    /// Rows naming `root_orig_id` as their own node only contribute objects
    /// to the root. Referenced objects must already exist.
    ///
    /// # Errors
    /// - `NodeCreationFailed` for the smallest parent id never reached from
    ///   the root.
    pub fn import_project(
        &self,
        name: &str,
        root_orig_id: i64,
        rows: Vec<ImportRow>,
    ) -> TreeServiceResult<ProjectId> {
        self.atomic(|| {
            let project_id = self.repo.insert_project(name)?;
            let root_id = self.create_node_unguarded(
                &NewNode::root(project_id).with_orig_id(root_orig_id),
                false,
            )?;

            let mut objects_attached = 0;
            let mut by_parent: BTreeMap<i64, Vec<ImportRow>> = BTreeMap::new();
            for row in rows {
                if row.orig_node_id == root_orig_id {
                    for batch in row.object_ids.chunks(self.config.object_batch_size) {
                        objects_attached += self.repo.attach_objects(root_id, project_id, batch)?;
                    }
                } else {
                    by_parent.entry(row.orig_parent_id).or_default().push(row);
                }
            }

            let nodes_total: usize = by_parent.values().map(Vec::len).sum();
            let mut nodes_created = 0;
            let mut pending = vec![root_orig_id];

            while let Some(orig_parent_id) = pending.pop() {
                let Some(children) = by_parent.remove(&orig_parent_id) else {
                    continue;
                };
                for row in children {
                    objects_attached += row.object_ids.len();
                    let node = NewNode::child_of_orig(project_id, orig_parent_id)
                        .with_orig_id(row.orig_node_id)
                        .with_objects(row.object_ids);
                    self.create_node_unguarded(&node, false)?;

                    nodes_created += 1;
                    pending.push(row.orig_node_id);
                    self.emit(TreeEvent::ImportProgress {
                        project_id,
                        nodes_created,
                        nodes_total,
                        objects_attached,
                    });
                }
            }

            if let Some(&orig_parent_id) = by_parent.keys().next() {
                return Err(TreeServiceError::NodeCreationFailed {
                    project_id,
                    orig_parent_id,
                });
            }

            info!(
                "event=project_import module=import status=ok project_id={project_id} nodes={} objects={objects_attached}",
                nodes_created + 1
            );
            Ok(project_id)
        })
    }
}
