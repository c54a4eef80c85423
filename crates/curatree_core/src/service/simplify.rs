//! Tree simplification passes.
//!
//! # Invariants
//! - Every merge is its own atomic step followed by invalidation of the
//!   surviving node's path; a pass is never one transaction.
//! - Objects stay reachable from the root: merges only move, never drop.

use crate::classifier::Classifier;
use crate::model::node::{ChildQuery, NodeId};
use crate::observer::{SimplifyPass, TreeEvent};
use crate::repo::tree_repo::TreeRepository;
use crate::service::tree_service::{TreeService, TreeServiceResult};
use log::info;

/// Number of children that makes a node a fork.
const FORK_DEGREE: i64 = 2;

impl<R: TreeRepository, C: Classifier> TreeService<R, C> {
    /// Collapses single-fork chains below `root_id`.
    ///
    /// A node with exactly one fork child absorbs it and is revisited; a node
    /// with several fork children has each of them visited. Returns the
    /// number of merges.
    pub fn flatten_tree(&self, root_id: NodeId) -> TreeServiceResult<usize> {
        self.require_node(root_id)?;
        let mut stack = vec![root_id];
        let mut merged = 0;

        while let Some(node_id) = stack.pop() {
            let forks: Vec<NodeId> = self
                .repo
                .list_children(node_id, &ChildQuery::default())?
                .into_iter()
                .filter(|child| child.n_children == FORK_DEGREE)
                .map(|child| child.node_id)
                .collect();

            match forks.as_slice() {
                [] => {}
                [fork] => {
                    self.absorb(*fork, node_id)?;
                    merged += 1;
                    stack.push(node_id);
                }
                _ => stack.extend(forks.iter().copied()),
            }
        }

        self.finish_pass(SimplifyPass::Flatten, root_id, merged);
        Ok(merged)
    }

    /// Removes every degree-1 chain below `root_id`.
    ///
    /// A node with exactly one child absorbs it and is revisited. Returns the
    /// number of merges.
    pub fn prune_chains(&self, root_id: NodeId) -> TreeServiceResult<usize> {
        self.require_node(root_id)?;
        let mut stack = vec![root_id];
        let mut merged = 0;

        while let Some(node_id) = stack.pop() {
            let children = self.repo.child_ids(node_id)?;
            match children.as_slice() {
                [] => {}
                [only] => {
                    self.absorb(*only, node_id)?;
                    merged += 1;
                    stack.push(node_id);
                }
                _ => stack.extend(children.iter().copied()),
            }
        }

        self.finish_pass(SimplifyPass::PruneChains, root_id, merged);
        Ok(merged)
    }

    fn absorb(&self, source: NodeId, dest: NodeId) -> TreeServiceResult<()> {
        self.atomic(|| {
            self.merge_node_into(source, dest)?;
            self.repo.invalidate_path(dest)?;
            Ok(())
        })
    }

    fn finish_pass(&self, pass: SimplifyPass, root_id: NodeId, merged: usize) {
        info!(
            "event=tree_simplify module=simplify status=ok pass={} root_id={root_id} merged={merged}",
            pass.as_str()
        );
        self.emit(TreeEvent::SimplifyFinished { pass, merged });
    }
}
