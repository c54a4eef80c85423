//! Cache engine: bottom-up aggregate computation and invalidation.
//!
//! # Invariants
//! - A node is only recomputed after all of its children are valid to
//!   `depth - 1`; the traversal uses an explicit stack.
//! - Bottom-up recursive object counts must equal the recursive query, any
//!   mismatch aborts the whole upgrade.
//! - Invalidation only lowers `cache_depth`, it never writes aggregates.

use crate::classifier::Classifier;
use crate::model::node::{
    ChildQuery, Node, NodeCache, NodeId, CACHE_DEPTH_MAX, TYPE_OBJECT_COUNT,
};
use crate::model::object::{ObjectId, ObjectRecord};
use crate::model::vector::{normalized_mean, Vector};
use crate::observer::TreeEvent;
use crate::repo::tree_repo::TreeRepository;
use crate::service::tree_service::{TreeService, TreeServiceError, TreeServiceResult};
use log::{debug, error};
use rand::seq::SliceRandom;

enum Visit {
    Enter { node_id: NodeId, depth: u32 },
    Compute { node_id: NodeId, depth: u32 },
}

impl<R: TreeRepository, C: Classifier> TreeService<R, C> {
    /// Marks the node and every ancestor up to the root as stale.
    ///
    /// Returns the number of nodes touched.
    pub fn invalidate_node_and_ancestors(&self, node_id: NodeId) -> TreeServiceResult<usize> {
        let touched = self.repo.invalidate_path(node_id)?;
        if touched == 0 {
            return Err(TreeServiceError::NodeNotFound(node_id));
        }
        debug!("event=cache_invalidate module=cache status=ok node_id={node_id} touched={touched}");
        Ok(touched)
    }

    /// Loads a node and makes its cache valid for `depth`.
    pub(crate) fn upgrade_node(&self, node_id: NodeId, depth: u32) -> TreeServiceResult<Node> {
        let node = self.require_node(node_id)?;
        self.ensure_cache(node, depth)
    }

    /// Returns `node` unchanged if its cache satisfies `depth`, else recomputes.
    pub(crate) fn ensure_cache(&self, node: Node, depth: u32) -> TreeServiceResult<Node> {
        let depth = depth.min(CACHE_DEPTH_MAX);
        if depth == 0 || node.cache_depth() >= depth {
            return Ok(node);
        }

        let node_id = node.node_id;
        self.atomic(|| self.upgrade_subtree(node_id, depth))?;
        self.require_node(node_id)
    }

    fn upgrade_subtree(&self, node_id: NodeId, depth: u32) -> TreeServiceResult<()> {
        let mut stack = vec![Visit::Enter { node_id, depth }];

        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter { node_id, depth } => {
                    if depth == 0 {
                        continue;
                    }
                    let node = self.require_node(node_id)?;
                    if node.cache_depth() >= depth {
                        continue;
                    }
                    stack.push(Visit::Compute { node_id, depth });
                    if node.n_children > 0 {
                        for child_id in self.repo.child_ids(node_id)? {
                            stack.push(Visit::Enter {
                                node_id: child_id,
                                depth: depth - 1,
                            });
                        }
                    }
                }
                Visit::Compute { node_id, depth } => {
                    let cache = self.compute_cache(node_id, depth)?;
                    self.repo.store_cache(node_id, &cache)?;
                    debug!(
                        "event=cache_upgrade module=cache status=ok node_id={node_id} depth={depth} recursive_object_count={} has_centroid={}",
                        cache.recursive_object_count,
                        cache.centroid.is_some()
                    );
                    self.emit(TreeEvent::NodeUpgraded { node_id, depth });
                }
            }
        }

        Ok(())
    }

    fn compute_cache(&self, node_id: NodeId, depth: u32) -> TreeServiceResult<NodeCache> {
        let children = self.repo.list_children(node_id, &ChildQuery::default())?;
        let sample_limit = u32::try_from(self.config.centroid_sample_size).unwrap_or(u32::MAX);
        let objects = self.repo.list_objects(node_id, None, Some(sample_limit))?;
        let n_objects = self.repo.count_objects(node_id)?;

        let centroid = centroid_of(&children, &objects)?;
        let own_type_objects = self.own_type_objects(&children, &objects)?;
        let type_objects = self.type_objects(&children, &objects)?;

        let ground_truth = self.repo.count_objects_in_subtree(node_id)?;
        let recursive_object_count = match bottom_up_count(&children, n_objects) {
            Some(bottom_up) if bottom_up != ground_truth => {
                error!(
                    "event=cache_upgrade module=cache status=error error_code=consistency_violation node_id={node_id} bottom_up={bottom_up} ground_truth={ground_truth}"
                );
                return Err(TreeServiceError::ConsistencyViolation {
                    node_id,
                    bottom_up,
                    ground_truth,
                });
            }
            Some(bottom_up) => bottom_up,
            None => ground_truth,
        };

        Ok(NodeCache {
            depth,
            centroid,
            type_objects,
            own_type_objects,
            recursive_object_count,
        })
    }

    /// Up to nine objects sampled across randomly chosen children.
    fn type_objects(
        &self,
        children: &[Node],
        objects: &[ObjectRecord],
    ) -> TreeServiceResult<Vec<ObjectId>> {
        if children.is_empty() {
            return Ok(objects
                .iter()
                .take(TYPE_OBJECT_COUNT)
                .map(|object| object.object_id.clone())
                .collect());
        }

        let sampled: Vec<NodeId> = {
            let mut rng = self.rng.borrow_mut();
            children
                .choose_multiple(&mut *rng, TYPE_OBJECT_COUNT)
                .map(|child| child.node_id)
                .collect()
        };

        let limit = TYPE_OBJECT_COUNT as u32;
        let mut per_child = Vec::with_capacity(sampled.len());
        for child_id in sampled {
            let ids = self
                .repo
                .list_objects(child_id, None, Some(limit))?
                .into_iter()
                .map(|object| object.object_id)
                .collect::<Vec<_>>();
            per_child.push(ids);
        }

        Ok(round_robin(per_child, TYPE_OBJECT_COUNT))
    }

    /// Own objects farthest from every child centroid, farthest first.
    fn own_type_objects(
        &self,
        children: &[Node],
        objects: &[ObjectRecord],
    ) -> TreeServiceResult<Vec<ObjectId>> {
        let centroids: Vec<&[f32]> = children.iter().filter_map(Node::centroid).collect();
        if centroids.is_empty() || objects.is_empty() {
            return Ok(Vec::new());
        }

        let vectors: Vec<&[f32]> = objects.iter().map(|object| object.vector.as_slice()).collect();
        let max_distances = self.classifier.max_distances(&centroids, &vectors)?;

        let mut order: Vec<usize> = (0..objects.len()).collect();
        order.sort_by(|&a, &b| max_distances[b].total_cmp(&max_distances[a]));

        Ok(order
            .into_iter()
            .take(TYPE_OBJECT_COUNT)
            .map(|index| objects[index].object_id.clone())
            .collect())
    }
}

/// Mean of child centroids, falling back to own object vectors.
fn centroid_of(children: &[Node], objects: &[ObjectRecord]) -> TreeServiceResult<Option<Vector>> {
    let child_centroids: Vec<&[f32]> = children.iter().filter_map(Node::centroid).collect();
    let centroid = if child_centroids.is_empty() {
        normalized_mean(objects.iter().map(|object| object.vector.as_slice()))?
    } else {
        normalized_mean(child_centroids)?
    };
    Ok(centroid)
}

/// Own count plus children's cached counts; `None` if any child is stale.
fn bottom_up_count(children: &[Node], n_objects: i64) -> Option<i64> {
    children
        .iter()
        .map(Node::recursive_object_count)
        .sum::<Option<i64>>()
        .map(|sum| sum + n_objects)
}

/// Interleaves `lists` one element at a time until `limit` items are taken.
fn round_robin<T>(lists: Vec<Vec<T>>, limit: usize) -> Vec<T> {
    let mut iters: Vec<_> = lists.into_iter().map(Vec::into_iter).collect();
    let mut out = Vec::with_capacity(limit);
    while out.len() < limit && !iters.is_empty() {
        iters.retain_mut(|iter| match iter.next() {
            Some(item) => {
                if out.len() < limit {
                    out.push(item);
                }
                true
            }
            None => false,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::round_robin;

    #[test]
    fn round_robin_interleaves_uneven_lists() {
        let lists = vec![vec!['A', 'B', 'C'], vec!['D'], vec!['E', 'F']];
        assert_eq!(round_robin(lists, 9), vec!['A', 'D', 'E', 'B', 'F', 'C']);
    }

    #[test]
    fn round_robin_stops_at_limit() {
        let lists = vec![vec![1, 2, 3], vec![4, 5, 6]];
        assert_eq!(round_robin(lists, 3), vec![1, 4, 2]);
    }

    #[test]
    fn round_robin_of_nothing_is_empty() {
        let lists: Vec<Vec<u8>> = vec![Vec::new(), Vec::new()];
        assert!(round_robin(lists, 9).is_empty());
    }
}
