//! Path-local nearest-neighbor recommendations.
//!
//! # Responsibility
//! - Suggest nodes and objects near the query node's centroid, drawn from
//!   the levels between the query node and the project root.
//!
//! # Invariants
//! - Results are ordered by distance ascending; ties keep collection order.
//! - Collection walks the ancestors from the immediate parent upwards and
//!   never includes the root level.

use crate::classifier::Classifier;
use crate::model::node::{ChildQuery, Node, NodeId};
use crate::model::object::ObjectRecord;
use crate::model::vector::{euclidean_distance, Vector, VectorError};
use crate::repo::tree_repo::TreeRepository;
use crate::service::tree_service::{TreeService, TreeServiceError, TreeServiceResult};
use log::debug;

/// A recommended item with its distance to the query centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked<T> {
    pub item: T,
    pub distance: f32,
}

impl<R: TreeRepository, C: Classifier> TreeService<R, C> {
    /// Nodes near `node_id`, taken from siblings along its ancestor path.
    ///
    /// `max_n` defaults to `TreeConfig::recommend_limit`. Candidates without
    /// a centroid are skipped.
    ///
    /// # Errors
    /// - `MissingCentroid` when the query node's subtree has no vector.
    pub fn recommend_children(
        &self,
        node_id: NodeId,
        max_n: Option<usize>,
    ) -> TreeServiceResult<Vec<Ranked<Node>>> {
        let max_n = max_n.unwrap_or(self.config.recommend_limit);
        let depth = self.config.default_cache_depth;
        let (query, path) = self.recommendation_basis(node_id)?;

        let mut candidates = Vec::new();
        for &parent_id in walk_levels(&path) {
            for child in self.repo.list_children(parent_id, &ChildQuery::default())? {
                if path.contains(&child.node_id) {
                    continue;
                }
                candidates.push(self.ensure_cache(child, depth)?);
            }
            if candidates.len() > max_n {
                break;
            }
        }

        let ranked = rank(candidates, Node::centroid, &query, max_n)?;
        debug!(
            "event=recommend_children module=recommend status=ok node_id={node_id} results={}",
            ranked.len()
        );
        Ok(ranked)
    }

    /// Objects near `node_id`, taken from the nodes on its ancestor path.
    ///
    /// # Errors
    /// - `MissingCentroid` when the query node's subtree has no vector.
    pub fn recommend_objects(
        &self,
        node_id: NodeId,
        max_n: Option<usize>,
    ) -> TreeServiceResult<Vec<Ranked<ObjectRecord>>> {
        let max_n = max_n.unwrap_or(self.config.recommend_limit);
        let (query, path) = self.recommendation_basis(node_id)?;

        let mut candidates = Vec::new();
        for &parent_id in walk_levels(&path) {
            candidates.extend(self.repo.list_objects(parent_id, None, None)?);
            if candidates.len() > max_n {
                break;
            }
        }

        let ranked = rank(
            candidates,
            |object: &ObjectRecord| Some(object.vector.as_slice()),
            &query,
            max_n,
        )?;
        debug!(
            "event=recommend_objects module=recommend status=ok node_id={node_id} results={}",
            ranked.len()
        );
        Ok(ranked)
    }

    /// Query centroid and the root-first path of `node_id`.
    fn recommendation_basis(&self, node_id: NodeId) -> TreeServiceResult<(Vector, Vec<NodeId>)> {
        let node = self.upgrade_node(node_id, self.config.default_cache_depth)?;
        let query = node
            .centroid()
            .ok_or(TreeServiceError::MissingCentroid(node_id))?
            .to_vec();
        let path = self.get_path_ids(node_id)?;
        Ok((query, path))
    }
}

/// Ancestors strictly between the root and the last node, nearest first.
///
/// The root level is skipped on purpose, so direct children of the root get
/// no candidates.
fn walk_levels(path: &[NodeId]) -> impl Iterator<Item = &NodeId> {
    path.get(1..path.len().saturating_sub(1))
        .unwrap_or(&[])
        .iter()
        .rev()
}

fn rank<T, F>(
    candidates: Vec<T>,
    vector_of: F,
    query: &[f32],
    max_n: usize,
) -> Result<Vec<Ranked<T>>, VectorError>
where
    F: Fn(&T) -> Option<&[f32]>,
{
    let mut ranked = Vec::with_capacity(candidates.len());
    for item in candidates {
        let Some(vector) = vector_of(&item) else {
            continue;
        };
        let distance = euclidean_distance(vector, query)?;
        ranked.push(Ranked { item, distance });
    }
    ranked.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    ranked.truncate(max_n);
    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::walk_levels;

    #[test]
    fn walk_levels_skips_root_and_query_node() {
        let path = [1, 2, 3, 4];
        assert_eq!(walk_levels(&path).copied().collect::<Vec<_>>(), vec![3, 2]);
    }

    #[test]
    fn walk_levels_is_empty_near_the_root() {
        assert_eq!(walk_levels(&[1]).count(), 0);
        assert_eq!(walk_levels(&[1, 2]).count(), 0);
    }
}
