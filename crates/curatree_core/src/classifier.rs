//! Distance collaborator used to score objects against child centroids.
//!
//! The engine only consumes the per-object maximum over all centroids, see
//! `Classifier::max_distances`.

use crate::model::vector::{euclidean_distance, VectorError};

/// Scores object vectors against a set of centroids.
pub trait Classifier {
    /// Returns one row per centroid, each holding one distance per vector.
    fn distances(
        &self,
        centroids: &[&[f32]],
        vectors: &[&[f32]],
    ) -> Result<Vec<Vec<f32>>, VectorError>;

    /// Largest distance of each vector to any centroid.
    ///
    /// Returns an empty list when there is no centroid.
    fn max_distances(
        &self,
        centroids: &[&[f32]],
        vectors: &[&[f32]],
    ) -> Result<Vec<f32>, VectorError> {
        if centroids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.distances(centroids, vectors)?;
        let mut max = vec![f32::NEG_INFINITY; vectors.len()];
        for row in rows {
            for (slot, distance) in max.iter_mut().zip(row) {
                *slot = slot.max(distance);
            }
        }
        Ok(max)
    }
}

/// Plain Euclidean distance to every centroid.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanClassifier;

impl Classifier for EuclideanClassifier {
    fn distances(
        &self,
        centroids: &[&[f32]],
        vectors: &[&[f32]],
    ) -> Result<Vec<Vec<f32>>, VectorError> {
        centroids
            .iter()
            .map(|centroid| {
                vectors
                    .iter()
                    .map(|vector| euclidean_distance(centroid, vector))
                    .collect::<Result<Vec<f32>, VectorError>>()
            })
            .collect()
    }
}
