//! Feature-vector object model.

use crate::model::vector::Vector;
use serde::{Deserialize, Serialize};

/// External object identifier (e.g. an image id from the source catalogue).
pub type ObjectId = String;

/// Immutable object row with its feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub object_id: ObjectId,
    pub vector: Vector,
    /// Optional location of the rendered object (image path, URL).
    pub path: Option<String>,
}

impl ObjectRecord {
    pub fn new(object_id: impl Into<ObjectId>, vector: Vector) -> Self {
        Self {
            object_id: object_id.into(),
            vector,
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}
