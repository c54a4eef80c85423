//! Dense `f32` feature vectors and the arithmetic used by node aggregates.
//!
//! # Invariants
//! - All vectors of one store share one dimension; mixing dimensions is an
//!   error, never silently truncated.
//! - Persisted form is a little-endian `f32` byte array.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Feature vector (embedding) of an object or a centroid.
pub type Vector = Vec<f32>;

/// Errors from vector arithmetic and blob decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VectorError {
    DimensionMismatch { expected: usize, found: usize },
    /// Blob length is not a multiple of `size_of::<f32>()`.
    MalformedBlob { len: usize },
}

impl Display for VectorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DimensionMismatch { expected, found } => {
                write!(f, "vector dimension mismatch: expected {expected}, found {found}")
            }
            Self::MalformedBlob { len } => {
                write!(f, "vector blob of {len} bytes is not a whole number of f32 values")
            }
        }
    }
}

impl Error for VectorError {}

/// Mean of `vectors`, scaled to unit L2 norm.
///
/// Returns `Ok(None)` when there is no input vector. A zero mean is returned
/// unscaled.
pub fn normalized_mean<'a, I>(vectors: I) -> Result<Option<Vector>, VectorError>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut sum: Option<Vec<f64>> = None;
    let mut count = 0usize;

    for vector in vectors {
        let acc = sum.get_or_insert_with(|| vec![0.0; vector.len()]);
        if acc.len() != vector.len() {
            return Err(VectorError::DimensionMismatch {
                expected: acc.len(),
                found: vector.len(),
            });
        }
        for (slot, value) in acc.iter_mut().zip(vector) {
            *slot += f64::from(*value);
        }
        count += 1;
    }

    let Some(sum) = sum else {
        return Ok(None);
    };

    let mut mean: Vector = sum.iter().map(|value| (value / count as f64) as f32).collect();
    l2_normalize(&mut mean);
    Ok(Some(mean))
}

/// Scales `vector` to unit length in place; zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector
        .iter()
        .map(|value| f64::from(*value).powi(2))
        .sum::<f64>()
        .sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value = (f64::from(*value) / norm) as f32;
        }
    }
}

/// Euclidean (L2) distance between two vectors of equal dimension.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f32, VectorError> {
    if a.len() != b.len() {
        return Err(VectorError::DimensionMismatch {
            expected: a.len(),
            found: b.len(),
        });
    }
    let squared: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| (f64::from(*x) - f64::from(*y)).powi(2))
        .sum();
    Ok(squared.sqrt() as f32)
}

/// Encodes a vector into its persisted little-endian representation.
pub fn encode_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|value| value.to_le_bytes()).collect()
}

/// Decodes a persisted little-endian `f32` blob.
pub fn decode_blob(bytes: &[u8]) -> Result<Vector, VectorError> {
    const WIDTH: usize = std::mem::size_of::<f32>();
    if bytes.len() % WIDTH != 0 {
        return Err(VectorError::MalformedBlob { len: bytes.len() });
    }
    Ok(bytes
        .chunks_exact(WIDTH)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
