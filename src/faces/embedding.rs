//! Face embedding vectors, their distance metric, and blob encoding.

use serde::Serialize;

use crate::error::RollcallError;

/// A fixed-length face descriptor produced by an encoder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Distance to another embedding, `None` if the two are not comparable.
    pub fn distance(&self, other: &Embedding) -> Option<f32> {
        euclidean_distance(&self.0, &other.0)
    }

    /// Pack as little-endian f32 bytes for storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.0.len() * 4);
        for &val in &self.0 {
            bytes.extend_from_slice(&val.to_le_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RollcallError> {
        if bytes.len() % 4 != 0 {
            return Err(RollcallError::CorruptEmbedding(bytes.len()));
        }

        let values = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Ok(Self(values))
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// Euclidean distance, `None` when the dimensions differ or either side is empty.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let sum: f32 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum();
    Some(sum.sqrt())
}

/// Map a distance onto a 0..=1 score where 1 is an exact match.
pub fn confidence(distance: f32) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub fn l2_normalize(values: Vec<f32>) -> Vec<f32> {
    let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.into_iter().map(|x| x / norm).collect()
    } else {
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        let a = [0.0, 3.0];
        let b = [4.0, 0.0];
        assert!((euclidean_distance(&a, &b).unwrap() - 5.0).abs() < 1e-6);
        assert_eq!(euclidean_distance(&a, &a), Some(0.0));
        assert_eq!(euclidean_distance(&a, &b), euclidean_distance(&b, &a));
    }

    #[test]
    fn test_distance_incomparable() {
        assert_eq!(euclidean_distance(&[1.0, 2.0], &[1.0]), None);
        assert_eq!(euclidean_distance(&[], &[]), None);
    }

    #[test]
    fn test_confidence_clamped() {
        assert!((confidence(0.25) - 0.75).abs() < 1e-6);
        assert_eq!(confidence(1.7), 0.0);
        assert_eq!(confidence(0.0), 1.0);
    }

    #[test]
    fn test_embedding_blob() {
        let original = Embedding::new(vec![1.5, -2.3, 0.0, 100.0]);
        let bytes = original.to_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(Embedding::from_bytes(&bytes).unwrap(), original);
    }

    #[test]
    fn test_corrupt_blob_rejected() {
        assert_eq!(
            Embedding::from_bytes(&[0, 1, 2]),
            Err(RollcallError::CorruptEmbedding(3))
        );
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }
}
