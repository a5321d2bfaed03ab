//! Embedding port and the deterministic hash fallback.

use async_trait::async_trait;
use sha1::{Digest, Sha1};

use crate::error::PortError;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Length of every vector this embedder returns.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PortError>;
}

// ---------------------------------------------------------------------------
// HashEmbedder
// ---------------------------------------------------------------------------

/// Feature-hashing embedder: each lowercase word and word bigram is hashed
/// with SHA-1 into a signed bucket, then the vector is L2-normalised.
///
/// Same text, same vector, on every platform. Texts sharing words land close
/// together, which is enough for incident lookup when no model is available.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// `dimension` is clamped to at least 1.
    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(1) }
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        let words: Vec<String> = text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();

        let bigrams = words.windows(2).map(|w| format!("{} {}", w[0], w[1]));
        for feature in words.iter().cloned().chain(bigrams) {
            let digest = Sha1::digest(feature.as_bytes());
            let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % self.dimension;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PortError> {
        Ok(self.vector(text))
    }
}

/// Euclidean distance. Vectors of different length compare over the shorter
/// prefix; callers check dimensions first.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_vector_is_deterministic_and_fixed_length() {
        let e = HashEmbedder::new(768);
        let a = e.vector("meta_ads cpa spike");
        let b = e.vector("meta_ads cpa spike");
        assert_eq!(a, b);
        assert_eq!(a.len(), 768);
        assert_eq!(e.vector("").len(), 768);
    }

    #[test]
    fn test_hash_vector_is_unit_length() {
        let v = HashEmbedder::new(64).vector("tv preempt make good");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm = {norm}");
    }

    #[test]
    fn test_shared_words_are_closer_than_unrelated_text() {
        let e = HashEmbedder::new(256);
        let q = e.vector("google_search cpa spike");
        let near = e.vector("google_search cpa spike competitor bidding");
        let far = e.vector("podcast downloads drop host change");
        assert!(l2_distance(&q, &near) < l2_distance(&q, &far));
    }

    #[test]
    fn test_zero_dimension_is_clamped() {
        assert_eq!(HashEmbedder::new(0).dimension(), 1);
    }

    #[tokio::test]
    async fn test_embed_port_matches_sync_vector() {
        let e = HashEmbedder::new(32);
        assert_eq!(e.embed("x y").await.unwrap(), e.vector("x y"));
    }
}
