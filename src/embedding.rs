//! Embedding provider seam and vector math.
//!
//! The engine treats embedding as a pure, possibly-slow, possibly-faulty
//! function text → fixed-dimension vector, reached over the network. Every
//! call is awaited under a bounded timeout; a timeout or transport error
//! surfaces as `EmbeddingUnavailable` and the caller decides whether that is
//! fatal (single-segment resolution) or recoverable (metrics aggregation).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::EngineError;

/// Opaque text → vector function. Deterministic per model version.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError>;

    /// Cosine similarity of two texts' embeddings. Both embeddings are
    /// computed through `embed`, so the same failure policy applies.
    async fn text_similarity(&self, a: &str, b: &str) -> Result<f32, EngineError> {
        let ea = self.embed(a).await?;
        let eb = self.embed(b).await?;
        Ok(cosine_similarity(&ea, &eb))
    }
}

/// L2 norm of a vector
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Normalize vector to unit length
pub fn normalize(v: Vec<f32>) -> Vec<f32> {
    let n = l2_norm(&v);
    if n > 0.0 {
        v.into_iter().map(|x| x / n).collect()
    } else {
        v
    }
}

/// Cosine similarity. Zero-length or zero-norm inputs score 0.0 rather than
/// NaN, so a degenerate embedding never poisons an aggregate.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let denom = l2_norm(a) * l2_norm(b);
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Embedding provider backed by an HTTP inference endpoint.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl HttpEmbeddingProvider {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            timeout,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let request = self.client.post(&self.endpoint).json(&EmbedRequest {
            model: &self.model,
            input: text,
        });

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| {
                EngineError::EmbeddingUnavailable(format!(
                    "timeout after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| EngineError::EmbeddingUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::EmbeddingUnavailable(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EngineError::EmbeddingUnavailable(e.to_string()))?;

        debug!(dim = body.embedding.len(), "embedding computed");
        Ok(body.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_norm() {
        let v = vec![3.0, 4.0];
        assert!((l2_norm(&v) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize() {
        let v = normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector() {
        let v = normalize(vec![0.0, 0.0]);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn cosine_identical_is_one() {
        let v = vec![0.2, 0.5, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite_is_negative_one() {
        let s = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((s + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
    }

    #[test]
    fn cosine_zero_norm_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
