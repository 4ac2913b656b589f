//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, plus the boundary helpers that validate and L2-normalize
//! everything a provider returns before it reaches the index.
//!
//! Concrete providers (feature hashing, Ollama, OpenAI, fastembed) live in
//! the `knowledge-harness` app crate.
//!
//! # Normalization
//!
//! The index reports similarity as `1 - d / 2` where `d` is the squared
//! Euclidean distance. That conversion is only meaningful for unit-length
//! vectors (it then equals cosine similarity), so [`embed_normalized`]
//! rescales every vector and rejects zero vectors outright.

/// Errors raised at the embedding-provider boundary.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// The provider answered with a different number of vectors than texts sent.
    #[error("embedding provider returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    /// A returned vector does not have the dimension the engine was built for.
    #[error("embedding has {got} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    /// A returned vector has zero (or non-finite) length and cannot be normalized.
    #[error("embedding is degenerate and cannot be normalized")]
    Degenerate,

    /// The provider reported a failure (bad status, malformed payload, ...).
    #[error("embedding provider error: {message}")]
    Provider { message: String },

    /// The provider's transport or runtime failed.
    #[error("embedding backend failed: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl EmbedError {
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    pub fn backend<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(source),
        }
    }
}

/// Trait for embedding providers.
///
/// Implementations must be deterministic for a given model: the same text
/// always maps to the same vector, since deletes rebuild the index by
/// re-embedding the surviving chunks.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per text, in input order.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Embed `texts` and enforce the boundary contract: one vector per text,
/// each of `provider.dims()` length, each scaled to unit length.
pub fn embed_normalized(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, EmbedError> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let mut vectors = provider.embed(texts)?;
    if vectors.len() != texts.len() {
        return Err(EmbedError::CountMismatch {
            expected: texts.len(),
            got: vectors.len(),
        });
    }

    let dims = provider.dims();
    for v in vectors.iter_mut() {
        if v.len() != dims {
            return Err(EmbedError::DimensionMismatch {
                expected: dims,
                got: v.len(),
            });
        }
        l2_normalize(v)?;
    }

    Ok(vectors)
}

/// Embed a single text through [`embed_normalized`].
pub fn embed_one(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>, EmbedError> {
    embed_normalized(provider, &[text.to_string()])?
        .into_iter()
        .next()
        .ok_or(EmbedError::CountMismatch {
            expected: 1,
            got: 0,
        })
}

/// Scale `v` in place to unit L2 length.
pub fn l2_normalize(v: &mut [f32]) -> Result<(), EmbedError> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm < f32::EPSILON {
        return Err(EmbedError::Degenerate);
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    Ok(())
}

/// Squared Euclidean distance. Slices are assumed to have equal length.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Convert a squared Euclidean distance between unit vectors into a
/// similarity in `[-1.0, 1.0]`.
pub fn similarity_from_distance(distance: f32) -> f32 {
    1.0 - distance / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider {
        dims: usize,
        output: Vec<Vec<f32>>,
    }

    impl EmbeddingProvider for FixedProvider {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Ok(self.output.clone())
        }
    }

    #[test]
    fn test_normalize_unit_length() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_rejects_zero_vector() {
        let mut v = vec![0.0, 0.0, 0.0];
        assert!(matches!(l2_normalize(&mut v), Err(EmbedError::Degenerate)));
    }

    #[test]
    fn test_similarity_of_identical_and_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((similarity_from_distance(squared_l2(&a, &a)) - 1.0).abs() < 1e-6);
        assert!((similarity_from_distance(squared_l2(&a, &b)) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_equals_cosine_for_unit_vectors() {
        let mut a = vec![1.0, 2.0, 3.0];
        let mut b = vec![2.0, -1.0, 0.5];
        l2_normalize(&mut a).unwrap();
        l2_normalize(&mut b).unwrap();
        let cosine: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let sim = similarity_from_distance(squared_l2(&a, &b));
        assert!((sim - cosine).abs() < 1e-5);
    }

    #[test]
    fn test_embed_normalized_checks_dimension() {
        let provider = FixedProvider {
            dims: 3,
            output: vec![vec![1.0, 0.0]],
        };
        let err = embed_normalized(&provider, &["x".to_string()]).unwrap_err();
        assert!(matches!(
            err,
            EmbedError::DimensionMismatch {
                expected: 3,
                got: 2
            }
        ));
    }

    #[test]
    fn test_embed_normalized_checks_count() {
        let provider = FixedProvider {
            dims: 2,
            output: vec![vec![1.0, 0.0]],
        };
        let texts = vec!["a".to_string(), "b".to_string()];
        let err = embed_normalized(&provider, &texts).unwrap_err();
        assert!(matches!(err, EmbedError::CountMismatch { expected: 2, got: 1 }));
    }

    #[test]
    fn test_embed_one_normalizes() {
        let provider = FixedProvider {
            dims: 2,
            output: vec![vec![0.0, 5.0]],
        };
        let v = embed_one(&provider, "x").unwrap();
        assert_eq!(v, vec![0.0, 1.0]);
    }
}
