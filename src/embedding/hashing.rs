//! Offline feature-hashing embedder.
//!
//! Lowercased alphanumeric tokens are hashed with SHA-256 into `dims`
//! signed buckets (the "hashing trick"). Texts that share words share
//! buckets, so lexical overlap shows up as cosine similarity. No model, no
//! network, fully deterministic: suited to tests and air-gapped setups.

use sha2::{Digest, Sha256};

use knowledge_harness_core::embedding::{EmbedError, EmbeddingProvider};

pub struct HashProvider {
    model: String,
    dims: usize,
}

impl HashProvider {
    pub fn new(dims: usize) -> Self {
        Self {
            model: "feature-hash".to_string(),
            dims,
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();
        let mut tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        // Punctuation-only text still needs a non-zero vector.
        let trimmed = lowered.trim();
        if tokens.is_empty() && !trimmed.is_empty() {
            tokens.push(trimmed);
        }

        for token in tokens {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        v
    }
}

impl EmbeddingProvider for HashProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if self.dims == 0 {
            return Err(EmbedError::provider("hash provider needs dims > 0"));
        }
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge_harness_core::embedding::{embed_normalized, similarity_from_distance, squared_l2};

    fn sim(p: &HashProvider, a: &str, b: &str) -> f32 {
        let v = embed_normalized(p, &[a.to_string(), b.to_string()]).unwrap();
        similarity_from_distance(squared_l2(&v[0], &v[1]))
    }

    #[test]
    fn test_deterministic() {
        let p = HashProvider::new(64);
        let a = p.embed(&["The API failed".to_string()]).unwrap();
        let b = p.embed(&["The API failed".to_string()]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
    }

    #[test]
    fn test_case_insensitive_tokens() {
        let p = HashProvider::new(128);
        assert!((sim(&p, "API Error", "api error") - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_words_score_higher() {
        let p = HashProvider::new(512);
        let related = sim(&p, "API error", "The API returns an HTTP 404 error");
        let unrelated = sim(&p, "API error", "Restart the router to fix the issue");
        assert!(related > unrelated);
        assert!(related > 0.2);
    }

    #[test]
    fn test_punctuation_only_text_is_not_zero() {
        let p = HashProvider::new(32);
        let v = p.embed(&["!!!".to_string()]).unwrap();
        assert!(v[0].iter().any(|x| *x != 0.0));
    }
}
