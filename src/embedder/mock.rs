/// Deterministic embedder for tests.
///
/// Hashes each token of the input into a bucket and L2-normalizes the bucket
/// counts, so the cosine similarity of two vectors tracks how many tokens
/// the texts share. Ranking assertions in tests stay meaningful without a
/// real model.
use super::{Embedder, EmbedderError};

/// Bag-of-tokens embedder producing stable vectors from token counts.
///
/// Uses FNV-1a rather than the standard library hasher so vectors are
/// identical across toolchain versions.
pub struct MockEmbedder {
    dimensions: usize,
}

impl MockEmbedder {
    /// Create a new `MockEmbedder` with the given dimensionality.
    ///
    /// Width is clamped to at least one so the bucket arithmetic below
    /// is always defined.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        // Matches the output width of the small sentence-transformer the
        // production deployments inject.
        Self { dimensions: 312 }
    }
}

fn bucket(token: &str, dimensions: usize) -> usize {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for byte in token.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    (hash % dimensions as u64) as usize
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut embedding = vec![0.0f32; self.dimensions];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let lower = token.to_lowercase();
            embedding[bucket(&lower, self.dimensions)] += 1.0;
        }

        // L2 normalize; all-zero stays all-zero (empty text)
        let norm_sq: f32 = embedding.iter().map(|v| v * v).sum();
        if norm_sq > 0.0 {
            let inv = 1.0 / norm_sq.sqrt();
            for v in &mut embedding {
                *v *= inv;
            }
        }

        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_mock_embed_dimensions() {
        let embedder = MockEmbedder::new(64);
        let result = embedder.embed("hello world").unwrap();
        assert_eq!(result.len(), 64);
    }

    #[test]
    fn test_mock_embed_deterministic() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed("hello world").unwrap();
        let b = embedder.embed("hello world").unwrap();
        assert_eq!(a, b, "same input should produce same output");
    }

    #[test]
    fn test_mock_embed_case_insensitive() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed("Python Backend").unwrap();
        let b = embedder.embed("python backend").unwrap();
        assert_eq!(a, b, "tokenization should lowercase");
    }

    #[test]
    fn test_mock_embed_normalized() {
        let embedder = MockEmbedder::new(64);
        let vec = embedder.embed("test normalization of vectors").unwrap();
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!(
            (norm - 1.0).abs() < 0.01,
            "vector should be approximately unit length, got {norm}"
        );
    }

    #[test]
    fn test_mock_embed_empty_text_is_zero_vector() {
        let embedder = MockEmbedder::new(64);
        let vec = embedder.embed("").unwrap();
        assert!(vec.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_mock_token_overlap_drives_similarity() {
        let embedder = MockEmbedder::default();
        let query = embedder.embed("backend python engineer").unwrap();
        let close = embedder
            .embed("python backend developer with django")
            .unwrap();
        let far = embedder.embed("field sales manager retail").unwrap();

        assert!(
            cosine(&query, &close) > cosine(&query, &far),
            "shared tokens should raise cosine similarity"
        );
    }

    #[test]
    fn test_mock_embed_batch() {
        let embedder = MockEmbedder::new(32);
        let results = embedder.embed_batch(&["a", "b", "c"]).unwrap();
        assert_eq!(results.len(), 3);
        for vec in &results {
            assert_eq!(vec.len(), 32);
        }
    }

    #[test]
    fn test_mock_default_dimensions() {
        let embedder = MockEmbedder::default();
        assert_eq!(embedder.dimensions(), 312);
    }

    #[test]
    fn test_mock_zero_width_clamps_to_one() {
        let embedder = MockEmbedder::new(0);
        assert_eq!(embedder.dimensions(), 1);
        let vec = embedder.embed("hello").unwrap();
        assert_eq!(vec.len(), 1, "embedding a token must not panic");
    }
}
