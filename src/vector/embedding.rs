//! Pluggable text encoders.
//!
//! The engine never generates embeddings itself. Callers that want
//! `embed_cached` or `rank_text` hand it an [`EmbeddingProvider`] wrapping
//! whatever external encoder produces the 384-float vectors.

use crate::vector::types::{VECTOR_DIMENSION_384, VectorDimension, VectorError};

/// Model identifier recorded when no encoder is configured.
pub const DEFAULT_MODEL_IDENTIFIER: &str = "AllMiniLML6V2";

/// Trait for encoders that turn text into a vector.
///
/// Implementations must be thread-safe: the engine may call `embed` from
/// several request threads at once.
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier stored next to cached vectors. Lookups only hit entries
    /// produced by the same identifier.
    fn model_identifier(&self) -> &str;

    /// Encode a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, VectorError>;

    /// Dimension of produced vectors.
    #[must_use]
    fn dimension(&self) -> VectorDimension {
        VectorDimension::dimension_384()
    }
}

/// Encoder that returns the same constant vector for every input.
///
/// Provisioning uses it to seed the base vocabulary before a real encoder
/// has produced vectors for it.
#[derive(Debug, Clone)]
pub struct PlaceholderEmbedding {
    model: String,
    value: f32,
}

impl PlaceholderEmbedding {
    /// Placeholder component used by provisioning.
    pub const VALUE: f32 = 0.1;

    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            value: Self::VALUE,
        }
    }

    /// The constant vector this encoder returns.
    #[must_use]
    pub fn vector(&self) -> Vec<f32> {
        vec![self.value; VECTOR_DIMENSION_384]
    }
}

impl Default for PlaceholderEmbedding {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_IDENTIFIER)
    }
}

impl EmbeddingProvider for PlaceholderEmbedding {
    fn model_identifier(&self) -> &str {
        &self.model
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>, VectorError> {
        Ok(self.vector())
    }
}

/// Mock encoder for testing.
///
/// Produces deterministic unit vectors from the text's bytes and counts
/// how often it was called.
#[cfg(test)]
pub struct MockEmbeddingProvider {
    model: String,
    calls: std::sync::atomic::AtomicUsize,
    fail: bool,
}

#[cfg(test)]
impl MockEmbeddingProvider {
    #[must_use]
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            calls: std::sync::atomic::AtomicUsize::new(0),
            fail: false,
        }
    }

    /// A provider whose every call fails.
    #[must_use]
    pub fn failing(model: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(model)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn model_identifier(&self) -> &str {
        &self.model
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.fail {
            return Err(VectorError::EmbeddingFailed("mock encoder offline".to_string()));
        }

        let mut embedding = vec![0.1; VECTOR_DIMENSION_384];
        for (i, byte) in text.bytes().enumerate() {
            embedding[(i * 31 + byte as usize) % VECTOR_DIMENSION_384] += 0.5;
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        for val in &mut embedding {
            *val /= magnitude;
        }
        Ok(embedding)
    }
}
