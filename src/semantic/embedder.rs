//! Embedding providers.
//!
//! A closed union over the supported providers, resolved once from
//! configuration. `Transformer` runs a local sentence-transformer with
//! candle; `Hashed` is a deterministic FNV-1a feature-hashing fallback that
//! needs no model download.

use std::path::Path;

use super::device::Device;
use super::encoder::TransformerEmbedder;
use crate::config::{EngineConfig, ProviderKind};

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("provider initialization failed: {0}")]
    Init(String),

    #[error("embedding generation failed: {0}")]
    Inference(String),
}

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001B3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Deterministic character-n-gram feature-hashing embedder.
///
/// Lowercased n-grams (3..=4 chars) are FNV-1a-hashed into sign-hashed
/// buckets and the result L2-normalized. Host-only; the device binding is
/// tracked for rebind symmetry with the transformer provider.
#[derive(Clone, Debug)]
pub struct HashedEmbedder {
    dimension: usize,
    device: Device,
}

impl HashedEmbedder {
    pub fn new(dimension: usize, device: Device) -> Self {
        Self { dimension, device }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let lower = text.to_lowercase();
        let chars: Vec<char> = lower.chars().collect();

        for n in 3..=4usize {
            if n > chars.len() {
                continue;
            }
            for window in chars.windows(n) {
                let ngram: String = window.iter().collect();
                let h = fnv1a(ngram.as_bytes());
                let bucket = (h as usize) % self.dimension;
                let sign = if (h >> 32) & 1 == 0 { 1.0f32 } else { -1.0f32 };
                vector[bucket] += sign;
            }
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in vector.iter_mut() {
                *x /= norm;
            }
        }
        vector
    }
}

/// The engine's embedding binding: one provider on one device at a time.
pub enum EmbeddingProvider {
    Transformer(TransformerEmbedder),
    Hashed(HashedEmbedder),
}

impl EmbeddingProvider {
    /// Resolve the configured provider once, binding it to `device`.
    pub fn from_config(cfg: &EngineConfig, device: Device) -> Result<Self, EmbeddingError> {
        match cfg.provider {
            ProviderKind::Transformer => Ok(Self::Transformer(TransformerEmbedder::new(
                &cfg.model,
                Path::new(&cfg.cache_dir),
                device,
            )?)),
            ProviderKind::Hashed => Ok(Self::Hashed(HashedEmbedder::new(
                cfg.hashed_dimension,
                device,
            ))),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::Transformer(t) => t.name().to_string(),
            Self::Hashed(h) => format!("fnv1a-hash-{}", h.dimension),
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Self::Transformer(t) => t.dimension(),
            Self::Hashed(h) => h.dimension(),
        }
    }

    pub fn device(&self) -> Device {
        match self {
            Self::Transformer(t) => t.device(),
            Self::Hashed(h) => h.device,
        }
    }

    /// Identity hash of the provider binding, stored with persisted indexes
    /// so a reload against a different model is rejected.
    pub fn model_id(&self) -> [u8; 32] {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.name().as_bytes());
        hasher.finalize().into()
    }

    /// Build a fresh binding on a different device. The old binding stays
    /// usable until the caller swaps it out.
    pub fn rebind(&self, device: Device) -> Result<Self, EmbeddingError> {
        match self {
            Self::Transformer(t) => Ok(Self::Transformer(t.rebind(device)?)),
            Self::Hashed(h) => Ok(Self::Hashed(HashedEmbedder::new(h.dimension, device))),
        }
    }

    /// Embed texts in input order into unit-normalized vectors. Empty input
    /// yields empty output.
    pub fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        match self {
            Self::Transformer(t) => texts.iter().map(|text| t.embed_one(text)).collect(),
            Self::Hashed(h) => Ok(texts.iter().map(|text| h.embed_one(text)).collect()),
        }
    }

    /// Embed a single query text.
    pub fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        match self {
            Self::Transformer(t) => t.embed_one(text),
            Self::Hashed(h) => Ok(h.embed_one(text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashed() -> HashedEmbedder {
        HashedEmbedder::new(128, Device::Cpu)
    }

    #[test]
    fn test_hashed_is_deterministic() {
        let embedder = hashed();
        assert_eq!(embedder.embed_one("ἀγάπη"), embedder.embed_one("ἀγάπη"));
    }

    #[test]
    fn test_hashed_is_unit_normalized() {
        let embedder = hashed();
        let v = embedder.embed_one("amor de Deus");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_hashed_similar_texts_correlate() {
        let embedder = hashed();
        let a = embedder.embed_one("amor de Deus");
        let b = embedder.embed_one("amor ao próximo");
        let c = embedder.embed_one("fé e esperança");
        let dot_ab: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        let dot_ac: f32 = a.iter().zip(&c).map(|(x, y)| x * y).sum();
        assert!(dot_ab > dot_ac, "shared-token texts should score higher");
    }

    #[test]
    fn test_provider_empty_input_yields_empty_output() {
        let provider = EmbeddingProvider::Hashed(hashed());
        let out = provider.embed(&[]).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_provider_preserves_order_and_length() {
        let provider = EmbeddingProvider::Hashed(hashed());
        let texts = vec!["πίστις".to_string(), "ἐλπίς".to_string(), "ἀγάπη".to_string()];
        let out = provider.embed(&texts).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], provider.embed_query("πίστις").unwrap());
        assert_eq!(out[2], provider.embed_query("ἀγάπη").unwrap());
    }

    #[test]
    fn test_rebind_keeps_dimension() {
        let provider = EmbeddingProvider::Hashed(hashed());
        let rebound = provider.rebind(Device::Cpu).unwrap();
        assert_eq!(rebound.dimension(), provider.dimension());
        assert_eq!(rebound.model_id(), provider.model_id());
    }

    #[test]
    fn test_model_id_differs_across_models() {
        let a = EmbeddingProvider::Hashed(HashedEmbedder::new(128, Device::Cpu));
        let b = EmbeddingProvider::Hashed(HashedEmbedder::new(256, Device::Cpu));
        assert_ne!(a.model_id(), b.model_id());
    }
}
