//! Semantic intertextuality search.
//!
//! Pipeline: verse records are embedded by a provider ([`embedder`]), the
//! vectors go into an inner-product index ([`index`]) whose positions stay
//! aligned with the verse sequence, and the engine ([`engine`]) answers
//! similarity and link queries through a FIFO result cache ([`cache`]).
//! The index can be persisted to disk ([`storage`]) and the whole pipeline
//! moved between CPU and CUDA ([`device`]).

pub mod cache;
pub mod device;
pub mod embedder;
pub mod encoder;
pub mod engine;
pub mod index;
pub mod storage;

pub use device::{cuda_available, Device, DeviceInfo, DevicePreference};
pub use embedder::{EmbeddingError, EmbeddingProvider};
pub use engine::{DeviceSwitch, EngineError, IntertextEngine, SimilarVerse};
pub use index::{IndexError, VectorIndex};
pub use storage::{IndexStorage, IndexStorageError};

/// Default sentence-transformer checkpoint, multilingual so Koine Greek
/// verses and modern-language queries land in the same space.
pub const DEFAULT_MODEL: &str = "paraphrase-multilingual-mpnet-base-v2";
