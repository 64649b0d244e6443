//! Intertextuality engine.
//!
//! Owns the embedding provider, the indexed corpus snapshot, and the query
//! cache behind one `RwLock`. Queries take the read side; ingestion, device
//! switches, and loads take the write side and swap the snapshot in one
//! step, so readers always observe an aligned (index, verses) pair.

use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use indicatif::ProgressBar;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::corpus::{CorpusError, CorpusStore, VerseRecord};

use super::cache::ResultCache;
use super::device::{cuda_available, Device, DeviceInfo};
use super::embedder::{EmbeddingError, EmbeddingProvider};
use super::index::{IndexError, VectorIndex};
use super::storage::{IndexStorage, IndexStorageError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no corpus has been indexed")]
    NotReady,

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Storage(#[from] IndexStorageError),

    #[error(transparent)]
    Corpus(#[from] CorpusError),
}

/// A scored verse returned from a similarity query.
#[derive(Clone, Debug, Serialize)]
pub struct SimilarVerse {
    pub position: usize,
    pub score: f32,
    pub book: String,
    pub chapter: u32,
    pub verse: u32,
    pub reference: String,
    pub text: String,
}

/// Outcome of a device switch request. Reported, never raised.
#[derive(Clone, Debug, Serialize)]
pub struct DeviceSwitch {
    pub status: String,
    pub message: String,
    pub old_device: String,
    pub new_device: String,
}

impl DeviceSwitch {
    fn success(message: String, old: Device, new: Device) -> Self {
        Self {
            status: "success".to_string(),
            message,
            old_device: old.as_str().to_string(),
            new_device: new.as_str().to_string(),
        }
    }

    fn error(message: String, current: Device) -> Self {
        Self {
            status: "error".to_string(),
            message,
            old_device: current.as_str().to_string(),
            new_device: current.as_str().to_string(),
        }
    }
}

/// An index and the verse sequence it was built from, swapped as a unit.
/// Index position `i` always refers to `verses[i]`.
struct IndexedCorpus {
    index: VectorIndex,
    verses: Vec<VerseRecord>,
}

struct EngineState {
    provider: EmbeddingProvider,
    corpus: Option<IndexedCorpus>,
}

pub struct IntertextEngine {
    state: RwLock<EngineState>,
    cache: ResultCache<Vec<SimilarVerse>>,
}

impl IntertextEngine {
    /// Initialize the engine from configuration. The provider is resolved
    /// and bound once; the corpus starts empty.
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let device = config.device.resolve();
        log::info!("initializing engine on {device}");
        let provider = EmbeddingProvider::from_config(config, device)?;
        log::info!(
            "provider {} ready (dim {})",
            provider.name(),
            provider.dimension()
        );
        Ok(Self {
            state: RwLock::new(EngineState {
                provider,
                corpus: None,
            }),
            cache: ResultCache::new(config.cache_capacity),
        })
    }

    fn read_state(&self) -> RwLockReadGuard<'_, EngineState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, EngineState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Embed all verse texts and build a fresh index over them. Replaces
    /// any previous snapshot and invalidates the cache. An empty input is
    /// a no-op that leaves the current snapshot in place.
    pub fn ingest_and_index(&self, verses: Vec<VerseRecord>) -> Result<usize, EngineError> {
        if verses.is_empty() {
            log::warn!("ingest called with no verses, keeping current index");
            return Ok(0);
        }

        let mut state = self.write_state();

        let bar = ProgressBar::new(verses.len() as u64);
        let mut vectors = Vec::with_capacity(verses.len());
        for verse in &verses {
            vectors.push(state.provider.embed_query(&verse.text)?);
            bar.inc(1);
        }
        bar.finish_and_clear();

        let mut index = VectorIndex::new(state.provider.dimension());
        index.build(&vectors)?;
        migrate_best_effort(&mut index, state.provider.device());

        let count = verses.len();
        state.corpus = Some(IndexedCorpus { index, verses });
        self.cache.clear();

        log::info!("indexed {count} verses");
        Ok(count)
    }

    /// Find the verses most similar to a free-text query. Results are
    /// cached by `(query, top_k)`.
    pub fn find_similar(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SimilarVerse>, EngineError> {
        self.cache
            .get_or_compute((query.to_string(), top_k), || {
                self.search_uncached(query, top_k)
            })
    }

    fn search_uncached(&self, query: &str, top_k: usize) -> Result<Vec<SimilarVerse>, EngineError> {
        let state = self.read_state();
        let corpus = state.corpus.as_ref().ok_or(EngineError::NotReady)?;

        let vector = state.provider.embed_query(query)?;
        let hits = corpus.index.search(&vector, top_k)?;
        Ok(resolve_hits(&hits, &corpus.verses))
    }

    /// Find intertextual links for the verse at `position`: its nearest
    /// neighbors excluding itself, optionally excluding its own book.
    /// An out-of-range position yields no links. Never cached, since the
    /// key space is positions rather than query strings.
    pub fn find_links_for(
        &self,
        position: usize,
        top_k: usize,
        exclude_same_book: bool,
    ) -> Result<Vec<SimilarVerse>, EngineError> {
        let state = self.read_state();
        let corpus = state.corpus.as_ref().ok_or(EngineError::NotReady)?;

        let source = match corpus.verses.get(position) {
            Some(verse) => verse,
            None => return Ok(Vec::new()),
        };

        // One extra hit absorbs the query verse matching itself.
        let vector = state.provider.embed_query(&source.text)?;
        let hits = corpus.index.search(&vector, top_k.saturating_add(1))?;

        let mut links: Vec<SimilarVerse> = resolve_hits(&hits, &corpus.verses)
            .into_iter()
            .filter(|hit| hit.position != position)
            .filter(|hit| !exclude_same_book || hit.book != source.book)
            .collect();
        links.truncate(top_k);
        Ok(links)
    }

    /// Switch the compute device. Always returns a report; on any failure
    /// the engine keeps its previous state.
    pub fn set_device(&self, name: &str) -> DeviceSwitch {
        let mut state = self.write_state();
        let current = state.provider.device();

        let target = match Device::parse(name) {
            Some(device) => device,
            None => {
                return DeviceSwitch::error(
                    format!("unknown device '{name}', expected 'cpu' or 'cuda'"),
                    current,
                )
            }
        };

        if target == current {
            return DeviceSwitch::success(format!("already on {target}"), current, target);
        }

        if target == Device::Cuda && !cuda_available() {
            return DeviceSwitch::error("cuda is not available".to_string(), current);
        }

        let rebound = match state.provider.rebind(target) {
            Ok(provider) => provider,
            Err(e) => {
                log::error!("device switch to {target} failed: {e}");
                return DeviceSwitch::error(format!("failed to move provider: {e}"), current);
            }
        };
        state.provider = rebound;

        if let Some(corpus) = state.corpus.as_mut() {
            migrate_best_effort(&mut corpus.index, target);
        }

        self.cache.clear();
        log::info!("switched device {current} -> {target}");
        DeviceSwitch::success(format!("switched to {target}"), current, target)
    }

    /// Snapshot of device and index state.
    pub fn device_info(&self) -> DeviceInfo {
        let state = self.read_state();
        DeviceInfo {
            device: state.provider.device().as_str().to_string(),
            cuda_available: cuda_available(),
            provider: state.provider.name(),
            dimension: state.provider.dimension(),
            indexed: state
                .corpus
                .as_ref()
                .map(|corpus| corpus.index.len())
                .unwrap_or(0),
        }
    }

    /// Write the current snapshot to disk: index rows to `index_path`,
    /// verse records to `corpus_path`.
    pub fn persist(&self, index_path: &Path, corpus_path: &Path) -> Result<(), EngineError> {
        let state = self.read_state();
        let corpus = state.corpus.as_ref().ok_or(EngineError::NotReady)?;

        IndexStorage::new(index_path.to_path_buf()).save(&corpus.index, &state.provider.model_id())?;
        CorpusStore::save(&corpus.verses, corpus_path)?;
        Ok(())
    }

    /// Restore a persisted snapshot. Returns `Ok(false)` and leaves the
    /// engine empty when either file is missing or the pair is misaligned;
    /// corrupt or foreign files are errors.
    pub fn load(&self, index_path: &Path, corpus_path: &Path) -> Result<bool, EngineError> {
        if !index_path.exists() || !corpus_path.exists() {
            log::warn!(
                "no persisted snapshot at {} / {}, starting empty",
                index_path.display(),
                corpus_path.display()
            );
            return Ok(false);
        }

        let mut state = self.write_state();

        let mut index = IndexStorage::new(index_path.to_path_buf()).load(&state.provider.model_id())?;
        let verses = CorpusStore::load(corpus_path)?;

        if index.dim() != state.provider.dimension() {
            return Err(IndexStorageError::DimensionMismatch {
                expected: state.provider.dimension(),
                got: index.dim(),
            }
            .into());
        }
        if index.len() != verses.len() {
            log::warn!(
                "persisted index has {} vectors but corpus has {} verses, refusing misaligned snapshot",
                index.len(),
                verses.len()
            );
            return Ok(false);
        }

        migrate_best_effort(&mut index, state.provider.device());
        state.corpus = Some(IndexedCorpus { index, verses });
        self.cache.clear();
        Ok(true)
    }
}

/// Index placement follows the provider when possible; a failed upload is
/// logged and the index stays searchable on CPU.
fn migrate_best_effort(index: &mut VectorIndex, device: Device) {
    if let Err(e) = index.migrate(device) {
        log::warn!("index migration to {device} failed, staying on cpu: {e}");
        let _ = index.migrate(Device::Cpu);
    }
}

fn resolve_hits(hits: &[super::index::Hit], verses: &[VerseRecord]) -> Vec<SimilarVerse> {
    hits.iter()
        .filter_map(|hit| {
            let verse = verses.get(hit.position)?;
            Some(SimilarVerse {
                position: hit.position,
                score: hit.score,
                book: verse.book.clone(),
                chapter: verse.chapter,
                verse: verse.verse,
                reference: verse.reference(),
                text: verse.text.clone(),
            })
        })
        .collect()
}
