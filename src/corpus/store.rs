//! JSON corpus checkpoint on disk.
//!
//! The corpus file is a pretty-printed JSON array of verse records; array
//! order is significant (it becomes the index insertion order downstream).

use std::path::{Path, PathBuf};

use super::record::VerseRecord;

#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("corpus source not found: {0}")]
    NotFound(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed corpus: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Loads and saves the ordered verse record sequence.
pub struct CorpusStore;

impl CorpusStore {
    /// Load a corpus checkpoint. A missing source is an error; an empty
    /// record array is not.
    pub fn load(source: &Path) -> Result<Vec<VerseRecord>, CorpusError> {
        if !source.exists() {
            return Err(CorpusError::NotFound(source.to_path_buf()));
        }
        let bytes = std::fs::read(source)?;
        let records: Vec<VerseRecord> = serde_json::from_slice(&bytes)?;
        Ok(records)
    }

    /// Save the full record sequence, overwriting `destination`.
    ///
    /// Writes to a temp file and renames, so either the old or the new
    /// complete content is observable.
    pub fn save(records: &[VerseRecord], destination: &Path) -> Result<(), CorpusError> {
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let temp_path = destination.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(records)?;
        if let Err(e) = std::fs::write(&temp_path, &bytes) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e.into());
        }
        std::fs::rename(&temp_path, destination)?;

        log::info!(
            "saved corpus to {} ({} verses)",
            destination.display(),
            records.len()
        );
        Ok(())
    }
}
