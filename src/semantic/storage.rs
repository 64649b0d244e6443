//! Binary storage for the vector index.
//!
//! File format: index.bin
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of the provider identity)
//! - dimensions: u16 (little-endian)
//! - vector_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Body: vector_count rows of [f32; dimensions], little-endian, in index
//! position order.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::semantic::index::VectorIndex;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

#[derive(Debug, thiserror::Error)]
pub enum IndexStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file was built with a different provider")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Persists the vector index rows next to the corpus checkpoint.
pub struct IndexStorage {
    path: PathBuf,
}

impl IndexStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn encode_header(model_id: &[u8; 32], dim: u16, count: u64) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[0] = FORMAT_VERSION;
        header[1..33].copy_from_slice(model_id);
        header[33..35].copy_from_slice(&dim.to_le_bytes());
        header[35..43].copy_from_slice(&count.to_le_bytes());
        let checksum = crc32fast::hash(&header[..43]);
        header[43..47].copy_from_slice(&checksum.to_le_bytes());
        header
    }

    /// Write the full index atomically. A temp file is written first and
    /// renamed over the destination.
    pub fn save(&self, index: &VectorIndex, model_id: &[u8; 32]) -> Result<(), IndexStorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let temp_path = self.path.with_extension("tmp");
        let result = self.write_to(&temp_path, index, model_id);
        if let Err(e) = result {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }
        std::fs::rename(&temp_path, &self.path)?;

        log::info!(
            "saved index to {} ({} vectors, dim {})",
            self.path.display(),
            index.len(),
            index.dim()
        );
        Ok(())
    }

    fn write_to(
        &self,
        path: &Path,
        index: &VectorIndex,
        model_id: &[u8; 32],
    ) -> Result<(), IndexStorageError> {
        let dim = u16::try_from(index.dim())
            .map_err(|_| IndexStorageError::InvalidFormat("dimension exceeds u16".to_string()))?;
        let header = Self::encode_header(model_id, dim, index.len() as u64);

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&header)?;
        for value in index.rows() {
            writer.write_all(&value.to_le_bytes())?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Load the persisted index, verifying version, checksum, and that it
    /// was built with the same provider (`model_id`).
    pub fn load(&self, model_id: &[u8; 32]) -> Result<VectorIndex, IndexStorageError> {
        let file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header).map_err(|_| {
            IndexStorageError::InvalidFormat("file shorter than header".to_string())
        })?;

        let version = header[0];
        if version != FORMAT_VERSION {
            return Err(IndexStorageError::VersionMismatch(version, FORMAT_VERSION));
        }

        let stored_checksum = u32::from_le_bytes(
            header[43..47]
                .try_into()
                .map_err(|_| IndexStorageError::InvalidFormat("truncated header".to_string()))?,
        );
        if crc32fast::hash(&header[..43]) != stored_checksum {
            return Err(IndexStorageError::ChecksumMismatch);
        }

        if &header[1..33] != model_id {
            return Err(IndexStorageError::ModelMismatch);
        }

        let dim = u16::from_le_bytes([header[33], header[34]]) as usize;
        let count = u64::from_le_bytes(
            header[35..43]
                .try_into()
                .map_err(|_| IndexStorageError::InvalidFormat("truncated header".to_string()))?,
        );
        if dim == 0 {
            return Err(IndexStorageError::InvalidFormat(
                "zero dimension".to_string(),
            ));
        }

        // The declared size must match the bytes actually present before
        // anything is allocated; the header's count field is untrusted.
        let declared = count
            .checked_mul(dim as u64)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| {
                IndexStorageError::InvalidFormat("declared vector count overflows".to_string())
            })?;
        if declared != file_len.saturating_sub(HEADER_SIZE as u64) {
            return Err(IndexStorageError::InvalidFormat(
                "file length does not match declared vector count".to_string(),
            ));
        }
        let body_len = usize::try_from(declared).map_err(|_| {
            IndexStorageError::InvalidFormat("declared vector count exceeds address space".to_string())
        })?;

        let mut body = vec![0u8; body_len];
        reader.read_exact(&mut body).map_err(|_| {
            IndexStorageError::InvalidFormat("file shorter than declared vector count".to_string())
        })?;

        let data: Vec<f32> = body
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let index =
            VectorIndex::from_raw(dim, data).map_err(|_| IndexStorageError::DimensionMismatch {
                expected: dim,
                got: count as usize,
            })?;

        log::info!(
            "loaded index from {} ({} vectors, dim {})",
            self.path.display(),
            index.len(),
            index.dim()
        );
        Ok(index)
    }
}
