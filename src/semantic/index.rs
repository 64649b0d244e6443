//! In-memory inner-product vector index.
//!
//! Vectors are stored row-major on the host; position `i` in the index
//! corresponds to element `i` of the verse sequence it was built from. When
//! placed on an accelerator the rows are additionally materialized as a
//! candle tensor and scoring runs as a single matmul; the host copy stays
//! canonical so migration back is always possible.

use candle_core::Tensor;

use super::device::Device;

/// Rows are inserted in chunks so progress is observable on large corpora.
const INSERT_CHUNK: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("dimension mismatch: index expects {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("index has not been built")]
    NotBuilt,

    #[error("device migration failed: {0}")]
    Migration(String),
}

/// A search hit: the insertion position and its cosine score.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hit {
    pub position: usize,
    pub score: f32,
}

pub struct VectorIndex {
    dim: usize,
    /// Row-major unit vectors, `count * dim` values. Canonical storage.
    data: Vec<f32>,
    count: usize,
    placement: Device,
    device_rows: Option<Tensor>,
}

impl VectorIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
            count: 0,
            placement: Device::Cpu,
            device_rows: None,
        }
    }

    /// Reassemble an index from persisted rows.
    pub fn from_raw(dim: usize, data: Vec<f32>) -> Result<Self, IndexError> {
        if dim == 0 || data.len() % dim != 0 {
            return Err(IndexError::DimensionMismatch {
                expected: dim,
                got: data.len(),
            });
        }
        let count = data.len() / dim;
        Ok(Self {
            dim,
            data,
            count,
            placement: Device::Cpu,
            device_rows: None,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn placement(&self) -> Device {
        self.placement
    }

    pub fn rows(&self) -> &[f32] {
        &self.data
    }

    /// Build the index from embedding rows, replacing any previous content.
    /// Insertion order defines hit positions.
    pub fn build(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        for v in vectors {
            if v.len() != self.dim {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dim,
                    got: v.len(),
                });
            }
        }

        self.data.clear();
        self.data.reserve(vectors.len() * self.dim);
        for chunk in vectors.chunks(INSERT_CHUNK) {
            for v in chunk {
                self.data.extend_from_slice(v);
            }
            log::debug!(
                "inserted {} / {} vectors",
                self.data.len() / self.dim,
                vectors.len()
            );
        }
        self.count = vectors.len();

        if self.placement == Device::Cuda {
            self.upload()?;
        } else {
            self.device_rows = None;
        }
        Ok(())
    }

    /// Score `query` against every row, returning up to `top_k` hits in
    /// descending score order. Ties break toward the lower position.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Hit>, IndexError> {
        if self.count == 0 {
            return Err(IndexError::NotBuilt);
        }
        if query.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                got: query.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let scores = match &self.device_rows {
            Some(rows) => self.score_on_device(rows, query)?,
            None => self.score_on_host(query),
        };

        let mut hits: Vec<Hit> = scores
            .into_iter()
            .enumerate()
            .map(|(position, score)| Hit { position, score })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.position.cmp(&b.position))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    fn score_on_host(&self, query: &[f32]) -> Vec<f32> {
        self.data
            .chunks_exact(self.dim)
            .map(|row| row.iter().zip(query).map(|(a, b)| a * b).sum())
            .collect()
    }

    fn score_on_device(&self, rows: &Tensor, query: &[f32]) -> Result<Vec<f32>, IndexError> {
        let to_migration = |e: candle_core::Error| IndexError::Migration(e.to_string());
        let device = rows.device();
        let q = Tensor::from_slice(query, (self.dim, 1), device).map_err(to_migration)?;
        let scores = rows.matmul(&q).map_err(to_migration)?;
        scores
            .squeeze(1)
            .and_then(|s| s.to_vec1::<f32>())
            .map_err(to_migration)
    }

    /// Move scoring to `device`. The host rows are kept either way, so a
    /// failed upload leaves the index searchable on CPU.
    pub fn migrate(&mut self, device: Device) -> Result<(), IndexError> {
        if device == self.placement {
            return Ok(());
        }
        match device {
            Device::Cpu => {
                self.device_rows = None;
                self.placement = Device::Cpu;
            }
            Device::Cuda => {
                self.placement = Device::Cuda;
                if self.count > 0 {
                    self.upload()?;
                }
            }
        }
        Ok(())
    }

    fn upload(&mut self) -> Result<(), IndexError> {
        let to_migration = |e: candle_core::Error| IndexError::Migration(e.to_string());
        let device = self
            .placement
            .to_candle()
            .map_err(|e| IndexError::Migration(e.to_string()))?;
        let rows = Tensor::from_slice(&self.data, (self.count, self.dim), &device)
            .map_err(to_migration)?;
        self.device_rows = Some(rows);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    fn built() -> VectorIndex {
        let mut index = VectorIndex::new(4);
        index.build(&[unit(4, 0), unit(4, 1), unit(4, 2)]).unwrap();
        index
    }

    #[test]
    fn test_search_empty_index_is_not_built() {
        let index = VectorIndex::new(4);
        assert!(matches!(
            index.search(&unit(4, 0), 3),
            Err(IndexError::NotBuilt)
        ));
    }

    #[test]
    fn test_search_ranks_by_score() {
        let index = built();
        let hits = index.search(&[0.9, 0.1, 0.0, 0.0], 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].position, 0);
        assert_eq!(hits[1].position, 1);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_ties_break_toward_lower_position() {
        let mut index = VectorIndex::new(2);
        index
            .build(&[vec![1.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]])
            .unwrap();
        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].position, 0);
        assert_eq!(hits[1].position, 1);
    }

    #[test]
    fn test_top_k_clamps_to_count() {
        let index = built();
        assert_eq!(index.search(&unit(4, 0), 10).unwrap().len(), 3);
        assert!(index.search(&unit(4, 0), 0).unwrap().is_empty());
    }

    #[test]
    fn test_query_dimension_checked() {
        let index = built();
        assert!(matches!(
            index.search(&[1.0, 0.0], 1),
            Err(IndexError::DimensionMismatch {
                expected: 4,
                got: 2
            })
        ));
    }

    #[test]
    fn test_build_dimension_checked() {
        let mut index = VectorIndex::new(4);
        let result = index.build(&[unit(4, 0), unit(3, 0)]);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_rebuild_replaces_content() {
        let mut index = built();
        index.build(&[unit(4, 3)]).unwrap();
        assert_eq!(index.len(), 1);
        let hits = index.search(&unit(4, 3), 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].position, 0);
    }

    #[test]
    fn test_from_raw_validates_shape() {
        assert!(VectorIndex::from_raw(4, vec![0.0; 12]).is_ok());
        assert!(matches!(
            VectorIndex::from_raw(4, vec![0.0; 10]),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_migrate_to_cpu_is_always_safe() {
        let mut index = built();
        index.migrate(Device::Cpu).unwrap();
        assert_eq!(index.placement(), Device::Cpu);
        assert_eq!(index.search(&unit(4, 1), 1).unwrap()[0].position, 1);
    }
}
