//! FIFO cache for query results.
//!
//! Keyed by `(query, top_k)`. Entries are evicted in insertion order once
//! capacity is reached; a hit does not refresh an entry's age. Failing
//! computations are never cached, empty results are.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

pub type CacheKey = (String, usize);

struct CacheInner<V> {
    map: HashMap<CacheKey, V>,
    order: VecDeque<CacheKey>,
}

pub struct ResultCache<V> {
    capacity: usize,
    inner: Mutex<CacheInner<V>>,
}

impl<V: Clone> ResultCache<V> {
    /// A zero capacity disables caching: every lookup computes and nothing
    /// is stored.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(inner) => inner.map.len(),
            Err(poisoned) => poisoned.into_inner().map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.map.clear();
        inner.order.clear();
    }

    /// Return the cached value for `key`, or run `compute` and cache its
    /// result. Errors pass through uncached.
    pub fn get_or_compute<E>(
        &self,
        key: CacheKey,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if !self.is_enabled() {
            return compute();
        }

        {
            let inner = match self.inner.lock() {
                Ok(inner) => inner,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(value) = inner.map.get(&key) {
                log::debug!("cache hit for {:?}", key);
                return Ok(value.clone());
            }
        }

        // Computed outside the lock; a racing duplicate computation is
        // acceptable, a held lock across embedding is not.
        let value = compute()?;

        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !inner.map.contains_key(&key) {
            while inner.map.len() >= self.capacity {
                match inner.order.pop_front() {
                    Some(oldest) => {
                        inner.map.remove(&oldest);
                    }
                    None => break,
                }
            }
            inner.map.insert(key.clone(), value.clone());
            inner.order.push_back(key);
        }
        Ok(value)
    }
}
