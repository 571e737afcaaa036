// Copyright 2024 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crossbeam_queue::SegQueue;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bounded free-list of recycled lock objects
///
/// Objects are reset by their owner before being released here; the pool
/// only counts and stores them.
#[derive(Debug)]
pub struct LockPool<T> {
    pool: SegQueue<Arc<T>>,
    hits: AtomicU64,
    misses: AtomicU64,
    releases: AtomicU64,
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub releases: u64,
    pub pooled: usize,
}

impl<T> LockPool<T> {
    pub fn new() -> Self {
        Self {
            pool: SegQueue::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        }
    }

    /// Take a pooled object or build a new one
    pub fn acquire_with(&self, create: impl FnOnce() -> Arc<T>) -> Arc<T> {
        if let Some(obj) = self.pool.pop() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            obj
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            create()
        }
    }

    /// Return an object to the pool unless it already holds `max_free`
    pub fn release(&self, obj: Arc<T>, max_free: usize) -> bool {
        if self.pool.len() >= max_free {
            return false;
        }
        self.releases.fetch_add(1, Ordering::Relaxed);
        self.pool.push(obj);
        true
    }

    /// Push a fresh object without counting it as a release
    pub fn seed(&self, obj: Arc<T>) {
        self.pool.push(obj);
    }

    /// Drop pooled objects beyond `max_free`
    pub fn shrink_to(&self, max_free: usize) {
        while self.pool.len() > max_free {
            if self.pool.pop().is_none() {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            pooled: self.pool.len(),
        }
    }

    /// Get hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        if total == 0 { 0.0 } else { hits as f64 / total as f64 }
    }
}

impl<T> Default for LockPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_reuse() {
        let pool = LockPool::<u32>::new();

        let first = pool.acquire_with(|| Arc::new(1));
        assert_eq!(pool.stats().misses, 1);

        assert!(pool.release(first, 4));
        assert_eq!(pool.len(), 1);

        let second = pool.acquire_with(|| Arc::new(2));
        assert_eq!(*second, 1);
        assert_eq!(pool.stats().hits, 1);
        assert_eq!(pool.hit_rate(), 0.5);
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool = LockPool::<u32>::new();
        assert!(!pool.release(Arc::new(1), 0));
        assert!(pool.release(Arc::new(1), 1));
        assert!(!pool.release(Arc::new(2), 1));
        assert_eq!(pool.stats().releases, 1);

        pool.seed(Arc::new(3));
        pool.seed(Arc::new(4));
        pool.shrink_to(1);
        assert_eq!(pool.len(), 1);
    }
}
