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

//! Per-level directory of live lock objects.
//!
//! The registry interns one [`TransactionLock`] per resource key while any
//! reference to it is outstanding. References are counted explicitly:
//! every [`LockHandle`] owns one and every granted owner owns one. When the
//! count drops to zero the lock object leaves the directory, is reset and
//! goes back to a bounded free pool.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use crate::error::Result;
use crate::ident::ResourceKey;
use crate::mode::LockMode;
use crate::object_pool::{LockPool, PoolStats};
use crate::transaction_lock::TransactionLock;

/// Registry counters for one level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub level: String,
    pub active: usize,
    pub free: usize,
    pub max_free: usize,
    pub pool: PoolStats,
}

struct Directory<M: LockMode> {
    active: HashMap<ResourceKey, Arc<TransactionLock<M>>>,
    max_free: usize,
}

pub(crate) struct RegistryShared<M: LockMode> {
    directory: Mutex<Directory<M>>,
    pool: LockPool<TransactionLock<M>>,
}

impl<M: LockMode> RegistryShared<M> {
    /// Final-release path of a lock object whose count reached zero
    pub(crate) fn recycle(&self, lock: &Arc<TransactionLock<M>>) {
        let parent = {
            let mut directory = self.directory.lock();
            // A concurrent get_or_create may have revived it
            if lock.ref_count() != 0 {
                return;
            }
            let Some(key) = lock.key() else {
                return;
            };
            match directory.active.get(&key) {
                Some(current) if Arc::ptr_eq(current, lock) => {}
                _ => return,
            }
            directory.active.remove(&key);

            let parent = lock.retire();
            let pooled = self.pool.release(lock.clone(), directory.max_free);
            tracing::debug!(
                lock = lock.trace_id(),
                pooled,
                "Final release of {} lock {}",
                M::LEVEL,
                key
            );
            parent
        };
        // Parent release may cascade into another registry
        drop(parent);
    }
}

/// Directory of live lock objects of one level
pub struct LockRegistry<M: LockMode> {
    shared: Arc<RegistryShared<M>>,
}

impl<M: LockMode> LockRegistry<M> {
    pub fn new(max_free: usize) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                directory: Mutex::new(Directory {
                    active: HashMap::new(),
                    max_free,
                }),
                pool: LockPool::new(),
            }),
        }
    }

    /// Return the live lock for `key`, creating it on first use
    ///
    /// The reference is taken inside the critical section so a concurrent
    /// final release cannot recycle the object between lookup and use.
    pub fn get_or_create(&self, key: &ResourceKey) -> Result<LockHandle<M>> {
        let mut directory = self.shared.directory.lock();
        if let Some(lock) = directory.active.get(key) {
            lock.add_ref();
            return Ok(LockHandle { lock: lock.clone() });
        }

        let lock = self
            .shared
            .pool
            .acquire_with(|| Arc::new(TransactionLock::new(Arc::downgrade(&self.shared))));
        lock.initialise(key.clone())?;
        lock.add_ref();
        directory.active.insert(key.clone(), lock.clone());
        Ok(LockHandle { lock })
    }

    /// Existing lock for `key`, without creating one
    pub fn get(&self, key: &ResourceKey) -> Option<LockHandle<M>> {
        let directory = self.shared.directory.lock();
        directory.active.get(key).map(|lock| {
            lock.add_ref();
            LockHandle { lock: lock.clone() }
        })
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.shared.directory.lock().active.contains_key(key)
    }

    pub fn active_count(&self) -> usize {
        self.shared.directory.lock().active.len()
    }

    pub fn free_count(&self) -> usize {
        self.shared.pool.len()
    }

    /// Pre-build up to `count` lock objects, bounded by the pool maximum
    pub fn populate_free_pool(&self, count: usize) {
        let max_free = self.shared.directory.lock().max_free;
        let wanted = count.min(max_free.saturating_sub(self.shared.pool.len()));
        for _ in 0..wanted {
            self.shared
                .pool
                .seed(Arc::new(TransactionLock::new(Arc::downgrade(&self.shared))));
        }
    }

    pub fn set_max_free_locks(&self, max_free: usize) {
        self.shared.directory.lock().max_free = max_free;
        self.shared.pool.shrink_to(max_free);
    }

    pub fn stats(&self) -> RegistryStats {
        let directory = self.shared.directory.lock();
        RegistryStats {
            level: M::LEVEL.to_string(),
            active: directory.active.len(),
            free: self.shared.pool.len(),
            max_free: directory.max_free,
            pool: self.shared.pool.stats(),
        }
    }
}

impl<M: LockMode> std::fmt::Debug for LockRegistry<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockRegistry")
            .field("level", &M::LEVEL)
            .field("active", &self.active_count())
            .field("free", &self.free_count())
            .finish()
    }
}

/// Counted reference to a lock object
///
/// Cloning adds a reference, dropping releases one. A lock object stays
/// registered under its key for as long as any handle or grant exists.
pub struct LockHandle<M: LockMode> {
    lock: Arc<TransactionLock<M>>,
}

impl<M: LockMode> LockHandle<M> {
    /// Standalone lock object that is not registered anywhere
    pub fn detached(key: ResourceKey) -> Result<Self> {
        let lock = Arc::new(TransactionLock::new(Weak::new()));
        lock.initialise(key)?;
        lock.add_ref();
        Ok(Self { lock })
    }

    /// Whether both handles reference the same lock object
    pub fn same_lock(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.lock, &other.lock)
    }
}

impl<M: LockMode> Deref for LockHandle<M> {
    type Target = Arc<TransactionLock<M>>;

    fn deref(&self) -> &Self::Target {
        &self.lock
    }
}

impl<M: LockMode> Clone for LockHandle<M> {
    fn clone(&self) -> Self {
        self.lock.add_ref();
        Self { lock: self.lock.clone() }
    }
}

impl<M: LockMode> Drop for LockHandle<M> {
    fn drop(&mut self) {
        self.lock.release_ref();
    }
}

impl<M: LockMode> std::fmt::Debug for LockHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.lock, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levels::{DataLockType, ObjectLockType};
    use crate::types::LockOwnerIdentity;
    use std::time::Duration;

    fn key(n: u64) -> ResourceKey {
        ResourceKey::from(format!("ODK:1$1${n:X}").as_str())
    }

    #[test]
    fn test_same_instance_while_referenced() {
        let registry = LockRegistry::<DataLockType>::new(4);
        let a = registry.get_or_create(&key(1)).unwrap();
        let b = registry.get_or_create(&key(1)).unwrap();
        let c = registry.get_or_create(&key(2)).unwrap();

        assert!(a.same_lock(&b));
        assert!(!a.same_lock(&c));
        assert_eq!(a.ref_count(), 2);
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn test_final_release_recycles() {
        let registry = LockRegistry::<DataLockType>::new(4);
        let handle = registry.get_or_create(&key(1)).unwrap();
        let trace_id = handle.trace_id();
        drop(handle);

        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.free_count(), 1);
        assert!(registry.get(&key(1)).is_none());

        // Recycled object comes back for any key
        let reused = registry.get_or_create(&key(3)).unwrap();
        assert_eq!(reused.trace_id(), trace_id);
        assert_eq!(reused.key(), Some(key(3)));
        assert_eq!(registry.stats().pool.hits, 1);
    }

    #[test]
    fn test_pool_bound() {
        let registry = LockRegistry::<DataLockType>::new(1);
        let a = registry.get_or_create(&key(1)).unwrap();
        let b = registry.get_or_create(&key(2)).unwrap();
        drop(a);
        drop(b);
        assert_eq!(registry.free_count(), 1);

        registry.set_max_free_locks(0);
        assert_eq!(registry.free_count(), 0);

        registry.set_max_free_locks(3);
        registry.populate_free_pool(10);
        assert_eq!(registry.free_count(), 3);
    }

    #[tokio::test]
    async fn test_recycled_lock_is_empty() {
        let registry = LockRegistry::<DataLockType>::new(4);
        let owner = LockOwnerIdentity::new(1u64, 1u64);
        {
            let handle = registry.get_or_create(&key(1)).unwrap();
            handle.lock(owner, DataLockType::Exclusive, Duration::from_secs(1)).await.unwrap();
            // The grant keeps the object registered after the handle goes
        }
        assert!(registry.contains(&key(1)));

        let handle = registry.get_or_create(&key(1)).unwrap();
        handle.unlock(owner, DataLockType::None).unwrap();
        drop(handle);
        assert_eq!(registry.active_count(), 0);

        let fresh = registry.get_or_create(&key(1)).unwrap();
        assert_eq!(fresh.active_owner_count(), 0);
        assert_eq!(fresh.pending_count(), 0);
        assert_eq!(fresh.current_mode(), DataLockType::None);
        assert_eq!(fresh.ref_count(), 1);
        assert!(!fresh.has_parent());
    }

    #[test]
    fn test_parent_released_with_child() {
        let objects = LockRegistry::<ObjectLockType>::new(4);
        let data = LockRegistry::<DataLockType>::new(4);
        let object_key = ResourceKey::from("OLK:1$1");

        let child = data.get_or_create(&key(1)).unwrap();
        assert!(child.set_parent_if_absent(objects.get_or_create(&object_key).unwrap()));
        assert!(!child.set_parent_if_absent(objects.get_or_create(&object_key).unwrap()));
        assert_eq!(objects.get(&object_key).map(|h| h.ref_count()), Some(2));

        drop(child);
        assert_eq!(objects.active_count(), 0);
        assert_eq!(objects.free_count(), 1);
    }
}
