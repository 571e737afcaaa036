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

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{LockError, Result};
use crate::ident::ResourceKey;
use crate::object_pool::LockPool;

#[derive(Debug, Default)]
struct EntryState {
    writer: bool,
    readers: usize,
}

#[derive(Debug, Default)]
struct ResourceEntry {
    state: Mutex<EntryState>,
    notify: Notify,
}

impl ResourceEntry {
    fn try_acquire(&self, writable: bool) -> bool {
        let mut state = self.state.lock();
        if state.writer || (writable && state.readers > 0) {
            return false;
        }
        if writable {
            state.writer = true;
        } else {
            state.readers += 1;
        }
        true
    }

    fn release(&self, writable: bool) -> bool {
        let mut state = self.state.lock();
        if writable {
            std::mem::replace(&mut state.writer, false)
        } else if state.readers > 0 {
            state.readers -= 1;
            true
        } else {
            false
        }
    }

    fn is_idle(&self) -> bool {
        let state = self.state.lock();
        !state.writer && state.readers == 0
    }
}

/// Keyed reader/writer lock for short critical sections
///
/// Unlike [`TransactionLock`](crate::transaction_lock::TransactionLock) it
/// knows nothing about owners and is not reference counted: every successful
/// `lock_resource` must be paired with one `unlock_resource` of the same kind.
#[derive(Debug)]
pub struct ResourceLockTable {
    entries: DashMap<ResourceKey, Arc<ResourceEntry>>,
    pool: LockPool<ResourceEntry>,
    max_free: usize,
}

impl ResourceLockTable {
    pub fn new(max_free: usize) -> Self {
        Self {
            entries: DashMap::new(),
            pool: LockPool::new(),
            max_free,
        }
    }

    /// Take the lock for reading or writing, waiting at most `timeout`
    pub async fn lock_resource(&self, key: &ResourceKey, writable: bool, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let timed_out = {
                let entry = self
                    .entries
                    .entry(key.clone())
                    .or_insert_with(|| self.pool.acquire_with(|| Arc::new(ResourceEntry::default())))
                    .clone();

                let notified = entry.notify.notified();
                tokio::pin!(notified);
                // Register before checking so a release in between is not lost
                notified.as_mut().enable();

                if entry.try_acquire(writable) {
                    return Ok(());
                }
                tokio::time::timeout_at(deadline, notified).await.is_err()
            };

            // The entry clone is gone here, so an idle entry can be reclaimed
            if timed_out {
                self.remove_if_idle(key);
                tracing::debug!("Resource lock on {} timed out (writable: {})", key, writable);
                return Err(LockError::timeout(key.to_string(), timeout));
            }
        }
    }

    /// Release one hold; returns whether anything was held
    pub fn unlock_resource(&self, key: &ResourceKey, writable: bool) -> bool {
        let Some(entry) = self.entries.get(key).map(|e| e.value().clone()) else {
            tracing::debug!("Resource lock {} released without being held", key);
            return false;
        };
        let released = entry.release(writable);
        if released {
            entry.notify.notify_waiters();
        }
        drop(entry);
        self.remove_if_idle(key);
        released
    }

    pub fn is_locked(&self, key: &ResourceKey) -> bool {
        self.entries.get(key).is_some_and(|e| !e.is_idle())
    }

    /// Number of keys with an entry
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn free_count(&self) -> usize {
        self.pool.len()
    }

    fn remove_if_idle(&self, key: &ResourceKey) {
        if let Some((_, entry)) = self
            .entries
            .remove_if(key, |_, entry| Arc::strong_count(entry) == 1 && entry.is_idle())
        {
            self.pool.release(entry, self.max_free);
        }
    }
}
