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

//! Per-transaction bookkeeping of item locks under one owner resource.
//!
//! An owner block tracks which item locks (data pages of an object, or
//! extents of a distribution page) a transaction holds, takes the intent
//! lock on the owner before any item lock, and escalates to a full owner
//! lock once too many item locks of one kind are held.
//!
//! Every tracked key counts once towards `owner_lock_count`, whether it holds
//! a real item lock or only a placeholder left behind by escalation. The
//! owner lock is released only when that count is back to zero.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::database::DatabaseLockManager;
use crate::error::{LockError, Result};
use crate::levels::{DataLockType, ObjectLockType};
use crate::registry::LockHandle;
use crate::types::{LockOwnerIdentity, LogicalPageId, ObjectId, VirtualPageId};

/// Resolves the owner lock and the item locks of an owner block
pub trait OwnerLockSource<K>: Send + Sync {
    fn owner_lock(&self) -> Result<LockHandle<ObjectLockType>>;

    fn item_lock(&self, key: &K) -> Result<LockHandle<DataLockType>>;
}

/// Object lock as owner, data page locks as items
#[derive(Debug, Clone)]
pub struct DataLockSource {
    manager: DatabaseLockManager,
    object: ObjectId,
}

impl DataLockSource {
    pub fn new(manager: DatabaseLockManager, object: ObjectId) -> Self {
        Self { manager, object }
    }
}

impl OwnerLockSource<LogicalPageId> for DataLockSource {
    fn owner_lock(&self) -> Result<LockHandle<ObjectLockType>> {
        self.manager.get_object_lock(self.object)
    }

    fn item_lock(&self, key: &LogicalPageId) -> Result<LockHandle<DataLockType>> {
        self.manager.get_data_lock(self.object, *key)
    }
}

/// Distribution page lock as owner, extent locks as items
#[derive(Debug, Clone)]
pub struct DistributionLockSource {
    manager: DatabaseLockManager,
    page: VirtualPageId,
}

impl DistributionLockSource {
    pub fn new(manager: DatabaseLockManager, page: VirtualPageId) -> Self {
        Self { manager, page }
    }
}

impl OwnerLockSource<u32> for DistributionLockSource {
    fn owner_lock(&self) -> Result<LockHandle<ObjectLockType>> {
        self.manager.get_distribution_lock(self.page)
    }

    fn item_lock(&self, key: &u32) -> Result<LockHandle<DataLockType>> {
        self.manager.get_distribution_extent_lock(self.page, *key)
    }
}

type ItemLocks<K> = HashMap<K, Option<LockHandle<DataLockType>>>;

struct BlockState<K> {
    owner_lock: Option<LockHandle<ObjectLockType>>,
    owner_lock_count: usize,
    read: ItemLocks<K>,
    update: ItemLocks<K>,
    write: ItemLocks<K>,
    released: bool,
}

impl<K: Eq + Hash> BlockState<K> {
    fn tracks(&self, key: &K) -> bool {
        self.read.contains_key(key) || self.update.contains_key(key) || self.write.contains_key(key)
    }
}

/// Item and owner locks one transaction holds under one owner resource
pub struct LockOwnerBlock<K> {
    owner: LockOwnerIdentity,
    max_item_locks: usize,
    source: Box<dyn OwnerLockSource<K>>,
    state: Mutex<BlockState<K>>,
}

pub type DataLockOwnerBlock = LockOwnerBlock<LogicalPageId>;
pub type DistributionLockOwnerBlock = LockOwnerBlock<u32>;

impl<K> LockOwnerBlock<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    pub fn new(owner: LockOwnerIdentity, source: impl OwnerLockSource<K> + 'static, max_item_locks: usize) -> Self {
        Self {
            owner,
            max_item_locks,
            source: Box::new(source),
            state: Mutex::new(BlockState {
                owner_lock: None,
                owner_lock_count: 0,
                read: HashMap::new(),
                update: HashMap::new(),
                write: HashMap::new(),
                released: false,
            }),
        }
    }

    pub fn owner(&self) -> LockOwnerIdentity {
        self.owner
    }

    pub fn max_item_locks(&self) -> usize {
        self.max_item_locks
    }

    fn check_open(&self, state: &BlockState<K>) -> Result<()> {
        if state.released {
            return Err(LockError::aborted(format!("lock owner block of {} already released", self.owner)));
        }
        Ok(())
    }

    fn owner_lock<'a>(&self, state: &'a mut BlockState<K>) -> Result<&'a LockHandle<ObjectLockType>> {
        if state.owner_lock.is_none() {
            state.owner_lock = Some(self.source.owner_lock()?);
        }
        state
            .owner_lock
            .as_ref()
            .ok_or_else(|| LockError::aborted("owner lock unavailable"))
    }

    fn owner_holds(&self, state: &mut BlockState<K>, mode: ObjectLockType) -> Result<bool> {
        if mode == ObjectLockType::None {
            return Ok(true);
        }
        Ok(self.owner_lock(state)?.has_lock(self.owner, mode))
    }

    async fn lock_owner_locked(&self, state: &mut BlockState<K>, mode: ObjectLockType, timeout: Duration) -> Result<()> {
        let owner_lock = self.owner_lock(state)?.clone();
        owner_lock.lock(self.owner, mode, timeout).await
    }

    /// Lock the owner resource directly
    pub async fn lock_owner(&self, mode: ObjectLockType, timeout: Duration) -> Result<()> {
        let mut state = self.state.lock().await;
        self.check_open(&state)?;
        self.lock_owner_locked(&mut state, mode, timeout).await
    }

    /// Lock one item, taking the owner intent lock first
    pub async fn lock_item(&self, key: K, mode: DataLockType, timeout: Duration) -> Result<()> {
        let mut state = self.state.lock().await;
        self.check_open(&state)?;
        match mode {
            DataLockType::None => Ok(()),
            DataLockType::Shared => self.lock_item_shared(&mut state, key, timeout).await,
            DataLockType::Update => self.lock_item_update(&mut state, key, timeout).await,
            DataLockType::Exclusive => self.lock_item_exclusive(&mut state, key, timeout).await,
        }
    }

    // Owner lock already covers the request; keep a placeholder so the
    // matching unlock stays balanced
    fn track_covered(&self, state: &mut BlockState<K>, key: K, mode: DataLockType) {
        if state.tracks(&key) {
            return;
        }
        let map = match mode {
            DataLockType::Exclusive => &mut state.write,
            DataLockType::Update => &mut state.update,
            _ => &mut state.read,
        };
        map.insert(key, None);
        state.owner_lock_count += 1;
    }

    async fn lock_item_shared(&self, state: &mut BlockState<K>, key: K, timeout: Duration) -> Result<()> {
        if self.owner_holds(state, ObjectLockType::Shared)? {
            self.track_covered(state, key, DataLockType::Shared);
            return Ok(());
        }
        if state.tracks(&key) {
            return Ok(());
        }

        if !self.owner_holds(state, ObjectLockType::IntentShared)? {
            self.lock_owner_locked(state, ObjectLockType::IntentShared, timeout).await?;
        }

        let item = self.source.item_lock(&key)?;
        item.lock(self.owner, DataLockType::Shared, timeout).await?;
        state.owner_lock_count += 1;
        state.read.insert(key, Some(item));

        if state.read.len() > self.max_item_locks {
            self.escalate_shared(state, timeout).await;
        }
        Ok(())
    }

    async fn escalate_shared(&self, state: &mut BlockState<K>, timeout: Duration) {
        // An intent-exclusive holder must keep its intent while gaining shared
        let target = match self.owner_holds(state, ObjectLockType::IntentExclusive) {
            Ok(true) => ObjectLockType::SharedIntentExclusive,
            Ok(false) => ObjectLockType::Shared,
            Err(err) => {
                tracing::debug!("Lock owner block escalation skipped for {}: {}", self.owner, err);
                return;
            }
        };
        tracing::debug!("Attempting lock owner block {} escalation for {}", target, self.owner);

        if let Err(err) = self.lock_owner_locked(state, target, timeout).await {
            tracing::debug!("Lock owner block {} escalation failed for {}: {}", target, self.owner, err);
            return;
        }
        self.release_items(&mut state.read);
    }

    async fn lock_item_update(&self, state: &mut BlockState<K>, key: K, timeout: Duration) -> Result<()> {
        if self.owner_holds(state, ObjectLockType::Exclusive)? {
            self.track_covered(state, key, DataLockType::Update);
            return Ok(());
        }
        if state.write.contains_key(&key) || state.update.contains_key(&key) {
            return Ok(());
        }

        self.ensure_intent_exclusive(state, timeout).await?;

        let item = match state.read.get(&key) {
            Some(Some(existing)) => existing.clone(),
            _ => self.source.item_lock(&key)?,
        };
        item.lock(self.owner, DataLockType::Update, timeout).await?;
        if state.read.remove(&key).is_none() {
            state.owner_lock_count += 1;
        }
        state.update.insert(key, Some(item));
        Ok(())
    }

    async fn lock_item_exclusive(&self, state: &mut BlockState<K>, key: K, timeout: Duration) -> Result<()> {
        if self.owner_holds(state, ObjectLockType::Exclusive)? {
            self.track_covered(state, key, DataLockType::Exclusive);
            return Ok(());
        }
        if state.write.contains_key(&key) {
            return Ok(());
        }

        self.ensure_intent_exclusive(state, timeout).await?;

        let existing = match state.update.get(&key) {
            Some(entry) => entry.clone(),
            None => state.read.get(&key).cloned().flatten(),
        };
        let item = match existing {
            Some(existing) => existing,
            None => self.source.item_lock(&key)?,
        };
        item.lock(self.owner, DataLockType::Exclusive, timeout).await?;
        if state.update.remove(&key).is_none() && state.read.remove(&key).is_none() {
            state.owner_lock_count += 1;
        }
        state.write.insert(key, Some(item));

        if state.write.len() > self.max_item_locks {
            tracing::debug!("Attempting lock owner block Exclusive escalation for {}", self.owner);
            match self.lock_owner_locked(state, ObjectLockType::Exclusive, timeout).await {
                Ok(()) => {
                    self.release_items(&mut state.read);
                    self.release_items(&mut state.update);
                    self.release_items(&mut state.write);
                }
                Err(err) => {
                    tracing::debug!("Lock owner block Exclusive escalation failed for {}: {}", self.owner, err);
                }
            }
        }
        Ok(())
    }

    async fn ensure_intent_exclusive(&self, state: &mut BlockState<K>, timeout: Duration) -> Result<()> {
        if self.owner_holds(state, ObjectLockType::IntentExclusive)? {
            return Ok(());
        }
        let mode = if self.owner_holds(state, ObjectLockType::Shared)? {
            ObjectLockType::SharedIntentExclusive
        } else {
            ObjectLockType::IntentExclusive
        };
        self.lock_owner_locked(state, mode, timeout).await
    }

    // Unlock every held item lock in the map but keep the keys as placeholders
    fn release_items(&self, items: &mut ItemLocks<K>) {
        for (key, slot) in items.iter_mut() {
            if let Some(item) = slot.take() {
                if let Err(err) = item.unlock(self.owner, DataLockType::None) {
                    tracing::warn!("Failed to release item lock {:?} after escalation: {}", key, err);
                }
            }
        }
    }

    fn remove_item(&self, items: &mut ItemLocks<K>, key: &K) -> Result<bool> {
        match items.remove(key) {
            Some(Some(item)) => {
                item.unlock(self.owner, DataLockType::None)?;
                Ok(true)
            }
            Some(None) => Ok(true),
            None => Ok(false),
        }
    }

    /// Release the item lock for `key`, whatever kind it is
    pub async fn unlock_item(&self, key: &K) -> Result<()> {
        let mut state = self.state.lock().await;
        self.check_open(&state)?;
        let state = &mut *state;
        if self.remove_item(&mut state.read, key)?
            || self.remove_item(&mut state.update, key)?
            || self.remove_item(&mut state.write, key)?
        {
            state.owner_lock_count = state.owner_lock_count.saturating_sub(1);
        }
        Ok(())
    }

    /// Release the owner lock once no item is tracked any more
    pub async fn unlock_owner(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.check_open(&state)?;
        self.unlock_owner_locked(&mut state)
    }

    fn unlock_owner_locked(&self, state: &mut BlockState<K>) -> Result<()> {
        if state.owner_lock_count > 0 {
            tracing::warn!(
                "Unlocking lock owner block of {} deferred, {} outstanding locks",
                self.owner,
                state.owner_lock_count
            );
            return Ok(());
        }
        tracing::debug!("Unlocking lock owner block of {}", self.owner);
        match state.owner_lock.as_ref() {
            Some(owner_lock) => owner_lock.unlock(self.owner, ObjectLockType::None),
            None => Ok(()),
        }
    }

    /// Release write, update and read item locks, then the owner lock
    ///
    /// The block cannot be used afterwards.
    pub async fn release_locks(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.check_open(&state)?;
        let state = &mut *state;

        for items in [&mut state.write, &mut state.update, &mut state.read] {
            for (key, slot) in items.drain() {
                if let Some(item) = slot {
                    if let Err(err) = item.unlock(self.owner, DataLockType::None) {
                        tracing::warn!("Failed to release item lock {:?} for {}: {}", key, self.owner, err);
                    }
                }
                state.owner_lock_count = state.owner_lock_count.saturating_sub(1);
            }
        }

        let result = self.unlock_owner_locked(state);
        state.owner_lock = None;
        state.released = true;
        result
    }

    pub async fn has_owner_lock(&self, mode: ObjectLockType) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.check_open(&state)?;
        self.owner_holds(&mut state, mode)
    }

    /// Whether `key` is covered for `mode` by an item lock or the owner lock
    pub async fn has_item_lock(&self, key: &K, mode: DataLockType) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.check_open(&state)?;
        let state = &mut *state;
        let covered = match mode {
            DataLockType::None => true,
            DataLockType::Shared => {
                self.owner_holds(state, ObjectLockType::Shared)?
                    || self.owner_holds(state, ObjectLockType::Exclusive)?
                    || Self::held(&state.read, key)
                    || Self::held(&state.update, key)
                    || Self::held(&state.write, key)
            }
            DataLockType::Update => {
                self.owner_holds(state, ObjectLockType::Exclusive)?
                    || Self::held(&state.update, key)
                    || Self::held(&state.write, key)
            }
            DataLockType::Exclusive => {
                self.owner_holds(state, ObjectLockType::Exclusive)? || Self::held(&state.write, key)
            }
        };
        Ok(covered)
    }

    fn held(items: &ItemLocks<K>, key: &K) -> bool {
        items.get(key).is_some_and(Option::is_some)
    }

    /// Tracked keys, counting escalation placeholders
    pub async fn owner_lock_count(&self) -> usize {
        self.state.lock().await.owner_lock_count
    }

    /// Item locks actually held, placeholders excluded
    pub async fn held_item_count(&self) -> usize {
        let state = self.state.lock().await;
        [&state.read, &state.update, &state.write]
            .iter()
            .map(|items| items.values().filter(|slot| slot.is_some()).count())
            .sum()
    }
}

impl<K> fmt::Debug for LockOwnerBlock<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockOwnerBlock")
            .field("owner", &self.owner)
            .field("max_item_locks", &self.max_item_locks)
            .finish_non_exhaustive()
    }
}
