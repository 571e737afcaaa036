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

//! Single-resource lock object.
//!
//! A [`TransactionLock`] arbitrates one resource between many owners. All
//! mutations (grant, queue, release) run under the write half of a
//! `parking_lot` reader/writer lock and never await while holding it, so the
//! compatibility algorithm never sees a half-applied state; queries take the
//! read half and run in parallel with each other.
//!
//! Waiters park on a `oneshot` channel. The releasing side completes the
//! channel and records the grant in the same critical section.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::error::{LockError, Result};
use crate::ident::ResourceKey;
use crate::mode::{LockMode, LockState, strongest};
use crate::registry::RegistryShared;
use crate::types::LockOwnerIdentity;

static NEXT_TRACE_ID: AtomicU64 = AtomicU64::new(1);

struct PendingRequest<M> {
    id: u64,
    owner: LockOwnerIdentity,
    mode: M,
    tx: oneshot::Sender<()>,
}

struct LockCore<M: LockMode> {
    state: &'static LockState<M>,
    active: HashMap<LockOwnerIdentity, M>,
    pending: VecDeque<PendingRequest<M>>,
    pending_exclusive: Option<PendingRequest<M>>,
    next_request: u64,
}

impl<M: LockMode> LockCore<M> {
    fn new() -> Self {
        Self {
            state: M::NONE.state(),
            active: HashMap::new(),
            pending: VecDeque::new(),
            pending_exclusive: None,
            next_request: 0,
        }
    }

    /// Active entry for the owner, trying the session-only identity second
    fn resolve_owner(&self, owner: LockOwnerIdentity) -> Option<(LockOwnerIdentity, M)> {
        if let Some(mode) = self.active.get(&owner) {
            return Some((owner, *mode));
        }
        let session = owner.session_only();
        self.active.get(&session).map(|mode| (session, *mode))
    }

    fn refresh_state(&mut self) {
        self.state = strongest(self.active.values().copied()).state();
    }

    fn waiting(&self) -> usize {
        self.pending.len() + usize::from(self.pending_exclusive.is_some())
    }

    /// `ahead` counts requests that must be served before this one
    fn can_grant(&self, holder: LockOwnerIdentity, mode: M, ahead: usize) -> bool {
        self.active.is_empty()
            || (ahead == 0 && self.state.allows(mode))
            || (self.active.len() == 1
                && self.active.contains_key(&holder)
                && self.state.can_enter_exclusive
                && mode.is_exclusive())
    }

    /// Drop requests whose waiter is gone; returns whether any were dropped
    fn discard_cancelled(&mut self) -> bool {
        let mut discarded = false;
        if self.pending_exclusive.as_ref().is_some_and(|r| r.tx.is_closed()) {
            self.pending_exclusive = None;
            discarded = true;
        }
        let before = self.pending.len();
        self.pending.retain(|r| !r.tx.is_closed());
        discarded || before != self.pending.len()
    }

    fn remove_request(&mut self, id: u64) -> bool {
        if self.pending_exclusive.as_ref().is_some_and(|r| r.id == id) {
            self.pending_exclusive = None;
            return true;
        }
        let before = self.pending.len();
        self.pending.retain(|r| r.id != id);
        before != self.pending.len()
    }
}

/// Lock object for one resource, generic over the level's lock strengths
pub struct TransactionLock<M: LockMode> {
    trace_id: u64,
    key: RwLock<Option<ResourceKey>>,
    ref_count: AtomicUsize,
    core: RwLock<LockCore<M>>,
    parent: Mutex<Option<M::Parent>>,
    home: Weak<RegistryShared<M>>,
}

impl<M: LockMode> TransactionLock<M> {
    pub(crate) fn new(home: Weak<RegistryShared<M>>) -> Self {
        Self {
            trace_id: NEXT_TRACE_ID.fetch_add(1, Ordering::Relaxed),
            key: RwLock::new(None),
            ref_count: AtomicUsize::new(0),
            core: RwLock::new(LockCore::new()),
            parent: Mutex::new(None),
            home,
        }
    }

    /// Bind the lock object to a resource key
    pub fn initialise(&self, key: ResourceKey) -> Result<()> {
        let mut slot = self.key.write();
        if let Some(existing) = slot.as_ref() {
            return Err(LockError::AlreadyInitialised {
                resource: existing.to_string(),
            });
        }
        tracing::trace!(lock = self.trace_id, level = M::LEVEL, "Initialised lock for {}", key);
        *slot = Some(key);
        Ok(())
    }

    pub fn add_ref(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference; the last one evicts and recycles the lock object
    pub fn release_ref(self: &Arc<Self>) {
        match self.ref_count.fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1)) {
            Ok(1) => self.final_release(),
            Ok(_) => {}
            Err(_) => tracing::error!(lock = self.trace_id, "Reference count underflow on {} lock", M::LEVEL),
        }
    }

    fn final_release(self: &Arc<Self>) {
        match self.home.upgrade() {
            Some(registry) => registry.recycle(self),
            None => drop(self.retire()),
        }
    }

    /// Clear key and state for reuse; the parent is returned so callers can
    /// drop it outside their own critical section
    pub(crate) fn retire(&self) -> Option<M::Parent> {
        let parent = self.parent.lock().take();
        let key = self.key.write().take();
        let mut core = self.core.write();
        if !core.active.is_empty() || core.waiting() > 0 {
            tracing::warn!(
                "Recycling {} lock {:?} with {} grants and {} waiters",
                M::LEVEL,
                key,
                core.active.len(),
                core.waiting()
            );
        }
        *core = LockCore::new();
        parent
    }

    fn live_key(&self) -> Result<ResourceKey> {
        self.key
            .read()
            .clone()
            .ok_or_else(|| LockError::disposed(format!("{} lock #{}", M::LEVEL, self.trace_id)))
    }

    /// Acquire or upgrade `mode` for `owner`, waiting at most `timeout`
    pub async fn lock(&self, owner: LockOwnerIdentity, mode: M, timeout: Duration) -> Result<()> {
        owner.ensure_present()?;
        let key = self.live_key()?;
        if mode.is_none() {
            return Ok(());
        }

        let (id, mut rx) = {
            let mut core = self.core.write();
            // Cancelled waiters must not hold up this request
            if core.discard_cancelled() {
                self.release_waiting(&mut core);
            }
            let held = core.resolve_owner(owner);

            // Never weaken an existing grant
            if let Some((_, held_mode)) = held {
                if held_mode.implies(mode) {
                    tracing::trace!("{} already holds {} on {} (requested {})", owner, held_mode, key, mode);
                    return Ok(());
                }
            }
            // An upgrade must keep covering what is already held
            let mode = held.map_or(mode, |(_, held_mode)| held_mode.combine(mode));

            let holder = held.map_or(owner, |(id, _)| id);
            let ahead = core.waiting();
            if core.can_grant(holder, mode, ahead) {
                if core.active.insert(holder, mode).is_none() {
                    self.add_ref();
                }
                core.refresh_state();
                tracing::trace!("Granted {} on {} to {}", mode, key, holder);
                return Ok(());
            }

            let id = core.next_request;
            core.next_request += 1;
            let (tx, rx) = oneshot::channel();
            let request = PendingRequest { id, owner, mode, tx };

            if mode.is_exclusive() {
                let eligible =
                    core.state.can_enter_exclusive && held.is_some_and(|(_, held_mode)| held_mode == core.state.mode);
                if !eligible {
                    tracing::trace!("Rejected {} on {} for {} from state {}", mode, key, owner, core.state.mode);
                    return Err(LockError::incompatible(key.to_string(), mode));
                }
                if core.pending_exclusive.as_ref().is_some_and(|r| !r.tx.is_closed()) {
                    return Err(LockError::incompatible(key.to_string(), mode));
                }
                tracing::trace!("{} waiting for exclusive upgrade to {} on {}", owner, mode, key);
                core.pending_exclusive = Some(request);
            } else if held.is_some() && core.active.len() == 1 && ahead == 0 {
                core.active.insert(holder, mode);
                core.refresh_state();
                tracing::trace!("Upgraded {} to {} on {}", holder, mode, key);
                return Ok(());
            } else {
                tracing::trace!("Queued {} on {} for {} behind {} requests", mode, key, owner, ahead);
                core.pending.push_back(request);
            }
            (id, rx)
        };

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(LockError::rejected(key.to_string(), "request dropped before it was granted")),
            Err(_) => {
                let mut core = self.core.write();
                // A grant may have landed between the deadline and here
                if rx.try_recv().is_ok() {
                    return Ok(());
                }
                if core.remove_request(id) {
                    tracing::debug!("Purged timed-out {} request of {} on {}", mode, owner, key);
                    self.release_waiting(&mut core);
                }
                Err(LockError::timeout(key.to_string(), timeout))
            }
        }
    }

    /// Release the owner's grant, or downgrade it to `new_mode`
    ///
    /// Releasing a lock the owner does not hold is a logged no-op.
    pub fn unlock(self: &Arc<Self>, owner: LockOwnerIdentity, new_mode: M) -> Result<()> {
        owner.ensure_present()?;
        let key = self.live_key()?;

        let released = {
            let mut core = self.core.write();
            let Some((holder, held)) = core.resolve_owner(owner) else {
                tracing::debug!("Release of {} lock {} called by {} without holding it", M::LEVEL, key, owner);
                return Ok(());
            };

            let released = if new_mode.is_none() {
                core.active.remove(&holder);
                true
            } else if new_mode.rank() < held.rank() {
                core.active.insert(holder, new_mode);
                false
            } else {
                return Err(LockError::invalid_downgrade(key.to_string(), held, new_mode));
            };

            self.release_waiting(&mut core);
            released
        };

        if released {
            self.release_ref();
        }
        Ok(())
    }

    /// Whether the owner holds a grant covering `mode`
    pub fn has_lock(&self, owner: LockOwnerIdentity, mode: M) -> bool {
        if owner.is_empty() {
            return false;
        }
        self.core
            .read()
            .resolve_owner(owner)
            .is_some_and(|(_, held)| held.implies(mode))
    }

    /// Strength currently granted to the owner, if any
    pub fn held_mode(&self, owner: LockOwnerIdentity) -> Option<M> {
        self.core.read().resolve_owner(owner).map(|(_, mode)| mode)
    }

    // Grants the pending exclusive upgrade first, then drains the FIFO queue
    // while its head is compatible. Closed waiters are skipped.
    fn release_waiting(&self, core: &mut LockCore<M>) {
        core.refresh_state();

        if let Some(request) = core.pending_exclusive.take() {
            if !request.tx.is_closed() {
                let holder = core.resolve_owner(request.owner).map_or(request.owner, |(id, _)| id);
                if !core.can_grant(holder, request.mode, 0) {
                    core.pending_exclusive = Some(request);
                    return;
                }
                self.complete(core, holder, request);
            }
        }

        while let Some(head) = core.pending.front() {
            if head.tx.is_closed() {
                core.pending.pop_front();
                continue;
            }
            let holder = core.resolve_owner(head.owner).map_or(head.owner, |(id, _)| id);
            if !core.can_grant(holder, head.mode, 0) {
                break;
            }
            if let Some(request) = core.pending.pop_front() {
                self.complete(core, holder, request);
            }
        }
    }

    fn complete(&self, core: &mut LockCore<M>, holder: LockOwnerIdentity, request: PendingRequest<M>) {
        let mode = request.mode;
        if request.tx.send(()).is_err() {
            return;
        }
        match core.active.get(&holder).copied() {
            Some(held) if held.implies(mode) => {}
            Some(held) => {
                core.active.insert(holder, held.combine(mode));
            }
            None => {
                core.active.insert(holder, mode);
                self.add_ref();
            }
        }
        core.refresh_state();
        tracing::trace!(lock = self.trace_id, "Released waiting {} request of {}", mode, holder);
    }

    /// Store a new parent before dropping the old one
    pub fn set_parent(&self, parent: M::Parent) {
        let previous = self.parent.lock().replace(parent);
        drop(previous);
    }

    /// Store `parent` unless one is already linked; returns whether it was stored
    pub fn set_parent_if_absent(&self, parent: M::Parent) -> bool {
        let rejected = {
            let mut slot = self.parent.lock();
            if slot.is_some() {
                Some(parent)
            } else {
                *slot = Some(parent);
                None
            }
        };
        rejected.is_none()
    }

    pub fn has_parent(&self) -> bool {
        self.parent.lock().is_some()
    }

    pub fn parent(&self) -> Option<M::Parent>
    where
        M::Parent: Clone,
    {
        self.parent.lock().clone()
    }

    pub fn key(&self) -> Option<ResourceKey> {
        self.key.read().clone()
    }

    pub fn trace_id(&self) -> u64 {
        self.trace_id
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn current_mode(&self) -> M {
        self.core.read().state.mode
    }

    pub fn active_owner_count(&self) -> usize {
        self.core.read().active.len()
    }

    /// Queued requests, including a pending exclusive upgrade
    pub fn pending_count(&self) -> usize {
        self.core.read().waiting()
    }
}

impl<M: LockMode> std::fmt::Debug for TransactionLock<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionLock")
            .field("level", &M::LEVEL)
            .field("trace_id", &self.trace_id)
            .field("key", &self.key())
            .field("ref_count", &self.ref_count())
            .field("mode", &self.current_mode())
            .finish()
    }
}
