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

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::database::DatabaseLockManager;
use crate::error::{LockError, Result};
use crate::levels::{FileGroupRootLockType, SchemaLockType};
use crate::owner_block::{DataLockOwnerBlock, DataLockSource, DistributionLockOwnerBlock, DistributionLockSource, LockOwnerBlock};
use crate::registry::LockHandle;
use crate::types::{FileGroupId, LockOwnerIdentity, ObjectId, VirtualPageId};

#[derive(Default)]
struct OwnedLocks {
    file_groups: HashMap<FileGroupId, LockHandle<FileGroupRootLockType>>,
    schemas: HashMap<ObjectId, LockHandle<SchemaLockType>>,
    distribution_blocks: HashMap<VirtualPageId, Arc<DistributionLockOwnerBlock>>,
    data_blocks: HashMap<ObjectId, Arc<DataLockOwnerBlock>>,
}

/// Every lock one transaction holds in one database
///
/// File-group and schema locks are tracked directly; data pages and
/// distribution extents go through owner blocks so they can escalate.
/// `release_all` is called once the transaction has committed or rolled
/// back, after which the block refuses further use.
pub struct TransactionLockOwnerBlock {
    manager: DatabaseLockManager,
    owner: LockOwnerIdentity,
    locks: Mutex<OwnedLocks>,
    aborted: AtomicBool,
}

impl TransactionLockOwnerBlock {
    pub fn new(manager: DatabaseLockManager, owner: LockOwnerIdentity) -> Result<Self> {
        owner.ensure_present()?;
        Ok(Self {
            manager,
            owner,
            locks: Mutex::new(OwnedLocks::default()),
            aborted: AtomicBool::new(false),
        })
    }

    pub fn owner(&self) -> LockOwnerIdentity {
        self.owner
    }

    fn check_open(&self) -> Result<()> {
        if self.aborted.load(Ordering::Acquire) {
            return Err(LockError::aborted(format!("transaction locks of {} already released", self.owner)));
        }
        Ok(())
    }

    pub fn file_group_lock(&self, file_group: FileGroupId) -> Result<LockHandle<FileGroupRootLockType>> {
        self.check_open()?;
        let mut locks = self.locks.lock();
        if let Some(handle) = locks.file_groups.get(&file_group) {
            return Ok(handle.clone());
        }
        let handle = self.manager.get_file_group_lock(file_group)?;
        locks.file_groups.insert(file_group, handle.clone());
        Ok(handle)
    }

    pub async fn lock_file_group(&self, file_group: FileGroupId, mode: FileGroupRootLockType, timeout: Duration) -> Result<()> {
        let handle = self.file_group_lock(file_group)?;
        handle.lock(self.owner, mode, timeout).await
    }

    pub fn schema_lock(&self, object: ObjectId) -> Result<LockHandle<SchemaLockType>> {
        self.check_open()?;
        let mut locks = self.locks.lock();
        if let Some(handle) = locks.schemas.get(&object) {
            return Ok(handle.clone());
        }
        let handle = self.manager.get_schema_lock(object)?;
        locks.schemas.insert(object, handle.clone());
        Ok(handle)
    }

    pub async fn lock_schema(&self, object: ObjectId, mode: SchemaLockType, timeout: Duration) -> Result<()> {
        let handle = self.schema_lock(object)?;
        handle.lock(self.owner, mode, timeout).await
    }

    /// Owner block for the data pages of `object`
    pub fn data_block(&self, object: ObjectId) -> Result<Arc<DataLockOwnerBlock>> {
        self.check_open()?;
        let threshold = self.manager.global().config().data_item_lock_threshold;
        let mut locks = self.locks.lock();
        let block = locks.data_blocks.entry(object).or_insert_with(|| {
            Arc::new(LockOwnerBlock::new(
                self.owner,
                DataLockSource::new(self.manager.clone(), object),
                threshold,
            ))
        });
        Ok(block.clone())
    }

    /// Owner block for the extents of distribution page `page`
    pub fn distribution_block(&self, page: VirtualPageId) -> Result<Arc<DistributionLockOwnerBlock>> {
        self.check_open()?;
        let threshold = self.manager.global().config().extent_item_lock_threshold;
        let mut locks = self.locks.lock();
        let block = locks.distribution_blocks.entry(page).or_insert_with(|| {
            Arc::new(LockOwnerBlock::new(
                self.owner,
                DistributionLockSource::new(self.manager.clone(), page),
                threshold,
            ))
        });
        Ok(block.clone())
    }

    /// Release every lock of the transaction
    ///
    /// File-group locks go first, then schema locks, distribution owner
    /// blocks and finally data owner blocks. Failures are logged and the
    /// release carries on; the first one is returned.
    pub async fn release_all(&self) -> Result<()> {
        if self.aborted.swap(true, Ordering::AcqRel) {
            return Err(LockError::aborted(format!("transaction locks of {} already released", self.owner)));
        }
        let locks = std::mem::take(&mut *self.locks.lock());
        let mut first_error = None;
        let mut record = |err: LockError| {
            tracing::warn!("Release of transaction lock for {} failed: {}", self.owner, err);
            first_error.get_or_insert(err);
        };

        for (_, handle) in locks.file_groups {
            if let Err(err) = handle.unlock(self.owner, FileGroupRootLockType::None) {
                record(err);
            }
        }
        for (_, handle) in locks.schemas {
            if let Err(err) = handle.unlock(self.owner, SchemaLockType::None) {
                record(err);
            }
        }
        for (_, block) in locks.distribution_blocks {
            if let Err(err) = block.release_locks().await {
                record(err);
            }
        }
        for (_, block) in locks.data_blocks {
            if let Err(err) = block.release_locks().await {
                record(err);
            }
        }

        tracing::debug!("Released all transaction locks for {}", self.owner);
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn is_released(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for TransactionLockOwnerBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let locks = self.locks.lock();
        f.debug_struct("TransactionLockOwnerBlock")
            .field("owner", &self.owner)
            .field("database", &self.manager.database_id())
            .field("file_groups", &locks.file_groups.len())
            .field("schemas", &locks.schemas.len())
            .field("distribution_blocks", &locks.distribution_blocks.len())
            .field("data_blocks", &locks.data_blocks.len())
            .field("released", &self.is_released())
            .finish()
    }
}
