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

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::levels::{DataLockType, DatabaseLockType, FileGroupRootLockType, IndexLockType, ObjectLockType, SchemaLockType};
use crate::manager::GlobalLockManager;
use crate::registry::LockHandle;
use crate::types::{DatabaseId, FileGroupId, IndexId, IndexPageKind, LockOwnerIdentity, LogicalPageId, ObjectId, VirtualPageId};

/// Lock manager scoped to a single database
#[derive(Debug, Clone)]
pub struct DatabaseLockManager {
    global: Arc<GlobalLockManager>,
    db: DatabaseId,
}

impl DatabaseLockManager {
    pub fn new(global: Arc<GlobalLockManager>, db: DatabaseId) -> Self {
        Self { global, db }
    }

    pub fn database_id(&self) -> DatabaseId {
        self.db
    }

    pub fn global(&self) -> &Arc<GlobalLockManager> {
        &self.global
    }

    /// Wait bound for callers that do not supply their own
    pub fn default_timeout(&self) -> Duration {
        self.global.config().default_timeout
    }

    pub fn get_database_lock(&self) -> Result<LockHandle<DatabaseLockType>> {
        self.global.get_database_lock(self.db)
    }

    pub async fn lock_database(&self, owner: LockOwnerIdentity, mode: DatabaseLockType, timeout: Duration) -> Result<()> {
        self.global.lock_database(self.db, owner, mode, timeout).await
    }

    pub fn unlock_database(&self, owner: LockOwnerIdentity) -> Result<()> {
        self.global.unlock_database(self.db, owner)
    }

    pub fn get_file_group_lock(&self, file_group: FileGroupId) -> Result<LockHandle<FileGroupRootLockType>> {
        self.global.get_file_group_lock(self.db, file_group)
    }

    pub async fn lock_file_group(
        &self,
        file_group: FileGroupId,
        owner: LockOwnerIdentity,
        mode: FileGroupRootLockType,
        timeout: Duration,
    ) -> Result<()> {
        self.global.lock_file_group(self.db, file_group, owner, mode, timeout).await
    }

    pub fn unlock_file_group(&self, file_group: FileGroupId, owner: LockOwnerIdentity) -> Result<()> {
        self.global.unlock_file_group(self.db, file_group, owner)
    }

    pub fn get_object_lock(&self, object: ObjectId) -> Result<LockHandle<ObjectLockType>> {
        self.global.get_object_lock(self.db, object)
    }

    pub async fn lock_object(&self, object: ObjectId, owner: LockOwnerIdentity, mode: ObjectLockType, timeout: Duration) -> Result<()> {
        self.global.lock_object(self.db, object, owner, mode, timeout).await
    }

    pub fn unlock_object(&self, object: ObjectId, owner: LockOwnerIdentity) -> Result<()> {
        self.global.unlock_object(self.db, object, owner)
    }

    pub fn get_schema_lock(&self, object: ObjectId) -> Result<LockHandle<SchemaLockType>> {
        self.global.get_schema_lock(self.db, object)
    }

    pub async fn lock_schema(&self, object: ObjectId, owner: LockOwnerIdentity, mode: SchemaLockType, timeout: Duration) -> Result<()> {
        self.global.lock_schema(self.db, object, owner, mode, timeout).await
    }

    pub fn unlock_schema(&self, object: ObjectId, owner: LockOwnerIdentity) -> Result<()> {
        self.global.unlock_schema(self.db, object, owner)
    }

    pub fn get_data_lock(&self, object: ObjectId, logical: LogicalPageId) -> Result<LockHandle<DataLockType>> {
        self.global.get_data_lock(self.db, object, logical)
    }

    pub async fn lock_data(
        &self,
        object: ObjectId,
        logical: LogicalPageId,
        owner: LockOwnerIdentity,
        mode: DataLockType,
        timeout: Duration,
    ) -> Result<()> {
        self.global.lock_data(self.db, object, logical, owner, mode, timeout).await
    }

    pub fn unlock_data(&self, object: ObjectId, logical: LogicalPageId, owner: LockOwnerIdentity) -> Result<()> {
        self.global.unlock_data(self.db, object, logical, owner)
    }

    pub fn get_distribution_lock(&self, page: VirtualPageId) -> Result<LockHandle<ObjectLockType>> {
        self.global.get_distribution_lock(self.db, page)
    }

    pub async fn lock_distribution_page(
        &self,
        page: VirtualPageId,
        owner: LockOwnerIdentity,
        mode: ObjectLockType,
        timeout: Duration,
    ) -> Result<()> {
        self.global.lock_distribution_page(self.db, page, owner, mode, timeout).await
    }

    pub fn unlock_distribution_page(&self, page: VirtualPageId, owner: LockOwnerIdentity) -> Result<()> {
        self.global.unlock_distribution_page(self.db, page, owner)
    }

    pub fn get_distribution_extent_lock(&self, page: VirtualPageId, extent: u32) -> Result<LockHandle<DataLockType>> {
        self.global.get_distribution_extent_lock(self.db, page, extent)
    }

    pub async fn lock_distribution_extent(
        &self,
        page: VirtualPageId,
        extent: u32,
        owner: LockOwnerIdentity,
        dist_mode: ObjectLockType,
        extent_mode: DataLockType,
        timeout: Duration,
    ) -> Result<()> {
        self.global
            .lock_distribution_extent(self.db, page, extent, owner, dist_mode, extent_mode, timeout)
            .await
    }

    pub fn unlock_distribution_extent(&self, page: VirtualPageId, extent: u32, owner: LockOwnerIdentity) -> Result<()> {
        self.global.unlock_distribution_extent(self.db, page, extent, owner)
    }

    pub async fn lock_distribution_header(&self, page: VirtualPageId, timeout: Duration) -> Result<()> {
        self.global.lock_distribution_header(self.db, page, timeout).await
    }

    pub fn unlock_distribution_header(&self, page: VirtualPageId) -> bool {
        self.global.unlock_distribution_header(self.db, page)
    }

    pub fn get_index_lock(
        &self,
        object: ObjectId,
        index: IndexId,
        kind: IndexPageKind,
        logical: Option<LogicalPageId>,
    ) -> Result<LockHandle<IndexLockType>> {
        self.global.get_index_lock(self.db, object, index, kind, logical)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn lock_index_page(
        &self,
        object: ObjectId,
        index: IndexId,
        kind: IndexPageKind,
        logical: Option<LogicalPageId>,
        owner: LockOwnerIdentity,
        mode: IndexLockType,
        timeout: Duration,
    ) -> Result<()> {
        self.global
            .lock_index_page(self.db, object, index, kind, logical, owner, mode, timeout)
            .await
    }

    pub fn unlock_index_page(
        &self,
        object: ObjectId,
        index: IndexId,
        kind: IndexPageKind,
        logical: Option<LogicalPageId>,
        owner: LockOwnerIdentity,
    ) -> Result<()> {
        self.global.unlock_index_page(self.db, object, index, kind, logical, owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scoped_to_database() {
        let global = Arc::new(GlobalLockManager::default());
        let first = DatabaseLockManager::new(global.clone(), DatabaseId(1));
        let second = DatabaseLockManager::new(global.clone(), DatabaseId(2));
        let owner = LockOwnerIdentity::new(1u64, 1u64);
        let other = LockOwnerIdentity::new(2u64, 2u64);
        assert_eq!(first.default_timeout(), Duration::from_secs(10));

        first
            .lock_object(ObjectId(5), owner, ObjectLockType::Exclusive, Duration::from_millis(100))
            .await
            .unwrap();
        // Same object id in another database is a different resource
        second
            .lock_object(ObjectId(5), other, ObjectLockType::Exclusive, Duration::from_millis(100))
            .await
            .unwrap();

        assert!(!first.get_object_lock(ObjectId(5)).unwrap().same_lock(&second.get_object_lock(ObjectId(5)).unwrap()));
        first.unlock_object(ObjectId(5), owner).unwrap();
        second.unlock_object(ObjectId(5), other).unwrap();
        assert_eq!(global.stats().total_active(), 0);
    }
}
