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

//! Global lock manager.
//!
//! Owns one registry per lock level and wires the resource hierarchy: the
//! first time a lock object is materialised its parent is resolved (and
//! created if needed) and linked. `lock_*`/`unlock_*` wrappers fetch a
//! handle, run the operation and drop the handle again, so the registries
//! only retain references held by grants and by callers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LockManagerConfig;
use crate::error::Result;
use crate::ident::ResourceKey;
use crate::levels::{DataLockType, DatabaseLockType, FileGroupRootLockType, IndexLockType, ObjectLockType, SchemaLockType};
use crate::mode::LockMode;
use crate::registry::{LockHandle, LockRegistry, RegistryStats};
use crate::resource_lock::ResourceLockTable;
use crate::types::{DatabaseId, FileGroupId, IndexId, IndexPageKind, LockOwnerIdentity, LogicalPageId, ObjectId, VirtualPageId};

/// Counters for every registry plus the resource lock table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockManagerStats {
    pub registries: Vec<RegistryStats>,
    pub resource_entries: usize,
}

impl LockManagerStats {
    /// Live lock objects across all levels
    pub fn total_active(&self) -> usize {
        self.registries.iter().map(|r| r.active).sum()
    }

    pub fn level(&self, level: &str) -> Option<&RegistryStats> {
        self.registries.iter().find(|r| r.level == level)
    }
}

/// Process-wide lock manager for every database
#[derive(Debug)]
pub struct GlobalLockManager {
    config: LockManagerConfig,
    databases: LockRegistry<DatabaseLockType>,
    file_groups: LockRegistry<FileGroupRootLockType>,
    objects: LockRegistry<ObjectLockType>,
    schemas: LockRegistry<SchemaLockType>,
    data: LockRegistry<DataLockType>,
    distributions: LockRegistry<ObjectLockType>,
    extents: LockRegistry<DataLockType>,
    indexes: LockRegistry<IndexLockType>,
    resources: ResourceLockTable,
}

impl Default for GlobalLockManager {
    fn default() -> Self {
        Self::new(LockManagerConfig::default())
    }
}

// Fetch-or-create a child lock and link its parent on first materialisation
fn get_child<M: LockMode>(
    registry: &LockRegistry<M>,
    key: ResourceKey,
    parent: impl FnOnce() -> Result<M::Parent>,
) -> Result<LockHandle<M>> {
    let handle = registry.get_or_create(&key)?;
    if !handle.has_parent() {
        handle.set_parent_if_absent(parent()?);
    }
    Ok(handle)
}

// Release through an existing lock object; an absent one holds nothing
fn release<M: LockMode>(registry: &LockRegistry<M>, key: &ResourceKey, owner: LockOwnerIdentity) -> Result<()> {
    owner.ensure_present()?;
    match registry.get(key) {
        Some(handle) => handle.unlock(owner, M::NONE),
        None => {
            tracing::debug!("Unlock of {} by {} found no live {} lock", key, owner, M::LEVEL);
            Ok(())
        }
    }
}

impl GlobalLockManager {
    pub fn new(config: LockManagerConfig) -> Self {
        let pools = &config.pools;
        Self {
            databases: LockRegistry::new(pools.database),
            file_groups: LockRegistry::new(pools.file_group),
            objects: LockRegistry::new(pools.object),
            schemas: LockRegistry::new(pools.schema),
            data: LockRegistry::new(pools.data),
            distributions: LockRegistry::new(pools.distribution),
            extents: LockRegistry::new(pools.extent),
            indexes: LockRegistry::new(pools.index),
            resources: ResourceLockTable::new(config.max_free_resource_locks),
            config,
        }
    }

    pub fn config(&self) -> &LockManagerConfig {
        &self.config
    }

    // Database

    pub fn get_database_lock(&self, db: DatabaseId) -> Result<LockHandle<DatabaseLockType>> {
        self.databases.get_or_create(&ResourceKey::database(db))
    }

    pub async fn lock_database(
        &self,
        db: DatabaseId,
        owner: LockOwnerIdentity,
        mode: DatabaseLockType,
        timeout: Duration,
    ) -> Result<()> {
        self.get_database_lock(db)?.lock(owner, mode, timeout).await
    }

    pub fn unlock_database(&self, db: DatabaseId, owner: LockOwnerIdentity) -> Result<()> {
        release(&self.databases, &ResourceKey::database(db), owner)
    }

    // File-group root

    pub fn get_file_group_lock(&self, db: DatabaseId, file_group: FileGroupId) -> Result<LockHandle<FileGroupRootLockType>> {
        get_child(&self.file_groups, ResourceKey::file_group_root(db, file_group), || {
            self.get_database_lock(db)
        })
    }

    pub async fn lock_file_group(
        &self,
        db: DatabaseId,
        file_group: FileGroupId,
        owner: LockOwnerIdentity,
        mode: FileGroupRootLockType,
        timeout: Duration,
    ) -> Result<()> {
        self.get_file_group_lock(db, file_group)?.lock(owner, mode, timeout).await
    }

    pub fn unlock_file_group(&self, db: DatabaseId, file_group: FileGroupId, owner: LockOwnerIdentity) -> Result<()> {
        release(&self.file_groups, &ResourceKey::file_group_root(db, file_group), owner)
    }

    // Object

    pub fn get_object_lock(&self, db: DatabaseId, object: ObjectId) -> Result<LockHandle<ObjectLockType>> {
        get_child(&self.objects, ResourceKey::object(db, object), || self.get_database_lock(db))
    }

    pub async fn lock_object(
        &self,
        db: DatabaseId,
        object: ObjectId,
        owner: LockOwnerIdentity,
        mode: ObjectLockType,
        timeout: Duration,
    ) -> Result<()> {
        self.get_object_lock(db, object)?.lock(owner, mode, timeout).await
    }

    pub fn unlock_object(&self, db: DatabaseId, object: ObjectId, owner: LockOwnerIdentity) -> Result<()> {
        release(&self.objects, &ResourceKey::object(db, object), owner)
    }

    // Schema

    pub fn get_schema_lock(&self, db: DatabaseId, object: ObjectId) -> Result<LockHandle<SchemaLockType>> {
        get_child(&self.schemas, ResourceKey::schema(db, object), || self.get_object_lock(db, object))
    }

    pub async fn lock_schema(
        &self,
        db: DatabaseId,
        object: ObjectId,
        owner: LockOwnerIdentity,
        mode: SchemaLockType,
        timeout: Duration,
    ) -> Result<()> {
        self.get_schema_lock(db, object)?.lock(owner, mode, timeout).await
    }

    pub fn unlock_schema(&self, db: DatabaseId, object: ObjectId, owner: LockOwnerIdentity) -> Result<()> {
        release(&self.schemas, &ResourceKey::schema(db, object), owner)
    }

    // Data page

    pub fn get_data_lock(&self, db: DatabaseId, object: ObjectId, logical: LogicalPageId) -> Result<LockHandle<DataLockType>> {
        get_child(&self.data, ResourceKey::data(db, object, logical), || self.get_object_lock(db, object))
    }

    pub async fn lock_data(
        &self,
        db: DatabaseId,
        object: ObjectId,
        logical: LogicalPageId,
        owner: LockOwnerIdentity,
        mode: DataLockType,
        timeout: Duration,
    ) -> Result<()> {
        self.get_data_lock(db, object, logical)?.lock(owner, mode, timeout).await
    }

    pub fn unlock_data(&self, db: DatabaseId, object: ObjectId, logical: LogicalPageId, owner: LockOwnerIdentity) -> Result<()> {
        release(&self.data, &ResourceKey::data(db, object, logical), owner)
    }

    // Distribution page and extents

    pub fn get_distribution_lock(&self, db: DatabaseId, page: VirtualPageId) -> Result<LockHandle<ObjectLockType>> {
        get_child(&self.distributions, ResourceKey::distribution(db, page), || {
            self.get_database_lock(db)
        })
    }

    pub async fn lock_distribution_page(
        &self,
        db: DatabaseId,
        page: VirtualPageId,
        owner: LockOwnerIdentity,
        mode: ObjectLockType,
        timeout: Duration,
    ) -> Result<()> {
        self.get_distribution_lock(db, page)?.lock(owner, mode, timeout).await
    }

    pub fn unlock_distribution_page(&self, db: DatabaseId, page: VirtualPageId, owner: LockOwnerIdentity) -> Result<()> {
        release(&self.distributions, &ResourceKey::distribution(db, page), owner)
    }

    pub fn get_distribution_extent_lock(
        &self,
        db: DatabaseId,
        page: VirtualPageId,
        extent: u32,
    ) -> Result<LockHandle<DataLockType>> {
        get_child(&self.extents, ResourceKey::distribution_extent(db, page, extent), || {
            self.get_distribution_lock(db, page)
        })
    }

    /// Lock the distribution page with `dist_mode`, then the extent with `extent_mode`
    #[allow(clippy::too_many_arguments)]
    pub async fn lock_distribution_extent(
        &self,
        db: DatabaseId,
        page: VirtualPageId,
        extent: u32,
        owner: LockOwnerIdentity,
        dist_mode: ObjectLockType,
        extent_mode: DataLockType,
        timeout: Duration,
    ) -> Result<()> {
        let extent_lock = self.get_distribution_extent_lock(db, page, extent)?;
        let dist_lock = self.get_distribution_lock(db, page)?;
        dist_lock.lock(owner, dist_mode, timeout).await?;
        extent_lock.lock(owner, extent_mode, timeout).await
    }

    /// Release the extent lock, then its distribution page lock
    pub fn unlock_distribution_extent(
        &self,
        db: DatabaseId,
        page: VirtualPageId,
        extent: u32,
        owner: LockOwnerIdentity,
    ) -> Result<()> {
        release(&self.extents, &ResourceKey::distribution_extent(db, page, extent), owner)?;
        release(&self.distributions, &ResourceKey::distribution(db, page), owner)
    }

    /// Serialise updates to a distribution page header
    pub async fn lock_distribution_header(&self, db: DatabaseId, page: VirtualPageId, timeout: Duration) -> Result<()> {
        tracing::trace!("Locking distribution header {}:{}", db, page);
        self.resources
            .lock_resource(&ResourceKey::distribution(db, page), true, timeout)
            .await
    }

    pub fn unlock_distribution_header(&self, db: DatabaseId, page: VirtualPageId) -> bool {
        tracing::trace!("Unlocking distribution header {}:{}", db, page);
        self.resources.unlock_resource(&ResourceKey::distribution(db, page), true)
    }

    // Index pages

    /// Index page lock; `logical` is ignored for root pages
    pub fn get_index_lock(
        &self,
        db: DatabaseId,
        object: ObjectId,
        index: IndexId,
        kind: IndexPageKind,
        logical: Option<LogicalPageId>,
    ) -> Result<LockHandle<IndexLockType>> {
        get_child(
            &self.indexes,
            ResourceKey::index(db, object, index, kind, logical),
            || self.get_object_lock(db, object),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn lock_index_page(
        &self,
        db: DatabaseId,
        object: ObjectId,
        index: IndexId,
        kind: IndexPageKind,
        logical: Option<LogicalPageId>,
        owner: LockOwnerIdentity,
        mode: IndexLockType,
        timeout: Duration,
    ) -> Result<()> {
        self.get_index_lock(db, object, index, kind, logical)?
            .lock(owner, mode, timeout)
            .await
    }

    pub fn unlock_index_page(
        &self,
        db: DatabaseId,
        object: ObjectId,
        index: IndexId,
        kind: IndexPageKind,
        logical: Option<LogicalPageId>,
        owner: LockOwnerIdentity,
    ) -> Result<()> {
        release(&self.indexes, &ResourceKey::index(db, object, index, kind, logical), owner)
    }

    // Generic resource locks

    pub async fn lock_resource(&self, key: &ResourceKey, writable: bool, timeout: Duration) -> Result<()> {
        self.resources.lock_resource(key, writable, timeout).await
    }

    pub fn unlock_resource(&self, key: &ResourceKey, writable: bool) -> bool {
        self.resources.unlock_resource(key, writable)
    }

    pub fn stats(&self) -> LockManagerStats {
        let mut distributions = self.distributions.stats();
        distributions.level = "distribution".to_string();
        let mut extents = self.extents.stats();
        extents.level = "extent".to_string();

        LockManagerStats {
            registries: vec![
                self.databases.stats(),
                self.file_groups.stats(),
                self.objects.stats(),
                self.schemas.stats(),
                self.data.stats(),
                distributions,
                extents,
                self.indexes.stats(),
            ],
            resource_entries: self.resources.len(),
        }
    }
}
