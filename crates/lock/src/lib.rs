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

//! Hierarchical multi-granularity lock manager for the Trunk page store.
//!
//! Locks are taken on database, file-group, object, schema and page
//! resources by a [`LockOwnerIdentity`]. Taking a lock on a child resource
//! keeps its parent lock object alive, and per-transaction owner blocks
//! escalate many page locks into one object lock.

// ============================================================================
// Core Module Declarations
// ============================================================================

// Core Modules
pub mod config;
pub mod error;
pub mod ident;
pub mod mode;
pub mod types;

// Lock Object Layer
pub mod levels;
pub mod object_pool;
pub mod registry;
pub mod resource_lock;
pub mod transaction_lock;

// Manager Layer
pub mod database;
pub mod manager;

// Transaction Layer
pub mod owner_block;
pub mod transaction;

#[cfg(test)]
mod tests;

// ============================================================================
// Public API Exports
// ============================================================================

pub use crate::{
    config::{LockManagerConfig, PoolConfig},
    database::DatabaseLockManager,
    error::{LockError, Result},
    ident::ResourceKey,
    levels::{DataLockType, DatabaseLockType, FileGroupRootLockType, IndexLockType, ObjectLockType, SchemaLockType},
    manager::{GlobalLockManager, LockManagerStats},
    mode::{LockMode, LockState},
    owner_block::{
        DataLockOwnerBlock, DataLockSource, DistributionLockOwnerBlock, DistributionLockSource, LockOwnerBlock, OwnerLockSource,
    },
    registry::{LockHandle, LockRegistry, RegistryStats},
    resource_lock::ResourceLockTable,
    transaction::TransactionLockOwnerBlock,
    transaction_lock::TransactionLock,
    types::{
        DatabaseId, FileGroupId, IndexId, IndexPageKind, LockOwnerIdentity, LogicalPageId, ObjectId, SessionId, TransactionId,
        VirtualPageId,
    },
};

// ============================================================================
// Version Information
// ============================================================================

/// Current version of the lock crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Global Lock Manager
// ============================================================================

use once_cell::sync::OnceCell;
use std::sync::Arc;

static GLOBAL_LOCK_MANAGER: OnceCell<Arc<GlobalLockManager>> = OnceCell::new();

/// Process-wide lock manager, built from the environment on first use
///
/// Falls back to the default configuration when the `TRUNK_LOCK_*`
/// overrides cannot be parsed.
pub fn global_lock_manager() -> Arc<GlobalLockManager> {
    GLOBAL_LOCK_MANAGER
        .get_or_init(|| {
            let config = LockManagerConfig::from_env().unwrap_or_else(|err| {
                tracing::warn!("Invalid lock manager environment configuration, using defaults: {}", err);
                LockManagerConfig::default()
            });
            Arc::new(GlobalLockManager::new(config))
        })
        .clone()
}

/// Install the process-wide lock manager before its first use
pub fn init_global_lock_manager(config: LockManagerConfig) -> Result<Arc<GlobalLockManager>> {
    config.validate()?;
    let manager = Arc::new(GlobalLockManager::new(config));
    GLOBAL_LOCK_MANAGER
        .set(manager.clone())
        .map_err(|_| LockError::AlreadyInitialised {
            resource: "global lock manager".to_string(),
        })?;
    Ok(manager)
}
