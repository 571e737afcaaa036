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

use crate::*;

const WAIT: Duration = Duration::from_millis(200);
const DB: DatabaseId = DatabaseId(1);
const OBJ: ObjectId = ObjectId(0x10);

fn owner(n: u64) -> LockOwnerIdentity {
    LockOwnerIdentity::new(n, n)
}

async fn check_matrix<M: LockMode>() {
    let first = owner(1);
    let second = owner(2);
    for &held in M::ALL.iter().filter(|m| !m.is_none()) {
        for &requested in M::ALL.iter().filter(|m| !m.is_none()) {
            let lock = LockHandle::<M>::detached(ResourceKey::from("TST:1")).unwrap();
            lock.lock(first, held, WAIT).await.unwrap();

            let result = lock.lock(second, requested, Duration::from_millis(10)).await;
            let expected = held.state().allows(requested);
            assert_eq!(
                result.is_ok(),
                expected,
                "{} level: {} held, {} requested",
                M::LEVEL,
                held,
                requested
            );
            if expected {
                assert!(lock.has_lock(first, held));
                assert!(lock.has_lock(second, requested));
            } else if requested.is_exclusive() {
                // Only an eligible holder may wait for exclusive entry
                assert!(matches!(result, Err(LockError::Incompatible { .. })));
                assert_eq!(lock.pending_count(), 0);
            } else {
                assert!(result.unwrap_err().is_timeout());
                assert_eq!(lock.pending_count(), 0);
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_grants_follow_compatibility_tables() {
    check_matrix::<DatabaseLockType>().await;
    check_matrix::<FileGroupRootLockType>().await;
    check_matrix::<ObjectLockType>().await;
    check_matrix::<SchemaLockType>().await;
    check_matrix::<DataLockType>().await;
    check_matrix::<IndexLockType>().await;
}

#[tokio::test]
async fn test_exclusive_holder_blocks_until_release() {
    let manager = Arc::new(GlobalLockManager::default());
    manager
        .lock_object(DB, OBJ, owner(1), ObjectLockType::Exclusive, WAIT)
        .await
        .unwrap();

    let err = manager
        .lock_object(DB, OBJ, owner(2), ObjectLockType::IntentShared, Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(err.is_retryable());

    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .lock_object(DB, OBJ, owner(2), ObjectLockType::IntentShared, Duration::from_secs(2))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    manager.unlock_object(DB, OBJ, owner(1)).unwrap();
    waiter.await.unwrap().unwrap();

    let lock = manager.get_object_lock(DB, OBJ).unwrap();
    assert!(lock.has_lock(owner(2), ObjectLockType::IntentShared));
    assert!(!lock.has_lock(owner(1), ObjectLockType::IntentShared));
}

#[tokio::test]
async fn test_waiters_granted_in_arrival_order() {
    let manager = Arc::new(GlobalLockManager::default());
    let page = LogicalPageId(7);
    manager
        .lock_data(DB, OBJ, page, owner(1), DataLockType::Exclusive, WAIT)
        .await
        .unwrap();

    let mut waiters = Vec::new();
    for (n, mode) in [(2, DataLockType::Shared), (3, DataLockType::Update), (4, DataLockType::Update)] {
        let manager = manager.clone();
        waiters.push(tokio::spawn(async move {
            manager
                .lock_data(DB, OBJ, page, owner(n), mode, Duration::from_secs(2))
                .await
        }));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let lock = manager.get_data_lock(DB, OBJ, page).unwrap();
    assert_eq!(lock.pending_count(), 3);

    manager.unlock_data(DB, OBJ, page, owner(1)).unwrap();
    let last = waiters.pop().unwrap();
    for waiter in waiters {
        waiter.await.unwrap().unwrap();
    }
    // Shared and update run together, the second update queues behind them
    assert!(lock.has_lock(owner(2), DataLockType::Shared));
    assert!(lock.has_lock(owner(3), DataLockType::Update));
    assert_eq!(lock.current_mode(), DataLockType::Update);
    assert_eq!(lock.pending_count(), 1);

    manager.unlock_data(DB, OBJ, page, owner(2)).unwrap();
    assert_eq!(lock.pending_count(), 1);
    manager.unlock_data(DB, OBJ, page, owner(3)).unwrap();
    last.await.unwrap().unwrap();
    assert!(lock.has_lock(owner(4), DataLockType::Update));
}

#[tokio::test]
async fn test_timed_out_request_leaves_no_trace() {
    let manager = GlobalLockManager::default();
    let page = LogicalPageId(1);
    manager
        .lock_data(DB, OBJ, page, owner(1), DataLockType::Exclusive, WAIT)
        .await
        .unwrap();

    let err = manager
        .lock_data(DB, OBJ, page, owner(2), DataLockType::Shared, Duration::from_millis(30))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::Timeout { .. }));
    {
        let lock = manager.get_data_lock(DB, OBJ, page).unwrap();
        assert_eq!(lock.pending_count(), 0);
        assert_eq!(lock.active_owner_count(), 1);
    }

    manager.unlock_data(DB, OBJ, page, owner(1)).unwrap();
    assert_eq!(manager.stats().total_active(), 0);
}

#[tokio::test]
async fn test_child_lock_keeps_parent_alive() {
    let manager = GlobalLockManager::new(LockManagerConfig::minimal());
    manager
        .lock_data(DB, OBJ, LogicalPageId(1), owner(1), DataLockType::Shared, WAIT)
        .await
        .unwrap();

    let stats = manager.stats();
    assert_eq!(stats.level("data").map(|s| s.active), Some(1));
    assert_eq!(stats.level("object").map(|s| s.active), Some(1));
    assert_eq!(stats.level("database").map(|s| s.active), Some(1));

    manager.unlock_data(DB, OBJ, LogicalPageId(1), owner(1)).unwrap();
    let stats = manager.stats();
    assert_eq!(stats.total_active(), 0);
    // Database locks are never pooled
    assert_eq!(stats.level("database").map(|s| s.free), Some(0));
    assert_eq!(stats.level("object").map(|s| s.free), Some(1));
}

#[tokio::test]
async fn test_recycled_lock_serves_new_resource() {
    let manager = GlobalLockManager::new(LockManagerConfig::minimal());
    manager
        .lock_object(DB, OBJ, owner(1), ObjectLockType::Exclusive, WAIT)
        .await
        .unwrap();
    manager.unlock_object(DB, OBJ, owner(1)).unwrap();

    let other = ObjectId(0x11);
    manager
        .lock_object(DB, other, owner(2), ObjectLockType::Shared, WAIT)
        .await
        .unwrap();
    let lock = manager.get_object_lock(DB, other).unwrap();
    assert_eq!(lock.active_owner_count(), 1);
    assert_eq!(lock.current_mode(), ObjectLockType::Shared);
    assert!(!lock.has_lock(owner(1), ObjectLockType::IntentShared));
    assert_eq!(manager.stats().level("object").map(|s| s.pool.hits), Some(1));
}

#[tokio::test]
async fn test_session_lock_covers_transactions() {
    let manager = GlobalLockManager::default();
    let session = LockOwnerIdentity::for_session(5u64);
    manager
        .lock_database(DB, session, DatabaseLockType::Shared, WAIT)
        .await
        .unwrap();

    let lock = manager.get_database_lock(DB).unwrap();
    assert!(lock.has_lock(LockOwnerIdentity::new(5u64, 9u64), DatabaseLockType::Shared));
    assert!(!lock.has_lock(LockOwnerIdentity::new(6u64, 9u64), DatabaseLockType::Shared));
    drop(lock);
    manager.unlock_database(DB, session).unwrap();
}

#[tokio::test]
async fn test_transaction_escalation_round_trip() {
    let global = Arc::new(GlobalLockManager::new(LockManagerConfig::minimal()));
    let database = DatabaseLockManager::new(global.clone(), DB);
    let transaction = TransactionLockOwnerBlock::new(database.clone(), owner(1)).unwrap();
    let block = transaction.data_block(OBJ).unwrap();

    let threshold = global.config().data_item_lock_threshold as u64;
    for n in 0..=threshold {
        block.lock_item(LogicalPageId(n), DataLockType::Shared, WAIT).await.unwrap();
    }

    assert!(block.has_owner_lock(ObjectLockType::Shared).await.unwrap());
    assert_eq!(block.owner_lock_count().await, threshold as usize + 1);
    assert_eq!(global.stats().level("data").map(|s| s.active), Some(0));

    // Another transaction can still read but no longer write
    let other = owner(2);
    database
        .lock_object(OBJ, other, ObjectLockType::IntentShared, WAIT)
        .await
        .unwrap();
    let err = database
        .lock_object(OBJ, other, ObjectLockType::IntentExclusive, Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    database.unlock_object(OBJ, other).unwrap();

    transaction.release_all().await.unwrap();
    assert_eq!(global.stats().total_active(), 0);
    assert!(matches!(
        block.lock_item(LogicalPageId(0), DataLockType::Shared, WAIT).await,
        Err(LockError::Aborted { .. })
    ));
}

#[tokio::test]
async fn test_distribution_extent_and_header() {
    let manager = GlobalLockManager::default();
    let page = VirtualPageId(0x40);
    manager
        .lock_distribution_extent(DB, page, 3, owner(1), ObjectLockType::IntentExclusive, DataLockType::Exclusive, WAIT)
        .await
        .unwrap();
    manager.lock_distribution_header(DB, page, WAIT).await.unwrap();

    assert!(
        manager
            .get_distribution_lock(DB, page)
            .unwrap()
            .has_lock(owner(1), ObjectLockType::IntentExclusive)
    );
    assert!(manager.lock_distribution_header(DB, page, Duration::from_millis(10)).await.is_err());

    assert!(manager.unlock_distribution_header(DB, page));
    manager.unlock_distribution_extent(DB, page, 3, owner(1)).unwrap();
    let stats = manager.stats();
    assert_eq!(stats.total_active(), 0);
    assert_eq!(stats.resource_entries, 0);
}

#[test]
fn test_global_manager_is_shared() {
    let a = global_lock_manager();
    let b = global_lock_manager();
    assert!(Arc::ptr_eq(&a, &b));

    let err = init_global_lock_manager(LockManagerConfig::default()).unwrap_err();
    assert!(matches!(err, LockError::AlreadyInitialised { .. }));
}
