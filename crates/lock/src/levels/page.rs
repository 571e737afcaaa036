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

use std::convert::Infallible;

use super::ObjectLockType;
use crate::registry::LockHandle;

update_lock_type!(
    /// Database-wide lock, root of the hierarchy
    DatabaseLockType,
    level = "database",
    parent = Infallible
);

update_lock_type!(
    /// Lock on the root page of a file group
    FileGroupRootLockType,
    level = "file-group",
    parent = LockHandle<DatabaseLockType>
);

update_lock_type!(
    /// Lock on a data page or on a distribution extent
    DataLockType,
    level = "data",
    parent = LockHandle<ObjectLockType>
);

update_lock_type!(
    /// Lock on an index page
    IndexLockType,
    level = "index",
    parent = LockHandle<ObjectLockType>
);
