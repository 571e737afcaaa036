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

use std::fmt;

use super::ObjectLockType;
use crate::mode::{LockMode, LockState};
use crate::registry::LockHandle;

/// Lock on an object's schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SchemaLockType {
    #[default]
    None,
    SchemaStability,
    BulkUpdate,
    SchemaModification,
}

static NONE: LockState<SchemaLockType> = LockState {
    mode: SchemaLockType::None,
    allowed: &[
        SchemaLockType::SchemaStability,
        SchemaLockType::BulkUpdate,
        SchemaLockType::SchemaModification,
    ],
    can_enter_exclusive: false,
};

static SCHEMA_STABILITY: LockState<SchemaLockType> = LockState {
    mode: SchemaLockType::SchemaStability,
    allowed: &[SchemaLockType::SchemaStability, SchemaLockType::BulkUpdate],
    can_enter_exclusive: false,
};

static BULK_UPDATE: LockState<SchemaLockType> = LockState {
    mode: SchemaLockType::BulkUpdate,
    allowed: &[SchemaLockType::SchemaStability, SchemaLockType::BulkUpdate],
    can_enter_exclusive: false,
};

static SCHEMA_MODIFICATION: LockState<SchemaLockType> = LockState {
    mode: SchemaLockType::SchemaModification,
    allowed: &[],
    can_enter_exclusive: true,
};

impl LockMode for SchemaLockType {
    const NONE: Self = Self::None;
    const ALL: &'static [Self] = &[Self::None, Self::SchemaStability, Self::BulkUpdate, Self::SchemaModification];
    const LEVEL: &'static str = "schema";

    type Parent = LockHandle<ObjectLockType>;

    fn rank(self) -> u8 {
        self as u8
    }

    fn state(self) -> &'static LockState<Self> {
        match self {
            Self::None => &NONE,
            Self::SchemaStability => &SCHEMA_STABILITY,
            Self::BulkUpdate => &BULK_UPDATE,
            Self::SchemaModification => &SCHEMA_MODIFICATION,
        }
    }

    fn is_exclusive(self) -> bool {
        self == Self::SchemaModification
    }
}

impl fmt::Display for SchemaLockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::SchemaStability => "SchemaStability",
            Self::BulkUpdate => "BulkUpdate",
            Self::SchemaModification => "SchemaModification",
        };
        f.write_str(name)
    }
}
