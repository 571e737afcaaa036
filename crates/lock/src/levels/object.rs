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

use super::DatabaseLockType;
use crate::mode::{LockMode, LockState};
use crate::registry::LockHandle;

/// Intent lock on an object or a distribution page
///
/// Rank runs None < IS < S < IX < SIX < X, so moving from Shared to
/// SharedIntentExclusive counts as an upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ObjectLockType {
    #[default]
    None,
    IntentShared,
    Shared,
    IntentExclusive,
    SharedIntentExclusive,
    Exclusive,
}

static NONE: LockState<ObjectLockType> = LockState {
    mode: ObjectLockType::None,
    allowed: &[
        ObjectLockType::IntentShared,
        ObjectLockType::Shared,
        ObjectLockType::IntentExclusive,
        ObjectLockType::SharedIntentExclusive,
        ObjectLockType::Exclusive,
    ],
    can_enter_exclusive: false,
};

static INTENT_SHARED: LockState<ObjectLockType> = LockState {
    mode: ObjectLockType::IntentShared,
    allowed: &[
        ObjectLockType::IntentShared,
        ObjectLockType::Shared,
        ObjectLockType::IntentExclusive,
        ObjectLockType::SharedIntentExclusive,
    ],
    can_enter_exclusive: false,
};

static SHARED: LockState<ObjectLockType> = LockState {
    mode: ObjectLockType::Shared,
    allowed: &[ObjectLockType::IntentShared, ObjectLockType::Shared],
    can_enter_exclusive: false,
};

static INTENT_EXCLUSIVE: LockState<ObjectLockType> = LockState {
    mode: ObjectLockType::IntentExclusive,
    allowed: &[ObjectLockType::IntentShared, ObjectLockType::IntentExclusive],
    can_enter_exclusive: true,
};

static SHARED_INTENT_EXCLUSIVE: LockState<ObjectLockType> = LockState {
    mode: ObjectLockType::SharedIntentExclusive,
    allowed: &[ObjectLockType::IntentShared],
    can_enter_exclusive: true,
};

static EXCLUSIVE: LockState<ObjectLockType> = LockState {
    mode: ObjectLockType::Exclusive,
    allowed: &[],
    can_enter_exclusive: true,
};

impl LockMode for ObjectLockType {
    const NONE: Self = Self::None;
    const ALL: &'static [Self] = &[
        Self::None,
        Self::IntentShared,
        Self::Shared,
        Self::IntentExclusive,
        Self::SharedIntentExclusive,
        Self::Exclusive,
    ];
    const LEVEL: &'static str = "object";

    type Parent = LockHandle<DatabaseLockType>;

    fn rank(self) -> u8 {
        self as u8
    }

    fn state(self) -> &'static LockState<Self> {
        match self {
            Self::None => &NONE,
            Self::IntentShared => &INTENT_SHARED,
            Self::Shared => &SHARED,
            Self::IntentExclusive => &INTENT_EXCLUSIVE,
            Self::SharedIntentExclusive => &SHARED_INTENT_EXCLUSIVE,
            Self::Exclusive => &EXCLUSIVE,
        }
    }

    fn is_exclusive(self) -> bool {
        self == Self::Exclusive
    }

    // Shared and IntentExclusive are not ordered by coverage
    fn implies(self, requested: Self) -> bool {
        use ObjectLockType::*;
        match (self, requested) {
            (_, None) | (Exclusive, _) => true,
            (SharedIntentExclusive, r) => r != Exclusive,
            (Shared, r) => matches!(r, Shared | IntentShared),
            (IntentExclusive, r) => matches!(r, IntentExclusive | IntentShared),
            (IntentShared, r) => r == IntentShared,
            (None, _) => false,
        }
    }

    fn combine(self, requested: Self) -> Self {
        use ObjectLockType::*;
        match (self, requested) {
            (Shared, IntentExclusive) | (IntentExclusive, Shared) => SharedIntentExclusive,
            _ if requested.rank() > self.rank() => requested,
            _ => self,
        }
    }
}

impl fmt::Display for ObjectLockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::IntentShared => "IntentShared",
            Self::Shared => "Shared",
            Self::IntentExclusive => "IntentExclusive",
            Self::SharedIntentExclusive => "SharedIntentExclusive",
            Self::Exclusive => "Exclusive",
        };
        f.write_str(name)
    }
}
