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

//! Lock strengths and their compatibility tables.
//!
//! Every lock level defines a small enum of strengths implementing
//! [`LockMode`]. The enum's rank orders strengths for downgrade checks, while
//! a per-strength [`LockState`] decides what may be granted alongside it.

use std::fmt::{Debug, Display};
use std::hash::Hash;

/// A lock strength of one resource level
pub trait LockMode: Copy + Eq + Hash + Debug + Display + Send + Sync + 'static {
    /// The absence of a lock
    const NONE: Self;

    /// Every strength in rank order, `NONE` first
    const ALL: &'static [Self];

    /// Level name used in diagnostics
    const LEVEL: &'static str;

    /// Owned reference to the enclosing lock in the hierarchy
    type Parent: Send + Sync + 'static;

    /// Ordinal used for downgrade checks and state recomputation
    fn rank(self) -> u8;

    /// Singleton state describing what may run alongside this strength
    fn state(self) -> &'static LockState<Self>;

    /// Whether this strength grants sole access at this level
    fn is_exclusive(self) -> bool;

    /// Whether holding `self` already satisfies a request for `requested`
    fn implies(self, requested: Self) -> bool {
        requested.rank() <= self.rank()
    }

    /// Grant that covers both `self`, already held, and `requested`
    fn combine(self, requested: Self) -> Self {
        if requested.rank() > self.rank() { requested } else { self }
    }

    fn is_none(self) -> bool {
        self == Self::NONE
    }
}

/// Per-strength compatibility entry
#[derive(Debug)]
pub struct LockState<M: 'static> {
    /// Strength this state represents
    pub mode: M,
    /// Strengths other owners may be granted while this state is current
    pub allowed: &'static [M],
    /// Whether the sole holder may move straight to an exclusive strength
    pub can_enter_exclusive: bool,
}

impl<M: LockMode> LockState<M> {
    pub fn allows(&self, requested: M) -> bool {
        self.allowed.contains(&requested)
    }
}

/// Strongest of the given strengths, `NONE` when empty
pub fn strongest<M: LockMode>(modes: impl IntoIterator<Item = M>) -> M {
    modes.into_iter().max_by_key(|m| m.rank()).unwrap_or(M::NONE)
}

/// Whether two different owners may hold `a` and `b` at the same time
pub fn compatible<M: LockMode>(a: M, b: M) -> bool {
    a.is_none() || b.is_none() || (a.state().allows(b) && b.state().allows(a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levels::{DataLockType, DatabaseLockType, IndexLockType, ObjectLockType, SchemaLockType};
    use crate::levels::FileGroupRootLockType;

    fn check_tables<M: LockMode>() {
        for (rank, mode) in M::ALL.iter().enumerate() {
            assert_eq!(mode.rank() as usize, rank, "{} ranks follow declaration order", M::LEVEL);
            assert_eq!(mode.state().mode, *mode);
            assert!(mode.implies(M::NONE));
            assert!(mode.implies(*mode));
            for other in M::ALL {
                let combined = mode.combine(*other);
                assert!(combined.implies(*mode) && combined.implies(*other), "{} combine covers both", M::LEVEL);
            }
        }
        let exclusive: Vec<_> = M::ALL.iter().filter(|m| m.is_exclusive()).collect();
        assert_eq!(exclusive.len(), 1, "{} has one exclusive strength", M::LEVEL);
        assert!(exclusive[0].state().allowed.is_empty());
        assert_eq!(strongest(M::ALL.iter().copied()), *exclusive[0]);
        assert_eq!(strongest(std::iter::empty::<M>()), M::NONE);
    }

    #[test]
    fn test_level_tables_are_consistent() {
        check_tables::<DatabaseLockType>();
        check_tables::<FileGroupRootLockType>();
        check_tables::<ObjectLockType>();
        check_tables::<SchemaLockType>();
        check_tables::<DataLockType>();
        check_tables::<IndexLockType>();
    }

    #[test]
    fn test_compatibility_is_symmetric() {
        use ObjectLockType::*;
        assert!(compatible(IntentShared, SharedIntentExclusive));
        assert!(compatible(SharedIntentExclusive, IntentShared));
        assert!(!compatible(Shared, IntentExclusive));
        assert!(!compatible(IntentExclusive, Shared));
        assert!(!compatible(Exclusive, IntentShared));
        assert!(compatible(IntentExclusive, IntentExclusive));

        assert!(compatible(DataLockType::Shared, DataLockType::Update));
        assert!(!compatible(DataLockType::Update, DataLockType::Update));
        assert!(compatible(SchemaLockType::SchemaStability, SchemaLockType::BulkUpdate));
        assert!(!compatible(SchemaLockType::SchemaModification, SchemaLockType::SchemaStability));
    }
}
