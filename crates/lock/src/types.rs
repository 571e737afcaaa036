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

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LockError, Result};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        pub struct $name(pub $inner);

        impl $name {
            pub const ZERO: Self = Self(0);

            pub fn new(value: $inner) -> Self {
                Self(value)
            }

            pub fn value(self) -> $inner {
                self.0
            }

            pub fn is_zero(self) -> bool {
                self.0 == 0
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:X}", self.0)
            }
        }
    };
}

id_type!(
    /// Session identifier
    SessionId(u64)
);
id_type!(
    /// Transaction identifier, zero when no transaction is active
    TransactionId(u64)
);
id_type!(
    /// Database identifier
    DatabaseId(u16)
);
id_type!(
    /// File-group identifier within a database
    FileGroupId(u8)
);
id_type!(
    /// Object (table, index owner) identifier
    ObjectId(u32)
);
id_type!(
    /// Device-relative page identifier
    VirtualPageId(u64)
);
id_type!(
    /// Object-relative page identifier
    LogicalPageId(u64)
);
id_type!(
    /// Index identifier
    IndexId(u32)
);

impl LogicalPageId {
    /// Next page id in sequence, `None` past the last one
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

/// Which part of an index tree a page lock covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexPageKind {
    Root,
    Internal,
    Leaf,
}

/// Identifies who holds a lock grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LockOwnerIdentity {
    pub session: SessionId,
    pub transaction: TransactionId,
}

impl LockOwnerIdentity {
    pub fn new(session: impl Into<SessionId>, transaction: impl Into<TransactionId>) -> Self {
        Self {
            session: session.into(),
            transaction: transaction.into(),
        }
    }

    /// Owner identity for session-scoped locks that outlive a transaction
    pub fn for_session(session: impl Into<SessionId>) -> Self {
        Self::new(session, TransactionId::ZERO)
    }

    /// The same owner with the transaction id zeroed
    pub fn session_only(&self) -> Self {
        if self.transaction.is_zero() {
            *self
        } else {
            Self::for_session(self.session)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.session.is_zero() && self.transaction.is_zero()
    }

    /// Fail with `MissingIdentity` when neither id is set
    pub fn ensure_present(&self) -> Result<()> {
        if self.is_empty() {
            return Err(LockError::MissingIdentity);
        }
        Ok(())
    }
}

impl fmt::Display for LockOwnerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LOI:[{}:{}]", self.session, self.transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_only_projection() {
        let owner = LockOwnerIdentity::new(7u64, 42u64);
        let session = owner.session_only();
        assert_eq!(session.session, SessionId(7));
        assert!(session.transaction.is_zero());
        assert_eq!(session.session_only(), session);
        assert_ne!(owner, session);
    }

    #[test]
    fn test_identity_presence() {
        assert!(LockOwnerIdentity::default().is_empty());
        assert_eq!(LockOwnerIdentity::default().ensure_present(), Err(LockError::MissingIdentity));
        assert!(LockOwnerIdentity::new(0u64, 3u64).ensure_present().is_ok());
        assert!(LockOwnerIdentity::for_session(1u64).ensure_present().is_ok());
    }

    #[test]
    fn test_display() {
        assert_eq!(LockOwnerIdentity::new(10u64, 255u64).to_string(), "LOI:[A:FF]");
    }

    #[test]
    fn test_next_logical_page() {
        assert_eq!(LogicalPageId(9).next(), Some(LogicalPageId(10)));
        assert_eq!(LogicalPageId(u64::MAX).next(), None);
    }
}
