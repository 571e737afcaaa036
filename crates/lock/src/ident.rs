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

//! Resource key derivation.
//!
//! Every lockable resource maps to exactly one key. Each level uses its own
//! prefix and a fixed field order, so two different resources never share a
//! key and the registry interns one lock object per resource.

use smartstring::{LazyCompact, SmartString};
use std::fmt::{self, Write};

use crate::types::{DatabaseId, FileGroupId, IndexId, IndexPageKind, LogicalPageId, ObjectId, VirtualPageId};

/// Interning key of a lockable resource; short keys stay inline
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(SmartString<LazyCompact>);

impl ResourceKey {
    fn build(prefix: &str, fields: &[u64]) -> Self {
        let mut key = SmartString::<LazyCompact>::new();
        key.push_str(prefix);
        key.push(':');
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                key.push('$');
            }
            // Writing into a string cannot fail
            let _ = write!(key, "{field:X}");
        }
        Self(key)
    }

    pub fn database(db: DatabaseId) -> Self {
        Self::build("DBK", &[db.0.into()])
    }

    pub fn file_group_root(db: DatabaseId, file_group: FileGroupId) -> Self {
        Self::build("FRK", &[db.0.into(), file_group.0.into()])
    }

    pub fn distribution(db: DatabaseId, page: VirtualPageId) -> Self {
        Self::build("DLK", &[db.0.into(), page.0])
    }

    pub fn distribution_extent(db: DatabaseId, page: VirtualPageId, extent: u32) -> Self {
        Self::build("ELK", &[db.0.into(), page.0, extent.into()])
    }

    pub fn object(db: DatabaseId, object: ObjectId) -> Self {
        Self::build("OLK", &[db.0.into(), object.0.into()])
    }

    pub fn schema(db: DatabaseId, object: ObjectId) -> Self {
        Self::build("OSK", &[db.0.into(), object.0.into()])
    }

    pub fn data(db: DatabaseId, object: ObjectId, logical: LogicalPageId) -> Self {
        Self::build("ODK", &[db.0.into(), object.0.into(), logical.0])
    }

    /// Index page key; root pages carry no logical id
    pub fn index(db: DatabaseId, object: ObjectId, index: IndexId, kind: IndexPageKind, logical: Option<LogicalPageId>) -> Self {
        match (kind, logical) {
            (IndexPageKind::Root, _) | (_, None) => {
                let prefix = match kind {
                    IndexPageKind::Root => "IRK",
                    IndexPageKind::Internal => "IIK",
                    IndexPageKind::Leaf => "ILK",
                };
                Self::build(prefix, &[db.0.into(), object.0.into(), index.0.into()])
            }
            (IndexPageKind::Internal, Some(logical)) => {
                Self::build("IIK", &[db.0.into(), object.0.into(), index.0.into(), logical.0])
            }
            (IndexPageKind::Leaf, Some(logical)) => {
                Self::build("ILK", &[db.0.into(), object.0.into(), index.0.into(), logical.0])
            }
        }
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<&str> for ResourceKey {
    fn from(value: &str) -> Self {
        Self(SmartString::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_key_format() {
        let db = DatabaseId(1);
        assert_eq!(ResourceKey::database(db).as_str(), "DBK:1");
        assert_eq!(ResourceKey::file_group_root(db, FileGroupId(2)).as_str(), "FRK:1$2");
        assert_eq!(ResourceKey::data(db, ObjectId(10), LogicalPageId(255)).as_str(), "ODK:1$A$FF");
        assert_eq!(
            ResourceKey::distribution_extent(db, VirtualPageId(0x100), 3).as_str(),
            "ELK:1$100$3"
        );
        assert_eq!(
            ResourceKey::index(db, ObjectId(4), IndexId(5), IndexPageKind::Root, Some(LogicalPageId(9))).as_str(),
            "IRK:1$4$5"
        );
        assert_eq!(
            ResourceKey::index(db, ObjectId(4), IndexId(5), IndexPageKind::Leaf, Some(LogicalPageId(9))).as_str(),
            "ILK:1$4$5$9"
        );
    }

    #[test]
    fn test_keys_are_distinct_across_levels() {
        let db = DatabaseId(1);
        let keys = [
            ResourceKey::database(db),
            ResourceKey::file_group_root(db, FileGroupId(1)),
            ResourceKey::distribution(db, VirtualPageId(1)),
            ResourceKey::distribution_extent(db, VirtualPageId(1), 1),
            ResourceKey::object(db, ObjectId(1)),
            ResourceKey::schema(db, ObjectId(1)),
            ResourceKey::data(db, ObjectId(1), LogicalPageId(1)),
            ResourceKey::index(db, ObjectId(1), IndexId(1), IndexPageKind::Root, None),
            ResourceKey::index(db, ObjectId(1), IndexId(1), IndexPageKind::Internal, Some(LogicalPageId(1))),
            ResourceKey::index(db, ObjectId(1), IndexId(1), IndexPageKind::Leaf, Some(LogicalPageId(1))),
        ];
        let unique: HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());

        // Field boundaries are delimited, so 1$23 and 12$3 never collide
        assert_ne!(
            ResourceKey::data(db, ObjectId(0x1), LogicalPageId(0x23)),
            ResourceKey::data(db, ObjectId(0x12), LogicalPageId(0x3))
        );
        assert_eq!(ResourceKey::object(db, ObjectId(7)), ResourceKey::object(db, ObjectId(7)));
    }
}
