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

//! Concrete lock levels of the resource hierarchy.
//!
//! ```text
//! Database ─┬─ FileGroupRoot
//!           ├─ Object ─┬─ Schema
//!           │          ├─ Data (data pages)
//!           │          └─ Index (root/internal/leaf pages)
//!           └─ Object (distribution page) ── Data (distribution extents)
//! ```

/// Declares a level with the None/Shared/Update/Exclusive shape.
///
/// Shared admits Shared and Update, Update admits only Shared, Exclusive
/// admits nothing. Update and Exclusive holders may enter Exclusive directly.
macro_rules! update_lock_type {
    ($(#[$meta:meta])* $name:ident, level = $level:literal, parent = $parent:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub enum $name {
            #[default]
            None,
            Shared,
            Update,
            Exclusive,
        }

        impl $crate::mode::LockMode for $name {
            const NONE: Self = Self::None;
            const ALL: &'static [Self] = &[Self::None, Self::Shared, Self::Update, Self::Exclusive];
            const LEVEL: &'static str = $level;

            type Parent = $parent;

            fn rank(self) -> u8 {
                self as u8
            }

            fn state(self) -> &'static $crate::mode::LockState<Self> {
                use $crate::mode::LockState;
                static NONE: LockState<$name> = LockState {
                    mode: $name::None,
                    allowed: &[$name::Shared, $name::Update, $name::Exclusive],
                    can_enter_exclusive: false,
                };
                static SHARED: LockState<$name> = LockState {
                    mode: $name::Shared,
                    allowed: &[$name::Shared, $name::Update],
                    can_enter_exclusive: false,
                };
                static UPDATE: LockState<$name> = LockState {
                    mode: $name::Update,
                    allowed: &[$name::Shared],
                    can_enter_exclusive: true,
                };
                static EXCLUSIVE: LockState<$name> = LockState {
                    mode: $name::Exclusive,
                    allowed: &[],
                    can_enter_exclusive: true,
                };
                match self {
                    Self::None => &NONE,
                    Self::Shared => &SHARED,
                    Self::Update => &UPDATE,
                    Self::Exclusive => &EXCLUSIVE,
                }
            }

            fn is_exclusive(self) -> bool {
                self == Self::Exclusive
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let name = match self {
                    Self::None => "None",
                    Self::Shared => "Shared",
                    Self::Update => "Update",
                    Self::Exclusive => "Exclusive",
                };
                f.write_str(name)
            }
        }
    };
}

mod object;
mod page;
mod schema;

pub use object::ObjectLockType;
pub use page::{DataLockType, DatabaseLockType, FileGroupRootLockType, IndexLockType};
pub use schema::SchemaLockType;
