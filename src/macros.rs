// Copyright 2025 Johann Kempter
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
//
// SPDX-License-Identifier: Apache-2.0

#![allow(unused_macros)]

/// Helper macro for declaring a `u32` backed arena index
///
/// ```rust, ignore
///  arena_id!(
///      /// Index of a stack record
///      StackId
///  );
///  let id = StackId::new(3);
///  assert_eq!(id.index(), 3);
/// ```
macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            /// Creates an index from its raw position
            #[must_use]
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Returns the raw position of this index
            #[must_use]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl crate::decompiler::stack::Idx for $name {
            fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

/// Helper macro for popping an operand off the current stack
///
/// ```rust, ignore
///  let value = pop!(self, "stloc");
/// ```
macro_rules! pop {
    ($visitor:expr, $what:expr) => {
        $visitor.pop_operand($what)?
    };
}
