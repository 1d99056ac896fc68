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

//! Branch target identities.
//!
//! A [`Label`] names a byte offset inside a method body that some branch jumps to. Labels are
//! the keys under which control-flow paths wait for each other until the decoder reaches the
//! target offset. The [`Label::FINISH`] sentinel stands for "end of method" and collects every
//! path that executed a `ret`.

use std::fmt;

/// A branch target inside a method body, or the end-of-method sentinel.
///
/// Equality and hashing are by offset only.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u32);

impl Label {
    /// Sentinel label that every returning path jumps to.
    pub const FINISH: Label = Label(u32::MAX);

    /// Creates a label for the given byte offset.
    ///
    /// Offsets are bounded by the size of a method body, which never comes close to the
    /// sentinel value.
    #[must_use]
    pub const fn new(offset: usize) -> Self {
        Label(offset as u32)
    }

    /// Returns the byte offset this label refers to, or `None` for [`Label::FINISH`].
    #[must_use]
    pub const fn offset(&self) -> Option<usize> {
        if self.is_finish() {
            None
        } else {
            Some(self.0 as usize)
        }
    }

    /// Returns `true` if this is the end-of-method sentinel.
    #[must_use]
    pub const fn is_finish(&self) -> bool {
        self.0 == u32::MAX
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_finish() {
            write!(f, "FINISH")
        } else {
            write!(f, "IL_{:04x}", self.0)
        }
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Label({self})")
    }
}
