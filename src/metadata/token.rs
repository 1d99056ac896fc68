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

//! Metadata tokens.
//!
//! A [`Token`] names a row of a metadata table: the high byte is the [`TokenTable`], the low
//! 24 bits the row index. Instruction operands carry tokens for fields, methods, types and
//! user strings.
//!
//! ```rust
//! use cilexpr::metadata::token::{Token, TokenTable};
//!
//! let token = Token::from_parts(TokenTable::MethodDef, 2);
//! assert_eq!(token, Token::new(0x0600_0002));
//! assert_eq!(token.kind(), Some(TokenTable::MethodDef));
//! assert_eq!(token.row(), 2);
//! assert_eq!(token.to_string(), "0x06000002");
//! ```

use std::fmt;

use strum::{Display, EnumIter};

/// The metadata tables a CIL instruction operand token can point into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[repr(u8)]
pub enum TokenTable {
    /// `TypeRef` (0x01)
    TypeRef = 0x01,
    /// `TypeDef` (0x02)
    TypeDef = 0x02,
    /// `Field` (0x04)
    Field = 0x04,
    /// `MethodDef` (0x06)
    MethodDef = 0x06,
    /// `MemberRef` (0x0A)
    MemberRef = 0x0A,
    /// `StandAloneSig` (0x11)
    StandAloneSig = 0x11,
    /// `TypeSpec` (0x1B)
    TypeSpec = 0x1B,
    /// `MethodSpec` (0x2B)
    MethodSpec = 0x2B,
    /// User string heap (0x70)
    UserString = 0x70,
}

/// A metadata token as it appears in an instruction operand.
///
/// The high byte selects the table, the low 24 bits the row. Tokens are opaque to the
/// decompiler; they only travel to the [`crate::metadata::resolver::Resolver`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u32);

impl Token {
    /// Creates a new token from its raw 32-bit value
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table and a row index
    #[must_use]
    pub const fn from_parts(table: TokenTable, row: u32) -> Self {
        Token(((table as u32) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Returns the table byte (bits 24-31)
    #[must_use]
    pub const fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Returns the row index (bits 0-23)
    #[must_use]
    pub const fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns the table this token points into, if it is one an operand may reference
    #[must_use]
    pub fn kind(&self) -> Option<TokenTable> {
        match self.table() {
            0x01 => Some(TokenTable::TypeRef),
            0x02 => Some(TokenTable::TypeDef),
            0x04 => Some(TokenTable::Field),
            0x06 => Some(TokenTable::MethodDef),
            0x0A => Some(TokenTable::MemberRef),
            0x11 => Some(TokenTable::StandAloneSig),
            0x1B => Some(TokenTable::TypeSpec),
            0x2B => Some(TokenTable::MethodSpec),
            0x70 => Some(TokenTable::UserString),
            _ => None,
        }
    }

    /// Returns `true` for the null token
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(kind) => write!(f, "Token(0x{:08x}, {kind}[{}])", self.0, self.row()),
            None => write!(f, "Token(0x{:08x})", self.0),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
