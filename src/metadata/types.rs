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

//! Static types carried by expression nodes.
//!
//! [`TypeSig`] is a self-contained view of a .NET type: primitives are spelled out, everything
//! else is a lightweight [`TypeRef`] handle plus the one bit of shape the decompiler needs
//! (class, struct, enum, delegate, nullable, array). The resolver produces these, the
//! expression builder reasons about them.
//!
//! # Numeric promotion
//!
//! When two operands of different numeric types meet, [`TypeSig::promote`] picks the common
//! type following the usual C# rules: small integers widen to `int32`, mixing a signed
//! 32-bit value with an unsigned one widens to `int64`, and any floating point operand wins.

use std::fmt;

use crate::metadata::token::Token;

/// Reference to a type definition, reference or specification in metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeRef(pub Token);

impl TypeRef {
    /// Creates a new type reference from a metadata token.
    #[must_use]
    pub const fn new(token: Token) -> Self {
        Self(token)
    }

    /// Returns the underlying metadata token.
    #[must_use]
    pub const fn token(&self) -> Token {
        self.0
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The static type of an expression node.
///
/// # Examples
///
/// ```rust
/// use cilexpr::metadata::types::TypeSig;
///
/// let nullable = TypeSig::Nullable(Box::new(TypeSig::I32));
/// assert!(TypeSig::I32.is_numeric());
/// assert_eq!(TypeSig::I32.common_type(&nullable), Some(nullable.clone()));
/// assert_eq!(nullable.to_string(), "int32?");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum TypeSig {
    /// No value (`System.Void`)
    #[default]
    Void,
    /// `System.Boolean`
    Bool,
    /// `System.Char`
    Char,
    /// `System.SByte`
    I8,
    /// `System.Byte`
    U8,
    /// `System.Int16`
    I16,
    /// `System.UInt16`
    U16,
    /// `System.Int32`
    I32,
    /// `System.UInt32`
    U32,
    /// `System.Int64`
    I64,
    /// `System.UInt64`
    U64,
    /// `System.IntPtr`
    NativeInt,
    /// `System.UIntPtr`
    NativeUInt,
    /// `System.Single`
    F32,
    /// `System.Double`
    F64,
    /// `System.String`
    String,
    /// `System.Object`
    Object,
    /// A reference type other than the ones above
    Class(TypeRef),
    /// A user defined struct
    ValueType(TypeRef),
    /// An enumeration together with its underlying integral type
    Enum {
        /// The enum type itself
        ty: TypeRef,
        /// The underlying integral type
        underlying: Box<TypeSig>,
    },
    /// `System.Nullable<T>`
    Nullable(Box<TypeSig>),
    /// A delegate type
    Delegate(TypeRef),
    /// A single dimensional, zero based array
    Array(Box<TypeSig>),
    /// A method handle, as produced by `ldftn`
    MethodHandle,
    /// Generic type parameter `!n`
    GenericParam(u32),
    /// Generic method parameter `!!n`
    MethodGenericParam(u32),
}

impl TypeSig {
    /// Returns `true` for `void`.
    #[must_use]
    pub const fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    /// Returns `true` for `bool`.
    #[must_use]
    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    /// Returns `true` for the integral primitives (`sbyte` to `ulong`).
    #[must_use]
    pub const fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::I8 | Self::U8 | Self::I16 | Self::U16 | Self::I32 | Self::U32 | Self::I64 | Self::U64
        )
    }

    /// Returns `true` for `float` and `double`.
    #[must_use]
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Returns `true` for the integral and floating point primitives.
    ///
    /// `bool`, `char`, native integers and enums are not numeric.
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Returns `true` for the runtime primitives (numeric types, `bool`, `char` and native
    /// integers).
    #[must_use]
    pub const fn is_primitive(&self) -> bool {
        self.is_numeric()
            || matches!(
                self,
                Self::Bool | Self::Char | Self::NativeInt | Self::NativeUInt
            )
    }

    /// Returns `true` if values of this type are stored inline.
    #[must_use]
    pub const fn is_value_type(&self) -> bool {
        self.is_primitive()
            || matches!(
                self,
                Self::ValueType(_) | Self::Enum { .. } | Self::Nullable(_)
            )
    }

    /// Returns `true` if `null` is a valid value of this type.
    #[must_use]
    pub const fn accepts_null(&self) -> bool {
        matches!(
            self,
            Self::String
                | Self::Object
                | Self::Class(_)
                | Self::Delegate(_)
                | Self::Array(_)
                | Self::MethodHandle
                | Self::Nullable(_)
                | Self::GenericParam(_)
                | Self::MethodGenericParam(_)
        )
    }

    /// Returns `true` for delegate types.
    #[must_use]
    pub const fn is_delegate(&self) -> bool {
        matches!(self, Self::Delegate(_))
    }

    /// Returns `true` for enumerations.
    #[must_use]
    pub const fn is_enum(&self) -> bool {
        matches!(self, Self::Enum { .. })
    }

    /// Returns the element type of an array.
    #[must_use]
    pub fn element_type(&self) -> Option<&TypeSig> {
        match self {
            Self::Array(element) => Some(element),
            _ => None,
        }
    }

    /// Returns the wrapped type of a `Nullable<T>`.
    #[must_use]
    pub fn nullable_inner(&self) -> Option<&TypeSig> {
        match self {
            Self::Nullable(inner) => Some(inner),
            _ => None,
        }
    }

    /// Returns the underlying type of an enum, or the type itself.
    #[must_use]
    pub fn underlying(&self) -> &TypeSig {
        match self {
            Self::Enum { underlying, .. } => underlying,
            _ => self,
        }
    }

    /// Returns `true` if a value of type `from` can be used where `self` is expected
    /// without any conversion.
    #[must_use]
    pub fn is_assignable_from(&self, from: &TypeSig) -> bool {
        self == from || (matches!(self, Self::Object) && !from.is_void())
    }

    /// Rank used for numeric promotion, `None` for non-numeric types.
    fn numeric_rank(&self) -> Option<u8> {
        Some(match self {
            Self::I8 => 1,
            Self::U8 => 2,
            Self::I16 => 3,
            Self::U16 | Self::Char => 4,
            Self::I32 => 5,
            Self::U32 => 6,
            Self::I64 => 7,
            Self::U64 => 8,
            Self::F32 => 9,
            Self::F64 => 10,
            _ => return None,
        })
    }

    const fn is_signed(&self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    /// Computes the type two numeric operands are widened to before a binary operation.
    ///
    /// Returns `None` if either side is not numeric. `char` takes part as an unsigned
    /// 16-bit value.
    #[must_use]
    pub fn promote(&self, other: &TypeSig) -> Option<TypeSig> {
        let left = self.numeric_rank()?;
        let right = other.numeric_rank()?;
        if self == other && left >= 5 {
            return Some(self.clone());
        }

        let wide = if left >= right { self } else { other };
        let narrow = if left >= right { other } else { self };
        Some(match wide {
            Self::F64 | Self::F32 | Self::I64 => wide.clone(),
            Self::U64 => {
                if narrow.is_signed() {
                    Self::I64
                } else {
                    Self::U64
                }
            }
            Self::U32 => {
                if narrow.is_signed() {
                    Self::I64
                } else {
                    Self::U32
                }
            }
            _ => Self::I32,
        })
    }

    /// Computes the common type of two operands, lifting to `Nullable<T>` when one side is
    /// nullable.
    ///
    /// Returns `None` when the types have no common numeric or nullable form.
    #[must_use]
    pub fn common_type(&self, other: &TypeSig) -> Option<TypeSig> {
        if self == other {
            return Some(self.clone());
        }

        match (self, other) {
            (Self::Nullable(left), Self::Nullable(right)) => left
                .common_type(right)
                .map(|inner| Self::Nullable(Box::new(inner))),
            (Self::Nullable(inner), plain) | (plain, Self::Nullable(inner)) => {
                if plain.accepts_null() {
                    return None;
                }
                inner
                    .common_type(plain)
                    .map(|inner| Self::Nullable(Box::new(inner)))
            }
            _ => self.promote(other),
        }
    }

    /// Substitutes generic parameters from the given context.
    ///
    /// Parameters without a binding are left untouched.
    #[must_use]
    pub fn instantiate(&self, context: &GenericContext) -> TypeSig {
        match self {
            Self::GenericParam(index) => context
                .type_args
                .get(*index as usize)
                .cloned()
                .unwrap_or_else(|| self.clone()),
            Self::MethodGenericParam(index) => context
                .method_args
                .get(*index as usize)
                .cloned()
                .unwrap_or_else(|| self.clone()),
            Self::Array(element) => Self::Array(Box::new(element.instantiate(context))),
            Self::Nullable(inner) => Self::Nullable(Box::new(inner.instantiate(context))),
            _ => self.clone(),
        }
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => write!(f, "void"),
            Self::Bool => write!(f, "bool"),
            Self::Char => write!(f, "char"),
            Self::I8 => write!(f, "int8"),
            Self::U8 => write!(f, "uint8"),
            Self::I16 => write!(f, "int16"),
            Self::U16 => write!(f, "uint16"),
            Self::I32 => write!(f, "int32"),
            Self::U32 => write!(f, "uint32"),
            Self::I64 => write!(f, "int64"),
            Self::U64 => write!(f, "uint64"),
            Self::NativeInt => write!(f, "native int"),
            Self::NativeUInt => write!(f, "native uint"),
            Self::F32 => write!(f, "float32"),
            Self::F64 => write!(f, "float64"),
            Self::String => write!(f, "string"),
            Self::Object => write!(f, "object"),
            Self::Class(t) => write!(f, "class {t}"),
            Self::ValueType(t) => write!(f, "valuetype {t}"),
            Self::Enum { ty, .. } => write!(f, "enum {ty}"),
            Self::Nullable(inner) => write!(f, "{inner}?"),
            Self::Delegate(t) => write!(f, "delegate {t}"),
            Self::Array(element) => write!(f, "{element}[]"),
            Self::MethodHandle => write!(f, "method"),
            Self::GenericParam(index) => write!(f, "!{index}"),
            Self::MethodGenericParam(index) => write!(f, "!!{index}"),
        }
    }
}

/// Generic arguments in scope while decoding a method body.
///
/// Handed to the resolver with every token so that instantiated member references can be
/// resolved, and used to instantiate local variable types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct GenericContext {
    /// Arguments of the declaring type
    pub type_args: Vec<TypeSig>,
    /// Arguments of the method itself
    pub method_args: Vec<TypeSig>,
}

impl GenericContext {
    /// Creates a context from type and method arguments
    #[must_use]
    pub fn new(type_args: Vec<TypeSig>, method_args: Vec<TypeSig>) -> Self {
        GenericContext {
            type_args,
            method_args,
        }
    }

    /// Returns `true` if no generic arguments are bound
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.type_args.is_empty() && self.method_args.is_empty()
    }
}
