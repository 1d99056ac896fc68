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

//! Resolved member descriptors.
//!
//! Descriptors are what the [`crate::metadata::resolver::Resolver`] hands back for an operand
//! token. They carry exactly the information the decompiler consumes: names for display,
//! signatures for coercion and a handful of flags marking members with special treatment
//! (compiler generated closure fields, `Array.Empty<T>()`, `Nullable<T>.HasValue`).

use std::{fmt, sync::Arc};

use bitflags::bitflags;

use crate::{
    metadata::{token::Token, types::TypeSig},
    Error, Result,
};

/// Shared handle to a method descriptor
pub type MethodRc = Arc<MethodDescriptor>;
/// Shared handle to a field descriptor
pub type FieldRc = Arc<FieldDescriptor>;

bitflags! {
    /// Properties of a method that change how calls to it are decompiled
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodFlags: u32 {
        /// The method has no `this` parameter
        const STATIC = 0x0001;
        /// The method is an instance constructor
        const CONSTRUCTOR = 0x0002;
        /// The method is `System.Array.Empty<T>()`
        const ARRAY_EMPTY = 0x0004;
        /// The method is the getter of `System.Nullable<T>.HasValue`
        const NULLABLE_HAS_VALUE = 0x0008;
        /// The method was emitted by the compiler (lambda bodies, closure helpers)
        const COMPILER_GENERATED = 0x0010;
    }
}

bitflags! {
    /// Properties of a field
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FieldFlags: u32 {
        /// The field is static
        const STATIC = 0x0001;
        /// The field, or the type declaring it, was emitted by the compiler
        const COMPILER_GENERATED = 0x0002;
    }
}

bitflags! {
    /// Properties of a formal parameter
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ParamFlags: u8 {
        /// The parameter is a `params T[]` array
        const PARAM_ARRAY = 0x01;
    }
}

/// A formal parameter of a method.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDescriptor {
    /// Parameter name, may be empty
    pub name: String,
    /// Declared type
    pub ty: TypeSig,
    /// Parameter flags
    pub flags: ParamFlags,
}

/// A resolved method or constructor.
///
/// # Examples
///
/// ```rust
/// use cilexpr::metadata::{descriptor::{MethodDescriptor, MethodFlags}, token::Token, types::TypeSig};
///
/// let method = MethodDescriptor::new(Token::new(0x0600_0001), "Clamp", TypeSig::I32)
///     .with_param("value", TypeSig::I32)
///     .with_flags(MethodFlags::STATIC);
/// assert!(method.is_static());
/// assert_eq!(method.params.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescriptor {
    /// Metadata token identifying the method
    pub token: Token,
    /// Simple name, `.ctor` for constructors
    pub name: String,
    /// The type declaring this method
    pub declaring_type: TypeSig,
    /// Formal parameters, excluding `this`
    pub params: Vec<ParamDescriptor>,
    /// Return type, `void` for constructors
    pub return_type: TypeSig,
    /// Method flags
    pub flags: MethodFlags,
}

impl MethodDescriptor {
    /// Creates a method with no parameters, declared on `object`
    #[must_use]
    pub fn new(token: Token, name: impl Into<String>, return_type: TypeSig) -> Self {
        MethodDescriptor {
            token,
            name: name.into(),
            declaring_type: TypeSig::Object,
            params: Vec::new(),
            return_type,
            flags: MethodFlags::empty(),
        }
    }

    /// Appends a formal parameter
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, ty: TypeSig) -> Self {
        self.params.push(ParamDescriptor {
            name: name.into(),
            ty,
            flags: ParamFlags::empty(),
        });
        self
    }

    /// Appends a `params T[]` parameter
    #[must_use]
    pub fn with_param_array(mut self, name: impl Into<String>, element: TypeSig) -> Self {
        self.params.push(ParamDescriptor {
            name: name.into(),
            ty: TypeSig::Array(Box::new(element)),
            flags: ParamFlags::PARAM_ARRAY,
        });
        self
    }

    /// Sets the declaring type
    #[must_use]
    pub fn with_declaring_type(mut self, declaring_type: TypeSig) -> Self {
        self.declaring_type = declaring_type;
        self
    }

    /// Adds method flags
    #[must_use]
    pub fn with_flags(mut self, flags: MethodFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Returns `true` if the method has no `this` parameter
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    /// Returns `true` for instance constructors
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.flags.contains(MethodFlags::CONSTRUCTOR)
    }

    /// Returns `true` for the constructor of a delegate type
    #[must_use]
    pub fn is_delegate_constructor(&self) -> bool {
        self.is_constructor() && self.declaring_type.is_delegate()
    }

    /// Returns `true` for a delegate's `Invoke` method
    #[must_use]
    pub fn is_delegate_invoke(&self) -> bool {
        !self.is_static() && self.declaring_type.is_delegate() && self.name.ends_with("Invoke")
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.return_type, self.name)?;
        for (index, param) in self.params.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param.ty)?;
        }
        write!(f, ")")
    }
}

/// A resolved field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Metadata token identifying the field
    pub token: Token,
    /// Field name
    pub name: String,
    /// The type declaring this field
    pub declaring_type: TypeSig,
    /// Field type
    pub field_type: TypeSig,
    /// Field flags
    pub flags: FieldFlags,
}

impl FieldDescriptor {
    /// Creates an instance field declared on `object`
    #[must_use]
    pub fn new(token: Token, name: impl Into<String>, field_type: TypeSig) -> Self {
        FieldDescriptor {
            token,
            name: name.into(),
            declaring_type: TypeSig::Object,
            field_type,
            flags: FieldFlags::empty(),
        }
    }

    /// Sets the declaring type
    #[must_use]
    pub fn with_declaring_type(mut self, declaring_type: TypeSig) -> Self {
        self.declaring_type = declaring_type;
        self
    }

    /// Adds field flags
    #[must_use]
    pub fn with_flags(mut self, flags: FieldFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Returns `true` for static fields
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldFlags::STATIC)
    }

    /// Returns `true` for compiler generated fields (closure captures, delegate caches)
    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        self.flags.contains(FieldFlags::COMPILER_GENERATED)
    }
}

/// What an operand token resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    /// A type, for `box`, `castclass`, `newarr` and friends
    Type(TypeSig),
    /// A method or constructor
    Method(MethodRc),
    /// A field
    Field(FieldRc),
    /// A user string literal, for `ldstr`
    String(String),
}

impl Descriptor {
    fn kind(&self) -> &'static str {
        match self {
            Descriptor::Type(_) => "type",
            Descriptor::Method(_) => "method",
            Descriptor::Field(_) => "field",
            Descriptor::String(_) => "string",
        }
    }

    /// Unwraps a type descriptor.
    ///
    /// # Errors
    /// Returns [`crate::Error::Resolution`] if the token resolved to something else.
    pub fn into_type(self, token: Token) -> Result<TypeSig> {
        match self {
            Descriptor::Type(ty) => Ok(ty),
            other => Err(Error::Resolution(format!(
                "token {token} resolved to a {}, expected a type",
                other.kind()
            ))),
        }
    }

    /// Unwraps a method descriptor.
    ///
    /// # Errors
    /// Returns [`crate::Error::Resolution`] if the token resolved to something else.
    pub fn into_method(self, token: Token) -> Result<MethodRc> {
        match self {
            Descriptor::Method(method) => Ok(method),
            other => Err(Error::Resolution(format!(
                "token {token} resolved to a {}, expected a method",
                other.kind()
            ))),
        }
    }

    /// Unwraps a field descriptor.
    ///
    /// # Errors
    /// Returns [`crate::Error::Resolution`] if the token resolved to something else.
    pub fn into_field(self, token: Token) -> Result<FieldRc> {
        match self {
            Descriptor::Field(field) => Ok(field),
            other => Err(Error::Resolution(format!(
                "token {token} resolved to a {}, expected a field",
                other.kind()
            ))),
        }
    }

    /// Unwraps a string literal.
    ///
    /// # Errors
    /// Returns [`crate::Error::Resolution`] if the token resolved to something else.
    pub fn into_string(self, token: Token) -> Result<String> {
        match self {
            Descriptor::String(value) => Ok(value),
            other => Err(Error::Resolution(format!(
                "token {token} resolved to a {}, expected a string",
                other.kind()
            ))),
        }
    }
}

/// The raw body of a method.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MethodBody {
    /// The CIL instruction stream
    pub code: Vec<u8>,
    /// Declared maximum evaluation stack depth
    pub max_stack: u16,
    /// Types of the local variable slots, in slot order
    pub locals: Vec<TypeSig>,
}

impl MethodBody {
    /// Creates a method body
    #[must_use]
    pub fn new(code: Vec<u8>, max_stack: u16, locals: Vec<TypeSig>) -> Self {
        MethodBody {
            code,
            max_stack,
            locals,
        }
    }
}
