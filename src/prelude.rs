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

//! # cilexpr Prelude
//!
//! Re-exports of the types needed to decompile a method: the decompiler and its options,
//! the metadata model a [`Resolver`] produces, the expression tree, and the encoder used to
//! assemble bodies by hand.
//!
//! ```rust
//! use cilexpr::prelude::*;
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The error type for all cilexpr operations
pub use crate::Error;

/// The result type used throughout cilexpr
pub use crate::Result;

// ================================================================================================
// Decompilation
// ================================================================================================

/// Entry point and its output
pub use crate::decompiler::{Decompiler, MethodAst};

/// Options and cache bounds
pub use crate::config::{CacheConfig, DecompileOptions};

/// Memo of decompiled methods
pub use crate::cache::{CacheKey, DecompileCache};

// ================================================================================================
// Metadata Model
// ================================================================================================

/// Descriptors handed out by resolvers
pub use crate::metadata::descriptor::{
    Descriptor, FieldDescriptor, FieldFlags, FieldRc, MethodBody, MethodDescriptor, MethodFlags,
    MethodRc, ParamDescriptor, ParamFlags,
};

/// Token resolution
pub use crate::metadata::resolver::{DelegateTarget, MapResolver, Resolver};

/// Tokens and types
pub use crate::metadata::{
    token::{Token, TokenTable},
    types::{GenericContext, TypeRef, TypeSig},
};

// ================================================================================================
// Expression Trees
// ================================================================================================

/// Nodes, operators and constants
pub use crate::expr::{BinaryOp, ConstValue, Expr, ExprKind, ExprRc, UnaryOp, VariableId};

// ================================================================================================
// Instructions
// ================================================================================================

/// Decoding, encoding and branch targets
pub use crate::{
    disassembler::{Decoder, Instruction, InstructionEncoder, MethodVisitor, OpCode, Operand},
    label::Label,
};
