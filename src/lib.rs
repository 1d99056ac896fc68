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

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # cilexpr
//!
//! Decompiles the CIL bytecode of a single .NET method into a typed expression tree.
//!
//! The tree describes the computation of the method as one declarative expression, or a
//! short ordered list of statements, so that it can be translated to another execution
//! backend such as a query language. Only the shapes compilers emit for expression bodied
//! code are supported: arithmetic, comparisons, calls, object and array construction,
//! field access and forward conditional jumps. Loops, exception regions and unstructured
//! jumps are rejected rather than approximated.
//!
//! ## Features
//!
//! - **Stack simulation** - the evaluation stack holds expression nodes instead of values
//! - **Conditional reconstruction** - forward jumps fork the stack, join points merge the
//!   forks into `?:`, `&&` and `||`
//! - **Local variables** - locals assigned on different paths merge into conditional values
//! - **Typed nodes** - numeric promotion and coercion follow the CLI rules
//! - **Nested lambdas** - delegates whose target body is available become `Lambda` nodes
//! - **Caching** - a concurrent cache of decompiled methods keyed by token, options and instantiation
//!
//! ## Quick Start
//!
//! A host provides a [`metadata::resolver::Resolver`] turning operand tokens into
//! descriptors. [`metadata::resolver::MapResolver`] serves descriptors held in memory.
//!
//! ```rust
//! use cilexpr::prelude::*;
//!
//! // static int Max(int a, int b) => a > b ? a : b;
//! let method = MethodDescriptor::new(Token::new(0x0600_0001), "Max", TypeSig::I32)
//!     .with_param("a", TypeSig::I32)
//!     .with_param("b", TypeSig::I32)
//!     .with_flags(MethodFlags::STATIC);
//!
//! let mut il = InstructionEncoder::new();
//! il.emit(OpCode::Ldarg0)?;
//! il.emit(OpCode::Ldarg1)?;
//! il.emit_branch(OpCode::BgtS, "first")?;
//! il.emit(OpCode::Ldarg1)?;
//! il.emit_branch(OpCode::BrS, "end")?;
//! il.define_label("first")?;
//! il.emit(OpCode::Ldarg0)?;
//! il.define_label("end")?;
//! il.emit(OpCode::Ret)?;
//! let body = MethodBody::new(il.finalize()?, 2, Vec::new());
//!
//! let resolver = MapResolver::new();
//! let ast = Decompiler::new(&resolver).decompile(&method, &body)?;
//! assert_eq!(ast.to_string(), "(a, b) => ((a <= b) ? b : a)");
//! # Ok::<(), cilexpr::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`disassembler`] - instruction decoding and the visitor interface
//! - [`decompiler`] - stack simulation, branch reduction and statement assembly
//! - [`expr`] - the expression tree, construction rules and type coercion
//! - [`metadata`] - tokens, types, descriptors and the resolver interface
//! - [`cache`] - memoization of decompiled methods
//! - [`config`] - decompiler options and cache bounds
//!
//! ## Logging
//!
//! The crate logs through the `log` facade and never installs a logger: `trace!` per
//! decoded instruction and label, `debug!` per reduction rule and cache lookup, `warn!`
//! when a result cannot be cached.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
pub mod prelude;

/// Memoization of decompiled methods
pub mod cache;

/// Decompiler options and cache bounds
pub mod config;

/// Stack simulation, branch reduction and statement assembly
pub mod decompiler;

/// CIL instruction decoding and encoding
pub mod disassembler;

/// Typed expression trees
pub mod expr;

/// Branch target labels
pub mod label;

/// Tokens, types, descriptors and the resolver interface
pub mod metadata;

/// `cilexpr` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `cilexpr` Error type
///
/// Every failure aborts the whole decompilation call, no partial tree is returned.
///
/// # Examples
///
/// ```rust
/// use cilexpr::prelude::*;
///
/// // switch is outside the supported subset
/// let method = MethodDescriptor::new(Token::new(0x0600_0001), "Pick", TypeSig::I32)
///     .with_flags(MethodFlags::STATIC);
/// let body = MethodBody::new(vec![0x16, 0x45, 0x00, 0x00, 0x00, 0x00, 0x16, 0x2A], 1, Vec::new());
///
/// let resolver = MapResolver::new();
/// match Decompiler::new(&resolver).decompile(&method, &body) {
///     Err(Error::UnsupportedInstruction { mnemonic, offset }) => {
///         assert_eq!((mnemonic, offset), ("switch", 1));
///     }
///     other => panic!("unexpected {other:?}"),
/// }
/// ```
pub use error::Error;

pub use cache::{CacheKey, DecompileCache};
pub use config::DecompileOptions;
pub use decompiler::{Decompiler, MethodAst};
