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

//! Reconstruction of expression trees from method bodies.
//!
//! The [`Decompiler`] drives the [`crate::disassembler::Decoder`] with a
//! [`visitor::StackVisitor`] that simulates the evaluation stack using expression nodes
//! instead of runtime values. Conditional jumps fork the simulated stack, join points merge
//! the forks back into conditional expressions ([`reduce`]), and the final stack is turned
//! into an ordered statement list ([`assemble`]).
//!
//! # Architecture
//!
//! - [`stack`] - Arena of expression stacks and branch nodes, local slots
//! - [`context`] - Per call statements, variables and emission ledger
//! - [`visitor`] - The per instruction state machine
//! - [`reduce`] - Merging of forked stacks at join points
//! - [`assemble`] - Final ordering and return type conversion
//!
//! # Examples
//!
//! ```rust
//! use cilexpr::prelude::*;
//!
//! // static bool IsPositive(int x) => x > 0;
//! let method = MethodDescriptor::new(Token::new(0x0600_0001), "IsPositive", TypeSig::Bool)
//!     .with_param("x", TypeSig::I32)
//!     .with_flags(MethodFlags::STATIC);
//!
//! let mut encoder = InstructionEncoder::new();
//! encoder.emit(OpCode::Ldarg0)?;
//! encoder.emit(OpCode::LdcI40)?;
//! encoder.emit(OpCode::Cgt)?;
//! encoder.emit(OpCode::Ret)?;
//! let body = MethodBody::new(encoder.finalize()?, 2, Vec::new());
//!
//! let resolver = MapResolver::new();
//! let ast = Decompiler::new(&resolver).decompile(&method, &body)?;
//! assert_eq!(ast.to_string(), "(x) => (x > 0)");
//! # Ok::<(), cilexpr::Error>(())
//! ```

pub mod assemble;
pub mod context;
pub mod reduce;
pub mod stack;
pub mod visitor;

use std::fmt;

use log::debug;

use crate::{
    config::DecompileOptions,
    decompiler::visitor::StackVisitor,
    disassembler::Decoder,
    expr::{Expr, ExprRc},
    metadata::{
        descriptor::{MethodBody, MethodDescriptor},
        resolver::Resolver,
        types::{GenericContext, TypeSig},
    },
    Result,
};

/// The decompiled form of one method.
///
/// Holds the parameters, the variables introduced while decompiling and the ordered
/// statements. The last statement is the result value unless the method returns `void`.
#[derive(Debug, Clone)]
pub struct MethodAst {
    /// Parameter nodes in declaration order, excluding `this`
    pub parameters: Vec<ExprRc>,
    /// Instantiated return type
    pub return_type: TypeSig,
    /// Variables declared by the statements
    pub variables: Vec<ExprRc>,
    /// Statements in evaluation order
    pub statements: Vec<ExprRc>,
    /// Set if the tree depends on state evaluated at decompile time
    pub not_cacheable: bool,
}

impl MethodAst {
    /// Returns the body as a single expression.
    ///
    /// A lone statement without variables is returned as is, anything else is wrapped in a
    /// `Block` typed as the return type.
    #[must_use]
    pub fn body(&self) -> ExprRc {
        match self.statements.as_slice() {
            [single] if self.variables.is_empty() => single.clone(),
            _ => Expr::block(
                self.variables.clone(),
                self.statements.clone(),
                self.return_type.clone(),
            ),
        }
    }

    /// The result value, `None` for `void` methods
    #[must_use]
    pub fn result(&self) -> Option<&ExprRc> {
        self.statements.last().filter(|last| !last.is_void())
    }

    /// Wraps the body into a `Lambda` of delegate type `ty`
    #[must_use]
    pub fn to_lambda(&self, ty: TypeSig) -> ExprRc {
        Expr::lambda(self.parameters.clone(), self.body(), ty)
    }
}

impl fmt::Display for MethodAst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (index, parameter) in self.parameters.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{parameter}")?;
        }
        write!(f, ") => {}", self.body())
    }
}

/// Decompiles method bodies into expression trees.
///
/// A decompiler is cheap to create and holds no per call state, one instance can serve
/// any number of calls, also from several threads when the resolver allows it.
pub struct Decompiler<'r, R: Resolver + ?Sized> {
    resolver: &'r R,
    options: DecompileOptions,
    context: GenericContext,
}

impl<'r, R: Resolver + ?Sized> Decompiler<'r, R> {
    /// Creates a decompiler with default options and no generic instantiation
    pub fn new(resolver: &'r R) -> Self {
        Decompiler {
            resolver,
            options: DecompileOptions::default(),
            context: GenericContext::default(),
        }
    }

    /// Replaces the options
    #[must_use]
    pub fn with_options(mut self, options: DecompileOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the generic arguments that parameters, locals and operands are instantiated with
    #[must_use]
    pub fn with_generic_context(mut self, context: GenericContext) -> Self {
        self.context = context;
        self
    }

    /// The options in use
    pub fn options(&self) -> &DecompileOptions {
        &self.options
    }

    /// The resolver in use
    pub fn resolver(&self) -> &'r R {
        self.resolver
    }

    /// The generic instantiation in use
    pub fn generic_context(&self) -> &GenericContext {
        &self.context
    }

    /// Decompiles `body` of `method`.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnsupportedInstruction`] or [`crate::Error::BackwardBranch`] for
    /// bodies outside the supported subset, [`crate::Error::Structural`] or
    /// [`crate::Error::ReductionExhaustion`] for malformed stack shapes, and any error of the
    /// resolver.
    pub fn decompile(&self, method: &MethodDescriptor, body: &MethodBody) -> Result<MethodAst> {
        self.decompile_bound(method, body, None, &[])
    }

    /// Decompiles `body` of `method` with `this` and some arguments bound to known values.
    ///
    /// `target` replaces `this` for instance methods and is ignored for static ones. Bound
    /// arguments replace the parameter at the same position unless they refer to parameters
    /// themselves. Used for nested lambdas, where `target` is the closure object.
    ///
    /// # Errors
    /// Same as [`Decompiler::decompile`].
    pub fn decompile_bound(
        &self,
        method: &MethodDescriptor,
        body: &MethodBody,
        target: Option<ExprRc>,
        arguments: &[ExprRc],
    ) -> Result<MethodAst> {
        let first_slot = usize::from(!method.is_static());
        let parameters = method
            .params
            .iter()
            .enumerate()
            .map(|(index, param)| {
                let slot = u16::try_from(index + first_slot).map_err(|_| {
                    structural_error!("{} declares too many parameters", method)
                })?;
                let name = if param.name.is_empty() {
                    format!("arg{index}")
                } else {
                    param.name.clone()
                };
                Ok(Expr::parameter(slot, name, param.ty.instantiate(&self.context)))
            })
            .collect::<Result<Vec<_>>>()?;

        let target = if method.is_static() {
            None
        } else {
            Some(target.unwrap_or_else(|| {
                Expr::parameter(0, "this", method.declaring_type.instantiate(&self.context))
            }))
        };

        let mut visitor = StackVisitor::new(self, method, parameters.clone(), target, arguments);
        Decoder::new(self.resolver, &self.context).decode(body, &mut visitor)?;
        let output = visitor.finish();

        debug!(
            "{}: {} statements, {} variables",
            method,
            output.statements.len(),
            output.variables.len()
        );

        Ok(MethodAst {
            parameters,
            return_type: method.return_type.instantiate(&self.context),
            variables: output.variables,
            statements: output.statements,
            not_cacheable: output.not_cacheable,
        })
    }
}

impl<R: Resolver + ?Sized> fmt::Debug for Decompiler<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decompiler")
            .field("options", &self.options)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
