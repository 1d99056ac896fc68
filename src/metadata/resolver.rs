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

//! The metadata collaborator.
//!
//! The decompiler never reads metadata tables itself. Every operand token is handed to a
//! [`Resolver`], which is expected to succeed for well formed input. Failures surface as
//! [`crate::Error::Resolution`] and abort the call.

use std::{collections::HashMap, sync::Arc};

use crate::{
    expr::{ExprKind, ExprRc},
    metadata::{
        descriptor::{Descriptor, FieldDescriptor, MethodBody, MethodDescriptor, MethodRc},
        token::Token,
        types::{GenericContext, TypeSig},
    },
    Error, Result,
};

/// The target of a delegate that was evaluated at decompile time.
#[derive(Debug, Clone)]
pub struct DelegateTarget {
    /// The bound receiver, `None` for static methods
    pub target: Option<ExprRc>,
    /// The method the delegate points to
    pub method: MethodRc,
}

/// Resolves operand tokens to descriptors.
///
/// Implementations are shared between concurrent decompilation calls and should be safe to
/// read from several threads.
///
/// # Examples
///
/// ```rust
/// use cilexpr::prelude::*;
///
/// struct StringsOnly;
///
/// impl Resolver for StringsOnly {
///     fn resolve(&self, token: Token, _context: &GenericContext) -> cilexpr::Result<Descriptor> {
///         match token.kind() {
///             Some(TokenTable::UserString) => Ok(Descriptor::String(format!("s{}", token.row()))),
///             _ => Err(Error::Resolution(format!("unknown token {token}"))),
///         }
///     }
/// }
///
/// let resolved = StringsOnly.resolve(Token::new(0x7000_0002), &GenericContext::default())?;
/// assert_eq!(resolved, Descriptor::String("s2".into()));
/// # Ok::<(), cilexpr::Error>(())
/// ```
pub trait Resolver {
    /// Resolves a token found in an instruction operand.
    ///
    /// # Errors
    /// Returns [`crate::Error::Resolution`] if the token cannot be resolved.
    fn resolve(&self, token: Token, context: &GenericContext) -> Result<Descriptor>;

    /// Returns the body of a method, used to decompile delegate targets into nested lambdas.
    ///
    /// The default implementation knows no bodies, which keeps delegate constructions as
    /// plain `New` nodes.
    ///
    /// # Errors
    /// Returns an error if the body exists but cannot be read.
    fn method_body(&self, _method: &MethodDescriptor) -> Result<Option<MethodBody>> {
        Ok(None)
    }

    /// Evaluates a delegate valued expression at decompile time.
    ///
    /// Called for `Invoke` on a delegate that was not constructed in the body being decoded,
    /// typically a captured closure field. A result makes the decompiled tree depend on
    /// runtime state, so it is flagged as not cacheable.
    ///
    /// # Errors
    /// Returns an error if evaluation fails.
    fn evaluate_delegate(&self, _instance: &ExprRc) -> Result<Option<DelegateTarget>> {
        Ok(None)
    }
}

impl<R: Resolver + ?Sized> Resolver for &R {
    fn resolve(&self, token: Token, context: &GenericContext) -> Result<Descriptor> {
        (**self).resolve(token, context)
    }

    fn method_body(&self, method: &MethodDescriptor) -> Result<Option<MethodBody>> {
        (**self).method_body(method)
    }

    fn evaluate_delegate(&self, instance: &ExprRc) -> Result<Option<DelegateTarget>> {
        (**self).evaluate_delegate(instance)
    }
}

/// A [`Resolver`] backed by in-memory tables.
///
/// Useful for hosts that already hold their metadata in decoded form, and for driving the
/// decompiler over hand assembled bodies. Delegate targets are keyed by the token of the
/// field holding the delegate.
///
/// # Examples
///
/// ```rust
/// use cilexpr::metadata::{
///     descriptor::{Descriptor, MethodDescriptor},
///     resolver::{MapResolver, Resolver},
///     token::Token,
///     types::{GenericContext, TypeSig},
/// };
///
/// let token = Token::new(0x0600_0001);
/// let resolver = MapResolver::new()
///     .with_method(MethodDescriptor::new(token, "Next", TypeSig::I32))
///     .with_string(Token::new(0x7000_0001), "hello");
///
/// let resolved = resolver.resolve(token, &GenericContext::default())?;
/// assert!(matches!(resolved, Descriptor::Method(m) if m.name == "Next"));
/// assert!(resolver.resolve(Token::new(0x0600_0009), &GenericContext::default()).is_err());
/// # Ok::<(), cilexpr::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct MapResolver {
    descriptors: HashMap<Token, Descriptor>,
    bodies: HashMap<Token, MethodBody>,
    delegates: HashMap<Token, DelegateTarget>,
}

impl MapResolver {
    /// Creates an empty resolver
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor under `token`, replacing any previous entry
    pub fn insert(&mut self, token: Token, descriptor: Descriptor) {
        self.descriptors.insert(token, descriptor);
    }

    /// Registers a type
    #[must_use]
    pub fn with_type(mut self, token: Token, ty: TypeSig) -> Self {
        self.insert(token, Descriptor::Type(ty));
        self
    }

    /// Registers a method under its own token
    #[must_use]
    pub fn with_method(mut self, method: MethodDescriptor) -> Self {
        self.insert(method.token, Descriptor::Method(Arc::new(method)));
        self
    }

    /// Registers a field under its own token
    #[must_use]
    pub fn with_field(mut self, field: FieldDescriptor) -> Self {
        self.insert(field.token, Descriptor::Field(Arc::new(field)));
        self
    }

    /// Registers a user string
    #[must_use]
    pub fn with_string(mut self, token: Token, value: impl Into<String>) -> Self {
        self.insert(token, Descriptor::String(value.into()));
        self
    }

    /// Registers the body of a method
    #[must_use]
    pub fn with_body(mut self, method: Token, body: MethodBody) -> Self {
        self.bodies.insert(method, body);
        self
    }

    /// Registers what the delegate stored in `field` evaluates to
    #[must_use]
    pub fn with_delegate_target(mut self, field: Token, target: DelegateTarget) -> Self {
        self.delegates.insert(field, target);
        self
    }
}

impl Resolver for MapResolver {
    fn resolve(&self, token: Token, _context: &GenericContext) -> Result<Descriptor> {
        self.descriptors
            .get(&token)
            .cloned()
            .ok_or_else(|| Error::Resolution(format!("unknown token {token}")))
    }

    fn method_body(&self, method: &MethodDescriptor) -> Result<Option<MethodBody>> {
        Ok(self.bodies.get(&method.token).cloned())
    }

    fn evaluate_delegate(&self, instance: &ExprRc) -> Result<Option<DelegateTarget>> {
        match &instance.kind {
            ExprKind::Field { field, .. } => Ok(self.delegates.get(&field.token).cloned()),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{expr::Expr, metadata::descriptor::MethodFlags};

    #[test]
    fn delegate_targets_are_keyed_by_field() {
        let field = FieldDescriptor::new(Token::new(0x0400_0002), "selector", TypeSig::Object);
        let method = Arc::new(
            MethodDescriptor::new(Token::new(0x0600_0005), "Select", TypeSig::I32)
                .with_flags(MethodFlags::STATIC),
        );
        let resolver = MapResolver::new().with_delegate_target(
            field.token,
            DelegateTarget {
                target: None,
                method: method.clone(),
            },
        );

        let load = Expr::field(None, Arc::new(field));
        let evaluated = resolver.evaluate_delegate(&load).unwrap().unwrap();
        assert_eq!(evaluated.method, method);
        assert!(resolver
            .evaluate_delegate(&Expr::int(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn bodies_by_method_token() {
        let method = MethodDescriptor::new(Token::new(0x0600_0001), "One", TypeSig::I32);
        let resolver =
            MapResolver::new().with_body(method.token, MethodBody::new(vec![0x17, 0x2A], 1, vec![]));
        assert_eq!(
            resolver.method_body(&method).unwrap().map(|body| body.code),
            Some(vec![0x17, 0x2A])
        );
    }
}
