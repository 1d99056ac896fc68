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

//! Configuration for the decompiler and its cache.
//!
//! [`DecompileOptions`] controls the shape folding and inlining rules applied while
//! reconstructing a method, [`CacheConfig`] the size bounds of
//! [`crate::cache::DecompileCache`].

use std::{fmt, sync::Arc};

use crate::metadata::descriptor::MethodDescriptor;

/// Predicate identifying calls without observable side effects.
pub type PureCallFn = Arc<dyn Fn(&MethodDescriptor) -> bool + Send + Sync>;

/// Options for a decompilation call.
///
/// The defaults keep every test the body performs and inline what the body itself proves
/// safe to inline. [`strict`] also disables inlining.
///
/// [`strict`]: DecompileOptions::strict
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use cilexpr::config::DecompileOptions;
/// use cilexpr::metadata::{descriptor::MethodDescriptor, token::Token, types::TypeSig};
///
/// let options = DecompileOptions {
///     variable_prefix: "tmp".into(),
///     pure_call: Some(Arc::new(|method: &MethodDescriptor| method.name.starts_with("get_"))),
///     ..DecompileOptions::default()
/// };
///
/// let getter = MethodDescriptor::new(Token::new(0x0A00_0001), "get_Length", TypeSig::I32);
/// assert!(options.is_pure_call(&getter));
/// ```
#[derive(Clone)]
pub struct DecompileOptions {
    /// Prefix of materialized variable names (default: `"V_"`).
    pub variable_prefix: String,

    /// Fold `brtrue` on reference values (default: `false`).
    ///
    /// When set, a truth test of a non-primitive value is assumed to be a compiler cache
    /// check, so the jump is assumed taken. A delegate is assumed not taken and a
    /// `Nullable.HasValue` test is assumed taken. When unset the test is kept as a
    /// comparison with `null`.
    pub fold_reference_tests: bool,

    /// Decompile delegate targets into nested lambdas (default: `true`).
    pub inline_delegates: bool,

    /// Collapse a trailing `v = e; v` into `e` when `v` has no other use (default: `true`).
    pub inline_trailing_variable: bool,

    /// Calls that behave like properties or operators.
    ///
    /// `dup` of such a call shares the node instead of materializing it into a variable.
    pub pure_call: Option<PureCallFn>,
}

impl DecompileOptions {
    /// Options with all folding and inlining turned off
    #[must_use]
    pub fn strict() -> Self {
        DecompileOptions {
            fold_reference_tests: false,
            inline_delegates: false,
            inline_trailing_variable: false,
            ..Self::default()
        }
    }

    /// Returns `true` if `method` is declared pure by [`DecompileOptions::pure_call`]
    #[must_use]
    pub fn is_pure_call(&self, method: &MethodDescriptor) -> bool {
        self.pure_call
            .as_ref()
            .is_some_and(|predicate| predicate(method))
    }
}

impl Default for DecompileOptions {
    fn default() -> Self {
        DecompileOptions {
            variable_prefix: "V_".to_string(),
            fold_reference_tests: false,
            inline_delegates: true,
            inline_trailing_variable: true,
            pure_call: None,
        }
    }
}

impl fmt::Debug for DecompileOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecompileOptions")
            .field("variable_prefix", &self.variable_prefix)
            .field("fold_reference_tests", &self.fold_reference_tests)
            .field("inline_delegates", &self.inline_delegates)
            .field("inline_trailing_variable", &self.inline_trailing_variable)
            .field("pure_call", &self.pure_call.is_some())
            .finish()
    }
}

/// Size bounds of the decompile cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Entry count above which the cache evicts (default: 1024).
    pub high_watermark: usize,
}

impl CacheConfig {
    /// Creates a configuration with the given high watermark
    #[must_use]
    pub fn new(high_watermark: usize) -> Self {
        CacheConfig { high_watermark }
    }

    /// Entry count the cache shrinks to when evicting, four fifths of the high watermark
    #[must_use]
    pub fn low_watermark(&self) -> usize {
        self.high_watermark * 4 / 5
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            high_watermark: 1024,
        }
    }
}
