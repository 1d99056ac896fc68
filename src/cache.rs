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

//! Concurrent cache of decompiled methods.
//!
//! Decompiling the same method twice yields the same tree, so hosts that translate many
//! queries over the same set of helper methods keep the results in a [`DecompileCache`].
//! The cache is shared between threads through a `DashMap`. Its [`CacheKey`] is the method
//! token together with everything else the tree depends on: the generic instantiation and
//! the [`DecompileOptions`] of the decompiler.
//!
//! Results flagged [`MethodAst::not_cacheable`] depend on state evaluated at decompile
//! time and are never stored.
//!
//! # Eviction
//!
//! Every lookup stamps the entry with a global tick. When an insertion pushes the entry
//! count above [`CacheConfig::high_watermark`], the entries with the oldest ticks are removed
//! until [`CacheConfig::low_watermark`] remains.
//!
//! # Examples
//!
//! ```rust
//! use cilexpr::prelude::*;
//!
//! let method = MethodDescriptor::new(Token::new(0x0600_0001), "One", TypeSig::I32)
//!     .with_flags(MethodFlags::STATIC);
//! let body = MethodBody::new(vec![0x17, 0x2A], 1, Vec::new()); // ldc.i4.1; ret
//!
//! let resolver = MapResolver::new();
//! let decompiler = Decompiler::new(&resolver);
//! let cache = DecompileCache::new();
//!
//! let first = cache.get_or_decompile(&decompiler, &method, &body)?;
//! let second = cache.get_or_decompile(&decompiler, &method, &body)?;
//! assert!(std::sync::Arc::ptr_eq(&first, &second));
//! assert_eq!(cache.len(), 1);
//! # Ok::<(), cilexpr::Error>(())
//! ```

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use bitflags::bitflags;
use dashmap::DashMap;
use log::{debug, warn};

use crate::{
    config::{CacheConfig, DecompileOptions},
    decompiler::{Decompiler, MethodAst},
    metadata::{
        descriptor::{MethodBody, MethodDescriptor},
        resolver::Resolver,
        token::Token,
        types::GenericContext,
    },
    Result,
};

bitflags! {
    /// Option switches a cached tree was decompiled with
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OptionFlags: u8 {
        /// [`DecompileOptions::fold_reference_tests`]
        const FOLD_REFERENCE_TESTS = 0x01;
        /// [`DecompileOptions::inline_delegates`]
        const INLINE_DELEGATES = 0x02;
        /// [`DecompileOptions::inline_trailing_variable`]
        const INLINE_TRAILING_VARIABLE = 0x04;
    }
}

impl From<&DecompileOptions> for OptionFlags {
    fn from(options: &DecompileOptions) -> Self {
        let mut flags = OptionFlags::empty();
        flags.set(
            OptionFlags::FOLD_REFERENCE_TESTS,
            options.fold_reference_tests,
        );
        flags.set(OptionFlags::INLINE_DELEGATES, options.inline_delegates);
        flags.set(
            OptionFlags::INLINE_TRAILING_VARIABLE,
            options.inline_trailing_variable,
        );
        flags
    }
}

/// Identity of a cached tree.
///
/// Two decompilations of one method only share an entry when they ran under the same
/// generic instantiation and equivalent options. The `pure_call` predicate cannot be
/// compared, so it is identified by the address of its shared closure: clones of one
/// [`DecompileOptions`] match, separately built predicates do not.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Token of the decompiled method
    pub token: Token,
    /// Generic instantiation the method was decompiled under
    pub context: GenericContext,
    /// [`DecompileOptions::variable_prefix`]
    pub variable_prefix: String,
    /// Boolean options
    pub flags: OptionFlags,
    /// Address of the [`DecompileOptions::pure_call`] closure
    pub pure_call: Option<usize>,
}

impl CacheKey {
    /// Key of `token` decompiled under `options` and `context`
    #[must_use]
    pub fn new(token: Token, options: &DecompileOptions, context: &GenericContext) -> Self {
        CacheKey {
            token,
            context: context.clone(),
            variable_prefix: options.variable_prefix.clone(),
            flags: OptionFlags::from(options),
            pure_call: options
                .pure_call
                .as_ref()
                .map(|predicate| Arc::as_ptr(predicate).cast::<()>() as usize),
        }
    }

    /// Key of `token` decompiled by `decompiler`
    #[must_use]
    pub fn of<R: Resolver + ?Sized>(decompiler: &Decompiler<'_, R>, token: Token) -> Self {
        Self::new(token, decompiler.options(), decompiler.generic_context())
    }
}

impl From<Token> for CacheKey {
    /// Key of `token` under the default options and no generic instantiation
    fn from(token: Token) -> Self {
        Self::new(token, &DecompileOptions::default(), &GenericContext::default())
    }
}

struct CacheEntry {
    ast: Arc<MethodAst>,
    last_used: AtomicU64,
}

/// Thread safe memo of decompiled methods keyed by [`CacheKey`].
pub struct DecompileCache {
    entries: DashMap<CacheKey, CacheEntry>,
    tick: AtomicU64,
    config: CacheConfig,
}

impl DecompileCache {
    /// Creates an empty cache with the default [`CacheConfig`]
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Creates an empty cache with the given size bounds
    #[must_use]
    pub fn with_config(config: CacheConfig) -> Self {
        DecompileCache {
            entries: DashMap::new(),
            tick: AtomicU64::new(0),
            config,
        }
    }

    /// The size bounds in use
    #[must_use]
    pub fn config(&self) -> CacheConfig {
        self.config
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the cached tree of `key` and marks it as recently used
    pub fn get(&self, key: &CacheKey) -> Option<Arc<MethodAst>> {
        let entry = self.entries.get(key)?;
        entry.last_used.store(self.next_tick(), Ordering::Relaxed);
        Some(entry.ast.clone())
    }

    /// Stores `ast` under `key` and returns the shared tree.
    ///
    /// A tree flagged not cacheable is returned without being stored.
    pub fn insert(&self, key: CacheKey, ast: MethodAst) -> Arc<MethodAst> {
        let ast = Arc::new(ast);
        if ast.not_cacheable {
            warn!(
                "{}: decompiled tree depends on evaluated state, not caching it",
                key.token
            );
            return ast;
        }

        self.entries.insert(
            key,
            CacheEntry {
                ast: ast.clone(),
                last_used: AtomicU64::new(self.next_tick()),
            },
        );
        if self.entries.len() > self.config.high_watermark {
            self.evict();
        }
        ast
    }

    /// Returns the cached tree of `method`, decompiling and storing it on a miss.
    ///
    /// # Errors
    /// Returns the error of [`Decompiler::decompile`]. Failures are not cached.
    pub fn get_or_decompile<R: Resolver + ?Sized>(
        &self,
        decompiler: &Decompiler<'_, R>,
        method: &MethodDescriptor,
        body: &MethodBody,
    ) -> Result<Arc<MethodAst>> {
        let key = CacheKey::of(decompiler, method.token);
        if let Some(ast) = self.get(&key) {
            debug!("cache hit for {method}");
            return Ok(ast);
        }

        debug!("cache miss for {method}");
        let ast = decompiler.decompile(method, body)?;
        Ok(self.insert(key, ast))
    }

    /// Removes the tree of `key`
    pub fn remove(&self, key: &CacheKey) -> Option<Arc<MethodAst>> {
        self.entries.remove(key).map(|(_, entry)| entry.ast)
    }

    /// Removes the trees of `token` under every option set and instantiation
    pub fn remove_method(&self, token: Token) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.token != token);
        before - self.entries.len()
    }

    /// Number of cached trees
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every cached tree
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Removes the least recently used entries down to the low watermark.
    fn evict(&self) {
        let target = self.config.low_watermark();
        let mut ages: Vec<(u64, CacheKey)> = self
            .entries
            .iter()
            .map(|entry| (entry.last_used.load(Ordering::Relaxed), entry.key().clone()))
            .collect();
        if ages.len() <= target {
            return;
        }

        ages.sort_unstable_by_key(|(tick, _)| *tick);
        let excess = ages.len() - target;
        for (_, key) in ages.into_iter().take(excess) {
            self.entries.remove(&key);
        }
        debug!("evicted {excess} entries, {} remain", self.entries.len());
    }
}

impl Default for DecompileCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DecompileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecompileCache")
            .field("entries", &self.entries.len())
            .field("config", &self.config)
            .finish()
    }
}
