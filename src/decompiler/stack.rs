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

//! Expression stacks and branch records.
//!
//! Every control-flow path of a method being decompiled has its own [`ExprStack`]: a virtual
//! operand stack holding expression nodes instead of runtime values, together with a private
//! copy of the local variable slots. A conditional jump forks the current stack into a
//! [`BranchNode`] owning two child stacks; the parent stack receives an
//! [`crate::expr::ExprKind::Branch`] placeholder that is replaced once both children merge.
//!
//! Stacks and branches refer to each other in both directions, so both live in a
//! [`StackArena`] and are addressed by [`StackId`] and [`BranchId`].
//!
//! ```text
//!            root stack [.., <branch 0>]
//!                         |
//!               +---------+---------+
//!          true stack           false stack
//!       (current path)       (waits at the target)
//! ```

use std::{
    marker::PhantomData,
    ops::{Index, IndexMut},
};

use crate::{
    decompiler::context::EmitContext,
    expr::{coerce::coerce, Expr, ExprKind, ExprRc},
    metadata::types::TypeSig,
    Result,
};

/// A typed index into an [`Arena`].
pub trait Idx: Copy {
    /// Creates an index from its raw position
    fn from_raw(raw: u32) -> Self;
    /// Returns the raw position
    fn index(self) -> usize;
}

/// Append only storage addressed by a typed index.
#[derive(Debug, Clone)]
pub struct Arena<I: Idx, T> {
    items: Vec<T>,
    _marker: PhantomData<fn() -> I>,
}

impl<I: Idx, T> Arena<I, T> {
    /// Creates an empty arena
    #[must_use]
    pub fn new() -> Self {
        Arena {
            items: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Stores `item` and returns its index
    pub fn alloc(&mut self, item: T) -> I {
        let id = I::from_raw(self.items.len() as u32);
        self.items.push(item);
        id
    }

    /// Number of stored items
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if nothing was stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<I: Idx, T> Default for Arena<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Idx, T> Index<I> for Arena<I, T> {
    type Output = T;

    fn index(&self, index: I) -> &T {
        &self.items[index.index()]
    }
}

impl<I: Idx, T> IndexMut<I> for Arena<I, T> {
    fn index_mut(&mut self, index: I) -> &mut T {
        &mut self.items[index.index()]
    }
}

arena_id!(
    /// Index of an expression stack
    StackId
);

arena_id!(
    /// Index of a branch record
    BranchId
);

/// One local variable slot as seen by one control-flow path.
///
/// Trivial values (constants, parameters) are stored as they are; anything else is bound to
/// a fresh variable on assignment so that it is evaluated once. The variable is declared,
/// and its assignment emitted, the first time the slot is read.
#[derive(Debug, Clone)]
pub struct LocalSlot {
    ty: TypeSig,
    name: String,
    value: Option<ExprRc>,
    variable: Option<ExprRc>,
    assignment: Option<ExprRc>,
}

impl LocalSlot {
    /// Creates an unassigned slot
    #[must_use]
    pub fn new(ty: TypeSig, name: impl Into<String>) -> Self {
        LocalSlot {
            ty,
            name: name.into(),
            value: None,
            variable: None,
            assignment: None,
        }
    }

    /// Declared type of the slot
    #[must_use]
    pub fn ty(&self) -> &TypeSig {
        &self.ty
    }

    /// Returns `true` once a value was stored
    #[must_use]
    pub fn is_assigned(&self) -> bool {
        self.value.is_some()
    }

    /// Stores `value`, converted to the slot type.
    ///
    /// # Errors
    /// Propagates coercion failures.
    pub fn assign(&mut self, value: &ExprRc, emit: &mut EmitContext) -> Result<()> {
        let value = coerce(value, &self.ty)?;

        if matches!(
            value.kind,
            ExprKind::Constant(_) | ExprKind::Parameter { .. }
        ) {
            self.variable = None;
            self.assignment = None;
        } else {
            let variable = emit.new_variable(self.name.clone(), self.ty.clone());
            let assignment = Expr::assign(variable.clone(), value.clone());
            emit.track(&assignment);
            self.variable = Some(variable);
            self.assignment = Some(assignment);
        }

        self.value = Some(value);
        Ok(())
    }

    /// Returns `true` if both slots hold the very same value
    #[must_use]
    pub fn holds_same(&self, other: &LocalSlot) -> bool {
        match (&self.value, &other.value) {
            (Some(mine), Some(theirs)) => ExprRc::ptr_eq(mine, theirs),
            _ => false,
        }
    }

    /// Forgets the value, as for a slot assigned on one path only
    pub fn clear(&mut self) {
        self.value = None;
        self.variable = None;
        self.assignment = None;
    }

    /// Reads the slot: the stored value, or its variable, declared on first read.
    pub fn get(&self, emit: &mut EmitContext) -> Option<ExprRc> {
        match (&self.variable, &self.assignment) {
            (Some(variable), Some(assignment)) => {
                emit.declare(variable, assignment);
                Some(variable.clone())
            }
            _ => self.value.clone(),
        }
    }
}

/// A virtual operand stack of one control-flow path.
#[derive(Debug, Clone)]
pub struct ExprStack {
    items: Vec<ExprRc>,
    parent: Option<BranchId>,
    /// Local slots of this path
    pub locals: Vec<LocalSlot>,
    reduced: bool,
}

impl ExprStack {
    fn new(parent: Option<BranchId>, locals: Vec<LocalSlot>) -> Self {
        ExprStack {
            items: Vec::new(),
            parent,
            locals,
            reduced: false,
        }
    }

    /// The branch this stack is a side of, `None` for the root
    #[must_use]
    pub fn parent(&self) -> Option<BranchId> {
        self.parent
    }

    /// The values on the stack, bottom first
    #[must_use]
    pub fn items(&self) -> &[ExprRc] {
        &self.items
    }

    /// Mutable access to the values, used to materialize them in place
    pub fn items_mut(&mut self) -> &mut Vec<ExprRc> {
        &mut self.items
    }

    /// Returns `true` if no value is on the stack
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Top of the stack
    #[must_use]
    pub fn peek(&self) -> Option<&ExprRc> {
        self.items.last()
    }

    /// Returns `true` once the stack was absorbed by a merge elsewhere
    #[must_use]
    pub fn is_reduced(&self) -> bool {
        self.reduced
    }

    /// Marks the stack as absorbed
    pub fn mark_reduced(&mut self) {
        self.reduced = true;
    }
}

/// A two way fork.
#[derive(Debug, Clone)]
pub struct BranchNode {
    /// Condition under which the true side executes
    pub test: ExprRc,
    /// Stack of the path where the test holds
    pub on_true: StackId,
    /// Stack of the path where the test fails
    pub on_false: StackId,
    /// Stack holding this branch's placeholder
    pub parent: StackId,
}

impl BranchNode {
    /// The stack of one side
    #[must_use]
    pub fn side(&self, side: bool) -> StackId {
        if side {
            self.on_true
        } else {
            self.on_false
        }
    }
}

/// Owner of all stacks and branches of one decompilation call.
#[derive(Debug, Default)]
pub struct StackArena {
    stacks: Arena<StackId, ExprStack>,
    branches: Arena<BranchId, BranchNode>,
}

impl StackArena {
    /// Creates an empty arena
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the root stack
    pub fn root(&mut self, locals: Vec<LocalSlot>) -> StackId {
        self.stacks.alloc(ExprStack::new(None, locals))
    }

    /// Returns a stack
    #[must_use]
    pub fn stack(&self, id: StackId) -> &ExprStack {
        &self.stacks[id]
    }

    /// Returns a stack mutably
    pub fn stack_mut(&mut self, id: StackId) -> &mut ExprStack {
        &mut self.stacks[id]
    }

    /// Returns a branch
    #[must_use]
    pub fn branch(&self, id: BranchId) -> &BranchNode {
        &self.branches[id]
    }

    /// Number of forks between `id` and the root
    #[must_use]
    pub fn depth(&self, id: StackId) -> usize {
        let mut depth = 0;
        let mut current = id;
        while let Some(branch) = self.stacks[current].parent {
            depth += 1;
            current = self.branches[branch].parent;
        }
        depth
    }

    /// The branch `id` is a side of
    #[must_use]
    pub fn parent(&self, id: StackId) -> Option<BranchId> {
        self.stacks[id].parent
    }

    /// Forks `parent` on `test`. Both sides start with a copy of the parent's locals.
    ///
    /// The placeholder is not pushed; that is up to the caller.
    pub fn fork(&mut self, parent: StackId, test: ExprRc) -> BranchId {
        let branch = BranchId::new(self.branches.len() as u32);
        let locals = self.stacks[parent].locals.clone();
        let on_true = self
            .stacks
            .alloc(ExprStack::new(Some(branch), locals.clone()));
        let on_false = self.stacks.alloc(ExprStack::new(Some(branch), locals));
        self.branches.alloc(BranchNode {
            test,
            on_true,
            on_false,
            parent,
        })
    }

    /// Creates a branch at `parent` from two existing stacks.
    ///
    /// Both stacks are re-parented. Their locals are left alone: a stack keeps the values of
    /// the paths it stands for.
    pub fn rebranch(
        &mut self,
        parent: StackId,
        test: ExprRc,
        on_true: StackId,
        on_false: StackId,
    ) -> BranchId {
        let branch = self.branches.alloc(BranchNode {
            test,
            on_true,
            on_false,
            parent,
        });
        for side in [on_true, on_false] {
            self.stacks[side].parent = Some(branch);
        }
        branch
    }

    /// Pushes a value and records it in the ledger
    pub fn push(&mut self, id: StackId, value: ExprRc, emit: &mut EmitContext) {
        emit.track(&value);
        self.stacks[id].items.push(value);
    }

    /// Pushes a value without recording it
    pub fn push_untracked(&mut self, id: StackId, value: ExprRc) {
        self.stacks[id].items.push(value);
    }

    /// Pops the top value, if any
    pub fn pop(&mut self, id: StackId) -> Option<ExprRc> {
        self.stacks[id].items.pop()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn flag() -> ExprRc {
        Expr::parameter(0, "flag", TypeSig::Bool)
    }

    #[test]
    fn fork_copies_locals() {
        let mut arena = StackArena::new();
        let mut emit = EmitContext::new();
        let root = arena.root(vec![LocalSlot::new(TypeSig::I32, "V_0")]);
        arena.stack_mut(root).locals[0]
            .assign(&Expr::int(1), &mut emit)
            .unwrap();

        let branch = arena.fork(root, flag());
        let node = arena.branch(branch).clone();
        arena.stack_mut(node.on_true).locals[0]
            .assign(&Expr::int(2), &mut emit)
            .unwrap();

        let root_value = arena.stack(root).locals[0].get(&mut emit).unwrap();
        let false_value = arena.stack(node.on_false).locals[0].get(&mut emit).unwrap();
        let true_value = arena.stack(node.on_true).locals[0].get(&mut emit).unwrap();
        assert_eq!(root_value.to_string(), "1");
        assert_eq!(false_value.to_string(), "1");
        assert_eq!(true_value.to_string(), "2");

        assert_eq!(arena.depth(root), 0);
        assert_eq!(arena.depth(node.on_true), 1);
        assert_eq!(arena.parent(node.on_false), Some(branch));
        assert_eq!(node.side(true), node.on_true);
    }

    #[test]
    fn nested_depth() {
        let mut arena = StackArena::new();
        let root = arena.root(Vec::new());
        let outer = arena.fork(root, flag());
        let inner = arena.fork(arena.branch(outer).on_true, flag());
        assert_eq!(arena.depth(arena.branch(inner).on_false), 2);
    }

    #[test]
    fn trivial_values_need_no_variable() {
        let mut emit = EmitContext::new();
        let mut slot = LocalSlot::new(TypeSig::I32, "V_0");
        assert!(!slot.is_assigned());

        let x = Expr::parameter(0, "x", TypeSig::I32);
        slot.assign(&x, &mut emit).unwrap();
        assert!(Arc::ptr_eq(&slot.get(&mut emit).unwrap(), &x));
        assert!(emit.statements().is_empty());
    }

    #[test]
    fn computed_values_are_declared_on_first_read() {
        let mut emit = EmitContext::new();
        let mut slot = LocalSlot::new(TypeSig::I64, "V_1");
        let x = Expr::parameter(0, "x", TypeSig::I32);
        let sum = Expr::binary(crate::expr::BinaryOp::Add, x, Expr::int(1), TypeSig::I32);
        slot.assign(&sum, &mut emit).unwrap();
        assert!(emit.statements().is_empty());

        let first = slot.get(&mut emit).unwrap();
        let second = slot.get(&mut emit).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.ty, TypeSig::I64);
        assert_eq!(emit.statements().len(), 1);
        assert_eq!(
            emit.statements()[0].to_string(),
            "V_1 = (((int64)x) + 1L)"
        );
    }

    #[test]
    fn rebranch_reparents() {
        let mut arena = StackArena::new();
        let mut emit = EmitContext::new();
        let root = arena.root(vec![LocalSlot::new(TypeSig::I32, "V_0")]);
        let outer = arena.fork(root, flag());
        let outer_node = arena.branch(outer).clone();
        let inner = arena.fork(outer_node.on_true, flag());
        let inner_node = arena.branch(inner).clone();
        arena.stack_mut(inner_node.on_true).locals[0]
            .assign(&Expr::int(5), &mut emit)
            .unwrap();

        let merged = arena.rebranch(root, flag(), inner_node.on_true, outer_node.on_false);
        assert_eq!(arena.parent(inner_node.on_true), Some(merged));
        assert_eq!(arena.depth(inner_node.on_true), 1);

        let kept = arena.stack(inner_node.on_true).locals[0].get(&mut emit).unwrap();
        assert_eq!(kept.to_string(), "5");
        assert!(!arena.stack(outer_node.on_false).locals[0].is_assigned());
    }

    #[test]
    fn cleared_slot_reads_nothing() {
        let mut emit = EmitContext::new();
        let mut slot = LocalSlot::new(TypeSig::I32, "V_0");
        slot.assign(&Expr::int(3), &mut emit).unwrap();
        slot.clear();
        assert!(!slot.is_assigned());
        assert!(slot.get(&mut emit).is_none());
    }

    #[test]
    fn push_and_pop() {
        let mut arena = StackArena::new();
        let mut emit = EmitContext::new();
        let root = arena.root(Vec::new());
        let one = Expr::int(1);
        arena.push(root, one.clone(), &mut emit);
        assert_eq!(emit.last_index_of(&one), Some(0));
        assert!(Arc::ptr_eq(arena.stack(root).peek().unwrap(), &one));
        assert!(Arc::ptr_eq(&arena.pop(root).unwrap(), &one));
        assert!(arena.pop(root).is_none());
        assert!(arena.stack(root).is_empty());
    }
}
