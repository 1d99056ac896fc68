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

//! Branch reduction.
//!
//! When the decoder reaches a label, every stack that jumped there (plus the stack falling
//! through) has to be merged into one. The [`Reducer`] repeatedly takes the two most recently
//! parked stacks and tries three shapes:
//!
//! - **siblings**: both stacks are the two sides of one branch. Their top values become a
//!   conditional pushed onto the parent stack, diverging local slots are merged the same way.
//! - **diamond**: both stacks are empty, at the same depth, and their branches hang off the
//!   two sides of one common branch. The tests are combined and a new branch is created one
//!   level up.
//! - **nested**: both stacks are empty, at different depths. The shallower test is combined
//!   with the deeper one through `&&` and a new branch replaces the shallower one.
//!
//! If the most recent pair matches none of them, everything parked before the newest stack
//! is reduced first and the pair is retried. A failing retry is an irreducible shape and
//! reported as [`Error::ReductionExhaustion`].

use log::debug;

use crate::{
    decompiler::{
        context::EmitContext,
        stack::{BranchId, StackArena, StackId},
    },
    expr::{builder, Expr, ExprRc},
    label::Label,
    Error, Result,
};

/// Merges the stacks waiting at one label.
pub struct Reducer<'a> {
    arena: &'a mut StackArena,
    emit: &'a mut EmitContext,
    label: Label,
}

impl<'a> Reducer<'a> {
    /// Creates a reducer for the join at `label`
    pub fn new(arena: &'a mut StackArena, emit: &'a mut EmitContext, label: Label) -> Self {
        Reducer { arena, emit, label }
    }

    /// Reduces `waiters`, most recently parked last, to a single stack.
    ///
    /// # Errors
    /// - [`Error::ReductionExhaustion`] if the stacks do not form a structured shape
    /// - [`Error::Structural`] if `waiters` is empty or a branch placeholder is missing
    /// - coercion errors raised while building merged values
    pub fn reduce(mut self, mut waiters: Vec<StackId>) -> Result<StackId> {
        self.reduce_list(&mut waiters)
    }

    fn reduce_list(&mut self, list: &mut Vec<StackId>) -> Result<StackId> {
        let Some(second) = list.pop() else {
            return Err(structural_error!("No stack waits at {}", self.label));
        };
        let Some(&first) = list.last() else {
            return Ok(second);
        };

        if let Some(reduced) = self.reduce_pair(first, second)? {
            let last = list.len() - 1;
            list[last] = reduced;
            return self.reduce_list(list);
        }

        let first = self.reduce_list(list)?;
        self.reduce_pair(first, second)?
            .ok_or(Error::ReductionExhaustion { label: self.label })
    }

    fn reduce_pair(&mut self, first: StackId, second: StackId) -> Result<Option<StackId>> {
        let first_depth = self.arena.depth(first);
        let second_depth = self.arena.depth(second);
        let (Some(first_branch), Some(second_branch)) =
            (self.arena.parent(first), self.arena.parent(second))
        else {
            return Ok(None);
        };

        if first_depth == second_depth {
            if first_branch == second_branch {
                return self.merge_siblings(first_branch).map(Some);
            }

            if self.both_empty(first, second) {
                return self.merge_diamond(first, first_branch, second, second_branch);
            }

            return Ok(None);
        }

        if self.both_empty(first, second) {
            let (older, younger) = if first_depth > second_depth {
                (second, first)
            } else {
                (first, second)
            };
            return self.merge_nested(older, younger);
        }

        Ok(None)
    }

    fn both_empty(&self, first: StackId, second: StackId) -> bool {
        self.arena.stack(first).is_empty() && self.arena.stack(second).is_empty()
    }

    /// Both sides of `branch` arrived: replace its placeholder by the merged values.
    fn merge_siblings(&mut self, branch: BranchId) -> Result<StackId> {
        let node = self.arena.branch(branch).clone();
        let parent = node.parent;

        match self.arena.pop(parent) {
            Some(placeholder) if placeholder.as_branch() == Some(branch) => {}
            other => {
                return Err(structural_error!(
                    "Expected the placeholder of {:?} at {}, found {:?}",
                    branch,
                    self.label,
                    other.map(|e| e.to_string())
                ))
            }
        }

        let if_true = self.arena.pop(node.on_true);
        let if_false = self.arena.pop(node.on_false);
        match (if_true, if_false) {
            (Some(if_true), Some(if_false)) => {
                let merged = builder::condition(node.test.clone(), if_true, if_false)?;
                self.arena.push(parent, merged, self.emit);
            }
            (None, None) => {}
            _ => {
                return Err(structural_error!(
                    "Only one side of {:?} left a value at {}",
                    branch,
                    self.label
                ))
            }
        }

        self.merge_locals(&node.test, node.on_true, node.on_false, parent)?;

        self.arena.stack_mut(node.on_true).mark_reduced();
        self.arena.stack_mut(node.on_false).mark_reduced();

        debug!("{}: merged both sides of {:?}", self.label, branch);
        Ok(parent)
    }

    /// Two empty stacks below the two sides of one branch.
    fn merge_diamond(
        &mut self,
        first: StackId,
        first_branch: BranchId,
        second: StackId,
        second_branch: BranchId,
    ) -> Result<Option<StackId>> {
        let first_node = self.arena.branch(first_branch).clone();
        let second_node = self.arena.branch(second_branch).clone();

        let (Some(root), Some(other_root)) = (
            self.arena.parent(first_node.parent),
            self.arena.parent(second_node.parent),
        ) else {
            return Ok(None);
        };
        if root != other_root {
            return Ok(None);
        }
        let root_node = self.arena.branch(root).clone();

        let (first_test, sibling) = if first_node.on_true == first {
            (first_node.test.clone(), first_node.on_false)
        } else {
            (builder::logical_not(first_node.test.clone())?, first_node.on_true)
        };

        let second_test = if second_node.on_true == second {
            self.arena.stack_mut(second_node.on_false).mark_reduced();
            second_node.test.clone()
        } else {
            self.arena.stack_mut(second_node.on_true).mark_reduced();
            builder::logical_not(second_node.test.clone())?
        };

        let second_sibling = second_node.side(second_node.on_true != second);

        let root_test = if root_node.on_true == first_node.parent {
            root_node.test.clone()
        } else {
            builder::logical_not(root_node.test.clone())?
        };
        self.merge_locals(&root_test, first, second, first)?;
        self.merge_locals(&root_test, sibling, second_sibling, sibling)?;
        let test = builder::condition(root_test, first_test, second_test)?;

        let merged = self.arena.rebranch(root_node.parent, test, first, sibling);
        self.replace_placeholder(root_node.parent, root, merged)?;

        debug!(
            "{}: folded {:?} and {:?} under {:?} into {:?}",
            self.label, first_branch, second_branch, root, merged
        );
        Ok(Some(first))
    }

    /// Two empty stacks where one sits deeper than the other.
    fn merge_nested(&mut self, older: StackId, younger: StackId) -> Result<Option<StackId>> {
        let (Some(older_branch), Some(younger_branch)) =
            (self.arena.parent(older), self.arena.parent(younger))
        else {
            return Ok(None);
        };
        let older_node = self.arena.branch(older_branch).clone();
        let younger_node = self.arena.branch(younger_branch).clone();

        let on_true = older_node.on_true == older;
        let (younger_test, other) = if younger_node.side(on_true) == younger {
            (younger_node.test.clone(), younger_node.side(!on_true))
        } else {
            (
                builder::logical_not(younger_node.test.clone())?,
                younger_node.side(on_true),
            )
        };

        let mut test = builder::logical_and(older_node.test.clone(), younger_test)?;
        if !on_true {
            test = builder::logical_not(test)?;
        }

        if on_true {
            self.merge_locals(&older_node.test, older, younger, older)?;
        } else {
            self.merge_locals(&older_node.test, younger, older, older)?;
        }

        let merged = self.arena.rebranch(older_node.parent, test, older, other);
        self.replace_placeholder(older_node.parent, older_branch, merged)?;

        debug!(
            "{}: combined {:?} with nested {:?} into {:?}",
            self.label, older_branch, younger_branch, merged
        );
        Ok(Some(older))
    }

    /// Stores in `target` the locals of a path that went through `if_true` when `test` holds
    /// and through `if_false` otherwise. A slot assigned on one path only is left unassigned.
    fn merge_locals(
        &mut self,
        test: &ExprRc,
        if_true: StackId,
        if_false: StackId,
        target: StackId,
    ) -> Result<()> {
        for slot in 0..self.arena.stack(target).locals.len() {
            let kept = &self.arena.stack(if_true).locals[slot];
            if kept.holds_same(&self.arena.stack(if_false).locals[slot]) {
                let kept = kept.clone();
                self.arena.stack_mut(target).locals[slot] = kept;
                continue;
            }

            let true_value = self.arena.stack(if_true).locals[slot].get(self.emit);
            let false_value = self.arena.stack(if_false).locals[slot].get(self.emit);
            match (true_value, false_value) {
                (Some(true_value), Some(false_value)) => {
                    let merged = builder::condition(test.clone(), true_value, false_value)?;
                    self.arena.stack_mut(target).locals[slot].assign(&merged, self.emit)?;
                }
                _ => self.arena.stack_mut(target).locals[slot].clear(),
            }
        }
        Ok(())
    }

    fn replace_placeholder(&mut self, stack: StackId, old: BranchId, new: BranchId) -> Result<()> {
        match self.arena.pop(stack) {
            Some(placeholder) if placeholder.as_branch() == Some(old) => {
                self.arena.push_untracked(stack, Expr::branch(new));
                Ok(())
            }
            other => Err(structural_error!(
                "Expected the placeholder of {:?} at {}, found {:?}",
                old,
                self.label,
                other.map(|e| e.to_string())
            )),
        }
    }
}
