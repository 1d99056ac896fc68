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

//! Per call emission state.
//!
//! One [`EmitContext`] exists per decompilation call and is shared by every stack of that
//! call. It owns the statement list, the declared variables and the emission ledger: the
//! order in which values and assignments were produced. Branch reduction moves values
//! between stacks and can therefore disturb that order; the ledger restores it when the
//! statements are assembled.

use std::{collections::HashSet, sync::Arc};

use crate::{
    expr::{Expr, ExprRc, VariableId},
    metadata::types::TypeSig,
};

/// Statements, variables and the emission ledger of one decompilation call.
#[derive(Debug)]
pub struct EmitContext {
    ledger: Vec<ExprRc>,
    statements: Vec<ExprRc>,
    variables: Vec<ExprRc>,
    next_variable: u32,
    names: HashSet<String>,
    prefix: String,
    next_temp: usize,
}

impl EmitContext {
    /// Creates an empty context naming temporaries `V_0`, `V_1`, ...
    #[must_use]
    pub fn new() -> Self {
        Self::with_temp_names("V_", 0)
    }

    /// Creates an empty context naming temporaries `{prefix}{first}`, `{prefix}{first + 1}`, ...
    #[must_use]
    pub fn with_temp_names(prefix: impl Into<String>, first: usize) -> Self {
        EmitContext {
            ledger: Vec::new(),
            statements: Vec::new(),
            variables: Vec::new(),
            next_variable: 0,
            names: HashSet::new(),
            prefix: prefix.into(),
            next_temp: first,
        }
    }

    /// Returns the next temporary name no variable carries yet
    pub fn temp_name(&mut self) -> String {
        loop {
            let name = format!("{}{}", self.prefix, self.next_temp);
            self.next_temp += 1;
            if !self.names.contains(&name) {
                return name;
            }
        }
    }

    /// Records `expr` as produced now
    pub fn track(&mut self, expr: &ExprRc) {
        self.ledger.push(expr.clone());
    }

    /// Records `expr` as produced right after the last production of `after`.
    pub fn track_after(&mut self, expr: &ExprRc, after: &ExprRc) {
        let position = self.last_index_of(after).map_or(0, |index| index + 1);
        self.ledger.insert(position, expr.clone());
    }

    /// Position of the last production of `expr` in the ledger
    #[must_use]
    pub fn last_index_of(&self, expr: &ExprRc) -> Option<usize> {
        self.ledger.iter().rposition(|tracked| Arc::ptr_eq(tracked, expr))
    }

    /// Allocates a fresh variable. The variable is not declared yet.
    ///
    /// A name already given to another variable of this call is replaced by the next
    /// temporary name, so that two variables never print the same.
    pub fn new_variable(&mut self, name: impl Into<String>, ty: TypeSig) -> ExprRc {
        let mut name = name.into();
        if self.names.contains(&name) {
            name = self.temp_name();
        }
        self.names.insert(name.clone());

        let id = VariableId::new(self.next_variable);
        self.next_variable += 1;
        Expr::variable(id, name, ty)
    }

    /// Declares `variable` together with its initializing `assignment`, once.
    pub fn declare(&mut self, variable: &ExprRc, assignment: &ExprRc) {
        if !self.is_declared(variable) {
            self.variables.push(variable.clone());
            self.statements.push(assignment.clone());
        }
    }

    /// Returns `true` if `variable` was declared
    #[must_use]
    pub fn is_declared(&self, variable: &ExprRc) -> bool {
        self.variables.iter().any(|known| Arc::ptr_eq(known, variable))
    }

    /// Declares a variable without adding a statement
    pub fn add_variable(&mut self, variable: ExprRc) {
        self.variables.push(variable);
    }

    /// Appends a statement
    pub fn add_statement(&mut self, statement: ExprRc) {
        self.statements.push(statement);
    }

    /// Introduces `name = expr` so that `expr` is evaluated once, and returns the variable.
    ///
    /// The assignment is placed in the ledger right after `expr`, the variable after that.
    pub fn materialize(&mut self, expr: &ExprRc, name: impl Into<String>) -> ExprRc {
        let variable = self.new_variable(name, expr.ty.clone());
        let assignment = Expr::assign(variable.clone(), expr.clone());
        self.variables.push(variable.clone());
        self.statements.push(assignment.clone());
        self.track_after(&assignment, expr);
        self.track(&variable);
        variable
    }

    /// The statements emitted so far
    #[must_use]
    pub fn statements(&self) -> &[ExprRc] {
        &self.statements
    }

    /// Mutable access to the statements, used by the assembly stage
    pub fn statements_mut(&mut self) -> &mut Vec<ExprRc> {
        &mut self.statements
    }

    /// The declared variables
    #[must_use]
    pub fn variables(&self) -> &[ExprRc] {
        &self.variables
    }

    /// Mutable access to the declared variables
    pub fn variables_mut(&mut self) -> &mut Vec<ExprRc> {
        &mut self.variables
    }

    /// Reorders the statements by their last production in the ledger.
    ///
    /// The sort is stable; statements never tracked keep their relative order and move to
    /// the front.
    pub fn sort_statements(&mut self) {
        let mut keyed: Vec<(Option<usize>, ExprRc)> = self
            .statements
            .drain(..)
            .map(|statement| (None, statement))
            .collect();
        for (key, statement) in &mut keyed {
            *key = self.last_index_of(statement);
        }
        keyed.sort_by_key(|(key, _)| *key);
        self.statements = keyed.into_iter().map(|(_, statement)| statement).collect();
    }

    /// Consumes the context into its variables and statements
    #[must_use]
    pub fn into_parts(self) -> (Vec<ExprRc>, Vec<ExprRc>) {
        (self.variables, self.statements)
    }
}

impl Default for EmitContext {
    fn default() -> Self {
        Self::new()
    }
}
