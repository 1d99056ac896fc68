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

//! Final assembly of the statement list.
//!
//! Runs once the last stack reached the end of the method. The values left on it become
//! statements, the statements are put back into emission order, and the result value is
//! moved to the end and converted to the return type.

use log::debug;

use crate::{
    decompiler::context::EmitContext,
    expr::{coerce::coerce, Expr, ExprKind, ExprRc},
    metadata::types::TypeSig,
    Result,
};

/// Turns the final stack into the ordered statement list of `emit`.
///
/// # Errors
/// Returns [`crate::Error::Structural`] if a non-void method produces no value.
pub(crate) fn assemble(
    emit: &mut EmitContext,
    remaining: Vec<ExprRc>,
    return_type: &TypeSig,
    inline_trailing_variable: bool,
) -> Result<()> {
    for value in remaining {
        emit.add_statement(value);
    }

    if emit.statements().is_empty() {
        if return_type.is_void() {
            return Ok(());
        }
        return Err(structural_error!(
            "Method returning {} leaves no value",
            return_type
        ));
    }

    let mut last_index = emit.statements().len() - 1;
    let last = emit.statements()[last_index].clone();
    emit.sort_statements();

    if !ExprRc::ptr_eq(&emit.statements()[last_index], &last) {
        debug!("result {last} moved by reordering");
        if last.is_symbol() {
            let statements = emit.statements_mut();
            if let Some(position) = statements.iter().rposition(|s| ExprRc::ptr_eq(s, &last)) {
                statements.remove(position);
            }
            statements.push(last);
        } else if !last.is_void() {
            replace_with_variable(emit, &last, last.clone());
            last_index += 1;
        }
    }

    if !return_type.is_void() {
        let result = (0..=last_index)
            .rev()
            .find(|index| !emit.statements()[*index].is_void())
            .ok_or_else(|| {
                structural_error!("Method returning {} produces no value", return_type)
            })?;

        let value = emit.statements()[result].clone();
        let coerced = coerce(&value, return_type)?;
        if result < last_index {
            replace_with_variable(emit, &value, coerced);
        } else {
            emit.statements_mut()[result] = coerced;
        }
    }

    if inline_trailing_variable {
        inline_trailing(emit);
    }
    Ok(())
}

/// Replaces the statement `original` by `V = value` and appends `V`.
fn replace_with_variable(emit: &mut EmitContext, original: &ExprRc, value: ExprRc) {
    let name = emit.temp_name();
    let variable = emit.new_variable(name, value.ty.clone());
    emit.add_variable(variable.clone());

    let assignment = Expr::assign(variable.clone(), value);
    let statements = emit.statements_mut();
    if let Some(position) = statements.iter().rposition(|s| ExprRc::ptr_eq(s, original)) {
        statements[position] = assignment;
    }
    statements.push(variable);
}

/// Collapses a trailing `V = e; V` into `e` when `V` is used nowhere else.
fn inline_trailing(emit: &mut EmitContext) {
    let count = emit.statements().len();
    if count < 2 {
        return;
    }

    let (target, value) = match &emit.statements()[count - 2].kind {
        ExprKind::Assign { target, value } => (target.clone(), value.clone()),
        _ => return,
    };
    let ExprKind::Variable { id, .. } = target.kind else {
        return;
    };
    let is_variable = |e: &Expr| matches!(e.kind, ExprKind::Variable { id: other, .. } if other == id);

    if !is_variable(&emit.statements()[count - 1]) {
        return;
    }
    let used_elsewhere = emit.statements()[..count - 2]
        .iter()
        .chain(std::iter::once(&value))
        .any(|statement| statement.any(&is_variable));
    if used_elsewhere {
        return;
    }

    debug!("inlining trailing {target}");
    let statements = emit.statements_mut();
    statements.truncate(count - 2);
    statements.push(value);
    emit.variables_mut().retain(|variable| !is_variable(variable));
}
