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

//! Type coercion engine.
//!
//! [`coerce`] converts a node to a required type. Conversions are pushed towards the leaves:
//! arithmetic nodes are rebuilt from coerced operands, conditionals from coerced branches
//! and constants are converted in place. Every other node keeps its structure and is wrapped
//! in an explicit `Convert`.

use crate::{
    expr::{
        builder,
        node::{BinaryOp, ConstValue, Expr, ExprKind, ExprRc},
    },
    metadata::types::TypeSig,
    Error, Result,
};

/// Converts `expr` to the type `to`.
///
/// A node whose type is already assignable to `to` is returned unchanged (the same
/// allocation).
///
/// # Examples
///
/// ```rust
/// use cilexpr::expr::{coerce::coerce, Expr};
/// use cilexpr::metadata::types::TypeSig;
///
/// let one = coerce(&Expr::int(1), &TypeSig::Bool)?;
/// assert_eq!(one.to_string(), "true");
///
/// let x = Expr::parameter(0, "x", TypeSig::I32);
/// assert!(std::sync::Arc::ptr_eq(&coerce(&x, &TypeSig::I32)?, &x));
/// # Ok::<(), cilexpr::Error>(())
/// ```
///
/// # Errors
/// Returns [`crate::Error::InvalidCoercion`] for literal conversions that cannot be
/// represented, and [`crate::Error::Structural`] for a branch placeholder.
pub fn coerce(expr: &ExprRc, to: &TypeSig) -> Result<ExprRc> {
    if to.is_void() || to.is_assignable_from(&expr.ty) {
        return Ok(expr.clone());
    }

    match &expr.kind {
        ExprKind::Branch(_) => Err(structural_error!(
            "Unmerged branch used as a value of type {}",
            to
        )),
        ExprKind::Constant(value) => convert_constant(value, expr, to),
        _ if expr.is_bool() && is_integral_target(to) => {
            let one = convert_constant(&ConstValue::I32(1), &Expr::int(1), to)?;
            let zero = convert_constant(&ConstValue::I32(0), &Expr::int(0), to)?;
            Ok(Expr::conditional(expr.clone(), one, zero))
        }
        _ if to.is_bool() && expr.ty.underlying().is_integer() => builder::is_true(expr.clone()),
        ExprKind::Binary { op, left, right } if op.is_arithmetic() && is_numeric_target(to) => {
            let left = coerce(left, to)?;
            let right = match op {
                BinaryOp::LeftShift | BinaryOp::RightShift => right.clone(),
                _ => coerce(right, to)?,
            };
            Ok(Expr::binary(*op, left, right, to.clone()))
        }
        ExprKind::Conditional {
            test,
            if_true,
            if_false,
        } => Ok(Expr::conditional(
            test.clone(),
            coerce(if_true, to)?,
            coerce(if_false, to)?,
        )),
        _ => Ok(Expr::convert(expr.clone(), to.clone())),
    }
}

fn is_integral_target(to: &TypeSig) -> bool {
    to.is_numeric() || to.is_enum() || matches!(to, TypeSig::Char)
}

fn is_numeric_target(to: &TypeSig) -> bool {
    match to {
        TypeSig::Nullable(inner) => is_integral_target(inner),
        other => is_integral_target(other),
    }
}

fn invalid(expr: &ExprRc, to: &TypeSig) -> Error {
    Error::InvalidCoercion {
        from: expr.ty.clone(),
        to: to.clone(),
    }
}

/// Converts a literal, keeping it a constant where the target can represent it.
fn convert_constant(value: &ConstValue, expr: &ExprRc, to: &TypeSig) -> Result<ExprRc> {
    if let ConstValue::Null = value {
        return if to.accepts_null() {
            Ok(Expr::null(to.clone()))
        } else {
            Err(invalid(expr, to))
        };
    }

    match to {
        TypeSig::Bool => match value.as_i128() {
            Some(0) => Ok(Expr::boolean(false)),
            Some(1) => Ok(Expr::boolean(true)),
            _ => Err(invalid(expr, to)),
        },
        TypeSig::F32 => match value.as_f64() {
            Some(number) => Ok(Expr::constant(ConstValue::F32(number as f32), TypeSig::F32)),
            None => Ok(Expr::convert(expr.clone(), to.clone())),
        },
        TypeSig::F64 => match value.as_f64() {
            Some(number) => Ok(Expr::constant(ConstValue::F64(number), TypeSig::F64)),
            None => Ok(Expr::convert(expr.clone(), to.clone())),
        },
        TypeSig::Nullable(inner) => {
            let converted = convert_constant(value, expr, inner)?;
            match &converted.kind {
                ExprKind::Constant(inner_value) => {
                    Ok(Expr::constant(inner_value.clone(), to.clone()))
                }
                _ => Ok(Expr::convert(converted, to.clone())),
            }
        }
        integral if is_integral_target(integral) => {
            let number = match value {
                ConstValue::F32(number) => Some(*number as i128),
                ConstValue::F64(number) => Some(*number as i128),
                other => other.as_i128(),
            };
            match number.and_then(|number| ConstValue::from_i128(number, integral)) {
                Some(converted) => Ok(Expr::constant(converted, integral.clone())),
                None => Ok(Expr::convert(expr.clone(), to.clone())),
            }
        }
        _ => Ok(Expr::convert(expr.clone(), to.clone())),
    }
}
