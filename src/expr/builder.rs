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

//! Construction rules for arithmetic, comparison and boolean nodes.
//!
//! The evaluation stack of a CIL method is weakly typed: booleans are `int32` values, a
//! comparison against `null` is encoded as an unsigned comparison and `if (flag)` becomes
//! "branch if the value is non-zero". The functions here turn those raw shapes into typed
//! nodes a reader would have written:
//!
//! - numeric operands are promoted to a common type, a non-numeric side is coerced to the
//!   numeric side
//! - a boolean-like constant meeting a boolean operand is folded away (`x == true` is `x`,
//!   `x && false` is `false`)
//! - negation is pushed through conditionals, `&&`/`||` (De Morgan) and comparisons
//! - conditionals with constant boolean branches become `&&`/`||`
//!
//! # Examples
//!
//! ```rust
//! use cilexpr::expr::{builder, Expr};
//! use cilexpr::metadata::types::TypeSig;
//!
//! let x = Expr::parameter(0, "x", TypeSig::Bool);
//! let folded = builder::equal(x.clone(), Expr::boolean(true))?;
//! assert!(std::sync::Arc::ptr_eq(&folded, &x));
//!
//! let double_negation = builder::logical_not(builder::logical_not(x.clone())?)?;
//! assert!(std::sync::Arc::ptr_eq(&double_negation, &x));
//! # Ok::<(), cilexpr::Error>(())
//! ```

use crate::{
    expr::{
        coerce::coerce,
        node::{BinaryOp, ConstValue, Expr, ExprKind, ExprRc, UnaryOp},
    },
    metadata::types::TypeSig,
    Error, Result,
};

/// Picks the operand type of a binary operation on `left` and `right`.
fn operand_type(left: &ExprRc, right: &ExprRc) -> TypeSig {
    if left.ty == right.ty {
        return left.ty.clone();
    }

    if let Some(common) = left.ty.common_type(&right.ty) {
        return common;
    }

    match (left.ty.is_numeric(), right.ty.is_numeric()) {
        (true, false) => left.ty.clone(),
        (false, true) => right.ty.clone(),
        _ => {
            if left.is_constant() && !right.is_constant() {
                right.ty.clone()
            } else {
                left.ty.clone()
            }
        }
    }
}

/// Builds an arithmetic or bitwise node, bringing both operands to a common type.
///
/// # Errors
/// Returns [`crate::Error::InvalidCoercion`] if an operand cannot be converted.
pub fn numeric(op: BinaryOp, left: ExprRc, right: ExprRc) -> Result<ExprRc> {
    let ty = operand_type(&left, &right);
    let left = coerce(&left, &ty)?;
    let right = coerce(&right, &ty)?;
    Ok(Expr::binary(op, left, right, ty))
}

/// Builds a shift, typed as the shifted value. The shift amount is left untouched.
///
/// # Errors
/// Returns [`crate::Error::InvalidCoercion`] if a boolean value cannot be widened.
pub fn shift(op: BinaryOp, value: ExprRc, amount: ExprRc) -> Result<ExprRc> {
    let value = ensure_numeric(value)?;
    let ty = value.ty.clone();
    Ok(Expr::binary(op, value, amount, ty))
}

/// Builds `left & right`, `left | right` or `left ^ right`.
///
/// On two booleans `&` and `|` become the logical `&&` and `||`.
///
/// # Errors
/// Returns [`crate::Error::InvalidCoercion`] if an operand cannot be converted.
pub fn bitwise(op: BinaryOp, left: ExprRc, right: ExprRc) -> Result<ExprRc> {
    if left.is_bool() && right.is_bool() {
        return match op {
            BinaryOp::And => logical_and(left, right),
            BinaryOp::Or => logical_or(left, right),
            _ => Ok(Expr::binary(op, left, right, TypeSig::Bool)),
        };
    }

    numeric(op, left, right)
}

/// Builds `-operand`.
///
/// # Errors
/// Returns [`crate::Error::InvalidCoercion`] if a boolean operand cannot be widened.
pub fn negate(operand: ExprRc) -> Result<ExprRc> {
    let operand = ensure_numeric(operand)?;
    let ty = operand.ty.clone();
    Ok(Expr::unary(UnaryOp::Negate, operand, ty))
}

/// Builds `~operand`, or `!operand` for booleans.
///
/// # Errors
/// Propagates failures of [`logical_not`].
pub fn bitwise_not(operand: ExprRc) -> Result<ExprRc> {
    if operand.is_bool() {
        return logical_not(operand);
    }

    let ty = operand.ty.clone();
    Ok(Expr::unary(UnaryOp::Not, operand, ty))
}

/// Builds the conversion performed by a `conv.*` opcode.
///
/// Constants are converted in place and booleans go through the coercion engine, other
/// values are wrapped in an explicit conversion.
///
/// # Errors
/// Returns [`crate::Error::InvalidCoercion`] if a constant cannot be represented.
pub fn convert(operand: ExprRc, ty: TypeSig) -> Result<ExprRc> {
    if operand.ty == ty {
        return Ok(operand);
    }

    if operand.is_constant() || operand.is_bool() {
        return coerce(&operand, &ty);
    }

    Ok(Expr::convert(operand, ty))
}

/// Widens operands that live on the evaluation stack as integers without being numeric:
/// booleans and characters become `int32`, enums become their underlying type.
///
/// # Errors
/// Returns [`crate::Error::InvalidCoercion`] if a constant cannot be represented.
pub fn ensure_numeric(operand: ExprRc) -> Result<ExprRc> {
    match &operand.ty {
        TypeSig::Bool | TypeSig::Char => coerce(&operand, &TypeSig::I32),
        TypeSig::Enum { underlying, .. } => {
            let underlying = (**underlying).clone();
            coerce(&operand, &underlying)
        }
        _ => Ok(operand),
    }
}

/// Builds `<`, `<=`, `>` or `>=` on numeric operands.
///
/// # Errors
/// Returns [`crate::Error::InvalidCoercion`] if an operand cannot be converted.
pub fn numeric_comparison(op: BinaryOp, left: ExprRc, right: ExprRc) -> Result<ExprRc> {
    let left = ensure_numeric(left)?;
    let right = ensure_numeric(right)?;
    let ty = operand_type(&left, &right);
    let left = coerce(&left, &ty)?;
    let right = coerce(&right, &ty)?;
    Ok(Expr::binary(op, left, right, TypeSig::Bool))
}

/// Builds `left == right`, folding boolean constants.
///
/// # Errors
/// Returns [`crate::Error::InvalidCoercion`] if the operands have no common type.
pub fn equal(left: ExprRc, right: ExprRc) -> Result<ExprRc> {
    create_boolean(BinaryOp::Equal, left, right)
}

/// Builds `left != right`, folding boolean constants.
///
/// # Errors
/// Returns [`crate::Error::InvalidCoercion`] if the operands have no common type.
pub fn not_equal(left: ExprRc, right: ExprRc) -> Result<ExprRc> {
    create_boolean(BinaryOp::NotEqual, left, right)
}

/// Builds `left && right`, folding boolean constants.
///
/// # Errors
/// Returns [`crate::Error::InvalidCoercion`] if an operand is not boolean-like.
pub fn logical_and(left: ExprRc, right: ExprRc) -> Result<ExprRc> {
    create_boolean(BinaryOp::AndAlso, left, right)
}

/// Builds `left || right`, folding boolean constants.
///
/// # Errors
/// Returns [`crate::Error::InvalidCoercion`] if an operand is not boolean-like.
pub fn logical_or(left: ExprRc, right: ExprRc) -> Result<ExprRc> {
    create_boolean(BinaryOp::OrElse, left, right)
}

fn create_boolean(op: BinaryOp, left: ExprRc, right: ExprRc) -> Result<ExprRc> {
    let folded = if left.is_constant() {
        Some((&left, &right))
    } else if right.is_constant() {
        Some((&right, &left))
    } else {
        None
    };

    if let Some((constant, other)) = folded {
        if other.is_bool() {
            if let Some(value) = coerce(constant, &TypeSig::Bool)?.bool_literal() {
                return match op {
                    BinaryOp::Equal if value => Ok(other.clone()),
                    BinaryOp::Equal => logical_not(other.clone()),
                    BinaryOp::NotEqual if value => logical_not(other.clone()),
                    BinaryOp::NotEqual => Ok(other.clone()),
                    BinaryOp::AndAlso if value => Ok(other.clone()),
                    BinaryOp::AndAlso => Ok(Expr::boolean(false)),
                    BinaryOp::OrElse if value => Ok(Expr::boolean(true)),
                    _ => Ok(other.clone()),
                };
            }
        }
    }

    if op.is_logical() {
        let left = coerce(&left, &TypeSig::Bool)?;
        let right = coerce(&right, &TypeSig::Bool)?;
        return Ok(Expr::binary(op, left, right, TypeSig::Bool));
    }

    let ty = if matches!(left.as_constant(), Some(ConstValue::Null)) {
        right.ty.clone()
    } else if matches!(right.as_constant(), Some(ConstValue::Null)) {
        left.ty.clone()
    } else {
        operand_type(&left, &right)
    };
    let left = coerce(&left, &ty)?;
    let right = coerce(&right, &ty)?;
    Ok(Expr::binary(op, left, right, TypeSig::Bool))
}

/// Builds `!operand`, pushing the negation as deep as the structure allows.
///
/// # Errors
/// Returns [`crate::Error::InvalidCoercion`] if the operand is not boolean.
pub fn logical_not(operand: ExprRc) -> Result<ExprRc> {
    if !operand.is_bool() {
        return Err(Error::InvalidCoercion {
            from: operand.ty.clone(),
            to: TypeSig::Bool,
        });
    }

    match &operand.kind {
        ExprKind::Conditional {
            test,
            if_true,
            if_false,
        } => Ok(Expr::conditional(
            test.clone(),
            logical_not(if_true.clone())?,
            logical_not(if_false.clone())?,
        )),
        ExprKind::Constant(ConstValue::Bool(value)) => Ok(Expr::boolean(!value)),
        ExprKind::Unary {
            op: UnaryOp::LogicalNot,
            operand: inner,
        } => Ok(inner.clone()),
        ExprKind::Binary {
            op: BinaryOp::AndAlso,
            left,
            right,
        } => logical_or(logical_not(left.clone())?, logical_not(right.clone())?),
        ExprKind::Binary {
            op: BinaryOp::OrElse,
            left,
            right,
        } => logical_and(logical_not(left.clone())?, logical_not(right.clone())?),
        ExprKind::Binary { op, left, right } => match op.complement() {
            Some(complement) => Ok(Expr::binary(
                complement,
                left.clone(),
                right.clone(),
                TypeSig::Bool,
            )),
            None => Ok(Expr::unary(UnaryOp::LogicalNot, operand.clone(), TypeSig::Bool)),
        },
        _ => Ok(Expr::unary(UnaryOp::LogicalNot, operand.clone(), TypeSig::Bool)),
    }
}

fn zero_for(operand: &ExprRc) -> ExprRc {
    let ty = &operand.ty;
    if ty.is_numeric() || ty.is_enum() || matches!(ty, TypeSig::Char) {
        Expr::default_value(ty)
    } else {
        Expr::null(ty.clone())
    }
}

/// The condition under which `brtrue` jumps: the value itself for booleans, a comparison
/// with zero for numbers and enums, a comparison with `null` otherwise.
///
/// # Errors
/// Propagates coercion failures.
pub fn is_true(operand: ExprRc) -> Result<ExprRc> {
    if operand.is_bool() {
        return Ok(operand);
    }

    let zero = zero_for(&operand);
    not_equal(operand, zero)
}

/// The condition under which `brfalse` jumps.
///
/// # Errors
/// Propagates coercion failures.
pub fn is_false(operand: ExprRc) -> Result<ExprRc> {
    if operand.is_bool() {
        return logical_not(operand);
    }

    let zero = zero_for(&operand);
    equal(operand, zero)
}

/// Builds `test ? if_true : if_false`.
///
/// When one branch is a boolean literal and the other is boolean, the conditional is
/// rewritten into `&&`/`||`. Branches of different types are brought to a common type.
///
/// # Errors
/// Returns [`crate::Error::InvalidCoercion`] if the test is not boolean or the branches
/// cannot be reconciled.
pub fn condition(test: ExprRc, if_true: ExprRc, if_false: ExprRc) -> Result<ExprRc> {
    if !test.is_bool() {
        return Err(Error::InvalidCoercion {
            from: test.ty.clone(),
            to: TypeSig::Bool,
        });
    }

    let true_literal = if_true.bool_literal();
    let false_literal = if_false.bool_literal();

    match (true_literal, false_literal) {
        (Some(t), Some(f)) => {
            return if t == f {
                Ok(Expr::boolean(t))
            } else if t {
                Ok(test)
            } else {
                logical_not(test)
            };
        }
        (Some(t), None) if if_false.is_bool() => {
            return if t {
                logical_or(test, if_false)
            } else {
                logical_and(logical_not(test)?, if_false)
            };
        }
        (None, Some(f)) if if_true.is_bool() => {
            return if f {
                logical_or(logical_not(test)?, if_true)
            } else {
                logical_and(test, if_true)
            };
        }
        _ => {}
    }

    if if_true.ty == if_false.ty {
        return Ok(Expr::conditional(test, if_true, if_false));
    }

    let ty = if let Some(common) = if_true.ty.common_type(&if_false.ty) {
        common
    } else if matches!(if_true.ty, TypeSig::Object) {
        if_false.ty.clone()
    } else {
        if_true.ty.clone()
    };

    let if_true = coerce(&if_true, &ty)?;
    let if_false = coerce(&if_false, &ty)?;
    Ok(Expr::conditional(test, if_true, if_false))
}
