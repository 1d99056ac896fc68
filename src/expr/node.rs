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

//! The expression tree produced by the decompiler.
//!
//! Nodes are immutable once built and shared through [`ExprRc`]. Identity matters in a few
//! places (the emission ledger, local merges, `stelem` matching the array it follows), and is
//! always decided with [`std::sync::Arc::ptr_eq`], never by structural equality.
//!
//! Every node carries its static [`TypeSig`]. Constructors in this module do not validate
//! operand types; the rules live in [`crate::expr::builder`] and [`crate::expr::coerce`].
//!
//! # Branch placeholders
//!
//! A conditional jump pushes [`ExprKind::Branch`] onto the stack it forks from. The
//! placeholder only refers to the branch record by [`BranchId`] and is replaced by a
//! `Conditional` (or nothing) when the two sides are merged, so it never appears in a
//! finished tree.

use std::{fmt, sync::Arc};

use crate::{
    decompiler::stack::BranchId,
    metadata::{
        descriptor::{FieldRc, MethodDescriptor, MethodRc},
        types::TypeSig,
    },
};

/// Shared handle to an expression node
pub type ExprRc = Arc<Expr>;

arena_id!(
    /// Identity of a materialized variable, unique within one decompilation call
    VariableId
);

/// A literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    /// The `null` reference
    Null,
    /// A boolean
    Bool(bool),
    /// A UTF-16 code unit
    Char(u16),
    /// `int8`
    I8(i8),
    /// `uint8`
    U8(u8),
    /// `int16`
    I16(i16),
    /// `uint16`
    U16(u16),
    /// `int32`
    I32(i32),
    /// `uint32`
    U32(u32),
    /// `int64`
    I64(i64),
    /// `uint64`
    U64(u64),
    /// `float32`
    F32(f32),
    /// `float64`
    F64(f64),
    /// A string literal
    String(String),
    /// A method handle, as pushed by `ldftn`
    Method(MethodRc),
    /// The zero-initialized value of a struct
    Default,
}

impl ConstValue {
    /// Returns the zero value of `ty`: `0`, `false`, `null` or `default(T)`.
    #[must_use]
    pub fn zero_of(ty: &TypeSig) -> ConstValue {
        match ty.underlying() {
            TypeSig::Bool => ConstValue::Bool(false),
            TypeSig::Char => ConstValue::Char(0),
            TypeSig::F32 => ConstValue::F32(0.0),
            TypeSig::F64 => ConstValue::F64(0.0),
            integer if integer.is_integer() => {
                ConstValue::from_i128(0, integer).unwrap_or(ConstValue::I32(0))
            }
            other if other.accepts_null() => ConstValue::Null,
            _ => ConstValue::Default,
        }
    }

    /// Builds an integral constant of type `ty`, truncating like a CIL `conv`.
    ///
    /// Returns `None` if `ty` is not integral (enums use their underlying type).
    #[must_use]
    pub fn from_i128(value: i128, ty: &TypeSig) -> Option<ConstValue> {
        Some(match ty.underlying() {
            TypeSig::Char => ConstValue::Char(value as u16),
            TypeSig::I8 => ConstValue::I8(value as i8),
            TypeSig::U8 => ConstValue::U8(value as u8),
            TypeSig::I16 => ConstValue::I16(value as i16),
            TypeSig::U16 => ConstValue::U16(value as u16),
            TypeSig::I32 => ConstValue::I32(value as i32),
            TypeSig::U32 => ConstValue::U32(value as u32),
            TypeSig::I64 => ConstValue::I64(value as i64),
            TypeSig::U64 => ConstValue::U64(value as u64),
            _ => return None,
        })
    }

    /// Returns the value of an integral, character or boolean constant.
    #[must_use]
    pub fn as_i128(&self) -> Option<i128> {
        Some(match self {
            ConstValue::Bool(value) => i128::from(*value),
            ConstValue::Char(value) => i128::from(*value),
            ConstValue::I8(value) => i128::from(*value),
            ConstValue::U8(value) => i128::from(*value),
            ConstValue::I16(value) => i128::from(*value),
            ConstValue::U16(value) => i128::from(*value),
            ConstValue::I32(value) => i128::from(*value),
            ConstValue::U32(value) => i128::from(*value),
            ConstValue::I64(value) => i128::from(*value),
            ConstValue::U64(value) => i128::from(*value),
            _ => return None,
        })
    }

    /// Returns the value of any numeric constant as a double.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConstValue::F32(value) => Some(f64::from(*value)),
            ConstValue::F64(value) => Some(*value),
            other => other.as_i128().map(|value| value as f64),
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Null => write!(f, "null"),
            ConstValue::Bool(value) => write!(f, "{value}"),
            ConstValue::Char(value) => match char::from_u32(u32::from(*value)) {
                Some(c) => write!(f, "{c:?}"),
                None => write!(f, "'\\u{value:04x}'"),
            },
            ConstValue::I8(value) => write!(f, "{value}"),
            ConstValue::U8(value) => write!(f, "{value}"),
            ConstValue::I16(value) => write!(f, "{value}"),
            ConstValue::U16(value) => write!(f, "{value}"),
            ConstValue::I32(value) => write!(f, "{value}"),
            ConstValue::U32(value) => write!(f, "{value}u"),
            ConstValue::I64(value) => write!(f, "{value}L"),
            ConstValue::U64(value) => write!(f, "{value}UL"),
            ConstValue::F32(value) => write!(f, "{value:?}f"),
            ConstValue::F64(value) => write!(f, "{value:?}"),
            ConstValue::String(value) => write!(f, "{value:?}"),
            ConstValue::Method(method) => write!(f, "&{}", method.name),
            ConstValue::Default => write!(f, "default"),
        }
    }
}

/// Operators with one operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Arithmetic negation
    Negate,
    /// Bitwise complement
    Not,
    /// Boolean negation
    LogicalNot,
    /// Conversion to the node's type
    Convert,
    /// Length of an array
    ArrayLength,
}

/// Operators with two operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `%`
    Modulo,
    /// Bitwise `&`
    And,
    /// Bitwise `|`
    Or,
    /// Bitwise `^`
    ExclusiveOr,
    /// `<<`
    LeftShift,
    /// `>>`
    RightShift,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
    /// Short-circuit `&&`
    AndAlso,
    /// Short-circuit `||`
    OrElse,
}

impl BinaryOp {
    /// Returns `true` for the six comparison operators
    #[must_use]
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::LessThan
                | BinaryOp::LessThanOrEqual
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanOrEqual
        )
    }

    /// Returns `true` for `&&` and `||`
    #[must_use]
    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::AndAlso | BinaryOp::OrElse)
    }

    /// Returns `true` for the arithmetic and bitwise operators
    #[must_use]
    pub fn is_arithmetic(self) -> bool {
        !self.is_comparison() && !self.is_logical()
    }

    /// Returns the comparison that holds exactly when this one does not.
    #[must_use]
    pub fn complement(self) -> Option<BinaryOp> {
        Some(match self {
            BinaryOp::Equal => BinaryOp::NotEqual,
            BinaryOp::NotEqual => BinaryOp::Equal,
            BinaryOp::LessThan => BinaryOp::GreaterThanOrEqual,
            BinaryOp::LessThanOrEqual => BinaryOp::GreaterThan,
            BinaryOp::GreaterThan => BinaryOp::LessThanOrEqual,
            BinaryOp::GreaterThanOrEqual => BinaryOp::LessThan,
            _ => return None,
        })
    }

    /// Returns the operator symbol
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::ExclusiveOr => "^",
            BinaryOp::LeftShift => "<<",
            BinaryOp::RightShift => ">>",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::AndAlso => "&&",
            BinaryOp::OrElse => "||",
        }
    }
}

/// The shape of an expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// A literal
    Constant(ConstValue),
    /// A formal parameter of the decompiled method
    Parameter {
        /// Position in the method's parameter list
        index: u16,
        /// Declared name
        name: String,
    },
    /// A materialized symbol
    Variable {
        /// Identity within the call
        id: VariableId,
        /// Display name, e.g. `V_0`
        name: String,
    },
    /// A unary operation
    Unary {
        /// The operator
        op: UnaryOp,
        /// The operand
        operand: ExprRc,
    },
    /// A binary operation
    Binary {
        /// The operator
        op: BinaryOp,
        /// Left operand
        left: ExprRc,
        /// Right operand
        right: ExprRc,
    },
    /// `test ? if_true : if_false`
    Conditional {
        /// Boolean test
        test: ExprRc,
        /// Value when the test holds
        if_true: ExprRc,
        /// Value otherwise
        if_false: ExprRc,
    },
    /// A method call
    Call {
        /// Receiver, `None` for static calls
        instance: Option<ExprRc>,
        /// The called method
        method: MethodRc,
        /// Arguments, coerced to the parameter types
        args: Vec<ExprRc>,
    },
    /// An object construction
    New {
        /// The constructor
        ctor: MethodRc,
        /// Constructor arguments
        args: Vec<ExprRc>,
    },
    /// A field read
    Field {
        /// Owning object, `None` for static fields
        instance: Option<ExprRc>,
        /// The field
        field: FieldRc,
    },
    /// `array[index]`
    ArrayIndex {
        /// The array
        array: ExprRc,
        /// The index
        index: ExprRc,
    },
    /// An array with explicit elements
    ArrayNew {
        /// Element values in order
        elements: Vec<ExprRc>,
    },
    /// `target = value`
    Assign {
        /// A variable or field
        target: ExprRc,
        /// The assigned value
        value: ExprRc,
    },
    /// A statement sequence whose value is the last statement
    Block {
        /// Variables declared by the block
        variables: Vec<ExprRc>,
        /// Statements in execution order
        statements: Vec<ExprRc>,
    },
    /// `operand is T`
    TypeIs {
        /// The tested value
        operand: ExprRc,
        /// The type tested against
        test: TypeSig,
    },
    /// A nested lambda, from a delegate whose body was decompiled
    Lambda {
        /// Lambda parameters
        parameters: Vec<ExprRc>,
        /// The body
        body: ExprRc,
    },
    /// Invocation of a lambda or delegate value
    Invoke {
        /// The invoked lambda
        target: ExprRc,
        /// Arguments
        args: Vec<ExprRc>,
    },
    /// Placeholder for an unmerged fork
    Branch(BranchId),
}

/// An expression node: a shape and a static type.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// What the node computes
    pub kind: ExprKind,
    /// The static type of the result
    pub ty: TypeSig,
}

impl Expr {
    /// Wraps a kind and type into a shared node
    #[must_use]
    pub fn new(kind: ExprKind, ty: TypeSig) -> ExprRc {
        Arc::new(Expr { kind, ty })
    }

    /// A literal of the given type
    #[must_use]
    pub fn constant(value: ConstValue, ty: TypeSig) -> ExprRc {
        Expr::new(ExprKind::Constant(value), ty)
    }

    /// An `int32` literal
    #[must_use]
    pub fn int(value: i32) -> ExprRc {
        Expr::constant(ConstValue::I32(value), TypeSig::I32)
    }

    /// A `bool` literal
    #[must_use]
    pub fn boolean(value: bool) -> ExprRc {
        Expr::constant(ConstValue::Bool(value), TypeSig::Bool)
    }

    /// `null` typed as `ty`
    #[must_use]
    pub fn null(ty: TypeSig) -> ExprRc {
        Expr::constant(ConstValue::Null, ty)
    }

    /// The zero value of `ty`
    #[must_use]
    pub fn default_value(ty: &TypeSig) -> ExprRc {
        Expr::constant(ConstValue::zero_of(ty), ty.clone())
    }

    /// A formal parameter
    #[must_use]
    pub fn parameter(index: u16, name: impl Into<String>, ty: TypeSig) -> ExprRc {
        Expr::new(
            ExprKind::Parameter {
                index,
                name: name.into(),
            },
            ty,
        )
    }

    /// A materialized variable
    #[must_use]
    pub fn variable(id: VariableId, name: impl Into<String>, ty: TypeSig) -> ExprRc {
        Expr::new(
            ExprKind::Variable {
                id,
                name: name.into(),
            },
            ty,
        )
    }

    /// A unary operation typed as `ty`
    #[must_use]
    pub fn unary(op: UnaryOp, operand: ExprRc, ty: TypeSig) -> ExprRc {
        Expr::new(ExprKind::Unary { op, operand }, ty)
    }

    /// An explicit conversion
    #[must_use]
    pub fn convert(operand: ExprRc, ty: TypeSig) -> ExprRc {
        Expr::unary(UnaryOp::Convert, operand, ty)
    }

    /// A binary operation typed as `ty`
    #[must_use]
    pub fn binary(op: BinaryOp, left: ExprRc, right: ExprRc, ty: TypeSig) -> ExprRc {
        Expr::new(ExprKind::Binary { op, left, right }, ty)
    }

    /// A conditional typed as its true branch, without any reduction
    #[must_use]
    pub fn conditional(test: ExprRc, if_true: ExprRc, if_false: ExprRc) -> ExprRc {
        let ty = if_true.ty.clone();
        Expr::new(
            ExprKind::Conditional {
                test,
                if_true,
                if_false,
            },
            ty,
        )
    }

    /// A call typed as the method's return type
    #[must_use]
    pub fn call(instance: Option<ExprRc>, method: MethodRc, args: Vec<ExprRc>) -> ExprRc {
        let ty = method.return_type.clone();
        Expr::new(
            ExprKind::Call {
                instance,
                method,
                args,
            },
            ty,
        )
    }

    /// A construction typed as the constructor's declaring type
    #[must_use]
    pub fn new_object(ctor: MethodRc, args: Vec<ExprRc>) -> ExprRc {
        let ty = ctor.declaring_type.clone();
        Expr::new(ExprKind::New { ctor, args }, ty)
    }

    /// A field read typed as the field type
    #[must_use]
    pub fn field(instance: Option<ExprRc>, field: FieldRc) -> ExprRc {
        let ty = field.field_type.clone();
        Expr::new(ExprKind::Field { instance, field }, ty)
    }

    /// An element read typed as the array's element type
    #[must_use]
    pub fn array_index(array: ExprRc, index: ExprRc) -> ExprRc {
        let ty = array.ty.element_type().cloned().unwrap_or(TypeSig::Object);
        Expr::new(ExprKind::ArrayIndex { array, index }, ty)
    }

    /// An array of `element` values
    #[must_use]
    pub fn array_new(element: TypeSig, elements: Vec<ExprRc>) -> ExprRc {
        Expr::new(
            ExprKind::ArrayNew { elements },
            TypeSig::Array(Box::new(element)),
        )
    }

    /// An assignment typed as its target
    #[must_use]
    pub fn assign(target: ExprRc, value: ExprRc) -> ExprRc {
        let ty = target.ty.clone();
        Expr::new(ExprKind::Assign { target, value }, ty)
    }

    /// A block typed as `ty`
    #[must_use]
    pub fn block(variables: Vec<ExprRc>, statements: Vec<ExprRc>, ty: TypeSig) -> ExprRc {
        Expr::new(
            ExprKind::Block {
                variables,
                statements,
            },
            ty,
        )
    }

    /// A type test
    #[must_use]
    pub fn type_is(operand: ExprRc, test: TypeSig) -> ExprRc {
        Expr::new(ExprKind::TypeIs { operand, test }, TypeSig::Bool)
    }

    /// A lambda typed as the delegate `ty`
    #[must_use]
    pub fn lambda(parameters: Vec<ExprRc>, body: ExprRc, ty: TypeSig) -> ExprRc {
        Expr::new(ExprKind::Lambda { parameters, body }, ty)
    }

    /// An invocation typed as `ty`
    #[must_use]
    pub fn invoke(target: ExprRc, args: Vec<ExprRc>, ty: TypeSig) -> ExprRc {
        Expr::new(ExprKind::Invoke { target, args }, ty)
    }

    /// A branch placeholder
    #[must_use]
    pub fn branch(id: BranchId) -> ExprRc {
        Expr::new(ExprKind::Branch(id), TypeSig::Void)
    }

    /// Returns the literal if this is a constant
    #[must_use]
    pub fn as_constant(&self) -> Option<&ConstValue> {
        match &self.kind {
            ExprKind::Constant(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the branch if this is a placeholder
    #[must_use]
    pub fn as_branch(&self) -> Option<BranchId> {
        match self.kind {
            ExprKind::Branch(id) => Some(id),
            _ => None,
        }
    }

    /// Returns `true` for constants
    #[must_use]
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ExprKind::Constant(_))
    }

    /// Returns `true` for parameters and variables
    #[must_use]
    pub fn is_symbol(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Parameter { .. } | ExprKind::Variable { .. }
        )
    }

    /// Returns `true` if the node produces no value
    #[must_use]
    pub fn is_void(&self) -> bool {
        self.ty.is_void()
    }

    /// Returns `true` for `bool` typed nodes
    #[must_use]
    pub fn is_bool(&self) -> bool {
        self.ty.is_bool()
    }

    /// Reads a constant as a jump condition: `null`, `false`, `true`, `0` and `1`.
    #[must_use]
    pub fn const_bool_like(&self) -> Option<bool> {
        match (self.as_constant()?, &self.ty) {
            (ConstValue::Null, _) => Some(false),
            (ConstValue::Bool(value), _) => Some(*value),
            (ConstValue::I32(0), TypeSig::I32) => Some(false),
            (ConstValue::I32(1), TypeSig::I32) => Some(true),
            _ => None,
        }
    }

    /// Reads a `bool` constant or an `int32` `0`/`1` as a boolean.
    #[must_use]
    pub fn bool_literal(&self) -> Option<bool> {
        match self.as_constant()? {
            ConstValue::Null => None,
            _ => self.const_bool_like(),
        }
    }

    /// Returns `true` for the shift mask `31` or the constant `true`.
    #[must_use]
    pub fn is_int31(&self) -> bool {
        matches!(
            (self.as_constant(), &self.ty),
            (Some(ConstValue::I32(31)), TypeSig::I32) | (Some(ConstValue::Bool(true)), _)
        )
    }

    /// Returns `true` if the node has an effect or a cost worth materializing before it is
    /// reordered: anything but constants, symbols, field reads and branch placeholders.
    #[must_use]
    pub fn is_interesting(&self) -> bool {
        !matches!(
            self.kind,
            ExprKind::Constant(_)
                | ExprKind::Parameter { .. }
                | ExprKind::Variable { .. }
                | ExprKind::Field { .. }
                | ExprKind::Branch(_)
        )
    }

    /// Returns the direct children of this node in evaluation order.
    #[must_use]
    pub fn children(&self) -> Vec<&ExprRc> {
        match &self.kind {
            ExprKind::Constant(_)
            | ExprKind::Parameter { .. }
            | ExprKind::Variable { .. }
            | ExprKind::Branch(_) => Vec::new(),
            ExprKind::Unary { operand, .. } | ExprKind::TypeIs { operand, .. } => vec![operand],
            ExprKind::Binary { left, right, .. } => vec![left, right],
            ExprKind::Conditional {
                test,
                if_true,
                if_false,
            } => vec![test, if_true, if_false],
            ExprKind::Call { instance, args, .. } => instance.iter().chain(args.iter()).collect(),
            ExprKind::New { args, .. } => args.iter().collect(),
            ExprKind::Field { instance, .. } => instance.iter().collect(),
            ExprKind::ArrayIndex { array, index } => vec![array, index],
            ExprKind::ArrayNew { elements } => elements.iter().collect(),
            ExprKind::Assign { target, value } => vec![target, value],
            ExprKind::Block { statements, .. } => statements.iter().collect(),
            ExprKind::Lambda { body, .. } => vec![body],
            ExprKind::Invoke { target, args } => std::iter::once(target).chain(args.iter()).collect(),
        }
    }

    /// Returns `true` if `predicate` holds for this node or any descendant.
    pub fn any(&self, predicate: &dyn Fn(&Expr) -> bool) -> bool {
        predicate(self) || self.children().into_iter().any(|child| child.any(predicate))
    }

    /// Returns `true` if the tree refers to a formal parameter
    #[must_use]
    pub fn has_parameters(&self) -> bool {
        self.any(&|e| matches!(e.kind, ExprKind::Parameter { .. }))
    }

    /// Returns `true` if the tree contains a call for which `is_pure` does not hold, a
    /// construction or an invocation.
    pub fn has_calls(&self, is_pure: &dyn Fn(&MethodDescriptor) -> bool) -> bool {
        self.any(&|e| match &e.kind {
            ExprKind::Call { method, .. } => !is_pure(method),
            ExprKind::New { .. } | ExprKind::Invoke { .. } => true,
            _ => false,
        })
    }

    /// Returns `true` if `node` occurs in this tree by identity.
    #[must_use]
    pub fn contains(&self, node: &ExprRc) -> bool {
        self.any(&|e| std::ptr::eq(e, Arc::as_ptr(node)))
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[ExprRc]) -> fmt::Result {
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Constant(ConstValue::Default) => write!(f, "default({})", self.ty),
            ExprKind::Constant(value) => write!(f, "{value}"),
            ExprKind::Parameter { name, .. } | ExprKind::Variable { name, .. } => {
                write!(f, "{name}")
            }
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::Negate => write!(f, "-{operand}"),
                UnaryOp::Not => write!(f, "~{operand}"),
                UnaryOp::LogicalNot => write!(f, "!{operand}"),
                UnaryOp::Convert => write!(f, "(({}){operand})", self.ty),
                UnaryOp::ArrayLength => write!(f, "{operand}.Length"),
            },
            ExprKind::Binary { op, left, right } => {
                write!(f, "({left} {} {right})", op.symbol())
            }
            ExprKind::Conditional {
                test,
                if_true,
                if_false,
            } => write!(f, "({test} ? {if_true} : {if_false})"),
            ExprKind::Call {
                instance,
                method,
                args,
            } => {
                if let Some(instance) = instance {
                    write!(f, "{instance}.")?;
                }
                write!(f, "{}(", method.name)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            ExprKind::New { ctor, args } => {
                write!(f, "new {}(", ctor.declaring_type)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            ExprKind::Field { instance, field } => match instance {
                Some(instance) => write!(f, "{instance}.{}", field.name),
                None => write!(f, "{}", field.name),
            },
            ExprKind::ArrayIndex { array, index } => write!(f, "{array}[{index}]"),
            ExprKind::ArrayNew { elements } => {
                write!(f, "new {} {{ ", self.ty)?;
                write_list(f, elements)?;
                write!(f, " }}")
            }
            ExprKind::Assign { target, value } => write!(f, "{target} = {value}"),
            ExprKind::Block { statements, .. } => {
                write!(f, "{{ ")?;
                for statement in statements {
                    write!(f, "{statement}; ")?;
                }
                write!(f, "}}")
            }
            ExprKind::TypeIs { operand, test } => write!(f, "({operand} is {test})"),
            ExprKind::Lambda { parameters, body } => {
                write!(f, "(")?;
                write_list(f, parameters)?;
                write!(f, ") => {body}")
            }
            ExprKind::Invoke { target, args } => {
                write!(f, "({target})(")?;
                write_list(f, args)?;
                write!(f, ")")
            }
            ExprKind::Branch(id) => write!(f, "<{id:?}>"),
        }
    }
}
