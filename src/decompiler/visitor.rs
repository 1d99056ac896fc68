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

//! The stack simulating visitor.
//!
//! [`StackVisitor`] is the [`MethodVisitor`] the decompiler drives the decoder with. It keeps
//! exactly one current [`crate::decompiler::stack::ExprStack`] and, per label, the list of
//! stacks that jumped there:
//!
//! - linear instructions pop their operands and push the node built from them; effects
//!   without a value (void calls, field stores, `pop` of a call) become statements
//! - `br` and `ret` park the current stack at their target and leave no current stack, the
//!   instructions up to the next label are dead and skipped
//! - a conditional jump forks the current stack: the fall-through side becomes current, the
//!   taken side is parked at the target
//! - a label hands every stack parked there, plus the current one, to the
//!   [`crate::decompiler::reduce::Reducer`]
//!
//! Conditional jumps whose outcome is known from a constant operand do not fork.

use std::collections::HashMap;

use log::{trace, warn};

use crate::{
    decompiler::{
        assemble::assemble,
        context::EmitContext,
        reduce::Reducer,
        stack::{LocalSlot, StackArena, StackId},
        Decompiler,
    },
    disassembler::{decoder::MethodVisitor, instruction::OpCode},
    expr::{
        builder,
        coerce::coerce,
        BinaryOp, ConstValue, Expr, ExprKind, ExprRc, UnaryOp,
    },
    label::Label,
    metadata::{
        descriptor::{FieldRc, MethodDescriptor, MethodFlags, MethodRc, ParamFlags},
        resolver::Resolver,
        types::TypeSig,
    },
    Error, Result,
};

/// What a decompilation call produced: variables, statements and the cacheability flag.
pub(crate) struct VisitorOutput {
    pub variables: Vec<ExprRc>,
    pub statements: Vec<ExprRc>,
    pub not_cacheable: bool,
}

/// Rebuilds expressions from one method body.
pub struct StackVisitor<'a, R: Resolver + ?Sized> {
    decompiler: &'a Decompiler<'a, R>,
    method: &'a MethodDescriptor,
    return_type: TypeSig,
    parameters: Vec<ExprRc>,
    target: Option<ExprRc>,
    arguments: Vec<Option<ExprRc>>,

    arena: StackArena,
    emit: EmitContext,
    current: Option<StackId>,
    waiters: HashMap<Label, Vec<StackId>>,
    offset: usize,
    not_cacheable: bool,
}

impl<'a, R: Resolver + ?Sized> StackVisitor<'a, R> {
    /// Creates a visitor for `method`.
    ///
    /// `target` is the value of `this` for instance methods. Pre-bound `arguments` replace
    /// the matching parameters unless they refer to parameters themselves.
    pub fn new(
        decompiler: &'a Decompiler<'a, R>,
        method: &'a MethodDescriptor,
        parameters: Vec<ExprRc>,
        target: Option<ExprRc>,
        arguments: &[ExprRc],
    ) -> Self {
        let arguments = arguments
            .iter()
            .map(|argument| (!argument.has_parameters()).then(|| argument.clone()))
            .collect();

        StackVisitor {
            decompiler,
            method,
            return_type: method.return_type.instantiate(decompiler.generic_context()),
            parameters,
            target,
            arguments,
            arena: StackArena::new(),
            emit: EmitContext::new(),
            current: None,
            waiters: HashMap::new(),
            offset: 0,
            not_cacheable: false,
        }
    }

    pub(crate) fn finish(self) -> VisitorOutput {
        let (variables, statements) = self.emit.into_parts();
        VisitorOutput {
            variables,
            statements,
            not_cacheable: self.not_cacheable,
        }
    }

    fn unsupported(&self, opcode: OpCode) -> Error {
        Error::UnsupportedInstruction {
            mnemonic: opcode.mnemonic(),
            offset: self.offset,
        }
    }

    fn current(&self) -> Result<StackId> {
        self.current
            .ok_or_else(|| structural_error!("No current stack at offset 0x{:04x}", self.offset))
    }

    /// Pops one operand of the current stack.
    fn pop_operand(&mut self, what: &str) -> Result<ExprRc> {
        let current = self.current()?;
        match self.arena.pop(current) {
            Some(value) if value.as_branch().is_some() => Err(structural_error!(
                "{} at offset 0x{:04x} consumes an unmerged branch",
                what,
                self.offset
            )),
            Some(value) => Ok(value),
            None => Err(structural_error!(
                "Stack underflow in {} at offset 0x{:04x}",
                what,
                self.offset
            )),
        }
    }

    fn push(&mut self, value: ExprRc) -> Result<()> {
        let current = self.current()?;
        self.arena.push(current, value, &mut self.emit);
        Ok(())
    }

    fn statement(&mut self, statement: ExprRc) {
        self.emit.track(&statement);
        self.emit.add_statement(statement);
    }

    fn materialize(&mut self, value: &ExprRc) -> ExprRc {
        let name = self.emit.temp_name();
        self.emit.materialize(value, name)
    }

    fn slot(arena: &mut StackArena, current: StackId, index: u16, offset: usize) -> Result<&mut LocalSlot> {
        arena
            .stack_mut(current)
            .locals
            .get_mut(usize::from(index))
            .ok_or_else(|| structural_error!("Local {} does not exist (offset 0x{:04x})", index, offset))
    }

    fn branch(&mut self, label: Label, test: ExprRc) -> Result<()> {
        let current = self.current()?;
        let branch = self.arena.fork(current, test);
        self.arena.push(current, Expr::branch(branch), &mut self.emit);

        let node = self.arena.branch(branch);
        let (on_true, on_false) = (node.on_true, node.on_false);
        self.waiters.entry(label).or_default().push(on_false);
        self.current = Some(on_true);
        Ok(())
    }

    fn go(&mut self, label: Label) -> Result<()> {
        let current = self.current()?;
        self.waiters.entry(label).or_default().push(current);
        self.current = None;
        Ok(())
    }

    fn argument(&self, index: u16) -> Result<ExprRc> {
        let mut index = usize::from(index);
        if let Some(target) = &self.target {
            if index == 0 {
                return Ok(target.clone());
            }
            index -= 1;
        }

        if let Some(Some(bound)) = self.arguments.get(index) {
            return Ok(bound.clone());
        }

        self.parameters.get(index).cloned().ok_or_else(|| {
            structural_error!(
                "Argument {} does not exist in {} (offset 0x{:04x})",
                index,
                self.method,
                self.offset
            )
        })
    }

    fn binary(&mut self, what: &str, build: fn(ExprRc, ExprRc) -> Result<ExprRc>) -> Result<()> {
        let first = pop!(self, what);
        let second = pop!(self, what);
        self.push(build(second, first)?)
    }

    fn unary(&mut self, what: &str, build: fn(ExprRc) -> Result<ExprRc>) -> Result<()> {
        let operand = pop!(self, what);
        self.push(build(operand)?)
    }

    fn convert(&mut self, ty: TypeSig) -> Result<()> {
        let operand = pop!(self, "conv");
        self.push(builder::convert(operand, ty)?)
    }

    fn duplicate(&mut self) -> Result<()> {
        let current = self.current()?;
        let Some(top) = self.arena.stack(current).peek().cloned() else {
            return Err(structural_error!("dup on an empty stack at offset 0x{:04x}", self.offset));
        };

        let decompiler = self.decompiler;
        let options = decompiler.options();
        let shared = matches!(top.kind, ExprKind::ArrayNew { .. })
            || !top.has_calls(&|method| options.is_pure_call(method));
        if shared {
            return self.push(top);
        }

        let top = pop!(self, "dup");
        let variable = self.materialize(&top);
        self.push(variable.clone())?;
        self.push(variable)
    }

    fn discard(&mut self) -> Result<()> {
        let value = pop!(self, "pop");
        if !value.is_interesting() {
            return Ok(());
        }

        let current = self.current()?;
        let pending: Vec<(usize, ExprRc)> = self
            .arena
            .stack(current)
            .items()
            .iter()
            .enumerate()
            .filter(|(_, item)| item.is_interesting() && item.as_branch().is_none())
            .map(|(index, item)| (index, item.clone()))
            .collect();
        for (index, item) in pending {
            let variable = self.materialize(&item);
            self.arena.stack_mut(current).items_mut()[index] = variable;
        }

        self.emit.add_statement(value);
        Ok(())
    }

    fn store_element(&mut self) -> Result<()> {
        let value = pop!(self, "stelem");
        let index = pop!(self, "stelem");
        let array = pop!(self, "stelem");

        let Some(ConstValue::I32(position)) = index.as_constant() else {
            return Err(structural_error!(
                "stelem at offset 0x{:04x} with non constant index {}",
                self.offset,
                index
            ));
        };
        let ExprKind::ArrayNew { elements } = &array.kind else {
            return Err(structural_error!(
                "stelem at offset 0x{:04x} does not follow its newarr",
                self.offset
            ));
        };

        let original = pop!(self, "stelem");
        if !ExprRc::ptr_eq(&original, &array) {
            return Err(structural_error!(
                "stelem at offset 0x{:04x} is not preceded by dup of its array",
                self.offset
            ));
        }

        let position = usize::try_from(*position)
            .ok()
            .filter(|position| *position < elements.len())
            .ok_or_else(|| {
                structural_error!(
                    "stelem index {} out of range at offset 0x{:04x}",
                    position,
                    self.offset
                )
            })?;

        let element_type = array.ty.element_type().cloned().unwrap_or(TypeSig::Object);
        let mut elements = elements.clone();
        elements[position] = coerce(&value, &element_type)?;
        self.push(Expr::array_new(element_type, elements))
    }

    fn compare_unsigned(&mut self) -> Result<()> {
        let first = pop!(self, "cgt.un");
        let second = pop!(self, "cgt.un");

        let result = if matches!(first.as_constant(), Some(ConstValue::Null)) {
            if second.is_bool() {
                second
            } else {
                builder::not_equal(second, first)?
            }
        } else {
            builder::numeric_comparison(BinaryOp::GreaterThan, second, first)?
        };
        self.push(result)
    }

    fn compare_and_branch(&mut self, op: BinaryOp, label: Label) -> Result<()> {
        let second = pop!(self, "branch");
        let first = pop!(self, "branch");

        let first = if op == BinaryOp::Equal {
            first
        } else {
            builder::ensure_numeric(first)?
        };
        let second = coerce(&second, &first.ty)?;
        self.branch(label, Expr::binary(op, first, second, TypeSig::Bool))
    }

    fn branch_if_true(&mut self, label: Label) -> Result<()> {
        let value = pop!(self, "brtrue");
        match value.const_bool_like() {
            Some(true) => return self.go(label),
            Some(false) => return Ok(()),
            None => {}
        }

        if self.decompiler.options().fold_reference_tests {
            if value.ty.is_delegate() {
                return Ok(());
            }
            if !value.ty.is_primitive() && !value.ty.is_enum() {
                return self.go(label);
            }
            if let ExprKind::Call { method, .. } = &value.kind {
                if method.flags.contains(MethodFlags::NULLABLE_HAS_VALUE) {
                    return self.go(label);
                }
            }
        }

        self.branch(label, builder::is_false(value)?)
    }

    fn branch_if_false(&mut self, label: Label) -> Result<()> {
        let value = pop!(self, "brfalse");
        match value.const_bool_like() {
            Some(false) => self.go(label),
            Some(true) => Ok(()),
            None => self.branch(label, builder::is_true(value)?),
        }
    }

    fn create_arguments(&mut self, method: &MethodDescriptor) -> Result<Vec<ExprRc>> {
        let mut arguments = Vec::with_capacity(method.params.len());
        for param in method.params.iter().rev() {
            let mut value = pop!(self, "call argument");

            if param.flags.contains(ParamFlags::PARAM_ARRAY) {
                if let ExprKind::Call { method: callee, .. } = &value.kind {
                    if callee.flags.contains(MethodFlags::ARRAY_EMPTY) {
                        let element = value.ty.element_type().cloned().unwrap_or(TypeSig::Object);
                        value = Expr::array_new(element, Vec::new());
                    }
                }
            }

            let value = if param.ty == TypeSig::NativeInt && value.ty == TypeSig::MethodHandle {
                value
            } else {
                coerce(&value, &param.ty)?
            };
            arguments.push(value);
        }

        arguments.reverse();
        Ok(arguments)
    }

    fn construct(&mut self, ctor: MethodRc, arguments: Vec<ExprRc>) -> Result<ExprRc> {
        if !ctor.is_delegate_constructor() {
            return Ok(Expr::new_object(ctor, arguments));
        }

        let [target, handle] = arguments.as_slice() else {
            return Err(structural_error!(
                "Delegate constructor {} takes {} arguments, expected 2",
                ctor,
                arguments.len()
            ));
        };
        let Some(ConstValue::Method(method)) = handle.as_constant() else {
            return Err(structural_error!(
                "Delegate constructor {} without a method handle",
                ctor
            ));
        };

        if self.decompiler.options().inline_delegates {
            if let Some(body) = self.decompiler.resolver().method_body(method)? {
                let bound = (!method.is_static()).then(|| target.clone());
                let nested = self.decompiler.decompile_bound(method, &body, bound, &[])?;
                self.not_cacheable |= nested.not_cacheable;
                return Ok(nested.to_lambda(ctor.declaring_type.clone()));
            }
        }

        Ok(Expr::new_object(ctor, arguments))
    }

    fn call(
        &mut self,
        method: MethodRc,
        instance: Option<ExprRc>,
        arguments: Vec<ExprRc>,
    ) -> Result<ExprRc> {
        if let Some(instance) = instance.as_ref().filter(|_| method.is_delegate_invoke()) {
            if matches!(instance.kind, ExprKind::Lambda { .. }) {
                return Ok(Expr::invoke(
                    instance.clone(),
                    arguments,
                    method.return_type.clone(),
                ));
            }

            if self.decompiler.options().inline_delegates {
                if let Some(delegate) = self.decompiler.resolver().evaluate_delegate(instance)? {
                    self.not_cacheable = true;
                    warn!(
                        "{}: evaluated the captured delegate {} at decompile time, the result is not cacheable",
                        self.method.name, instance
                    );

                    let body = self
                        .decompiler
                        .resolver()
                        .method_body(&delegate.method)?
                        .ok_or_else(|| {
                            Error::DelegateTarget(format!(
                                "{} evaluated to {} which has no body",
                                instance, delegate.method
                            ))
                        })?;
                    let nested = self.decompiler.decompile_bound(
                        &delegate.method,
                        &body,
                        delegate.target.clone(),
                        &[],
                    )?;
                    self.not_cacheable |= nested.not_cacheable;
                    let lambda = nested.to_lambda(instance.ty.clone());
                    return Ok(Expr::invoke(lambda, arguments, method.return_type.clone()));
                }
            }
        }

        Ok(Expr::call(instance, method, arguments))
    }
}

impl<R: Resolver + ?Sized> MethodVisitor for StackVisitor<'_, R> {
    fn visit_code(&mut self) -> Result<()> {
        trace!("decompiling {}", self.method);
        Ok(())
    }

    fn visit_max_stack(&mut self, _max_stack: u16, locals: &[TypeSig]) -> Result<()> {
        let decompiler = self.decompiler;
        let prefix = &decompiler.options().variable_prefix;
        let slots = locals
            .iter()
            .enumerate()
            .map(|(index, ty)| LocalSlot::new(ty.clone(), format!("{prefix}{index}")))
            .collect();

        self.emit = EmitContext::with_temp_names(prefix.clone(), locals.len());
        self.current = Some(self.arena.root(slots));
        Ok(())
    }

    fn visit_offset(&mut self, offset: usize) -> Result<()> {
        self.offset = offset;
        Ok(())
    }

    fn visit_label(&mut self, label: Label) -> Result<()> {
        let Some(mut waiting) = self.waiters.remove(&label) else {
            return Ok(());
        };
        trace!("{label}: {} waiting", waiting.len());

        waiting.retain(|stack| !self.arena.stack(*stack).is_reduced());
        if let Some(current) = self.current {
            waiting.push(current);
        }

        self.current = if waiting.is_empty() {
            None
        } else {
            Some(Reducer::new(&mut self.arena, &mut self.emit, label).reduce(waiting)?)
        };
        Ok(())
    }

    fn visit_insn(&mut self, opcode: OpCode) -> Result<()> {
        if self.current.is_none() {
            return Ok(());
        }

        use OpCode::*;
        match opcode {
            Add | AddOvf | AddOvfUn => self.binary("add", |l, r| builder::numeric(BinaryOp::Add, l, r)),
            Sub | SubOvf | SubOvfUn => {
                self.binary("sub", |l, r| builder::numeric(BinaryOp::Subtract, l, r))
            }
            Mul | MulOvf | MulOvfUn => {
                self.binary("mul", |l, r| builder::numeric(BinaryOp::Multiply, l, r))
            }
            Div | DivUn => self.binary("div", |l, r| builder::numeric(BinaryOp::Divide, l, r)),
            Rem | RemUn => self.binary("rem", |l, r| builder::numeric(BinaryOp::Modulo, l, r)),
            And => {
                let first = pop!(self, "and");
                let second = pop!(self, "and");
                if first.is_int31() {
                    self.push(second)
                } else {
                    self.push(builder::bitwise(BinaryOp::And, second, first)?)
                }
            }
            Or => self.binary("or", |l, r| builder::bitwise(BinaryOp::Or, l, r)),
            Xor => self.binary("xor", |l, r| builder::bitwise(BinaryOp::ExclusiveOr, l, r)),
            Shl => self.binary("shl", |l, r| builder::shift(BinaryOp::LeftShift, l, r)),
            Shr | ShrUn => self.binary("shr", |l, r| builder::shift(BinaryOp::RightShift, l, r)),
            Neg => self.unary("neg", builder::negate),
            Not => self.unary("not", builder::bitwise_not),

            Ceq => self.binary("ceq", builder::equal),
            Cgt => self.binary("cgt", |l, r| {
                builder::numeric_comparison(BinaryOp::GreaterThan, l, r)
            }),
            CgtUn => self.compare_unsigned(),
            Clt | CltUn => self.binary("clt", |l, r| {
                builder::numeric_comparison(BinaryOp::LessThan, l, r)
            }),

            ConvI1 | ConvOvfI1 | ConvOvfI1Un => self.convert(TypeSig::I8),
            ConvI2 | ConvOvfI2 | ConvOvfI2Un => self.convert(TypeSig::I16),
            ConvI4 | ConvOvfI4 | ConvOvfI4Un => self.convert(TypeSig::I32),
            ConvI8 | ConvOvfI8 | ConvOvfI8Un => self.convert(TypeSig::I64),
            ConvU1 | ConvOvfU1 | ConvOvfU1Un => self.convert(TypeSig::U8),
            ConvU2 | ConvOvfU2 | ConvOvfU2Un => self.convert(TypeSig::U16),
            ConvU4 | ConvOvfU4 | ConvOvfU4Un => self.convert(TypeSig::U32),
            ConvU8 | ConvOvfU8 | ConvOvfU8Un => self.convert(TypeSig::U64),
            ConvR4 => self.convert(TypeSig::F32),
            ConvR8 | ConvRUn => self.convert(TypeSig::F64),

            Dup => self.duplicate(),
            Pop => self.discard(),
            Ret => self.go(Label::FINISH),

            Ldlen => {
                let array = pop!(self, "ldlen");
                self.push(Expr::unary(UnaryOp::ArrayLength, array, TypeSig::I32))
            }
            Ldelem | LdelemI1 | LdelemU1 | LdelemI2 | LdelemU2 | LdelemI4 | LdelemU4
            | LdelemI8 | LdelemR4 | LdelemR8 | LdelemRef => {
                self.binary("ldelem", |array, index| Ok(Expr::array_index(array, index)))
            }
            Stelem | StelemI1 | StelemI2 | StelemI4 | StelemI8 | StelemR4 | StelemR8
            | StelemRef => self.store_element(),

            other => Err(self.unsupported(other)),
        }
    }

    fn visit_ldc(&mut self, value: ConstValue, ty: TypeSig) -> Result<()> {
        if self.current.is_none() {
            return Ok(());
        }

        self.push(Expr::constant(value, ty))
    }

    fn visit_var(&mut self, opcode: OpCode, index: u16) -> Result<()> {
        if self.current.is_none() {
            return Ok(());
        }

        match opcode {
            OpCode::Ldarg | OpCode::Ldarga => {
                let value = self.argument(index)?;
                self.push(value)
            }
            OpCode::Ldloca => {
                let current = self.current()?;
                let slot = Self::slot(&mut self.arena, current, index, self.offset)?;
                let value = match slot.get(&mut self.emit) {
                    Some(value) => value,
                    None => {
                        let default = Expr::default_value(slot.ty());
                        slot.assign(&default, &mut self.emit)?;
                        default
                    }
                };
                self.arena.push(current, value, &mut self.emit);
                Ok(())
            }
            OpCode::Ldloc => {
                let current = self.current()?;
                let offset = self.offset;
                let slot = Self::slot(&mut self.arena, current, index, offset)?;
                let value = slot.get(&mut self.emit).ok_or_else(|| {
                    structural_error!("Local {} read before assignment at offset 0x{:04x}", index, offset)
                })?;
                self.push(value)
            }
            OpCode::Stloc => {
                let value = pop!(self, "stloc");
                let current = self.current()?;
                let slot = Self::slot(&mut self.arena, current, index, self.offset)?;
                slot.assign(&value, &mut self.emit)
            }
            other => Err(self.unsupported(other)),
        }
    }

    fn visit_jump(&mut self, opcode: OpCode, target: Label) -> Result<()> {
        if self.current.is_none() {
            return Ok(());
        }

        match opcode {
            OpCode::Br => self.go(target),
            OpCode::Brfalse => self.branch_if_false(target),
            OpCode::Brtrue => self.branch_if_true(target),
            // The fall-through side is the current one, so each test is the complement
            OpCode::Beq => self.compare_and_branch(BinaryOp::NotEqual, target),
            OpCode::Bge | OpCode::BgeUn => self.compare_and_branch(BinaryOp::LessThan, target),
            OpCode::Bgt | OpCode::BgtUn => {
                self.compare_and_branch(BinaryOp::LessThanOrEqual, target)
            }
            OpCode::Ble | OpCode::BleUn => self.compare_and_branch(BinaryOp::GreaterThan, target),
            OpCode::Blt | OpCode::BltUn => {
                self.compare_and_branch(BinaryOp::GreaterThanOrEqual, target)
            }
            OpCode::BneUn => self.compare_and_branch(BinaryOp::Equal, target),
            other => Err(self.unsupported(other)),
        }
    }

    fn visit_field(&mut self, opcode: OpCode, field: FieldRc) -> Result<()> {
        if self.current.is_none() {
            return Ok(());
        }

        match opcode {
            OpCode::Ldfld | OpCode::Ldflda => {
                let instance = pop!(self, "ldfld");
                self.push(Expr::field(Some(instance), field))
            }
            OpCode::Ldsfld | OpCode::Ldsflda => {
                if field.is_synthetic() {
                    self.push(Expr::default_value(&field.field_type))
                } else {
                    self.push(Expr::field(None, field))
                }
            }
            OpCode::Stsfld if field.is_synthetic() => {
                pop!(self, "stsfld");
                Ok(())
            }
            OpCode::Stfld if field.is_synthetic() => {
                let value = pop!(self, "stfld");
                let target = pop!(self, "stfld");
                if matches!(target.kind, ExprKind::Field { .. }) {
                    return Ok(());
                }
                if !matches!(
                    target.kind,
                    ExprKind::Parameter { .. } | ExprKind::Constant(_) | ExprKind::Variable { .. }
                ) {
                    return Err(self.unsupported(opcode));
                }

                let value = coerce(&value, &field.field_type)?;
                let store = Expr::assign(Expr::field(Some(target), field), value);
                self.statement(store);
                Ok(())
            }
            other => Err(self.unsupported(other)),
        }
    }

    fn visit_method(&mut self, opcode: OpCode, method: MethodRc) -> Result<()> {
        if self.current.is_none() {
            return Ok(());
        }

        let value = match opcode {
            OpCode::Ldftn => Expr::constant(ConstValue::Method(method), TypeSig::MethodHandle),
            OpCode::Ldvirtftn => {
                pop!(self, "ldvirtftn");
                Expr::constant(ConstValue::Method(method), TypeSig::MethodHandle)
            }
            OpCode::Newobj => {
                let arguments = self.create_arguments(&method)?;
                self.construct(method, arguments)?
            }
            OpCode::Call | OpCode::Callvirt => {
                let arguments = self.create_arguments(&method)?;
                let instance = if method.is_static() {
                    None
                } else {
                    Some(pop!(self, "call instance"))
                };
                self.call(method, instance, arguments)?
            }
            other => return Err(self.unsupported(other)),
        };

        if value.is_void() {
            self.statement(value);
            Ok(())
        } else {
            self.push(value)
        }
    }

    fn visit_type(&mut self, opcode: OpCode, ty: TypeSig) -> Result<()> {
        if self.current.is_none() {
            return Ok(());
        }

        let value = match opcode {
            OpCode::Box => {
                let value = pop!(self, "box");
                if value.ty.is_value_type() {
                    Expr::convert(value, TypeSig::Object)
                } else {
                    value
                }
            }
            OpCode::Castclass | OpCode::Unbox | OpCode::Constrained => {
                let value = pop!(self, "cast");
                builder::convert(value, ty)?
            }
            OpCode::UnboxAny => {
                let value = pop!(self, "unbox.any");
                Expr::convert(coerce(&value, &TypeSig::Object)?, ty)
            }
            OpCode::Isinst => {
                let value = pop!(self, "isinst");
                Expr::type_is(value, ty)
            }
            OpCode::Initobj => {
                pop!(self, "initobj");
                return Ok(());
            }
            OpCode::Newarr => {
                let length = pop!(self, "newarr");
                let Some(ConstValue::I32(length)) = length.as_constant() else {
                    return Err(structural_error!(
                        "newarr at offset 0x{:04x} with non constant length {}",
                        self.offset,
                        length
                    ));
                };
                let length = usize::try_from(*length).map_err(|_| {
                    structural_error!("newarr with negative length at offset 0x{:04x}", self.offset)
                })?;
                let elements = vec![Expr::default_value(&ty); length];
                Expr::array_new(ty, elements)
            }
            other => return Err(self.unsupported(other)),
        };

        self.push(value)
    }

    fn visit_end(&mut self) -> Result<()> {
        self.visit_label(Label::FINISH)?;

        for (label, stacks) in &self.waiters {
            if stacks.iter().any(|stack| !self.arena.stack(*stack).is_reduced()) {
                return Err(structural_error!("Paths jumping to {} never join", label));
            }
        }

        let current = self
            .current
            .ok_or_else(|| structural_error!("No path reaches the end of {}", self.method))?;
        let remaining = self.arena.stack(current).items().to_vec();

        assemble(
            &mut self.emit,
            remaining,
            &self.return_type,
            self.decompiler.options().inline_trailing_variable,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DecompileOptions,
        disassembler::Operand,
        metadata::{
            descriptor::{FieldDescriptor, FieldFlags, MethodBody},
            resolver::{DelegateTarget, MapResolver},
            token::Token,
        },
        test::*,
    };
    use crate::test::assemble;

    const TYPE_TOKEN: Token = Token(0x0100_0001);

    fn token(value: u32) -> Operand {
        Operand::Token(Token::new(value))
    }

    fn next() -> MethodDescriptor {
        MethodDescriptor::new(Token::new(0x0A00_0001), "Next", TypeSig::I32)
            .with_flags(MethodFlags::STATIC)
    }

    fn increment() -> (MethodDescriptor, MethodBody) {
        let method = MethodDescriptor::new(Token::new(0x0600_0002), "<Test>b__0", TypeSig::I32)
            .with_param("y", TypeSig::I32)
            .with_flags(MethodFlags::STATIC | MethodFlags::COMPILER_GENERATED);
        let code = assemble(|e| {
            e.emit(OpCode::Ldarg0)?;
            e.emit(OpCode::LdcI41)?;
            e.emit(OpCode::Add)?;
            e.emit(OpCode::Ret)
        });
        (method, body(code, Vec::new()))
    }

    fn invoke_method() -> MethodDescriptor {
        MethodDescriptor::new(Token::new(0x0A00_0003), "Invoke", TypeSig::I32)
            .with_param("arg", TypeSig::I32)
            .with_declaring_type(delegate(0x10))
    }

    #[test]
    fn arithmetic_keeps_operand_order() {
        let code = assemble(|e| {
            e.emit(OpCode::Ldarg0)?;
            e.emit(OpCode::Ldarg1)?;
            e.emit(OpCode::Sub)?;
            e.emit(OpCode::Ret)
        });
        let method = static_method(TypeSig::I32, &[("a", TypeSig::I32), ("b", TypeSig::I32)]);
        let ast = decompile(&MapResolver::new(), &method, &body(code, Vec::new())).unwrap();
        assert_eq!(ast.body().to_string(), "(a - b)");
    }

    #[test]
    fn shift_mask_is_dropped() {
        let code = assemble(|e| {
            e.emit(OpCode::Ldarg0)?;
            e.emit(OpCode::Ldarg1)?;
            e.emit_instruction(OpCode::LdcI4S, Operand::Int(31))?;
            e.emit(OpCode::And)?;
            e.emit(OpCode::Shl)?;
            e.emit(OpCode::Ret)
        });
        let method = static_method(TypeSig::I32, &[("a", TypeSig::I32), ("b", TypeSig::I32)]);
        let ast = decompile(&MapResolver::new(), &method, &body(code, Vec::new())).unwrap();
        assert_eq!(ast.body().to_string(), "(a << b)");
    }

    #[test]
    fn starg_is_unsupported() {
        let code = assemble(|e| {
            e.emit(OpCode::Ldarg0)?;
            e.emit_instruction(OpCode::StargS, Operand::Var(0))?;
            e.emit(OpCode::Ldarg0)?;
            e.emit(OpCode::Ret)
        });
        let method = static_method(TypeSig::I32, &[("a", TypeSig::I32)]);
        let result = decompile(&MapResolver::new(), &method, &body(code, Vec::new()));
        assert!(matches!(
            result,
            Err(Error::UnsupportedInstruction { mnemonic: "starg", offset: 1 })
        ));
    }

    #[test]
    fn reading_an_unassigned_local_fails() {
        let code = assemble(|e| {
            e.emit(OpCode::Ldloc0)?;
            e.emit(OpCode::Ret)
        });
        let method = static_method(TypeSig::I32, &[]);
        let result = decompile(&MapResolver::new(), &method, &body(code, vec![TypeSig::I32]));
        assert!(matches!(result, Err(Error::Structural { .. })));
    }

    #[test]
    fn stack_underflow_is_structural() {
        let code = assemble(|e| {
            e.emit(OpCode::Add)?;
            e.emit(OpCode::Ret)
        });
        let method = static_method(TypeSig::I32, &[]);
        let result = decompile(&MapResolver::new(), &method, &body(code, Vec::new()));
        assert!(matches!(result, Err(Error::Structural { .. })));
    }

    #[test]
    fn dead_code_after_ret_is_skipped() {
        let code = assemble(|e| {
            e.emit(OpCode::Ldarg0)?;
            e.emit(OpCode::Ret)?;
            e.emit(OpCode::Ldarg0)?;
            e.emit(OpCode::Ldarg0)?;
            e.emit(OpCode::Add)?;
            e.emit(OpCode::Ret)
        });
        let method = static_method(TypeSig::I32, &[("a", TypeSig::I32)]);
        let ast = decompile(&MapResolver::new(), &method, &body(code, Vec::new())).unwrap();
        assert_eq!(ast.body().to_string(), "a");
    }

    #[test]
    fn separate_returns_join_at_the_end() {
        let code = assemble(|e| {
            e.emit(OpCode::Ldarg0)?;
            e.emit_branch(OpCode::BrtrueS, "one")?;
            e.emit(OpCode::LdcI42)?;
            e.emit(OpCode::Ret)?;
            e.define_label("one")?;
            e.emit(OpCode::LdcI41)?;
            e.emit(OpCode::Ret)
        });
        let method = static_method(TypeSig::I32, &[("a", TypeSig::I32)]);
        let ast = decompile(&MapResolver::new(), &method, &body(code, Vec::new())).unwrap();
        assert_eq!(ast.body().to_string(), "((a == 0) ? 2 : 1)");
    }

    #[test]
    fn compiler_generated_static_loads_are_defaults() {
        let cache = FieldDescriptor::new(Token::new(0x0400_0001), "<>9__0", TypeSig::String)
            .with_flags(FieldFlags::STATIC | FieldFlags::COMPILER_GENERATED);
        let resolver = MapResolver::new().with_field(cache);
        let code = assemble(|e| {
            e.emit_instruction(OpCode::Ldsfld, token(0x0400_0001))?;
            e.emit(OpCode::Ret)
        });
        let method = static_method(TypeSig::String, &[]);
        let ast = decompile(&resolver, &method, &body(code, Vec::new())).unwrap();
        assert_eq!(ast.body().to_string(), "null");
    }

    #[test]
    fn compiler_generated_instance_store_is_a_statement() {
        let field = FieldDescriptor::new(Token::new(0x0400_0002), "value", TypeSig::I32)
            .with_flags(FieldFlags::COMPILER_GENERATED);
        let resolver = MapResolver::new().with_field(field);
        let code = assemble(|e| {
            e.emit(OpCode::Ldarg0)?;
            e.emit(OpCode::LdcI45)?;
            e.emit_instruction(OpCode::Stfld, token(0x0400_0002))?;
            e.emit(OpCode::Ret)
        });
        let method = static_method(TypeSig::Void, &[("c", class(2))]);
        let ast = decompile(&resolver, &method, &body(code, Vec::new())).unwrap();

        let statements: Vec<String> = ast.statements.iter().map(ToString::to_string).collect();
        assert_eq!(statements, vec!["c.value = 5"]);
    }

    #[test]
    fn user_field_store_is_unsupported() {
        let field = FieldDescriptor::new(Token::new(0x0400_0002), "value", TypeSig::I32);
        let resolver = MapResolver::new().with_field(field);
        let code = assemble(|e| {
            e.emit(OpCode::Ldarg0)?;
            e.emit(OpCode::LdcI45)?;
            e.emit_instruction(OpCode::Stfld, token(0x0400_0002))?;
            e.emit(OpCode::Ret)
        });
        let method = static_method(TypeSig::Void, &[("c", class(2))]);
        let result = decompile(&resolver, &method, &body(code, Vec::new()));
        assert!(matches!(
            result,
            Err(Error::UnsupportedInstruction { mnemonic: "stfld", offset: 2 })
        ));
    }

    #[test]
    fn array_initializer() {
        let resolver = MapResolver::new().with_type(TYPE_TOKEN, TypeSig::I32);
        let code = assemble(|e| {
            e.emit(OpCode::LdcI42)?;
            e.emit_instruction(OpCode::Newarr, Operand::Token(TYPE_TOKEN))?;
            e.emit(OpCode::Dup)?;
            e.emit(OpCode::LdcI40)?;
            e.emit(OpCode::Ldarg0)?;
            e.emit(OpCode::StelemI4)?;
            e.emit(OpCode::Dup)?;
            e.emit(OpCode::LdcI41)?;
            e.emit(OpCode::LdcI42)?;
            e.emit(OpCode::StelemI4)?;
            e.emit(OpCode::Ret)
        });
        let method = static_method(TypeSig::Array(Box::new(TypeSig::I32)), &[("a", TypeSig::I32)]);
        let ast = decompile(&resolver, &method, &body(code, Vec::new())).unwrap();
        assert_eq!(ast.body().to_string(), "new int32[] { a, 2 }");
    }

    #[test]
    fn element_store_without_constant_index_fails() {
        let resolver = MapResolver::new().with_type(TYPE_TOKEN, TypeSig::I32);
        let code = assemble(|e| {
            e.emit(OpCode::LdcI41)?;
            e.emit_instruction(OpCode::Newarr, Operand::Token(TYPE_TOKEN))?;
            e.emit(OpCode::Dup)?;
            e.emit(OpCode::Ldarg0)?;
            e.emit(OpCode::Ldarg0)?;
            e.emit(OpCode::StelemI4)?;
            e.emit(OpCode::Ret)
        });
        let method = static_method(TypeSig::Array(Box::new(TypeSig::I32)), &[("a", TypeSig::I32)]);
        let result = decompile(&resolver, &method, &body(code, Vec::new()));
        assert!(matches!(result, Err(Error::Structural { .. })));
    }

    #[test]
    fn dup_of_a_call_is_materialized() {
        let resolver = MapResolver::new().with_method(next());
        let code = assemble(|e| {
            e.emit_instruction(OpCode::Call, token(0x0A00_0001))?;
            e.emit(OpCode::Dup)?;
            e.emit(OpCode::Add)?;
            e.emit(OpCode::Ret)
        });
        let method = static_method(TypeSig::I32, &[]);
        let ast = decompile(&resolver, &method, &body(code, Vec::new())).unwrap();

        let statements: Vec<String> = ast.statements.iter().map(ToString::to_string).collect();
        assert_eq!(statements, vec!["V_0 = Next()", "(V_0 + V_0)"]);
        assert_eq!(ast.variables.len(), 1);
    }

    #[test]
    fn dup_of_a_pure_call_is_shared() {
        let resolver = MapResolver::new().with_method(next());
        let code = assemble(|e| {
            e.emit_instruction(OpCode::Call, token(0x0A00_0001))?;
            e.emit(OpCode::Dup)?;
            e.emit(OpCode::Add)?;
            e.emit(OpCode::Ret)
        });
        let options = DecompileOptions {
            pure_call: Some(std::sync::Arc::new(|m: &MethodDescriptor| m.name == "Next")),
            ..DecompileOptions::default()
        };
        let method = static_method(TypeSig::I32, &[]);
        let ast = decompile_with(&resolver, options, &method, &body(code, Vec::new())).unwrap();
        assert_eq!(ast.body().to_string(), "(Next() + Next())");
        assert!(ast.variables.is_empty());
    }

    #[test]
    fn discarded_call_stays_a_statement() {
        let resolver = MapResolver::new().with_method(next());
        let code = assemble(|e| {
            e.emit_instruction(OpCode::Call, token(0x0A00_0001))?;
            e.emit(OpCode::Pop)?;
            e.emit(OpCode::LdcI41)?;
            e.emit(OpCode::Ret)
        });
        let method = static_method(TypeSig::I32, &[]);
        let ast = decompile(&resolver, &method, &body(code, Vec::new())).unwrap();

        let statements: Vec<String> = ast.statements.iter().map(ToString::to_string).collect();
        assert_eq!(statements, vec!["Next()", "1"]);
    }

    #[test]
    fn reference_test_is_folded() {
        let resolver = MapResolver::new().with_string(Token::new(0x7000_0001), "none");
        let code = assemble(|e| {
            e.emit(OpCode::Ldarg0)?;
            e.emit(OpCode::Dup)?;
            e.emit_branch(OpCode::BrtrueS, "done")?;
            e.emit(OpCode::Pop)?;
            e.emit_instruction(OpCode::Ldstr, token(0x7000_0001))?;
            e.define_label("done")?;
            e.emit(OpCode::Ret)
        });
        let method = static_method(TypeSig::String, &[("s", TypeSig::String)]);
        let code = body(code, Vec::new());

        let folding = DecompileOptions {
            fold_reference_tests: true,
            ..DecompileOptions::default()
        };
        let ast = decompile_with(&resolver, folding, &method, &code).unwrap();
        assert_eq!(ast.body().to_string(), "s");

        // Without folding the fall-through side pops a value it never had
        let kept = decompile(&resolver, &method, &code);
        assert!(matches!(kept, Err(Error::Structural { .. })));
    }

    #[test]
    fn boxing_and_type_tests() {
        let resolver = MapResolver::new().with_type(TYPE_TOKEN, TypeSig::I32);
        let code = assemble(|e| {
            e.emit(OpCode::Ldarg0)?;
            e.emit_instruction(OpCode::Box, Operand::Token(TYPE_TOKEN))?;
            e.emit(OpCode::Ret)
        });
        let method = static_method(TypeSig::Object, &[("a", TypeSig::I32)]);
        let ast = decompile(&resolver, &method, &body(code, Vec::new())).unwrap();
        assert_eq!(ast.body().to_string(), "((object)a)");

        let resolver = MapResolver::new().with_type(TYPE_TOKEN, TypeSig::String);
        let code = assemble(|e| {
            e.emit(OpCode::Ldarg0)?;
            e.emit_instruction(OpCode::Isinst, Operand::Token(TYPE_TOKEN))?;
            e.emit(OpCode::Ldnull)?;
            e.emit(OpCode::CgtUn)?;
            e.emit(OpCode::Ret)
        });
        let method = static_method(TypeSig::Bool, &[("o", TypeSig::Object)]);
        let ast = decompile(&resolver, &method, &body(code, Vec::new())).unwrap();
        assert_eq!(ast.body().to_string(), "(o is string)");
    }

    #[test]
    fn address_of_unassigned_local_is_the_default() {
        let point = TypeSig::ValueType(crate::metadata::types::TypeRef(Token::new(0x0200_0003)));
        let resolver = MapResolver::new().with_type(TYPE_TOKEN, point.clone());
        let code = assemble(|e| {
            e.emit_instruction(OpCode::LdlocaS, Operand::Var(0))?;
            e.emit_instruction(OpCode::Initobj, Operand::Token(TYPE_TOKEN))?;
            e.emit(OpCode::Ldloc0)?;
            e.emit(OpCode::Ret)
        });
        let method = static_method(point.clone(), &[]);
        let ast = decompile(&resolver, &method, &body(code, vec![point])).unwrap();
        assert!(matches!(
            ast.body().kind,
            ExprKind::Constant(ConstValue::Default)
        ));
    }

    #[test]
    fn delegate_construction_becomes_a_lambda() {
        let (target, target_body) = increment();
        let ctor = MethodDescriptor::new(Token::new(0x0A00_0002), ".ctor", TypeSig::Void)
            .with_param("object", TypeSig::Object)
            .with_param("method", TypeSig::NativeInt)
            .with_declaring_type(delegate(0x10))
            .with_flags(MethodFlags::CONSTRUCTOR);
        let resolver = MapResolver::new()
            .with_body(target.token, target_body)
            .with_method(target)
            .with_method(ctor)
            .with_method(invoke_method());
        let code = assemble(|e| {
            e.emit(OpCode::Ldnull)?;
            e.emit_instruction(OpCode::Ldftn, token(0x0600_0002))?;
            e.emit_instruction(OpCode::Newobj, token(0x0A00_0002))?;
            e.emit(OpCode::Ldarg0)?;
            e.emit_instruction(OpCode::Callvirt, token(0x0A00_0003))?;
            e.emit(OpCode::Ret)
        });
        let method = static_method(TypeSig::I32, &[("x", TypeSig::I32)]);
        let code = body(code, Vec::new());

        let ast = decompile(&resolver, &method, &code).unwrap();
        assert_eq!(ast.body().to_string(), "((y) => (y + 1))(x)");
        assert!(!ast.not_cacheable);

        let strict = decompile_with(&resolver, DecompileOptions::strict(), &method, &code).unwrap();
        assert!(matches!(strict.body().kind, ExprKind::Call { .. }));
    }

    #[test]
    fn captured_delegate_is_evaluated() {
        let (target, target_body) = increment();
        let field = FieldDescriptor::new(Token::new(0x0400_0003), "selector", delegate(0x10))
            .with_flags(FieldFlags::STATIC);
        let resolver = MapResolver::new()
            .with_body(target.token, target_body)
            .with_delegate_target(
                field.token,
                DelegateTarget {
                    target: None,
                    method: std::sync::Arc::new(target),
                },
            )
            .with_field(field)
            .with_method(invoke_method());
        let code = assemble(|e| {
            e.emit_instruction(OpCode::Ldsfld, token(0x0400_0003))?;
            e.emit(OpCode::Ldarg0)?;
            e.emit_instruction(OpCode::Callvirt, token(0x0A00_0003))?;
            e.emit(OpCode::Ret)
        });
        let method = static_method(TypeSig::I32, &[("x", TypeSig::I32)]);
        let ast = decompile(&resolver, &method, &body(code, Vec::new())).unwrap();

        assert_eq!(ast.body().to_string(), "((y) => (y + 1))(x)");
        assert!(ast.not_cacheable);
    }

    #[test]
    fn empty_params_array_argument() {
        let object_array = TypeSig::Array(Box::new(TypeSig::Object));
        let empty = MethodDescriptor::new(Token::new(0x2B00_0001), "Empty", object_array)
            .with_flags(MethodFlags::STATIC | MethodFlags::ARRAY_EMPTY);
        let format = MethodDescriptor::new(Token::new(0x0A00_0004), "Format", TypeSig::String)
            .with_param("format", TypeSig::String)
            .with_param_array("args", TypeSig::Object)
            .with_flags(MethodFlags::STATIC);
        let resolver = MapResolver::new()
            .with_string(Token::new(0x7000_0001), "{0}")
            .with_method(empty)
            .with_method(format);
        let code = assemble(|e| {
            e.emit_instruction(OpCode::Ldstr, token(0x7000_0001))?;
            e.emit_instruction(OpCode::Call, token(0x2B00_0001))?;
            e.emit_instruction(OpCode::Call, token(0x0A00_0004))?;
            e.emit(OpCode::Ret)
        });
        let method = static_method(TypeSig::String, &[]);
        let ast = decompile(&resolver, &method, &body(code, Vec::new())).unwrap();

        let result = ast.body();
        let ExprKind::Call { args, .. } = &result.kind else {
            panic!("expected a call, got {result}");
        };
        assert!(matches!(&args[1].kind, ExprKind::ArrayNew { elements } if elements.is_empty()));
        assert_eq!(args[1].ty, TypeSig::Array(Box::new(TypeSig::Object)));
    }
}
