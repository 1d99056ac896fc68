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

//! Single pass instruction decoder.
//!
//! The decoder walks a method body front to back exactly once. Each instruction is decoded,
//! its operand token (if any) is resolved through the host [`Resolver`], and the result is
//! handed to a [`MethodVisitor`] grouped by opcode family. Branch targets are collected on the
//! way; since only forward branches are accepted, every target is known before the decoder
//! arrives at it, and [`MethodVisitor::visit_label`] fires right before the first instruction
//! at a target offset.
//!
//! # Call order
//!
//! ```text
//! visit_code
//! visit_max_stack
//! ( visit_label? visit_offset visit_<family> )*
//! visit_end
//! ```
//!
//! # Example: Decoding a Single Instruction
//!
//! ```rust
//! use cilexpr::disassembler::{decode_instruction, OpCode, Operand, Parser};
//! use cilexpr::label::Label;
//!
//! let code = [0x2C, 0x02, 0x17, 0x2A, 0x16, 0x2A]; // brfalse.s +2
//! let mut parser = Parser::new(&code);
//! let branch = decode_instruction(&mut parser)?;
//! assert_eq!(branch.opcode, OpCode::BrfalseS);
//! assert_eq!(branch.operand, Operand::Target(Label::new(4)));
//! # Ok::<(), cilexpr::Error>(())
//! ```

use std::collections::HashSet;

use log::trace;

use crate::{
    disassembler::{
        instruction::{Instruction, OpCode, OpFamily, Operand, OperandType, PREFIX_BYTE},
        parser::Parser,
    },
    expr::ConstValue,
    label::Label,
    metadata::{
        descriptor::{FieldRc, MethodBody, MethodRc},
        resolver::Resolver,
        token::Token,
        types::{GenericContext, TypeSig},
    },
    Error, Result,
};

/// Receives decoded instructions grouped by opcode family.
///
/// Variable and branch opcodes arrive in their long form (`ldloc.s 3` and `ldloc.3` are both
/// delivered as `visit_var(Ldloc, 3)`, `brfalse.s` as `Brfalse`). Every callback may fail,
/// which aborts decoding.
pub trait MethodVisitor {
    /// Start of the method body.
    ///
    /// # Errors
    /// Implementation defined.
    fn visit_code(&mut self) -> Result<()>;

    /// Declared maximum stack depth and the instantiated local slot types.
    ///
    /// # Errors
    /// Implementation defined.
    fn visit_max_stack(&mut self, max_stack: u16, locals: &[TypeSig]) -> Result<()>;

    /// Offset of the instruction about to be visited.
    ///
    /// # Errors
    /// Implementation defined.
    fn visit_offset(&mut self, _offset: usize) -> Result<()> {
        Ok(())
    }

    /// A branch target was reached.
    ///
    /// # Errors
    /// Implementation defined.
    fn visit_label(&mut self, label: Label) -> Result<()>;

    /// An instruction without operand: arithmetic, comparisons, conversions, stack and
    /// array element access, `ret`.
    ///
    /// # Errors
    /// Implementation defined.
    fn visit_insn(&mut self, opcode: OpCode) -> Result<()>;

    /// A literal load with its type.
    ///
    /// # Errors
    /// Implementation defined.
    fn visit_ldc(&mut self, value: ConstValue, ty: TypeSig) -> Result<()>;

    /// An argument or local access with its slot index.
    ///
    /// # Errors
    /// Implementation defined.
    fn visit_var(&mut self, opcode: OpCode, index: u16) -> Result<()>;

    /// A conditional or unconditional forward branch.
    ///
    /// # Errors
    /// Implementation defined.
    fn visit_jump(&mut self, opcode: OpCode, target: Label) -> Result<()>;

    /// A field access.
    ///
    /// # Errors
    /// Implementation defined.
    fn visit_field(&mut self, opcode: OpCode, field: FieldRc) -> Result<()>;

    /// A call, object construction or method handle load.
    ///
    /// # Errors
    /// Implementation defined.
    fn visit_method(&mut self, opcode: OpCode, method: MethodRc) -> Result<()>;

    /// A type operation: casts, boxing, `newarr`, `initobj`, `constrained.`.
    ///
    /// # Errors
    /// Implementation defined.
    fn visit_type(&mut self, opcode: OpCode, ty: TypeSig) -> Result<()>;

    /// End of the instruction stream.
    ///
    /// # Errors
    /// Implementation defined.
    fn visit_end(&mut self) -> Result<()>;
}

/// Returns `true` for opcodes whose operand is turned into a [`Label`].
///
/// `leave` leaves a protected region the decompiler never enters, so its offset stays raw
/// and the opcode is reported as unsupported whatever its direction.
fn is_branch(opcode: OpCode) -> bool {
    opcode.family() == OpFamily::Jump
}

/// Turns a relative branch offset into an absolute target label.
fn branch_target(parser: &Parser, offset: usize, relative: i32) -> Result<Label> {
    let next = parser.pos() as i64;
    let target = next + i64::from(relative);
    if target <= offset as i64 {
        return Err(Error::BackwardBranch {
            offset,
            target: usize::try_from(target).unwrap_or(0),
        });
    }

    let target = usize::try_from(target).map_err(|_| Error::OutOfBounds)?;
    if target > parser.len() {
        return Err(Error::OutOfBounds);
    }

    Ok(Label::new(target))
}

/// Decodes the instruction at the current position of `parser`.
///
/// Branch operands are converted to absolute [`Label`]s. A branch to its own offset or an
/// earlier one is rejected here, so no consumer ever has to deal with loops. The `leave`
/// offset is kept as [`Operand::Int`].
///
/// # Errors
/// - [`Error::UnsupportedInstruction`] for a byte sequence that is no opcode
/// - [`Error::BackwardBranch`] for a branch that does not jump forward
/// - [`Error::OutOfBounds`] for a truncated instruction or a target past the end
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let offset = parser.pos();
    let first_byte = parser.read_le::<u8>()?;

    let opcode = if first_byte == PREFIX_BYTE {
        let second_byte = parser.read_le::<u8>()?;
        OpCode::from_bytes(true, second_byte)
    } else {
        OpCode::from_bytes(false, first_byte)
    };
    let Some(opcode) = opcode else {
        return Err(Error::UnsupportedInstruction {
            mnemonic: "unknown",
            offset,
        });
    };

    let operand = match opcode.operand_type() {
        OperandType::None => Operand::None,
        OperandType::Int8 => {
            let value = i32::from(parser.read_le::<i8>()?);
            if is_branch(opcode) {
                Operand::Target(branch_target(parser, offset, value)?)
            } else {
                Operand::Int(value)
            }
        }
        OperandType::UInt8 => {
            let value = parser.read_le::<u8>()?;
            match opcode {
                OpCode::Unaligned | OpCode::No => Operand::Byte(value),
                _ => Operand::Var(u16::from(value)),
            }
        }
        OperandType::UInt16 => Operand::Var(parser.read_le::<u16>()?),
        OperandType::Int32 => {
            let value = parser.read_le::<i32>()?;
            if is_branch(opcode) {
                Operand::Target(branch_target(parser, offset, value)?)
            } else {
                Operand::Int(value)
            }
        }
        OperandType::Int64 => Operand::Long(parser.read_le::<i64>()?),
        OperandType::Float32 => Operand::Single(parser.read_le::<f32>()?),
        OperandType::Float64 => Operand::Double(parser.read_le::<f64>()?),
        OperandType::Token => Operand::Token(Token::new(parser.read_le::<u32>()?)),
        OperandType::Switch => {
            let case_count = parser.read_le::<u32>()?;

            let mut targets = Vec::new();
            for _ in 0..case_count {
                targets.push(parser.read_le::<i32>()?);
            }

            Operand::Switch(targets)
        }
    };

    Ok(Instruction {
        offset,
        size: parser.pos() - offset,
        opcode,
        operand,
    })
}

/// Decodes the whole instruction stream into a list, without resolving any token.
///
/// # Errors
/// Propagates the first error of [`decode_instruction`].
pub fn decode_stream(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut parser = Parser::new(code);
    let mut instructions = Vec::new();
    while parser.has_more_data() {
        instructions.push(decode_instruction(&mut parser)?);
    }

    Ok(instructions)
}

/// Drives a [`MethodVisitor`] over a method body.
///
/// # Examples
///
/// ```rust,no_run
/// use cilexpr::disassembler::{Decoder, MethodVisitor};
/// use cilexpr::metadata::{descriptor::MethodBody, resolver::MapResolver, types::GenericContext};
///
/// fn run<V: MethodVisitor>(visitor: &mut V) -> cilexpr::Result<()> {
///     let resolver = MapResolver::new();
///     let context = GenericContext::default();
///     let body = MethodBody::new(vec![0x17, 0x2A], 1, Vec::new());
///     Decoder::new(&resolver, &context).decode(&body, visitor)
/// }
/// ```
pub struct Decoder<'a, R: Resolver + ?Sized> {
    resolver: &'a R,
    context: &'a GenericContext,
}

impl<'a, R: Resolver + ?Sized> Decoder<'a, R> {
    /// Creates a decoder resolving tokens in `context`
    pub fn new(resolver: &'a R, context: &'a GenericContext) -> Self {
        Decoder { resolver, context }
    }

    /// Decodes `body` and feeds every instruction to `visitor`.
    ///
    /// # Errors
    /// Returns the first decode, resolution or visitor error. Unsupported opcodes are
    /// reported at their first occurrence.
    pub fn decode<V: MethodVisitor + ?Sized>(&self, body: &MethodBody, visitor: &mut V) -> Result<()> {
        visitor.visit_code()?;

        let locals: Vec<TypeSig> = body
            .locals
            .iter()
            .map(|local| local.instantiate(self.context))
            .collect();
        visitor.visit_max_stack(body.max_stack, &locals)?;

        let mut parser = Parser::new(&body.code);
        let mut labels = HashSet::new();
        while parser.has_more_data() {
            let instruction = decode_instruction(&mut parser)?;
            trace!("{instruction}");

            if labels.remove(&instruction.offset) {
                visitor.visit_label(Label::new(instruction.offset))?;
            }
            visitor.visit_offset(instruction.offset)?;
            self.dispatch(instruction, &mut labels, visitor)?;
        }

        if labels.remove(&body.code.len()) {
            visitor.visit_label(Label::new(body.code.len()))?;
        }

        visitor.visit_end()
    }

    fn dispatch<V: MethodVisitor + ?Sized>(
        &self,
        instruction: Instruction,
        labels: &mut HashSet<usize>,
        visitor: &mut V,
    ) -> Result<()> {
        let Instruction {
            offset,
            opcode,
            operand,
            ..
        } = instruction;

        match opcode.family() {
            OpFamily::Prefix => Ok(()),
            OpFamily::Unsupported => Err(Error::UnsupportedInstruction {
                mnemonic: opcode.mnemonic(),
                offset,
            }),
            OpFamily::Insn | OpFamily::TypedElement => visitor.visit_insn(opcode),
            OpFamily::Ldc => {
                let (value, ty) = self.literal(opcode, operand)?;
                visitor.visit_ldc(value, ty)
            }
            OpFamily::Var => {
                let (opcode, index) = match (opcode.implied_var(), operand) {
                    (Some(implied), _) => implied,
                    (None, Operand::Var(index)) => (opcode.long_form(), index),
                    (None, other) => {
                        return Err(structural_error!("{} with operand {}", opcode, other))
                    }
                };
                visitor.visit_var(opcode, index)
            }
            OpFamily::Jump => match operand {
                Operand::Target(target) => {
                    if let Some(target_offset) = target.offset() {
                        labels.insert(target_offset);
                    }
                    visitor.visit_jump(opcode.long_form(), target)
                }
                other => Err(structural_error!("{} with operand {}", opcode, other)),
            },
            OpFamily::Field => {
                let token = Self::token(opcode, &operand)?;
                let field = self.resolver.resolve(token, self.context)?.into_field(token)?;
                visitor.visit_field(opcode, field)
            }
            OpFamily::Method => {
                let token = Self::token(opcode, &operand)?;
                let method = self.resolver.resolve(token, self.context)?.into_method(token)?;
                visitor.visit_method(opcode, method)
            }
            OpFamily::Type => {
                let token = Self::token(opcode, &operand)?;
                let ty = self.resolver.resolve(token, self.context)?.into_type(token)?;
                visitor.visit_type(opcode, ty.instantiate(self.context))
            }
        }
    }

    fn token(opcode: OpCode, operand: &Operand) -> Result<Token> {
        match operand {
            Operand::Token(token) => Ok(*token),
            other => Err(structural_error!("{} with operand {}", opcode, other)),
        }
    }

    /// Maps a literal load to its value and type.
    fn literal(&self, opcode: OpCode, operand: Operand) -> Result<(ConstValue, TypeSig)> {
        if let Some(value) = opcode.implied_i32() {
            return Ok((ConstValue::I32(value), TypeSig::I32));
        }

        match (opcode, operand) {
            (OpCode::Ldnull, _) => Ok((ConstValue::Null, TypeSig::Object)),
            (OpCode::Ldstr, Operand::Token(token)) => {
                let value = self
                    .resolver
                    .resolve(token, self.context)?
                    .into_string(token)?;
                Ok((ConstValue::String(value), TypeSig::String))
            }
            (_, Operand::Int(value)) => Ok((ConstValue::I32(value), TypeSig::I32)),
            (_, Operand::Long(value)) => Ok((ConstValue::I64(value), TypeSig::I64)),
            (_, Operand::Single(value)) => Ok((ConstValue::F32(value), TypeSig::F32)),
            (_, Operand::Double(value)) => Ok((ConstValue::F64(value), TypeSig::F64)),
            (opcode, other) => Err(structural_error!("{} with operand {}", opcode, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        descriptor::{FieldDescriptor, MethodDescriptor},
        resolver::MapResolver,
    };

    /// Records every callback as a line of text.
    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl MethodVisitor for Recorder {
        fn visit_code(&mut self) -> Result<()> {
            self.events.push("code".into());
            Ok(())
        }

        fn visit_max_stack(&mut self, max_stack: u16, locals: &[TypeSig]) -> Result<()> {
            self.events
                .push(format!("max_stack {max_stack} locals {}", locals.len()));
            Ok(())
        }

        fn visit_label(&mut self, label: Label) -> Result<()> {
            self.events.push(format!("label {label}"));
            Ok(())
        }

        fn visit_insn(&mut self, opcode: OpCode) -> Result<()> {
            self.events.push(opcode.to_string());
            Ok(())
        }

        fn visit_ldc(&mut self, value: ConstValue, ty: TypeSig) -> Result<()> {
            self.events.push(format!("ldc {value} {ty}"));
            Ok(())
        }

        fn visit_var(&mut self, opcode: OpCode, index: u16) -> Result<()> {
            self.events.push(format!("{opcode} {index}"));
            Ok(())
        }

        fn visit_jump(&mut self, opcode: OpCode, target: Label) -> Result<()> {
            self.events.push(format!("{opcode} {target}"));
            Ok(())
        }

        fn visit_field(&mut self, opcode: OpCode, field: FieldRc) -> Result<()> {
            self.events.push(format!("{opcode} {}", field.name));
            Ok(())
        }

        fn visit_method(&mut self, opcode: OpCode, method: MethodRc) -> Result<()> {
            self.events.push(format!("{opcode} {}", method.name));
            Ok(())
        }

        fn visit_type(&mut self, opcode: OpCode, ty: TypeSig) -> Result<()> {
            self.events.push(format!("{opcode} {ty}"));
            Ok(())
        }

        fn visit_end(&mut self) -> Result<()> {
            self.events.push("end".into());
            Ok(())
        }
    }

    fn record(resolver: &MapResolver, code: Vec<u8>) -> Result<Vec<String>> {
        let context = GenericContext::default();
        let body = MethodBody::new(code, 2, vec![TypeSig::I32]);
        let mut recorder = Recorder::default();
        Decoder::new(resolver, &context).decode(&body, &mut recorder)?;
        Ok(recorder.events)
    }

    #[test]
    fn decode_instruction_basic() {
        let mut parser = Parser::new(&[0x58]);
        let instruction = decode_instruction(&mut parser).unwrap();
        assert_eq!(instruction.opcode, OpCode::Add);
        assert_eq!(instruction.operand, Operand::None);
        assert_eq!(instruction.size, 1);
    }

    #[test]
    fn decode_instruction_two_byte() {
        let mut parser = Parser::new(&[0xFE, 0x01]);
        let instruction = decode_instruction(&mut parser).unwrap();
        assert_eq!(instruction.opcode, OpCode::Ceq);
        assert_eq!(instruction.size, 2);
    }

    #[test]
    fn decode_instruction_operands() {
        let code = [
            0x20, 0x78, 0x56, 0x34, 0x12, // ldc.i4 0x12345678
            0x13, 0x05, // stloc.s 5
            0xFE, 0x0C, 0x00, 0x01, // ldloc 256
            0x7B, 0x01, 0x00, 0x00, 0x04, // ldfld 0x04000001
        ];
        let instructions = decode_stream(&code).unwrap();
        assert_eq!(instructions.len(), 4);
        assert_eq!(instructions[0].operand, Operand::Int(0x1234_5678));
        assert_eq!(instructions[1].operand, Operand::Var(5));
        assert_eq!(instructions[2].opcode, OpCode::Ldloc);
        assert_eq!(instructions[2].operand, Operand::Var(256));
        assert_eq!(
            instructions[3].operand,
            Operand::Token(Token::new(0x0400_0001))
        );
        assert_eq!(instructions[3].offset, 11);
    }

    #[test]
    fn decode_instruction_branch() {
        let code = [0x38, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2A]; // br +1; nop; ret
        let mut parser = Parser::new(&code);
        let instruction = decode_instruction(&mut parser).unwrap();
        assert_eq!(instruction.operand, Operand::Target(Label::new(6)));
    }

    #[test]
    fn decode_backward_branch() {
        let code = [0x00, 0x2B, 0xFD]; // nop; br.s -3
        let mut parser = Parser::new(&code);
        decode_instruction(&mut parser).unwrap();
        match decode_instruction(&mut parser) {
            Err(Error::BackwardBranch { offset, target }) => {
                assert_eq!(offset, 1);
                assert_eq!(target, 0);
            }
            other => panic!("expected a backward branch, got {other:?}"),
        }

        let mut parser = Parser::new(&[0x2B, 0xFE]); // br.s to itself
        assert!(matches!(
            decode_instruction(&mut parser),
            Err(Error::BackwardBranch { .. })
        ));
    }

    #[test]
    fn decode_backward_leave_keeps_raw_offset() {
        let code = [0x00, 0xDE, 0xFD]; // nop; leave.s -3
        let instructions = decode_stream(&code).unwrap();
        assert_eq!(instructions[1].opcode, OpCode::LeaveS);
        assert_eq!(instructions[1].operand, Operand::Int(-3));
    }

    #[test]
    fn decode_branch_past_end() {
        let mut parser = Parser::new(&[0x2B, 0x10, 0x2A]);
        assert!(matches!(
            decode_instruction(&mut parser),
            Err(Error::OutOfBounds)
        ));
    }

    #[test]
    fn decode_instruction_switch() {
        let code = [0x45, 0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];
        let mut parser = Parser::new(&code);
        let instruction = decode_instruction(&mut parser).unwrap();
        assert_eq!(instruction.operand, Operand::Switch(vec![1, 2]));
        assert_eq!(instruction.size, 13);
    }

    #[test]
    fn decode_invalid_opcode() {
        let mut parser = Parser::new(&[0xFE, 0x08]);
        assert!(matches!(
            decode_instruction(&mut parser),
            Err(Error::UnsupportedInstruction {
                mnemonic: "unknown",
                offset: 0
            })
        ));
    }

    #[test]
    fn decode_truncated() {
        let mut parser = Parser::new(&[0x20, 0x01, 0x02]);
        assert!(matches!(
            decode_instruction(&mut parser),
            Err(Error::OutOfBounds)
        ));
    }

    #[test]
    fn visitor_call_order() {
        let resolver = MapResolver::new();
        // ldarg.1; brtrue.s +3; ldc.i4.s 7; nop; ret; ldloc.0; ret
        let code = vec![0x03, 0x2D, 0x04, 0x1F, 0x07, 0x00, 0x2A, 0x06, 0x2A];
        let events = record(&resolver, code).unwrap();
        assert_eq!(
            events,
            vec![
                "code",
                "max_stack 2 locals 1",
                "ldarg 1",
                "brtrue IL_0007",
                "ldc 7 int32",
                "ret",
                "label IL_0007",
                "ldloc 0",
                "ret",
                "end",
            ]
        );
    }

    #[test]
    fn visitor_resolves_tokens() {
        let field_token = Token::new(0x0400_0001);
        let method_token = Token::new(0x0600_0002);
        let string_token = Token::new(0x7000_0003);
        let type_token = Token::new(0x0100_0004);
        let resolver = MapResolver::new()
            .with_field(FieldDescriptor::new(field_token, "count", TypeSig::I32))
            .with_method(MethodDescriptor::new(method_token, "Next", TypeSig::I32))
            .with_string(string_token, "hi")
            .with_type(type_token, TypeSig::String);

        let code = vec![
            0x7E, 0x01, 0x00, 0x00, 0x04, // ldsfld count
            0x28, 0x02, 0x00, 0x00, 0x06, // call Next
            0x72, 0x03, 0x00, 0x00, 0x70, // ldstr "hi"
            0x74, 0x04, 0x00, 0x00, 0x01, // castclass string
            0x2A,
        ];
        let events = record(&resolver, code).unwrap();
        assert_eq!(
            &events[2..7],
            &[
                "ldsfld count",
                "call Next",
                "ldc \"hi\" string",
                "castclass string",
                "ret"
            ]
        );
    }

    #[test]
    fn unsupported_instruction_is_reported() {
        let resolver = MapResolver::new();
        let code = vec![0x00, 0x14, 0x7A]; // nop; ldnull; throw
        match record(&resolver, code) {
            Err(Error::UnsupportedInstruction { mnemonic, offset }) => {
                assert_eq!(mnemonic, "throw");
                assert_eq!(offset, 2);
            }
            other => panic!("expected unsupported instruction, got {other:?}"),
        }
    }

    #[test]
    fn leave_is_unsupported_in_both_directions() {
        let resolver = MapResolver::new();
        for code in [vec![0x00, 0xDE, 0xFD], vec![0x00, 0xDE, 0x00, 0x2A]] {
            match record(&resolver, code) {
                Err(Error::UnsupportedInstruction { mnemonic, offset }) => {
                    assert_eq!(mnemonic, "leave.s");
                    assert_eq!(offset, 1);
                }
                other => panic!("expected unsupported instruction, got {other:?}"),
            }
        }
    }

    #[test]
    fn unknown_token_is_a_resolution_error() {
        let resolver = MapResolver::new();
        let code = vec![0x28, 0x01, 0x00, 0x00, 0x06, 0x2A];
        assert!(matches!(
            record(&resolver, code),
            Err(Error::Resolution(_))
        ));
    }

    #[test]
    fn typed_element_token_is_skipped() {
        let resolver = MapResolver::new();
        // ldelem <token>; ret
        let code = vec![0xA3, 0x01, 0x00, 0x00, 0x01, 0x2A];
        let events = record(&resolver, code).unwrap();
        assert_eq!(&events[2..4], &["ldelem", "ret"]);
    }
}
