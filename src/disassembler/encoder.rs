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

//! Label aware CIL assembler.
//!
//! The [`InstructionEncoder`] is the inverse of the decoder: it turns opcodes and operands
//! back into bytes. Branches name their target by label, and the relative offsets are
//! patched in [`InstructionEncoder::finalize`] once every label position is known. It is
//! used to build method bodies for hosts without a compiler at hand, and throughout the
//! test suite.

use std::collections::HashMap;

use crate::{
    disassembler::instruction::{OpCode, Operand, OperandType},
    Error, Result,
};

/// A branch whose offset is written once its label is defined.
#[derive(Debug, Clone)]
struct LabelFixup {
    /// The target label name
    label: String,
    /// Position of the offset field
    fixup_position: usize,
    /// Width of the offset field, 1 or 4
    offset_size: usize,
    /// Branch mnemonic, for error reporting
    mnemonic: &'static str,
}

/// Assembles CIL instructions into a byte buffer.
///
/// # Examples
///
/// ```rust
/// use cilexpr::disassembler::{InstructionEncoder, OpCode, Operand};
///
/// // return flag ? 1 : 2;
/// let mut encoder = InstructionEncoder::new();
/// encoder.emit(OpCode::Ldarg0)?;
/// encoder.emit_branch(OpCode::BrfalseS, "else")?;
/// encoder.emit(OpCode::LdcI41)?;
/// encoder.emit(OpCode::Ret)?;
/// encoder.define_label("else")?;
/// encoder.emit_instruction(OpCode::LdcI4S, Operand::Int(2))?;
/// encoder.emit(OpCode::Ret)?;
///
/// let bytecode = encoder.finalize()?;
/// assert_eq!(bytecode, vec![0x02, 0x2C, 0x02, 0x17, 0x2A, 0x1F, 0x02, 0x2A]);
/// # Ok::<(), cilexpr::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct InstructionEncoder {
    /// Generated bytecode buffer
    bytecode: Vec<u8>,
    /// Defined label positions
    labels: HashMap<String, usize>,
    /// Branches awaiting their label
    fixups: Vec<LabelFixup>,
}

impl InstructionEncoder {
    /// Creates an empty encoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits an instruction without operand.
    ///
    /// # Errors
    /// Returns [`Error::InvalidOperand`] if `opcode` requires an operand.
    pub fn emit(&mut self, opcode: OpCode) -> Result<()> {
        self.emit_instruction(opcode, Operand::None)
    }

    /// Emits an instruction with an explicit operand.
    ///
    /// Branch opcodes accept a raw relative offset as [`Operand::Int`]; use
    /// [`InstructionEncoder::emit_branch`] to jump to a label instead.
    ///
    /// # Errors
    /// Returns [`Error::InvalidOperand`] if the operand kind or range does not fit the
    /// opcode's encoding.
    pub fn emit_instruction(&mut self, opcode: OpCode, operand: Operand) -> Result<()> {
        let invalid = |message: &str| Error::InvalidOperand {
            mnemonic: opcode.mnemonic(),
            message: message.to_string(),
        };

        let mut encoded = opcode.encoding();
        match (opcode.operand_type(), operand) {
            (OperandType::None, Operand::None) => {}
            (OperandType::Int8, Operand::Int(value)) => {
                let value = i8::try_from(value).map_err(|_| invalid("value exceeds int8"))?;
                encoded.extend_from_slice(&value.to_le_bytes());
            }
            (OperandType::UInt8, Operand::Var(index)) => {
                let index = u8::try_from(index).map_err(|_| invalid("index exceeds uint8"))?;
                encoded.push(index);
            }
            (OperandType::UInt8, Operand::Byte(value)) => encoded.push(value),
            (OperandType::UInt16, Operand::Var(index)) => {
                encoded.extend_from_slice(&index.to_le_bytes());
            }
            (OperandType::Int32, Operand::Int(value)) => {
                encoded.extend_from_slice(&value.to_le_bytes());
            }
            (OperandType::Int64, Operand::Long(value)) => {
                encoded.extend_from_slice(&value.to_le_bytes());
            }
            (OperandType::Float32, Operand::Single(value)) => {
                encoded.extend_from_slice(&value.to_le_bytes());
            }
            (OperandType::Float64, Operand::Double(value)) => {
                encoded.extend_from_slice(&value.to_le_bytes());
            }
            (OperandType::Token, Operand::Token(token)) => {
                encoded.extend_from_slice(&token.value().to_le_bytes());
            }
            (OperandType::Switch, Operand::Switch(targets)) => {
                let count =
                    u32::try_from(targets.len()).map_err(|_| invalid("too many switch targets"))?;
                encoded.extend_from_slice(&count.to_le_bytes());
                for target in targets {
                    encoded.extend_from_slice(&target.to_le_bytes());
                }
            }
            (expected, operand) => {
                return Err(invalid(&format!(
                    "expected a {expected:?} operand, got {operand:?}"
                )))
            }
        }

        self.bytecode.extend_from_slice(&encoded);
        Ok(())
    }

    /// Emits a branch to `label`, which may be defined before or after this point.
    ///
    /// # Errors
    /// Returns [`Error::InvalidOperand`] if `opcode` is not a branch.
    pub fn emit_branch(&mut self, opcode: OpCode, label: &str) -> Result<()> {
        let offset_size = match opcode.operand_type() {
            OperandType::Int8 if opcode != OpCode::LdcI4S => 1,
            OperandType::Int32 if opcode != OpCode::LdcI4 => 4,
            _ => {
                return Err(Error::InvalidOperand {
                    mnemonic: opcode.mnemonic(),
                    message: "not a branch instruction".to_string(),
                })
            }
        };

        self.bytecode.extend_from_slice(&opcode.encoding());
        self.fixups.push(LabelFixup {
            label: label.to_string(),
            fixup_position: self.bytecode.len(),
            offset_size,
            mnemonic: opcode.mnemonic(),
        });
        self.bytecode.resize(self.bytecode.len() + offset_size, 0);
        Ok(())
    }

    /// Defines `name` at the current position.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateLabel`] if the label was already defined.
    pub fn define_label(&mut self, name: &str) -> Result<()> {
        if self.labels.contains_key(name) {
            return Err(Error::DuplicateLabel(name.to_string()));
        }

        self.labels.insert(name.to_string(), self.bytecode.len());
        Ok(())
    }

    /// Returns the current bytecode position
    #[must_use]
    pub fn current_position(&self) -> usize {
        self.bytecode.len()
    }

    /// Resolves all branch offsets and returns the bytecode.
    ///
    /// # Errors
    /// - [`Error::UndefinedLabel`] if a branch targets an unknown label
    /// - [`Error::InvalidOperand`] if a short branch cannot reach its label
    pub fn finalize(mut self) -> Result<Vec<u8>> {
        for fixup in &self.fixups {
            let label_position = self
                .labels
                .get(&fixup.label)
                .ok_or_else(|| Error::UndefinedLabel(fixup.label.clone()))?;

            // Relative to the end of the branch instruction
            let next_instruction = fixup.fixup_position + fixup.offset_size;
            let offset = *label_position as i64 - next_instruction as i64;

            let position = fixup.fixup_position;
            if fixup.offset_size == 1 {
                let short = i8::try_from(offset).map_err(|_| Error::InvalidOperand {
                    mnemonic: fixup.mnemonic,
                    message: format!("label '{}' is {offset} bytes away", fixup.label),
                })?;
                self.bytecode[position] = short.to_le_bytes()[0];
            } else {
                let long = i32::try_from(offset).map_err(|_| Error::InvalidOperand {
                    mnemonic: fixup.mnemonic,
                    message: format!("label '{}' is {offset} bytes away", fixup.label),
                })?;
                self.bytecode[position..position + 4].copy_from_slice(&long.to_le_bytes());
            }
        }

        Ok(self.bytecode)
    }
}
