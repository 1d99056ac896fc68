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

//! CIL instruction decoding and encoding.
//!
//! This module turns raw method bodies into a stream of visitor callbacks:
//!
//! - [`parser`] - bounds checked little-endian reads
//! - [`instruction`] - the [`OpCode`] table and decoded [`Instruction`]s
//! - [`decoder`] - [`decode_instruction`] and the [`Decoder`] driving a [`MethodVisitor`]
//! - [`encoder`] - the [`InstructionEncoder`] assembling bodies from opcodes and labels
//!
//! # Example
//! ```rust
//! use cilexpr::disassembler::decode_stream;
//!
//! let instructions = decode_stream(&[0x00, 0x16, 0x2A])?; // nop, ldc.i4.0, ret
//! assert_eq!(instructions.len(), 3);
//! assert_eq!(instructions[2].mnemonic(), "ret");
//! # Ok::<(), cilexpr::Error>(())
//! ```

pub mod decoder;
pub mod encoder;
pub mod instruction;
pub mod parser;

pub use decoder::{decode_instruction, decode_stream, Decoder, MethodVisitor};
pub use encoder::InstructionEncoder;
pub use instruction::{Instruction, OpCode, OpFamily, Operand, OperandType, PREFIX_BYTE};
pub use parser::Parser;
