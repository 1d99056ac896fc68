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

use thiserror::Error;

use crate::{label::Label, metadata::types::TypeSig};

macro_rules! structural_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Structural {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Structural {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every failure aborts the whole decompilation call. No partial expression tree is ever
/// returned, so callers can treat any error as "this method body is not expressible as a
/// declarative expression" and fall back to another strategy.
///
/// # Error Categories
///
/// ## Decoding Errors
/// - [`Error::UnsupportedInstruction`] - Opcode outside the supported subset
/// - [`Error::BackwardBranch`] - A jump to an earlier offset (loop shape)
/// - [`Error::OutOfBounds`] - Truncated instruction stream
///
/// ## Reconstruction Errors
/// - [`Error::Structural`] - Evaluation stack did not match an instruction's precondition
/// - [`Error::ReductionExhaustion`] - Waiting stacks at a join could not be merged
/// - [`Error::InvalidCoercion`] - A value could not be converted to a required type
/// - [`Error::DelegateTarget`] - A captured delegate evaluated to nothing usable
///
/// ## Collaborator Errors
/// - [`Error::Resolution`] - Failure reported by the metadata resolver
///
/// ## Encoding Errors
/// - [`Error::UndefinedLabel`] / [`Error::DuplicateLabel`] - Label misuse while assembling
/// - [`Error::InvalidOperand`] - An operand that does not fit its opcode
///
/// # Examples
///
/// ```rust
/// use cilexpr::Error;
///
/// fn describe(error: &Error) -> &'static str {
///     match error {
///         Error::UnsupportedInstruction { .. } => "unsupported opcode",
///         Error::Structural { .. } => "unexpected stack shape",
///         Error::Resolution(_) => "resolver failure",
///         Error::ReductionExhaustion { .. } => "irreducible control flow",
///         _ => "other",
///     }
/// }
///
/// assert_eq!(describe(&Error::Resolution("missing".into())), "resolver failure");
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// An opcode outside the supported subset was encountered.
    ///
    /// Unstructured jumps, exception handling, unsafe memory access and switch tables
    /// cannot be expressed declaratively and are rejected at the first occurrence. `leave`
    /// is reported here whatever its direction.
    ///
    /// # Fields
    ///
    /// * `mnemonic` - The textual opcode name, e.g. `"switch"`
    /// * `offset` - Byte offset of the instruction within the method body
    #[error("Unsupported instruction '{mnemonic}' at offset 0x{offset:04x}")]
    UnsupportedInstruction {
        /// Opcode mnemonic
        mnemonic: &'static str,
        /// Instruction offset
        offset: usize,
    },

    /// A branch targets an earlier offset.
    ///
    /// Backward jumps only arise from loops, which have no counterpart in a single
    /// declarative expression. Only `br` and the conditional jumps report it.
    #[error("Backward branch from 0x{offset:04x} to 0x{target:04x} (loops are not supported)")]
    BackwardBranch {
        /// Offset of the branch instruction
        offset: usize,
        /// Offset the branch jumps to
        target: usize,
    },

    /// The evaluation stack did not satisfy an instruction's precondition.
    ///
    /// Examples are a stack underflow, an array element store that is not preceded by its
    /// `newarr` and a constant index, or a local read before any assignment. The error
    /// includes the source location where the check failed.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of the violated precondition
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Structural - {file}:{line}: {message}")]
    Structural {
        /// The message to be printed for the structural error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The metadata resolver failed to resolve a token.
    ///
    /// The message is produced by the resolver and propagated verbatim.
    #[error("Resolution failed - {0}")]
    Resolution(String),

    /// Two or more stacks wait at a join point and none of the merge shapes applies.
    ///
    /// This is an internal invariant failure signalling an irreducible control-flow shape.
    #[error("Could not merge the control flow paths joining at {label}")]
    ReductionExhaustion {
        /// The join point at which reduction failed
        label: Label,
    },

    /// An out of bound access was attempted while reading the instruction stream.
    ///
    /// Raised when an opcode or operand extends past the end of the method body.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// A value could not be converted to the type required by its context.
    ///
    /// Raised for literal conversions that cannot be represented, e.g. the integer `2`
    /// used where a boolean is expected.
    #[error("Cannot convert a value of type {from} to {to}")]
    InvalidCoercion {
        /// Type of the value
        from: TypeSig,
        /// Required type
        to: TypeSig,
    },

    /// Evaluating a captured delegate did not produce an invocable target.
    #[error("Invalid delegate target - {0}")]
    DelegateTarget(String),

    /// A branch refers to a label that was never defined.
    ///
    /// Raised by [`crate::disassembler::InstructionEncoder::finalize`].
    #[error("Undefined label - {0}")]
    UndefinedLabel(String),

    /// A label was defined twice.
    #[error("Duplicate label - {0}")]
    DuplicateLabel(String),

    /// An operand does not fit the encoding of its opcode.
    ///
    /// Examples are a token passed to `add`, or a short branch whose target lies more than
    /// 127 bytes away.
    #[error("Invalid operand for '{mnemonic}' - {message}")]
    InvalidOperand {
        /// Opcode mnemonic
        mnemonic: &'static str,
        /// What is wrong with the operand
        message: String,
    },
}
