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

//! CIL opcodes and decoded instructions (ECMA-335 Partition III).
//!
//! [`OpCode`] enumerates the complete instruction set. Its discriminant is the encoding:
//! single byte opcodes use their byte value, two byte opcodes are stored as `0xFE00 | byte`.
//! Each opcode knows its [`OperandType`] and the [`OpFamily`] the decoder dispatches it to.
//! Opcodes the decompiler cannot express decode normally but belong to
//! [`OpFamily::Unsupported`], so the failure names the offending instruction.

use std::fmt;

use strum::{Display, EnumIter, FromRepr, IntoStaticStr};

use crate::{label::Label, metadata::token::Token};

/// First byte of every two byte opcode
pub const PREFIX_BYTE: u8 = 0xFE;

/// A CIL opcode.
#[allow(missing_docs)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, IntoStaticStr, EnumIter, FromRepr,
)]
#[repr(u16)]
pub enum OpCode {
    // Misc
    #[strum(serialize = "nop")]
    Nop = 0x00,
    #[strum(serialize = "break")]
    Break = 0x01,

    // Arguments and locals, short forms
    #[strum(serialize = "ldarg.0")]
    Ldarg0 = 0x02,
    #[strum(serialize = "ldarg.1")]
    Ldarg1 = 0x03,
    #[strum(serialize = "ldarg.2")]
    Ldarg2 = 0x04,
    #[strum(serialize = "ldarg.3")]
    Ldarg3 = 0x05,
    #[strum(serialize = "ldloc.0")]
    Ldloc0 = 0x06,
    #[strum(serialize = "ldloc.1")]
    Ldloc1 = 0x07,
    #[strum(serialize = "ldloc.2")]
    Ldloc2 = 0x08,
    #[strum(serialize = "ldloc.3")]
    Ldloc3 = 0x09,
    #[strum(serialize = "stloc.0")]
    Stloc0 = 0x0A,
    #[strum(serialize = "stloc.1")]
    Stloc1 = 0x0B,
    #[strum(serialize = "stloc.2")]
    Stloc2 = 0x0C,
    #[strum(serialize = "stloc.3")]
    Stloc3 = 0x0D,
    #[strum(serialize = "ldarg.s")]
    LdargS = 0x0E,
    #[strum(serialize = "ldarga.s")]
    LdargaS = 0x0F,
    #[strum(serialize = "starg.s")]
    StargS = 0x10,
    #[strum(serialize = "ldloc.s")]
    LdlocS = 0x11,
    #[strum(serialize = "ldloca.s")]
    LdlocaS = 0x12,
    #[strum(serialize = "stloc.s")]
    StlocS = 0x13,

    // Constants
    #[strum(serialize = "ldnull")]
    Ldnull = 0x14,
    #[strum(serialize = "ldc.i4.m1")]
    LdcI4M1 = 0x15,
    #[strum(serialize = "ldc.i4.0")]
    LdcI40 = 0x16,
    #[strum(serialize = "ldc.i4.1")]
    LdcI41 = 0x17,
    #[strum(serialize = "ldc.i4.2")]
    LdcI42 = 0x18,
    #[strum(serialize = "ldc.i4.3")]
    LdcI43 = 0x19,
    #[strum(serialize = "ldc.i4.4")]
    LdcI44 = 0x1A,
    #[strum(serialize = "ldc.i4.5")]
    LdcI45 = 0x1B,
    #[strum(serialize = "ldc.i4.6")]
    LdcI46 = 0x1C,
    #[strum(serialize = "ldc.i4.7")]
    LdcI47 = 0x1D,
    #[strum(serialize = "ldc.i4.8")]
    LdcI48 = 0x1E,
    #[strum(serialize = "ldc.i4.s")]
    LdcI4S = 0x1F,
    #[strum(serialize = "ldc.i4")]
    LdcI4 = 0x20,
    #[strum(serialize = "ldc.i8")]
    LdcI8 = 0x21,
    #[strum(serialize = "ldc.r4")]
    LdcR4 = 0x22,
    #[strum(serialize = "ldc.r8")]
    LdcR8 = 0x23,

    // Stack and calls
    #[strum(serialize = "dup")]
    Dup = 0x25,
    #[strum(serialize = "pop")]
    Pop = 0x26,
    #[strum(serialize = "jmp")]
    Jmp = 0x27,
    #[strum(serialize = "call")]
    Call = 0x28,
    #[strum(serialize = "calli")]
    Calli = 0x29,
    #[strum(serialize = "ret")]
    Ret = 0x2A,

    // Branches, short forms
    #[strum(serialize = "br.s")]
    BrS = 0x2B,
    #[strum(serialize = "brfalse.s")]
    BrfalseS = 0x2C,
    #[strum(serialize = "brtrue.s")]
    BrtrueS = 0x2D,
    #[strum(serialize = "beq.s")]
    BeqS = 0x2E,
    #[strum(serialize = "bge.s")]
    BgeS = 0x2F,
    #[strum(serialize = "bgt.s")]
    BgtS = 0x30,
    #[strum(serialize = "ble.s")]
    BleS = 0x31,
    #[strum(serialize = "blt.s")]
    BltS = 0x32,
    #[strum(serialize = "bne.un.s")]
    BneUnS = 0x33,
    #[strum(serialize = "bge.un.s")]
    BgeUnS = 0x34,
    #[strum(serialize = "bgt.un.s")]
    BgtUnS = 0x35,
    #[strum(serialize = "ble.un.s")]
    BleUnS = 0x36,
    #[strum(serialize = "blt.un.s")]
    BltUnS = 0x37,

    // Branches, long forms
    #[strum(serialize = "br")]
    Br = 0x38,
    #[strum(serialize = "brfalse")]
    Brfalse = 0x39,
    #[strum(serialize = "brtrue")]
    Brtrue = 0x3A,
    #[strum(serialize = "beq")]
    Beq = 0x3B,
    #[strum(serialize = "bge")]
    Bge = 0x3C,
    #[strum(serialize = "bgt")]
    Bgt = 0x3D,
    #[strum(serialize = "ble")]
    Ble = 0x3E,
    #[strum(serialize = "blt")]
    Blt = 0x3F,
    #[strum(serialize = "bne.un")]
    BneUn = 0x40,
    #[strum(serialize = "bge.un")]
    BgeUn = 0x41,
    #[strum(serialize = "bgt.un")]
    BgtUn = 0x42,
    #[strum(serialize = "ble.un")]
    BleUn = 0x43,
    #[strum(serialize = "blt.un")]
    BltUn = 0x44,
    #[strum(serialize = "switch")]
    Switch = 0x45,

    // Indirect loads and stores
    #[strum(serialize = "ldind.i1")]
    LdindI1 = 0x46,
    #[strum(serialize = "ldind.u1")]
    LdindU1 = 0x47,
    #[strum(serialize = "ldind.i2")]
    LdindI2 = 0x48,
    #[strum(serialize = "ldind.u2")]
    LdindU2 = 0x49,
    #[strum(serialize = "ldind.i4")]
    LdindI4 = 0x4A,
    #[strum(serialize = "ldind.u4")]
    LdindU4 = 0x4B,
    #[strum(serialize = "ldind.i8")]
    LdindI8 = 0x4C,
    #[strum(serialize = "ldind.i")]
    LdindI = 0x4D,
    #[strum(serialize = "ldind.r4")]
    LdindR4 = 0x4E,
    #[strum(serialize = "ldind.r8")]
    LdindR8 = 0x4F,
    #[strum(serialize = "ldind.ref")]
    LdindRef = 0x50,
    #[strum(serialize = "stind.ref")]
    StindRef = 0x51,
    #[strum(serialize = "stind.i1")]
    StindI1 = 0x52,
    #[strum(serialize = "stind.i2")]
    StindI2 = 0x53,
    #[strum(serialize = "stind.i4")]
    StindI4 = 0x54,
    #[strum(serialize = "stind.i8")]
    StindI8 = 0x55,
    #[strum(serialize = "stind.r4")]
    StindR4 = 0x56,
    #[strum(serialize = "stind.r8")]
    StindR8 = 0x57,

    // Arithmetic and bitwise
    #[strum(serialize = "add")]
    Add = 0x58,
    #[strum(serialize = "sub")]
    Sub = 0x59,
    #[strum(serialize = "mul")]
    Mul = 0x5A,
    #[strum(serialize = "div")]
    Div = 0x5B,
    #[strum(serialize = "div.un")]
    DivUn = 0x5C,
    #[strum(serialize = "rem")]
    Rem = 0x5D,
    #[strum(serialize = "rem.un")]
    RemUn = 0x5E,
    #[strum(serialize = "and")]
    And = 0x5F,
    #[strum(serialize = "or")]
    Or = 0x60,
    #[strum(serialize = "xor")]
    Xor = 0x61,
    #[strum(serialize = "shl")]
    Shl = 0x62,
    #[strum(serialize = "shr")]
    Shr = 0x63,
    #[strum(serialize = "shr.un")]
    ShrUn = 0x64,
    #[strum(serialize = "neg")]
    Neg = 0x65,
    #[strum(serialize = "not")]
    Not = 0x66,

    // Conversions
    #[strum(serialize = "conv.i1")]
    ConvI1 = 0x67,
    #[strum(serialize = "conv.i2")]
    ConvI2 = 0x68,
    #[strum(serialize = "conv.i4")]
    ConvI4 = 0x69,
    #[strum(serialize = "conv.i8")]
    ConvI8 = 0x6A,
    #[strum(serialize = "conv.r4")]
    ConvR4 = 0x6B,
    #[strum(serialize = "conv.r8")]
    ConvR8 = 0x6C,
    #[strum(serialize = "conv.u4")]
    ConvU4 = 0x6D,
    #[strum(serialize = "conv.u8")]
    ConvU8 = 0x6E,

    // Objects
    #[strum(serialize = "callvirt")]
    Callvirt = 0x6F,
    #[strum(serialize = "cpobj")]
    Cpobj = 0x70,
    #[strum(serialize = "ldobj")]
    Ldobj = 0x71,
    #[strum(serialize = "ldstr")]
    Ldstr = 0x72,
    #[strum(serialize = "newobj")]
    Newobj = 0x73,
    #[strum(serialize = "castclass")]
    Castclass = 0x74,
    #[strum(serialize = "isinst")]
    Isinst = 0x75,
    #[strum(serialize = "conv.r.un")]
    ConvRUn = 0x76,
    #[strum(serialize = "unbox")]
    Unbox = 0x79,
    #[strum(serialize = "throw")]
    Throw = 0x7A,
    #[strum(serialize = "ldfld")]
    Ldfld = 0x7B,
    #[strum(serialize = "ldflda")]
    Ldflda = 0x7C,
    #[strum(serialize = "stfld")]
    Stfld = 0x7D,
    #[strum(serialize = "ldsfld")]
    Ldsfld = 0x7E,
    #[strum(serialize = "ldsflda")]
    Ldsflda = 0x7F,
    #[strum(serialize = "stsfld")]
    Stsfld = 0x80,
    #[strum(serialize = "stobj")]
    Stobj = 0x81,

    // Checked conversions from unsigned
    #[strum(serialize = "conv.ovf.i1.un")]
    ConvOvfI1Un = 0x82,
    #[strum(serialize = "conv.ovf.i2.un")]
    ConvOvfI2Un = 0x83,
    #[strum(serialize = "conv.ovf.i4.un")]
    ConvOvfI4Un = 0x84,
    #[strum(serialize = "conv.ovf.i8.un")]
    ConvOvfI8Un = 0x85,
    #[strum(serialize = "conv.ovf.u1.un")]
    ConvOvfU1Un = 0x86,
    #[strum(serialize = "conv.ovf.u2.un")]
    ConvOvfU2Un = 0x87,
    #[strum(serialize = "conv.ovf.u4.un")]
    ConvOvfU4Un = 0x88,
    #[strum(serialize = "conv.ovf.u8.un")]
    ConvOvfU8Un = 0x89,
    #[strum(serialize = "conv.ovf.i.un")]
    ConvOvfIUn = 0x8A,
    #[strum(serialize = "conv.ovf.u.un")]
    ConvOvfUUn = 0x8B,

    // Arrays
    #[strum(serialize = "box")]
    Box = 0x8C,
    #[strum(serialize = "newarr")]
    Newarr = 0x8D,
    #[strum(serialize = "ldlen")]
    Ldlen = 0x8E,
    #[strum(serialize = "ldelema")]
    Ldelema = 0x8F,
    #[strum(serialize = "ldelem.i1")]
    LdelemI1 = 0x90,
    #[strum(serialize = "ldelem.u1")]
    LdelemU1 = 0x91,
    #[strum(serialize = "ldelem.i2")]
    LdelemI2 = 0x92,
    #[strum(serialize = "ldelem.u2")]
    LdelemU2 = 0x93,
    #[strum(serialize = "ldelem.i4")]
    LdelemI4 = 0x94,
    #[strum(serialize = "ldelem.u4")]
    LdelemU4 = 0x95,
    #[strum(serialize = "ldelem.i8")]
    LdelemI8 = 0x96,
    #[strum(serialize = "ldelem.i")]
    LdelemI = 0x97,
    #[strum(serialize = "ldelem.r4")]
    LdelemR4 = 0x98,
    #[strum(serialize = "ldelem.r8")]
    LdelemR8 = 0x99,
    #[strum(serialize = "ldelem.ref")]
    LdelemRef = 0x9A,
    #[strum(serialize = "stelem.i")]
    StelemI = 0x9B,
    #[strum(serialize = "stelem.i1")]
    StelemI1 = 0x9C,
    #[strum(serialize = "stelem.i2")]
    StelemI2 = 0x9D,
    #[strum(serialize = "stelem.i4")]
    StelemI4 = 0x9E,
    #[strum(serialize = "stelem.i8")]
    StelemI8 = 0x9F,
    #[strum(serialize = "stelem.r4")]
    StelemR4 = 0xA0,
    #[strum(serialize = "stelem.r8")]
    StelemR8 = 0xA1,
    #[strum(serialize = "stelem.ref")]
    StelemRef = 0xA2,
    #[strum(serialize = "ldelem")]
    Ldelem = 0xA3,
    #[strum(serialize = "stelem")]
    Stelem = 0xA4,
    #[strum(serialize = "unbox.any")]
    UnboxAny = 0xA5,

    // Checked conversions
    #[strum(serialize = "conv.ovf.i1")]
    ConvOvfI1 = 0xB3,
    #[strum(serialize = "conv.ovf.u1")]
    ConvOvfU1 = 0xB4,
    #[strum(serialize = "conv.ovf.i2")]
    ConvOvfI2 = 0xB5,
    #[strum(serialize = "conv.ovf.u2")]
    ConvOvfU2 = 0xB6,
    #[strum(serialize = "conv.ovf.i4")]
    ConvOvfI4 = 0xB7,
    #[strum(serialize = "conv.ovf.u4")]
    ConvOvfU4 = 0xB8,
    #[strum(serialize = "conv.ovf.i8")]
    ConvOvfI8 = 0xB9,
    #[strum(serialize = "conv.ovf.u8")]
    ConvOvfU8 = 0xBA,
    #[strum(serialize = "refanyval")]
    Refanyval = 0xC2,
    #[strum(serialize = "ckfinite")]
    Ckfinite = 0xC3,
    #[strum(serialize = "mkrefany")]
    Mkrefany = 0xC6,
    #[strum(serialize = "ldtoken")]
    Ldtoken = 0xD0,
    #[strum(serialize = "conv.u2")]
    ConvU2 = 0xD1,
    #[strum(serialize = "conv.u1")]
    ConvU1 = 0xD2,
    #[strum(serialize = "conv.i")]
    ConvI = 0xD3,
    #[strum(serialize = "conv.ovf.i")]
    ConvOvfI = 0xD4,
    #[strum(serialize = "conv.ovf.u")]
    ConvOvfU = 0xD5,

    // Checked arithmetic
    #[strum(serialize = "add.ovf")]
    AddOvf = 0xD6,
    #[strum(serialize = "add.ovf.un")]
    AddOvfUn = 0xD7,
    #[strum(serialize = "mul.ovf")]
    MulOvf = 0xD8,
    #[strum(serialize = "mul.ovf.un")]
    MulOvfUn = 0xD9,
    #[strum(serialize = "sub.ovf")]
    SubOvf = 0xDA,
    #[strum(serialize = "sub.ovf.un")]
    SubOvfUn = 0xDB,

    // Exception regions
    #[strum(serialize = "endfinally")]
    Endfinally = 0xDC,
    #[strum(serialize = "leave")]
    Leave = 0xDD,
    #[strum(serialize = "leave.s")]
    LeaveS = 0xDE,
    #[strum(serialize = "stind.i")]
    StindI = 0xDF,
    #[strum(serialize = "conv.u")]
    ConvU = 0xE0,

    // Two byte opcodes
    #[strum(serialize = "arglist")]
    Arglist = 0xFE00,
    #[strum(serialize = "ceq")]
    Ceq = 0xFE01,
    #[strum(serialize = "cgt")]
    Cgt = 0xFE02,
    #[strum(serialize = "cgt.un")]
    CgtUn = 0xFE03,
    #[strum(serialize = "clt")]
    Clt = 0xFE04,
    #[strum(serialize = "clt.un")]
    CltUn = 0xFE05,
    #[strum(serialize = "ldftn")]
    Ldftn = 0xFE06,
    #[strum(serialize = "ldvirtftn")]
    Ldvirtftn = 0xFE07,
    #[strum(serialize = "ldarg")]
    Ldarg = 0xFE09,
    #[strum(serialize = "ldarga")]
    Ldarga = 0xFE0A,
    #[strum(serialize = "starg")]
    Starg = 0xFE0B,
    #[strum(serialize = "ldloc")]
    Ldloc = 0xFE0C,
    #[strum(serialize = "ldloca")]
    Ldloca = 0xFE0D,
    #[strum(serialize = "stloc")]
    Stloc = 0xFE0E,
    #[strum(serialize = "localloc")]
    Localloc = 0xFE0F,
    #[strum(serialize = "endfilter")]
    Endfilter = 0xFE11,
    #[strum(serialize = "unaligned.")]
    Unaligned = 0xFE12,
    #[strum(serialize = "volatile.")]
    Volatile = 0xFE13,
    #[strum(serialize = "tail.")]
    Tail = 0xFE14,
    #[strum(serialize = "initobj")]
    Initobj = 0xFE15,
    #[strum(serialize = "constrained.")]
    Constrained = 0xFE16,
    #[strum(serialize = "cpblk")]
    Cpblk = 0xFE17,
    #[strum(serialize = "initblk")]
    Initblk = 0xFE18,
    #[strum(serialize = "no.")]
    No = 0xFE19,
    #[strum(serialize = "rethrow")]
    Rethrow = 0xFE1A,
    #[strum(serialize = "sizeof")]
    Sizeof = 0xFE1C,
    #[strum(serialize = "refanytype")]
    Refanytype = 0xFE1D,
    #[strum(serialize = "readonly.")]
    Readonly = 0xFE1E,
}

/// Encoding of the operand that follows an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand
    None,
    /// Signed 8-bit integer (`ldc.i4.s`, short branch offsets)
    Int8,
    /// Unsigned 8-bit integer (short variable indexes, `unaligned.`)
    UInt8,
    /// Unsigned 16-bit integer (long variable indexes)
    UInt16,
    /// Signed 32-bit integer (`ldc.i4`, long branch offsets)
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// Metadata token
    Token,
    /// Switch table, a count followed by that many 32-bit offsets
    Switch,
}

/// How the decoder hands an instruction to the visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpFamily {
    /// Consumed without a visitor call
    Prefix,
    /// No operand, dispatched to `visit_insn`
    Insn,
    /// Constant load, dispatched to `visit_ldc`
    Ldc,
    /// Argument or local access, dispatched to `visit_var`
    Var,
    /// Branch, dispatched to `visit_jump`
    Jump,
    /// Field access, dispatched to `visit_field`
    Field,
    /// Method reference, dispatched to `visit_method`
    Method,
    /// Type reference, dispatched to `visit_type`
    Type,
    /// Typed array element access, the token is skipped and `visit_insn` is called
    TypedElement,
    /// Rejected with [`crate::Error::UnsupportedInstruction`]
    Unsupported,
}

impl OpCode {
    /// Looks up an opcode from its encoding, `prefixed` meaning the byte followed `0xFE`.
    #[must_use]
    pub fn from_bytes(prefixed: bool, byte: u8) -> Option<OpCode> {
        if prefixed {
            OpCode::from_repr(0xFE00 | u16::from(byte))
        } else if byte == PREFIX_BYTE {
            None
        } else {
            OpCode::from_repr(u16::from(byte))
        }
    }

    /// Returns the assembler mnemonic
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }

    /// Returns `true` for `0xFE` prefixed opcodes
    #[must_use]
    pub fn is_prefixed(self) -> bool {
        (self as u16) > 0xFF
    }

    /// Returns the encoded bytes of the opcode itself
    #[must_use]
    pub fn encoding(self) -> Vec<u8> {
        let code = self as u16;
        if self.is_prefixed() {
            vec![PREFIX_BYTE, (code & 0xFF) as u8]
        } else {
            vec![code as u8]
        }
    }

    /// Returns the operand encoding.
    #[must_use]
    pub fn operand_type(self) -> OperandType {
        use OpCode::*;
        match self {
            LdargS | LdargaS | StargS | LdlocS | LdlocaS | StlocS | Unaligned | No => {
                OperandType::UInt8
            }
            Ldarg | Ldarga | Starg | Ldloc | Ldloca | Stloc => OperandType::UInt16,
            LdcI4S | BrS | BrfalseS | BrtrueS | BeqS | BgeS | BgtS | BleS | BltS | BneUnS
            | BgeUnS | BgtUnS | BleUnS | BltUnS | LeaveS => OperandType::Int8,
            LdcI4 | Br | Brfalse | Brtrue | Beq | Bge | Bgt | Ble | Blt | BneUn | BgeUn | BgtUn
            | BleUn | BltUn | Leave => OperandType::Int32,
            LdcI8 => OperandType::Int64,
            LdcR4 => OperandType::Float32,
            LdcR8 => OperandType::Float64,
            Switch => OperandType::Switch,
            Jmp | Call | Calli | Callvirt | Cpobj | Ldobj | Ldstr | Newobj | Castclass | Isinst
            | Unbox | Ldfld | Ldflda | Stfld | Ldsfld | Ldsflda | Stsfld | Stobj | Box | Newarr
            | Ldelema | Ldelem | Stelem | UnboxAny | Refanyval | Mkrefany | Ldtoken | Ldftn
            | Ldvirtftn | Initobj | Constrained | Sizeof => OperandType::Token,
            _ => OperandType::None,
        }
    }

    /// Returns the visitor family of this opcode.
    #[must_use]
    pub fn family(self) -> OpFamily {
        use OpCode::*;
        match self {
            Nop | Break | Tail | Volatile | Readonly | Unaligned => OpFamily::Prefix,
            Ldnull | Ldstr | LdcI4M1 | LdcI40 | LdcI41 | LdcI42 | LdcI43 | LdcI44 | LdcI45
            | LdcI46 | LdcI47 | LdcI48 | LdcI4S | LdcI4 | LdcI8 | LdcR4 | LdcR8 => OpFamily::Ldc,
            Ldarg0 | Ldarg1 | Ldarg2 | Ldarg3 | Ldloc0 | Ldloc1 | Ldloc2 | Ldloc3 | Stloc0
            | Stloc1 | Stloc2 | Stloc3 | LdargS | LdargaS | StargS | LdlocS | LdlocaS | StlocS
            | Ldarg | Ldarga | Starg | Ldloc | Ldloca | Stloc => OpFamily::Var,
            BrS | BrfalseS | BrtrueS | BeqS | BgeS | BgtS | BleS | BltS | BneUnS | BgeUnS
            | BgtUnS | BleUnS | BltUnS | Br | Brfalse | Brtrue | Beq | Bge | Bgt | Ble | Blt
            | BneUn | BgeUn | BgtUn | BleUn | BltUn => OpFamily::Jump,
            Ldfld | Ldflda | Stfld | Ldsfld | Ldsflda | Stsfld => OpFamily::Field,
            Call | Callvirt | Newobj | Ldftn | Ldvirtftn => OpFamily::Method,
            Castclass | Isinst | Unbox | UnboxAny | Box | Newarr | Initobj | Constrained => {
                OpFamily::Type
            }
            Ldelem | Stelem => OpFamily::TypedElement,
            Dup | Pop | Ret | Add | Sub | Mul | Div | DivUn | Rem | RemUn | And | Or | Xor
            | Shl | Shr | ShrUn | Neg | Not | ConvI1 | ConvI2 | ConvI4 | ConvI8 | ConvR4
            | ConvR8 | ConvU4 | ConvU8 | ConvRUn | ConvOvfI1Un | ConvOvfI2Un | ConvOvfI4Un
            | ConvOvfI8Un | ConvOvfU1Un | ConvOvfU2Un | ConvOvfU4Un | ConvOvfU8Un | Ldlen
            | LdelemI1 | LdelemU1 | LdelemI2 | LdelemU2 | LdelemI4 | LdelemU4 | LdelemI8
            | LdelemR4 | LdelemR8 | LdelemRef | StelemI1 | StelemI2 | StelemI4 | StelemI8
            | StelemR4 | StelemR8 | StelemRef | ConvOvfI1 | ConvOvfU1 | ConvOvfI2 | ConvOvfU2
            | ConvOvfI4 | ConvOvfU4 | ConvOvfI8 | ConvOvfU8 | ConvU2 | ConvU1 | AddOvf
            | AddOvfUn | MulOvf | MulOvfUn | SubOvf | SubOvfUn | Ceq | Cgt | CgtUn | Clt
            | CltUn => OpFamily::Insn,
            _ => OpFamily::Unsupported,
        }
    }

    /// Maps a short branch to its long form, other opcodes are returned unchanged.
    #[must_use]
    pub fn long_form(self) -> OpCode {
        use OpCode::*;
        match self {
            BrS => Br,
            BrfalseS => Brfalse,
            BrtrueS => Brtrue,
            BeqS => Beq,
            BgeS => Bge,
            BgtS => Bgt,
            BleS => Ble,
            BltS => Blt,
            BneUnS => BneUn,
            BgeUnS => BgeUn,
            BgtUnS => BgtUn,
            BleUnS => BleUn,
            BltUnS => BltUn,
            LeaveS => Leave,
            LdargS => Ldarg,
            LdargaS => Ldarga,
            StargS => Starg,
            LdlocS => Ldloc,
            LdlocaS => Ldloca,
            StlocS => Stloc,
            other => other,
        }
    }

    /// Splits the macro forms with an implied variable index, `ldloc.2` becomes
    /// `(ldloc, 2)`.
    #[must_use]
    pub fn implied_var(self) -> Option<(OpCode, u16)> {
        use OpCode::*;
        Some(match self {
            Ldarg0 => (Ldarg, 0),
            Ldarg1 => (Ldarg, 1),
            Ldarg2 => (Ldarg, 2),
            Ldarg3 => (Ldarg, 3),
            Ldloc0 => (Ldloc, 0),
            Ldloc1 => (Ldloc, 1),
            Ldloc2 => (Ldloc, 2),
            Ldloc3 => (Ldloc, 3),
            Stloc0 => (Stloc, 0),
            Stloc1 => (Stloc, 1),
            Stloc2 => (Stloc, 2),
            Stloc3 => (Stloc, 3),
            _ => return None,
        })
    }

    /// Returns the constant pushed by the `ldc.i4.<n>` macro forms
    #[must_use]
    pub fn implied_i32(self) -> Option<i32> {
        use OpCode::*;
        Some(match self {
            LdcI4M1 => -1,
            LdcI40 => 0,
            LdcI41 => 1,
            LdcI42 => 2,
            LdcI43 => 3,
            LdcI44 => 4,
            LdcI45 => 5,
            LdcI46 => 6,
            LdcI47 => 7,
            LdcI48 => 8,
            _ => return None,
        })
    }
}

/// A decoded operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// A 32-bit integer immediate
    Int(i32),
    /// A 64-bit integer immediate
    Long(i64),
    /// A 32-bit float immediate
    Single(f32),
    /// A 64-bit float immediate
    Double(f64),
    /// An argument or local index
    Var(u16),
    /// A raw byte (`unaligned.`, `no.`)
    Byte(u8),
    /// An absolute branch target
    Target(Label),
    /// A metadata token
    Token(Token),
    /// Switch table offsets, relative to the end of the instruction
    Switch(Vec<i32>),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Int(value) => write!(f, "{value}"),
            Operand::Long(value) => write!(f, "{value}"),
            Operand::Single(value) => write!(f, "{value}"),
            Operand::Double(value) => write!(f, "{value}"),
            Operand::Var(index) => write!(f, "{index}"),
            Operand::Byte(value) => write!(f, "{value}"),
            Operand::Target(label) => write!(f, "{label}"),
            Operand::Token(token) => write!(f, "{token}"),
            Operand::Switch(targets) => write!(f, "({} targets)", targets.len()),
        }
    }
}

/// A single decoded instruction.
///
/// # Examples
///
/// ```rust
/// use cilexpr::disassembler::{decode_instruction, OpCode, Operand, Parser};
///
/// let mut parser = Parser::new(&[0x1F, 0xF6, 0x2A]); // ldc.i4.s -10; ret
/// let instruction = decode_instruction(&mut parser)?;
/// assert_eq!(instruction.opcode, OpCode::LdcI4S);
/// assert_eq!(instruction.operand, Operand::Int(-10));
/// assert_eq!(instruction.to_string(), "IL_0000: ldc.i4.s -10");
/// # Ok::<(), cilexpr::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Offset of the first opcode byte
    pub offset: usize,
    /// Encoded size, opcode and operand
    pub size: usize,
    /// The opcode
    pub opcode: OpCode,
    /// The decoded operand
    pub operand: Operand,
}

impl Instruction {
    /// Offset of the next instruction in the stream
    #[must_use]
    pub fn next_offset(&self) -> usize {
        self.offset + self.size
    }

    /// Returns the mnemonic of the opcode
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        self.opcode.mnemonic()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}: {}", self.offset, self.opcode)?;
        if self.operand != Operand::None {
            write!(f, " {}", self.operand)?;
        }
        Ok(())
    }
}
