//! CIL opcode tables: operand layout and control-flow class per opcode.
//!
//! Decoding and re-encoding an instruction stream only needs two facts per
//! opcode: how wide its inline operand is and whether it transfers control.
//! Both tables cover the full opcode space (the one-byte page and the
//! `0xFE`-prefixed page); reserved slots carry an empty mnemonic and are
//! rejected by the decoder.
//!
//! # Reference
//! - ECMA-335 6th Edition, Partition III - CIL instruction set

/// Extended opcode page prefix.
pub const PREFIX_FE: u8 = 0xFE;

/// `nop`
pub const NOP: u8 = 0x00;
/// `pop`
pub const POP: u8 = 0x26;
/// `call <method token>`
pub const CALL: u8 = 0x28;
/// `ret`
pub const RET: u8 = 0x2A;
/// `br.s <int8 target>`
pub const BR_S: u8 = 0x2B;
/// `br <int32 target>`
pub const BR: u8 = 0x38;
/// `switch <count, int32 targets>`
pub const SWITCH: u8 = 0x45;
/// `ldstr <string token>`
pub const LDSTR: u8 = 0x72;
/// `leave <int32 target>`
pub const LEAVE: u8 = 0xDD;
/// `leave.s <int8 target>`
pub const LEAVE_S: u8 = 0xDE;

/// Inline operand layout of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No inline operand
    None,
    /// 8-bit signed immediate (short branch targets, `ldc.i4.s`)
    Int8,
    /// 8-bit unsigned immediate (short variable indices, `unaligned.`)
    UInt8,
    /// 16-bit unsigned immediate (long variable indices)
    UInt16,
    /// 32-bit signed immediate (long branch targets, `ldc.i4`)
    Int32,
    /// 64-bit signed immediate (`ldc.i8`)
    Int64,
    /// 32-bit float (`ldc.r4`)
    Float32,
    /// 64-bit float (`ldc.r8`)
    Float64,
    /// 32-bit metadata token
    Token,
    /// `switch`: a 32-bit count followed by that many 32-bit targets
    Switch,
}

impl OperandKind {
    /// Size of the operand in bytes, `None` for the variable-length
    /// `switch` form.
    #[must_use]
    pub const fn size(&self) -> Option<usize> {
        match self {
            OperandKind::None => Some(0),
            OperandKind::Int8 | OperandKind::UInt8 => Some(1),
            OperandKind::UInt16 => Some(2),
            OperandKind::Int32 | OperandKind::Float32 | OperandKind::Token => Some(4),
            OperandKind::Int64 | OperandKind::Float64 => Some(8),
            OperandKind::Switch => None,
        }
    }
}

/// Control-flow class of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// Falls through to the next instruction
    Sequential,
    /// Transfers to a method and returns (`call`, `callvirt`, `newobj`, ...)
    Call,
    /// Always transfers to its target (`br`, `leave`, ...)
    UnconditionalBranch,
    /// Transfers to its target or falls through
    ConditionalBranch,
    /// Multi-way transfer
    Switch,
    /// Leaves the method (`ret`, `endfinally`, `endfilter`, `jmp`)
    Return,
    /// Raises an exception (`throw`, `rethrow`)
    Throw,
    /// Debugger trap
    Break,
}

/// Static description of one opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpSpec {
    /// Mnemonic, empty for reserved slots
    pub mnemonic: &'static str,
    /// Inline operand layout
    pub operand: OperandKind,
    /// Control-flow class
    pub flow: FlowKind,
}

const fn op(mnemonic: &'static str, operand: OperandKind, flow: FlowKind) -> OpSpec {
    OpSpec {
        mnemonic,
        operand,
        flow,
    }
}

const fn reserved() -> OpSpec {
    op("", OperandKind::None, FlowKind::Sequential)
}

use FlowKind::{
    Break, Call, ConditionalBranch as CondBr, Return, Sequential as Seq, Switch as Sw, Throw,
    UnconditionalBranch as Br,
};
use OperandKind::{
    Float32 as F32, Float64 as F64, Int32 as I32, Int64 as I64, Int8 as I8, None as N,
    Switch as SwOp, Token as Tok, UInt16 as U16, UInt8 as U8,
};

/// The one-byte opcode page (`0x00` - `0xE0`).
pub static INSTRUCTIONS: [OpSpec; 0xE1] = [
    op("nop", N, Seq),
    op("break", N, Break),
    op("ldarg.0", N, Seq),
    op("ldarg.1", N, Seq),
    op("ldarg.2", N, Seq),
    op("ldarg.3", N, Seq),
    op("ldloc.0", N, Seq),
    op("ldloc.1", N, Seq),
    op("ldloc.2", N, Seq),
    op("ldloc.3", N, Seq),
    op("stloc.0", N, Seq),
    op("stloc.1", N, Seq),
    op("stloc.2", N, Seq),
    op("stloc.3", N, Seq),
    op("ldarg.s", U8, Seq),
    op("ldarga.s", U8, Seq),
    op("starg.s", U8, Seq),
    op("ldloc.s", U8, Seq),
    op("ldloca.s", U8, Seq),
    op("stloc.s", U8, Seq),
    op("ldnull", N, Seq),
    op("ldc.i4.m1", N, Seq),
    op("ldc.i4.0", N, Seq),
    op("ldc.i4.1", N, Seq),
    op("ldc.i4.2", N, Seq),
    op("ldc.i4.3", N, Seq),
    op("ldc.i4.4", N, Seq),
    op("ldc.i4.5", N, Seq),
    op("ldc.i4.6", N, Seq),
    op("ldc.i4.7", N, Seq),
    op("ldc.i4.8", N, Seq),
    op("ldc.i4.s", I8, Seq),
    op("ldc.i4", I32, Seq),
    op("ldc.i8", I64, Seq),
    op("ldc.r4", F32, Seq),
    op("ldc.r8", F64, Seq),
    reserved(),
    op("dup", N, Seq),
    op("pop", N, Seq),
    op("jmp", Tok, Return),
    op("call", Tok, Call),
    op("calli", Tok, Call),
    op("ret", N, Return),
    op("br.s", I8, Br),
    op("brfalse.s", I8, CondBr),
    op("brtrue.s", I8, CondBr),
    op("beq.s", I8, CondBr),
    op("bge.s", I8, CondBr),
    op("bgt.s", I8, CondBr),
    op("ble.s", I8, CondBr),
    op("blt.s", I8, CondBr),
    op("bne.un.s", I8, CondBr),
    op("bge.un.s", I8, CondBr),
    op("bgt.un.s", I8, CondBr),
    op("ble.un.s", I8, CondBr),
    op("blt.un.s", I8, CondBr),
    op("br", I32, Br),
    op("brfalse", I32, CondBr),
    op("brtrue", I32, CondBr),
    op("beq", I32, CondBr),
    op("bge", I32, CondBr),
    op("bgt", I32, CondBr),
    op("ble", I32, CondBr),
    op("blt", I32, CondBr),
    op("bne.un", I32, CondBr),
    op("bge.un", I32, CondBr),
    op("bgt.un", I32, CondBr),
    op("ble.un", I32, CondBr),
    op("blt.un", I32, CondBr),
    op("switch", SwOp, Sw),
    op("ldind.i1", N, Seq),
    op("ldind.u1", N, Seq),
    op("ldind.i2", N, Seq),
    op("ldind.u2", N, Seq),
    op("ldind.i4", N, Seq),
    op("ldind.u4", N, Seq),
    op("ldind.i8", N, Seq),
    op("ldind.i", N, Seq),
    op("ldind.r4", N, Seq),
    op("ldind.r8", N, Seq),
    op("ldind.ref", N, Seq),
    op("stind.ref", N, Seq),
    op("stind.i1", N, Seq),
    op("stind.i2", N, Seq),
    op("stind.i4", N, Seq),
    op("stind.i8", N, Seq),
    op("stind.r4", N, Seq),
    op("stind.r8", N, Seq),
    op("add", N, Seq),
    op("sub", N, Seq),
    op("mul", N, Seq),
    op("div", N, Seq),
    op("div.un", N, Seq),
    op("rem", N, Seq),
    op("rem.un", N, Seq),
    op("and", N, Seq),
    op("or", N, Seq),
    op("xor", N, Seq),
    op("shl", N, Seq),
    op("shr", N, Seq),
    op("shr.un", N, Seq),
    op("neg", N, Seq),
    op("not", N, Seq),
    op("conv.i1", N, Seq),
    op("conv.i2", N, Seq),
    op("conv.i4", N, Seq),
    op("conv.i8", N, Seq),
    op("conv.r4", N, Seq),
    op("conv.r8", N, Seq),
    op("conv.u4", N, Seq),
    op("conv.u8", N, Seq),
    op("callvirt", Tok, Call),
    op("cpobj", Tok, Seq),
    op("ldobj", Tok, Seq),
    op("ldstr", Tok, Seq),
    op("newobj", Tok, Call),
    op("castclass", Tok, Seq),
    op("isinst", Tok, Seq),
    op("conv.r.un", N, Seq),
    reserved(),
    reserved(),
    op("unbox", Tok, Seq),
    op("throw", N, Throw),
    op("ldfld", Tok, Seq),
    op("ldflda", Tok, Seq),
    op("stfld", Tok, Seq),
    op("ldsfld", Tok, Seq),
    op("ldsflda", Tok, Seq),
    op("stsfld", Tok, Seq),
    op("stobj", Tok, Seq),
    op("conv.ovf.i1.un", N, Seq),
    op("conv.ovf.i2.un", N, Seq),
    op("conv.ovf.i4.un", N, Seq),
    op("conv.ovf.i8.un", N, Seq),
    op("conv.ovf.u1.un", N, Seq),
    op("conv.ovf.u2.un", N, Seq),
    op("conv.ovf.u4.un", N, Seq),
    op("conv.ovf.u8.un", N, Seq),
    op("conv.ovf.i.un", N, Seq),
    op("conv.ovf.u.un", N, Seq),
    op("box", Tok, Seq),
    op("newarr", Tok, Seq),
    op("ldlen", N, Seq),
    op("ldelema", Tok, Seq),
    op("ldelem.i1", N, Seq),
    op("ldelem.u1", N, Seq),
    op("ldelem.i2", N, Seq),
    op("ldelem.u2", N, Seq),
    op("ldelem.i4", N, Seq),
    op("ldelem.u4", N, Seq),
    op("ldelem.i8", N, Seq),
    op("ldelem.i", N, Seq),
    op("ldelem.r4", N, Seq),
    op("ldelem.r8", N, Seq),
    op("ldelem.ref", N, Seq),
    op("stelem.i", N, Seq),
    op("stelem.i1", N, Seq),
    op("stelem.i2", N, Seq),
    op("stelem.i4", N, Seq),
    op("stelem.i8", N, Seq),
    op("stelem.r4", N, Seq),
    op("stelem.r8", N, Seq),
    op("stelem.ref", N, Seq),
    op("ldelem", Tok, Seq),
    op("stelem", Tok, Seq),
    op("unbox.any", Tok, Seq),
    reserved(),
    reserved(),
    reserved(),
    reserved(),
    reserved(),
    reserved(),
    reserved(),
    reserved(),
    reserved(),
    reserved(),
    reserved(),
    reserved(),
    reserved(),
    op("conv.ovf.i1", N, Seq),
    op("conv.ovf.u1", N, Seq),
    op("conv.ovf.i2", N, Seq),
    op("conv.ovf.u2", N, Seq),
    op("conv.ovf.i4", N, Seq),
    op("conv.ovf.u4", N, Seq),
    op("conv.ovf.i8", N, Seq),
    op("conv.ovf.u8", N, Seq),
    reserved(),
    reserved(),
    reserved(),
    reserved(),
    reserved(),
    reserved(),
    reserved(),
    op("refanyval", Tok, Seq),
    op("ckfinite", N, Seq),
    reserved(),
    reserved(),
    op("mkrefany", Tok, Seq),
    reserved(),
    reserved(),
    reserved(),
    reserved(),
    reserved(),
    reserved(),
    reserved(),
    reserved(),
    reserved(),
    op("ldtoken", Tok, Seq),
    op("conv.u2", N, Seq),
    op("conv.u1", N, Seq),
    op("conv.i", N, Seq),
    op("conv.ovf.i", N, Seq),
    op("conv.ovf.u", N, Seq),
    op("add.ovf", N, Seq),
    op("add.ovf.un", N, Seq),
    op("mul.ovf", N, Seq),
    op("mul.ovf.un", N, Seq),
    op("sub.ovf", N, Seq),
    op("sub.ovf.un", N, Seq),
    op("endfinally", N, Return),
    op("leave", I32, Br),
    op("leave.s", I8, Br),
    op("stind.i", N, Seq),
    op("conv.u", N, Seq),
];

/// The `0xFE`-prefixed opcode page (`0x00` - `0x1E`).
pub static INSTRUCTIONS_FE: [OpSpec; 0x1F] = [
    op("arglist", N, Seq),
    op("ceq", N, Seq),
    op("cgt", N, Seq),
    op("cgt.un", N, Seq),
    op("clt", N, Seq),
    op("clt.un", N, Seq),
    op("ldftn", Tok, Seq),
    op("ldvirtftn", Tok, Seq),
    reserved(),
    op("ldarg", U16, Seq),
    op("ldarga", U16, Seq),
    op("starg", U16, Seq),
    op("ldloc", U16, Seq),
    op("ldloca", U16, Seq),
    op("stloc", U16, Seq),
    op("localloc", N, Seq),
    reserved(),
    op("endfilter", N, Return),
    op("unaligned.", U8, Seq),
    op("volatile.", N, Seq),
    op("tail.", N, Seq),
    op("initobj", Tok, Seq),
    op("constrained.", Tok, Seq),
    op("cpblk", N, Seq),
    op("initblk", N, Seq),
    op("no.", U8, Seq),
    op("rethrow", N, Throw),
    reserved(),
    op("sizeof", Tok, Seq),
    op("refanytype", N, Seq),
    op("readonly.", N, Seq),
];

/// Looks up the spec for an opcode, rejecting reserved slots.
#[must_use]
pub fn lookup(prefix: u8, opcode: u8) -> Option<&'static OpSpec> {
    let spec = match prefix {
        0 => INSTRUCTIONS.get(opcode as usize)?,
        PREFIX_FE => INSTRUCTIONS_FE.get(opcode as usize)?,
        _ => return None,
    };

    if spec.mnemonic.is_empty() {
        return None;
    }

    Some(spec)
}

/// Maps a short-form branch opcode to its four-byte-displacement form.
///
/// Used when serialization finds a displacement that no longer fits the
/// short operand.
#[must_use]
pub fn long_branch_form(opcode: u8) -> Option<u8> {
    match opcode {
        0x2B..=0x37 => Some(opcode + 0x0D),
        LEAVE_S => Some(LEAVE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_positions() {
        assert_eq!(INSTRUCTIONS[NOP as usize].mnemonic, "nop");
        assert_eq!(INSTRUCTIONS[POP as usize].mnemonic, "pop");
        assert_eq!(INSTRUCTIONS[RET as usize].mnemonic, "ret");
        assert_eq!(INSTRUCTIONS[LDSTR as usize].mnemonic, "ldstr");
        assert_eq!(INSTRUCTIONS[CALL as usize].mnemonic, "call");
        assert_eq!(INSTRUCTIONS[SWITCH as usize].mnemonic, "switch");
        assert_eq!(INSTRUCTIONS[LEAVE_S as usize].mnemonic, "leave.s");
        assert_eq!(INSTRUCTIONS[0xE0].mnemonic, "conv.u");
        assert_eq!(INSTRUCTIONS_FE[0x16].mnemonic, "constrained.");
    }

    #[test]
    fn reserved_slots_rejected() {
        assert!(lookup(0, 0x24).is_none());
        assert!(lookup(0, 0xA6).is_none());
        assert!(lookup(PREFIX_FE, 0x08).is_none());
        assert!(lookup(0x01, NOP).is_none());
    }

    #[test]
    fn branch_promotion_pairs() {
        assert_eq!(long_branch_form(BR_S), Some(BR));
        assert_eq!(long_branch_form(0x2C), Some(0x39)); // brfalse.s -> brfalse
        assert_eq!(long_branch_form(0x37), Some(0x44)); // blt.un.s -> blt.un
        assert_eq!(long_branch_form(LEAVE_S), Some(LEAVE));
        assert_eq!(long_branch_form(BR), None);
        assert_eq!(long_branch_form(NOP), None);
    }

    #[test]
    fn operand_sizes() {
        assert_eq!(OperandKind::None.size(), Some(0));
        assert_eq!(OperandKind::Int8.size(), Some(1));
        assert_eq!(OperandKind::Token.size(), Some(4));
        assert_eq!(OperandKind::Float64.size(), Some(8));
        assert_eq!(OperandKind::Switch.size(), None);
    }
}
