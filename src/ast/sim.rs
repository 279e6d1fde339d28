//! This module holds the [`SimInstr`] type, the decoded form of a machine word.
//!
//! Decoding is table-driven: the primary opcode selects a format,
//! and the secondary field (`funct` for R-type words, `rt` for `REGIMM` words)
//! selects the operation within it.
//! [`SimInstr::encode`] is the inverse of [`SimInstr::decode`].

use super::reg_consts::{RA, ZERO};
use super::{Cp0Reg, Reg};
use crate::sim::SimErr;

const OP_SPECIAL: u32 = 0x00;
const OP_REGIMM: u32 = 0x01;
const OP_J: u32 = 0x02;
const OP_JAL: u32 = 0x03;
const OP_LUI: u32 = 0x0F;
const OP_COP0: u32 = 0x10;
const OP_SPECIAL2: u32 = 0x1C;

const FN_JR: u32 = 0x08;
const FN_JALR: u32 = 0x09;
const FN_SYSCALL: u32 = 0x0C;
const FN_BREAK: u32 = 0x0D;
const FN_MFHI: u32 = 0x10;
const FN_MTHI: u32 = 0x11;
const FN_MFLO: u32 = 0x12;
const FN_MTLO: u32 = 0x13;
const FN2_MUL: u32 = 0x02;
const FN_ERET: u32 = 0x18;

const COP0_MF: u32 = 0x00;
const COP0_MT: u32 = 0x04;
const COP0_CO: u32 = 0x10;

macro_rules! op_table {
    ($(#[$m:meta])* $Type:ident { $($name:ident = $code:literal => $mnemonic:literal),+ $(,)? }) => {
        $(#[$m])*
        #[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
        pub enum $Type {
            $(
                #[allow(missing_docs)]
                $name
            ),+
        }
        impl $Type {
            fn code(self) -> u32 {
                match self {
                    $(Self::$name => $code),+
                }
            }
            fn from_code(code: u32) -> Option<Self> {
                match code {
                    $($code => Some(Self::$name),)+
                    _ => None
                }
            }
            /// The assembly mnemonic of this operation.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Self::$name => $mnemonic),+
                }
            }
        }
    }
}

op_table! {
    /// Shift operations (`funct` codes of the fixed-amount forms).
    ShiftOp {
        Sll = 0x00 => "sll",
        Srl = 0x02 => "srl",
        Sra = 0x03 => "sra",
    }
}
impl ShiftOp {
    /// The mnemonic of the variable-amount form (e.g., `sllv`).
    pub fn var_mnemonic(self) -> &'static str {
        match self {
            ShiftOp::Sll => "sllv",
            ShiftOp::Srl => "srlv",
            ShiftOp::Sra => "srav",
        }
    }
}
op_table! {
    /// Three-register ALU operations (`funct` codes).
    AluOp {
        Movz = 0x0A => "movz",
        Movn = 0x0B => "movn",
        Add  = 0x20 => "add",
        Addu = 0x21 => "addu",
        Sub  = 0x22 => "sub",
        Subu = 0x23 => "subu",
        And  = 0x24 => "and",
        Or   = 0x25 => "or",
        Xor  = 0x26 => "xor",
        Nor  = 0x27 => "nor",
        Slt  = 0x2A => "slt",
        Sltu = 0x2B => "sltu",
    }
}
op_table! {
    /// Register-immediate ALU operations (primary opcodes).
    ImmOp {
        Addi  = 0x08 => "addi",
        Addiu = 0x09 => "addiu",
        Slti  = 0x0A => "slti",
        Sltiu = 0x0B => "sltiu",
        Andi  = 0x0C => "andi",
        Ori   = 0x0D => "ori",
        Xori  = 0x0E => "xori",
    }
}
impl ImmOp {
    /// Whether the immediate is zero-extended (logical operations)
    /// rather than sign-extended (arithmetic operations).
    pub fn zero_extends(self) -> bool {
        matches!(self, ImmOp::Andi | ImmOp::Ori | ImmOp::Xori)
    }
}
op_table! {
    /// Multiplication and division into HI/LO (`funct` codes).
    MulDivOp {
        Mult  = 0x18 => "mult",
        Multu = 0x19 => "multu",
        Div   = 0x1A => "div",
        Divu  = 0x1B => "divu",
    }
}
op_table! {
    /// Multiply-accumulate into HI/LO (`SPECIAL2` `funct` codes).
    AccumOp {
        Madd  = 0x00 => "madd",
        Maddu = 0x01 => "maddu",
        Msub  = 0x04 => "msub",
        Msubu = 0x05 => "msubu",
    }
}
op_table! {
    /// Leading bit counts (`SPECIAL2` `funct` codes).
    CountOp {
        Clz = 0x20 => "clz",
        Clo = 0x21 => "clo",
    }
}
op_table! {
    /// Loads (primary opcodes).
    LoadOp {
        Lb  = 0x20 => "lb",
        Lh  = 0x21 => "lh",
        Lwl = 0x22 => "lwl",
        Lw  = 0x23 => "lw",
        Lbu = 0x24 => "lbu",
        Lhu = 0x25 => "lhu",
        Lwr = 0x26 => "lwr",
        Ll  = 0x30 => "ll",
    }
}
op_table! {
    /// Stores (primary opcodes).
    StoreOp {
        Sb  = 0x28 => "sb",
        Sh  = 0x29 => "sh",
        Swl = 0x2A => "swl",
        Sw  = 0x2B => "sw",
        Swr = 0x2E => "swr",
        Sc  = 0x38 => "sc",
    }
}

/// Condition of a trap instruction.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum TrapCond {
    /// Signed greater than or equal.
    Ge,
    /// Unsigned greater than or equal.
    Geu,
    /// Signed less than.
    Lt,
    /// Unsigned less than.
    Ltu,
    /// Equal.
    Eq,
    /// Not equal.
    Ne
}
impl TrapCond {
    /// `(condition, funct code of register form, rt code of immediate form)`
    const TABLE: [(TrapCond, u32, u32); 6] = [
        (TrapCond::Ge,  0x30, 0x08),
        (TrapCond::Geu, 0x31, 0x09),
        (TrapCond::Lt,  0x32, 0x0A),
        (TrapCond::Ltu, 0x33, 0x0B),
        (TrapCond::Eq,  0x34, 0x0C),
        (TrapCond::Ne,  0x36, 0x0E),
    ];

    fn entry(self) -> (TrapCond, u32, u32) {
        Self::TABLE[self as usize]
    }
    fn from_funct(funct: u32) -> Option<Self> {
        Self::TABLE.iter().find(|e| e.1 == funct).map(|e| e.0)
    }
    fn from_regimm(rt: u32) -> Option<Self> {
        Self::TABLE.iter().find(|e| e.2 == rt).map(|e| e.0)
    }

    /// Evaluates the condition over two operands.
    pub fn check(self, a: u32, b: u32) -> bool {
        match self {
            TrapCond::Ge  => (a as i32) >= (b as i32),
            TrapCond::Geu => a >= b,
            TrapCond::Lt  => (a as i32) < (b as i32),
            TrapCond::Ltu => a < b,
            TrapCond::Eq  => a == b,
            TrapCond::Ne  => a != b,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            TrapCond::Ge  => "ge",
            TrapCond::Geu => "geu",
            TrapCond::Lt  => "lt",
            TrapCond::Ltu => "ltu",
            TrapCond::Eq  => "eq",
            TrapCond::Ne  => "ne",
        }
    }

    // the unsigned immediate forms are `tgeiu`/`tltiu`, not `tgeui`/`tltui`
    fn imm_mnemonic(self) -> &'static str {
        match self {
            TrapCond::Ge  => "tgei",
            TrapCond::Geu => "tgeiu",
            TrapCond::Lt  => "tlti",
            TrapCond::Ltu => "tltiu",
            TrapCond::Eq  => "teqi",
            TrapCond::Ne  => "tnei",
        }
    }
}

/// Conditional branches.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum BranchOp {
    #[allow(missing_docs)] Beq,
    #[allow(missing_docs)] Bne,
    #[allow(missing_docs)] Blez,
    #[allow(missing_docs)] Bgtz,
    #[allow(missing_docs)] Bltz,
    #[allow(missing_docs)] Bgez,
    #[allow(missing_docs)] Bltzal,
    #[allow(missing_docs)] Bgezal,
}
impl BranchOp {
    /// Whether this branch writes the return address to `$ra`.
    pub fn links(self) -> bool {
        matches!(self, BranchOp::Bltzal | BranchOp::Bgezal)
    }

    /// Whether this branch compares two registers (rather than one register against zero).
    pub fn compares_two(self) -> bool {
        matches!(self, BranchOp::Beq | BranchOp::Bne)
    }

    /// Evaluates whether the branch is taken.
    pub fn taken(self, rs: u32, rt: u32) -> bool {
        let s = rs as i32;
        match self {
            BranchOp::Beq => rs == rt,
            BranchOp::Bne => rs != rt,
            BranchOp::Blez => s <= 0,
            BranchOp::Bgtz => s > 0,
            BranchOp::Bltz | BranchOp::Bltzal => s < 0,
            BranchOp::Bgez | BranchOp::Bgezal => s >= 0,
        }
    }

    /// The assembly mnemonic of this branch.
    pub fn mnemonic(self) -> &'static str {
        match self {
            BranchOp::Beq    => "beq",
            BranchOp::Bne    => "bne",
            BranchOp::Blez   => "blez",
            BranchOp::Bgtz   => "bgtz",
            BranchOp::Bltz   => "bltz",
            BranchOp::Bgez   => "bgez",
            BranchOp::Bltzal => "bltzal",
            BranchOp::Bgezal => "bgezal",
        }
    }
}

/// A decoded machine instruction.
///
/// Register operands follow the order in which they appear in assembly
/// (e.g., `Alu(op, rd, rs, rt)` for `add rd, rs, rt`).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum SimInstr {
    /// `sll rd, rt, shamt` (and `srl`, `sra`)
    Shift(ShiftOp, Reg, Reg, u8),
    /// `sllv rd, rt, rs` (and `srlv`, `srav`)
    ShiftVar(ShiftOp, Reg, Reg, Reg),
    /// `add rd, rs, rt` and the other three-register ALU operations
    Alu(AluOp, Reg, Reg, Reg),
    /// `addi rt, rs, imm` and the other register-immediate ALU operations
    AluImm(ImmOp, Reg, Reg, u16),
    /// `lui rt, imm`
    Lui(Reg, u16),
    /// `mul rd, rs, rt`
    Mul(Reg, Reg, Reg),
    /// `mult rs, rt` (and `multu`, `div`, `divu`)
    MulDiv(MulDivOp, Reg, Reg),
    /// `madd rs, rt` (and `maddu`, `msub`, `msubu`)
    Accum(AccumOp, Reg, Reg),
    /// `clz rd, rs` (and `clo`)
    Count(CountOp, Reg, Reg),
    /// `mfhi rd`
    Mfhi(Reg),
    /// `mthi rs`
    Mthi(Reg),
    /// `mflo rd`
    Mflo(Reg),
    /// `mtlo rs`
    Mtlo(Reg),
    /// `teq rs, rt` and the other register trap instructions
    Trap(TrapCond, Reg, Reg),
    /// `teqi rs, imm` and the other immediate trap instructions
    TrapImm(TrapCond, Reg, i16),
    /// `beq rs, rt, offset` and the other conditional branches.
    ///
    /// The offset is in words, relative to the address of the following instruction.
    /// Single-operand branches hold `$zero` as their second register.
    Branch(BranchOp, Reg, Reg, i16),
    /// `j target` (26-bit instruction index)
    J(u32),
    /// `jal target` (26-bit instruction index)
    Jal(u32),
    /// `jr rs`
    Jr(Reg),
    /// `jalr rd, rs`
    Jalr(Reg, Reg),
    /// `lw rt, offset(base)` and the other loads
    Load(LoadOp, Reg, Reg, i16),
    /// `sw rt, offset(base)` and the other stores
    Store(StoreOp, Reg, Reg, i16),
    /// `syscall`
    Syscall,
    /// `break code`
    Break(u32),
    /// `mfc0 rt, cp0reg`
    Mfc0(Reg, Cp0Reg),
    /// `mtc0 rt, cp0reg`
    Mtc0(Reg, Cp0Reg),
    /// `eret`
    Eret,
}

fn field(word: u32, shift: u32) -> u32 {
    (word >> shift) & 0x1F
}
fn reg_field(word: u32, shift: u32) -> Reg {
    Reg(field(word, shift) as u8)
}
fn r_type(rs: Reg, rt: Reg, rd: Reg, shamt: u8, funct: u32) -> u32 {
    (u32::from(rs.0) << 21)
        | (u32::from(rt.0) << 16)
        | (u32::from(rd.0) << 11)
        | (u32::from(shamt & 0x1F) << 6)
        | funct
}
fn i_type(op: u32, rs: Reg, rt: u32, imm: u16) -> u32 {
    (op << 26) | (u32::from(rs.0) << 21) | (rt << 16) | u32::from(imm)
}

impl SimInstr {
    /// Decodes a machine word into an instruction.
    ///
    /// # Errors
    ///
    /// If the word does not correspond to any supported instruction,
    /// this returns [`SimErr::InvalidInstruction`].
    pub fn decode(word: u32) -> Result<Self, SimErr> {
        let invalid = || SimErr::InvalidInstruction(word);

        let op = word >> 26;
        let rs = reg_field(word, 21);
        let rt = reg_field(word, 16);
        let rd = reg_field(word, 11);
        let shamt = field(word, 6) as u8;
        let funct = word & 0x3F;
        let imm = word as u16;

        let instr = match op {
            OP_SPECIAL => match funct {
                0x00..=0x03 => SimInstr::Shift(ShiftOp::from_code(funct).ok_or_else(invalid)?, rd, rt, shamt),
                0x04..=0x07 => SimInstr::ShiftVar(ShiftOp::from_code(funct - 4).ok_or_else(invalid)?, rd, rt, rs),
                FN_JR      => SimInstr::Jr(rs),
                FN_JALR    => SimInstr::Jalr(rd, rs),
                FN_SYSCALL => SimInstr::Syscall,
                FN_BREAK   => SimInstr::Break((word >> 6) & 0xFFFFF),
                FN_MFHI    => SimInstr::Mfhi(rd),
                FN_MTHI    => SimInstr::Mthi(rs),
                FN_MFLO    => SimInstr::Mflo(rd),
                FN_MTLO    => SimInstr::Mtlo(rs),
                _ => if let Some(op) = MulDivOp::from_code(funct) {
                    SimInstr::MulDiv(op, rs, rt)
                } else if let Some(op) = AluOp::from_code(funct) {
                    SimInstr::Alu(op, rd, rs, rt)
                } else if let Some(cond) = TrapCond::from_funct(funct) {
                    SimInstr::Trap(cond, rs, rt)
                } else {
                    return Err(invalid());
                }
            },
            OP_REGIMM => {
                let offset = imm as i16;
                match field(word, 16) {
                    0x00 => SimInstr::Branch(BranchOp::Bltz, rs, ZERO, offset),
                    0x01 => SimInstr::Branch(BranchOp::Bgez, rs, ZERO, offset),
                    0x10 => SimInstr::Branch(BranchOp::Bltzal, rs, ZERO, offset),
                    0x11 => SimInstr::Branch(BranchOp::Bgezal, rs, ZERO, offset),
                    sub  => SimInstr::TrapImm(TrapCond::from_regimm(sub).ok_or_else(invalid)?, rs, offset),
                }
            },
            OP_J   => SimInstr::J(word & 0x03FF_FFFF),
            OP_JAL => SimInstr::Jal(word & 0x03FF_FFFF),
            0x04 => SimInstr::Branch(BranchOp::Beq, rs, rt, imm as i16),
            0x05 => SimInstr::Branch(BranchOp::Bne, rs, rt, imm as i16),
            0x06 => SimInstr::Branch(BranchOp::Blez, rs, ZERO, imm as i16),
            0x07 => SimInstr::Branch(BranchOp::Bgtz, rs, ZERO, imm as i16),
            OP_LUI => SimInstr::Lui(rt, imm),
            OP_COP0 => match field(word, 21) {
                COP0_MF => SimInstr::Mfc0(rt, Cp0Reg::from_number(rd.0).ok_or_else(invalid)?),
                COP0_MT => SimInstr::Mtc0(rt, Cp0Reg::from_number(rd.0).ok_or_else(invalid)?),
                COP0_CO if funct == FN_ERET => SimInstr::Eret,
                _ => return Err(invalid()),
            },
            OP_SPECIAL2 => match funct {
                FN2_MUL => SimInstr::Mul(rd, rs, rt),
                _ => if let Some(op) = AccumOp::from_code(funct) {
                    SimInstr::Accum(op, rs, rt)
                } else if let Some(op) = CountOp::from_code(funct) {
                    SimInstr::Count(op, rd, rs)
                } else {
                    return Err(invalid());
                }
            },
            _ => if let Some(op) = ImmOp::from_code(op) {
                SimInstr::AluImm(op, rt, rs, imm)
            } else if let Some(op) = LoadOp::from_code(op) {
                SimInstr::Load(op, rt, rs, imm as i16)
            } else if let Some(op) = StoreOp::from_code(op) {
                SimInstr::Store(op, rt, rs, imm as i16)
            } else {
                return Err(invalid());
            }
        };

        Ok(instr)
    }

    /// Encodes this instruction into a machine word.
    pub fn encode(self) -> u32 {
        match self {
            SimInstr::Shift(op, rd, rt, sa)    => r_type(ZERO, rt, rd, sa, op.code()),
            SimInstr::ShiftVar(op, rd, rt, rs) => r_type(rs, rt, rd, 0, op.code() + 4),
            SimInstr::Alu(op, rd, rs, rt)      => r_type(rs, rt, rd, 0, op.code()),
            SimInstr::AluImm(op, rt, rs, imm)  => i_type(op.code(), rs, u32::from(rt.0), imm),
            SimInstr::Lui(rt, imm)             => i_type(OP_LUI, ZERO, u32::from(rt.0), imm),
            SimInstr::Mul(rd, rs, rt)          => (OP_SPECIAL2 << 26) | r_type(rs, rt, rd, 0, FN2_MUL),
            SimInstr::MulDiv(op, rs, rt)       => r_type(rs, rt, ZERO, 0, op.code()),
            SimInstr::Accum(op, rs, rt)        => (OP_SPECIAL2 << 26) | r_type(rs, rt, ZERO, 0, op.code()),
            SimInstr::Count(op, rd, rs)        => (OP_SPECIAL2 << 26) | r_type(rs, ZERO, rd, 0, op.code()),
            SimInstr::Mfhi(rd) => r_type(ZERO, ZERO, rd, 0, FN_MFHI),
            SimInstr::Mthi(rs) => r_type(rs, ZERO, ZERO, 0, FN_MTHI),
            SimInstr::Mflo(rd) => r_type(ZERO, ZERO, rd, 0, FN_MFLO),
            SimInstr::Mtlo(rs) => r_type(rs, ZERO, ZERO, 0, FN_MTLO),
            SimInstr::Trap(cond, rs, rt)       => r_type(rs, rt, ZERO, 0, cond.entry().1),
            SimInstr::TrapImm(cond, rs, imm)   => i_type(OP_REGIMM, rs, cond.entry().2, imm as u16),
            SimInstr::Branch(op, rs, rt, off)  => {
                let (opcode, rt_field) = match op {
                    BranchOp::Beq    => (0x04, u32::from(rt.0)),
                    BranchOp::Bne    => (0x05, u32::from(rt.0)),
                    BranchOp::Blez   => (0x06, 0),
                    BranchOp::Bgtz   => (0x07, 0),
                    BranchOp::Bltz   => (OP_REGIMM, 0x00),
                    BranchOp::Bgez   => (OP_REGIMM, 0x01),
                    BranchOp::Bltzal => (OP_REGIMM, 0x10),
                    BranchOp::Bgezal => (OP_REGIMM, 0x11),
                };
                i_type(opcode, rs, rt_field, off as u16)
            },
            SimInstr::J(target)   => (OP_J << 26) | (target & 0x03FF_FFFF),
            SimInstr::Jal(target) => (OP_JAL << 26) | (target & 0x03FF_FFFF),
            SimInstr::Jr(rs)       => r_type(rs, ZERO, ZERO, 0, FN_JR),
            SimInstr::Jalr(rd, rs) => r_type(rs, ZERO, rd, 0, FN_JALR),
            SimInstr::Load(op, rt, base, off)  => i_type(op.code(), base, u32::from(rt.0), off as u16),
            SimInstr::Store(op, rt, base, off) => i_type(op.code(), base, u32::from(rt.0), off as u16),
            SimInstr::Syscall     => FN_SYSCALL,
            SimInstr::Break(code) => ((code & 0xFFFFF) << 6) | FN_BREAK,
            SimInstr::Mfc0(rt, cr) => (OP_COP0 << 26) | (COP0_MF << 21) | (u32::from(rt.0) << 16) | (u32::from(cr.number()) << 11),
            SimInstr::Mtc0(rt, cr) => (OP_COP0 << 26) | (COP0_MT << 21) | (u32::from(rt.0) << 16) | (u32::from(cr.number()) << 11),
            SimInstr::Eret => (OP_COP0 << 26) | (COP0_CO << 21) | FN_ERET,
        }
    }
}

impl std::fmt::Display for SimInstr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            SimInstr::Shift(op, rd, rt, sa)    => write!(f, "{} {rd}, {rt}, {sa}", op.mnemonic()),
            SimInstr::ShiftVar(op, rd, rt, rs) => write!(f, "{} {rd}, {rt}, {rs}", op.var_mnemonic()),
            SimInstr::Alu(op, rd, rs, rt)      => write!(f, "{} {rd}, {rs}, {rt}", op.mnemonic()),
            SimInstr::AluImm(op, rt, rs, imm)  => match op.zero_extends() {
                true  => write!(f, "{} {rt}, {rs}, 0x{imm:04x}", op.mnemonic()),
                false => write!(f, "{} {rt}, {rs}, {}", op.mnemonic(), imm as i16),
            },
            SimInstr::Lui(rt, imm)       => write!(f, "lui {rt}, 0x{imm:04x}"),
            SimInstr::Mul(rd, rs, rt)    => write!(f, "mul {rd}, {rs}, {rt}"),
            SimInstr::MulDiv(op, rs, rt) => write!(f, "{} {rs}, {rt}", op.mnemonic()),
            SimInstr::Accum(op, rs, rt)  => write!(f, "{} {rs}, {rt}", op.mnemonic()),
            SimInstr::Count(op, rd, rs)  => write!(f, "{} {rd}, {rs}", op.mnemonic()),
            SimInstr::Mfhi(r) => write!(f, "mfhi {r}"),
            SimInstr::Mthi(r) => write!(f, "mthi {r}"),
            SimInstr::Mflo(r) => write!(f, "mflo {r}"),
            SimInstr::Mtlo(r) => write!(f, "mtlo {r}"),
            SimInstr::Trap(cond, rs, rt)     => write!(f, "t{} {rs}, {rt}", cond.suffix()),
            SimInstr::TrapImm(cond, rs, imm) => write!(f, "{} {rs}, {imm}", cond.imm_mnemonic()),
            SimInstr::Branch(op, rs, rt, off) if op.compares_two() => write!(f, "{} {rs}, {rt}, {off}", op.mnemonic()),
            SimInstr::Branch(op, rs, _, off) => write!(f, "{} {rs}, {off}", op.mnemonic()),
            SimInstr::J(t)   => write!(f, "j 0x{:08x}", t << 2),
            SimInstr::Jal(t) => write!(f, "jal 0x{:08x}", t << 2),
            SimInstr::Jr(rs) => write!(f, "jr {rs}"),
            SimInstr::Jalr(rd, rs) if rd == RA => write!(f, "jalr {rs}"),
            SimInstr::Jalr(rd, rs) => write!(f, "jalr {rd}, {rs}"),
            SimInstr::Load(op, rt, base, off)  => write!(f, "{} {rt}, {off}({base})", op.mnemonic()),
            SimInstr::Store(op, rt, base, off) => write!(f, "{} {rt}, {off}({base})", op.mnemonic()),
            SimInstr::Syscall => f.write_str("syscall"),
            SimInstr::Break(0) => f.write_str("break"),
            SimInstr::Break(code) => write!(f, "break {code}"),
            SimInstr::Mfc0(rt, cr) => write!(f, "mfc0 {rt}, ${}", cr.number()),
            SimInstr::Mtc0(rt, cr) => write!(f, "mtc0 {rt}, ${}", cr.number()),
            SimInstr::Eret => f.write_str("eret"),
        }
    }
}
