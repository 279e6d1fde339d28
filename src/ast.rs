//! Components relating to the representation of MIPS machine state identifiers and instructions.
//!
//! These components together are used to construct...
//! - [`Reg`] and [`RegId`] (the general-purpose registers and the special PC/HI/LO registers),
//! - [`Cp0Reg`] (the coprocessor 0 registers used for exception handling),
//! - and [`sim::SimInstr`] (a data structure holding a decoded machine instruction).

pub mod sim;

use std::num::TryFromIntError;

/// A general-purpose register. Must be between 0 and 31.
///
/// This `Reg` struct can either be constructed by selecting a register from [`reg_consts`],
/// or by using [`Reg::try_from`].
///
/// ## Examples
///
/// ```text
/// add $t0, $t1, $t2
///     ~~~  ~~~  ~~~
/// lw $ra, 4($sp)
///    ~~~    ~~~
/// ```
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Reg(pub(crate) u8);

/// Register constants, named by their calling convention names.
pub mod reg_consts {
    use super::Reg;

    /// Constant zero.
    pub const ZERO: Reg = Reg(0);
    /// Assembler temporary.
    pub const AT: Reg = Reg(1);
    /// Return value 0.
    pub const V0: Reg = Reg(2);
    /// Return value 1.
    pub const V1: Reg = Reg(3);
    /// Argument 0.
    pub const A0: Reg = Reg(4);
    /// Argument 1.
    pub const A1: Reg = Reg(5);
    /// Argument 2.
    pub const A2: Reg = Reg(6);
    /// Argument 3.
    pub const A3: Reg = Reg(7);
    /// Temporary 0.
    pub const T0: Reg = Reg(8);
    /// Temporary 1.
    pub const T1: Reg = Reg(9);
    /// Temporary 2.
    pub const T2: Reg = Reg(10);
    /// Temporary 3.
    pub const T3: Reg = Reg(11);
    /// Temporary 4.
    pub const T4: Reg = Reg(12);
    /// Temporary 5.
    pub const T5: Reg = Reg(13);
    /// Temporary 6.
    pub const T6: Reg = Reg(14);
    /// Temporary 7.
    pub const T7: Reg = Reg(15);
    /// Saved 0.
    pub const S0: Reg = Reg(16);
    /// Saved 1.
    pub const S1: Reg = Reg(17);
    /// Saved 2.
    pub const S2: Reg = Reg(18);
    /// Saved 3.
    pub const S3: Reg = Reg(19);
    /// Saved 4.
    pub const S4: Reg = Reg(20);
    /// Saved 5.
    pub const S5: Reg = Reg(21);
    /// Saved 6.
    pub const S6: Reg = Reg(22);
    /// Saved 7.
    pub const S7: Reg = Reg(23);
    /// Temporary 8.
    pub const T8: Reg = Reg(24);
    /// Temporary 9.
    pub const T9: Reg = Reg(25);
    /// Kernel 0.
    pub const K0: Reg = Reg(26);
    /// Kernel 1.
    pub const K1: Reg = Reg(27);
    /// Global pointer.
    pub const GP: Reg = Reg(28);
    /// Stack pointer.
    pub const SP: Reg = Reg(29);
    /// Frame pointer.
    pub const FP: Reg = Reg(30);
    /// Return address.
    pub const RA: Reg = Reg(31);
}

const GPR_NAMES: [&str; 32] = [
    "$zero", "$at", "$v0", "$v1", "$a0", "$a1", "$a2", "$a3",
    "$t0",   "$t1", "$t2", "$t3", "$t4", "$t5", "$t6", "$t7",
    "$s0",   "$s1", "$s2", "$s3", "$s4", "$s5", "$s6", "$s7",
    "$t8",   "$t9", "$k0", "$k1", "$gp", "$sp", "$fp", "$ra",
];

impl Reg {
    /// Gets the register number of this [`Reg`]. This is always between 0 and 31.
    pub fn reg_no(self) -> u8 {
        self.0
    }

    /// Gets the conventional name of this register (e.g., `$t0`).
    pub fn name(self) -> &'static str {
        GPR_NAMES[usize::from(self.0)]
    }

    /// Finds the register with the given conventional name.
    ///
    /// The name may be written with or without its leading `$`.
    pub fn from_name(name: &str) -> Option<Reg> {
        let name = name.strip_prefix('$').unwrap_or(name);
        GPR_NAMES.iter()
            .position(|n| &n[1..] == name)
            .map(|i| Reg(i as u8))
    }

    /// Iterates over all 32 general-purpose registers in numeric order.
    pub fn all() -> impl Iterator<Item=Reg> {
        (0..32).map(Reg)
    }
}
impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
impl From<Reg> for usize {
    fn from(value: Reg) -> Self {
        usize::from(value.0)
    }
}
impl TryFrom<u8> for Reg {
    type Error = TryFromIntError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=31 => Ok(Reg(value)),
            // HACKy, but there's no other way to create this error
            _      => u8::try_from(256).map(|_| unreachable!("should've been TryFromIntError")),
        }
    }
}

/// Any register in the main register file.
///
/// This covers the 32 general-purpose registers,
/// as well as the special registers PC, HI, and LO.
///
/// Each register has a unique number: general-purpose registers are numbered 0-31,
/// and PC, HI, and LO are numbered 32, 33, and 34 respectively.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RegId {
    /// A general-purpose register.
    Gpr(Reg),
    /// The program counter.
    Pc,
    /// The high result register for multiplication and division.
    Hi,
    /// The low result register for multiplication and division.
    Lo
}
impl RegId {
    /// Number of registers in the register file.
    pub const COUNT: usize = 35;

    /// The unique number of this register in the register file.
    pub fn number(self) -> u8 {
        match self {
            RegId::Gpr(r) => r.0,
            RegId::Pc => 32,
            RegId::Hi => 33,
            RegId::Lo => 34,
        }
    }

    /// Gets the register with the given number, if it exists.
    pub fn from_number(n: u8) -> Option<RegId> {
        match n {
            0..=31 => Some(RegId::Gpr(Reg(n))),
            32 => Some(RegId::Pc),
            33 => Some(RegId::Hi),
            34 => Some(RegId::Lo),
            _  => None
        }
    }

    /// The display name of this register.
    pub fn name(self) -> &'static str {
        match self {
            RegId::Gpr(r) => r.name(),
            RegId::Pc => "pc",
            RegId::Hi => "hi",
            RegId::Lo => "lo",
        }
    }

    /// Iterates over every register in the register file, in numeric order.
    pub fn all() -> impl Iterator<Item=RegId> {
        (0..Self::COUNT as u8).filter_map(RegId::from_number)
    }
}
impl From<Reg> for RegId {
    fn from(value: Reg) -> Self {
        RegId::Gpr(value)
    }
}
impl std::fmt::Display for RegId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A coprocessor 0 register.
///
/// Only the registers used for exception and interrupt handling are modeled.
/// Their hardware numbers are not contiguous, so each register
/// has an explicit entry in a lookup table that maps it to its storage slot.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Cp0Reg {
    /// Bad virtual address (`$8`).
    VAddr,
    /// Status register (`$12`).
    Status,
    /// Cause register (`$13`).
    Cause,
    /// Exception program counter (`$14`).
    Epc
}

/// `(register, hardware number, short name)`
const CP0_TABLE: [(Cp0Reg, u8, &str); 4] = [
    (Cp0Reg::VAddr,   8, "vaddr"),
    (Cp0Reg::Status, 12, "status"),
    (Cp0Reg::Cause,  13, "cause"),
    (Cp0Reg::Epc,    14, "epc"),
];

impl Cp0Reg {
    /// Number of modeled coprocessor 0 registers.
    pub const COUNT: usize = CP0_TABLE.len();

    /// The storage slot of this register (0 to [`Cp0Reg::COUNT`] exclusive).
    pub fn index(self) -> usize {
        match self {
            Cp0Reg::VAddr  => 0,
            Cp0Reg::Status => 1,
            Cp0Reg::Cause  => 2,
            Cp0Reg::Epc    => 3,
        }
    }

    /// The hardware register number (e.g., 12 for STATUS).
    pub fn number(self) -> u8 {
        CP0_TABLE[self.index()].1
    }

    /// The short name of this register (e.g., `status`).
    pub fn short_name(self) -> &'static str {
        CP0_TABLE[self.index()].2
    }

    /// Gets the register with the given hardware number.
    pub fn from_number(n: u8) -> Option<Cp0Reg> {
        CP0_TABLE.iter()
            .find(|&&(_, num, _)| num == n)
            .map(|&(r, _, _)| r)
    }

    /// Gets the register with the given short name.
    pub fn from_short_name(name: &str) -> Option<Cp0Reg> {
        CP0_TABLE.iter()
            .find(|&&(_, _, n)| n.eq_ignore_ascii_case(name))
            .map(|&(r, _, _)| r)
    }

    /// Iterates over all coprocessor 0 registers in slot order.
    pub fn all() -> impl Iterator<Item=Cp0Reg> {
        CP0_TABLE.iter().map(|&(r, _, _)| r)
    }
}
impl std::fmt::Display for Cp0Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${} ({})", self.number(), self.short_name())
    }
}

#[cfg(test)]
mod tests {
    use super::reg_consts::{RA, SP, T0, ZERO};
    use super::{Cp0Reg, Reg, RegId};

    #[test]
    fn test_reg_names() {
        assert_eq!(ZERO.to_string(), "$zero");
        assert_eq!(T0.to_string(), "$t0");
        assert_eq!(RA.name(), "$ra");

        assert_eq!(Reg::from_name("$sp"), Some(SP));
        assert_eq!(Reg::from_name("sp"), Some(SP));
        assert_eq!(Reg::from_name("$xx"), None);
        assert!(Reg::try_from(32).is_err());
    }

    #[test]
    fn test_reg_id_numbers() {
        for id in RegId::all() {
            assert_eq!(RegId::from_number(id.number()), Some(id));
        }
        assert_eq!(RegId::all().count(), RegId::COUNT);
        assert_eq!(RegId::Pc.number(), 32);
        assert_eq!(RegId::Lo.number(), 34);
        assert_eq!(RegId::from_number(35), None);
    }

    #[test]
    fn test_cp0_table() {
        assert_eq!(Cp0Reg::Status.number(), 12);
        assert_eq!(Cp0Reg::from_number(14), Some(Cp0Reg::Epc));
        assert_eq!(Cp0Reg::from_number(9), None);
        assert_eq!(Cp0Reg::from_short_name("CAUSE"), Some(Cp0Reg::Cause));
        assert_eq!(Cp0Reg::VAddr.to_string(), "$8 (vaddr)");

        let slots: Vec<_> = Cp0Reg::all().map(Cp0Reg::index).collect();
        assert_eq!(slots, [0, 1, 2, 3]);
    }
}
