//! Parsing textual register references and integers.
//!
//! This module is used wherever the simulator has to interpret text:
//! - [`parse_reg`]: register file lookups by name or number (`$t0`, `$8`, `t0`, `pc`)
//! - [`parse_cp0_reg`]: coprocessor 0 lookups (`$12`, `status`, `$12 (status)`)
//! - [`parse_int`]: integer input (decimal, `0x` hex, `0b` binary, optionally negated)
//!
//! ```
//! use mips_ensemble::parse::{parse_reg, parse_int};
//! use mips_ensemble::ast::RegId;
//! use mips_ensemble::ast::reg_consts::T0;
//!
//! assert_eq!(parse_reg("$t0"), Some(RegId::Gpr(T0)));
//! assert_eq!(parse_reg("$8"), Some(RegId::Gpr(T0)));
//! assert_eq!(parse_int("-0x10"), Ok(-16));
//! ```
pub mod lex;

use logos::Logos;

use crate::ast::{Cp0Reg, Reg, RegId};
use lex::{LexErr, Token};

/// Converts a string into a list of tokens.
pub fn tokenize(src: &str) -> Result<Vec<Token>, LexErr> {
    Token::lexer(src).collect()
}

/// Resolves a register file reference.
///
/// Both the name form (`$t0` or `t0`) and the number form (`$8`) resolve
/// to the same register. `pc`, `hi`, and `lo` resolve to the special registers.
///
/// If the text does not name a register, this returns `None`.
pub fn parse_reg(src: &str) -> Option<RegId> {
    match &*tokenize(src).ok()? {
        [Token::RegNumber(n)] if *n < 32 => RegId::from_number(*n),
        [Token::RegName(name)] => Reg::from_name(name).map(RegId::Gpr),
        [Token::Ident(name)] => match &*name.to_ascii_lowercase() {
            "pc" => Some(RegId::Pc),
            "hi" => Some(RegId::Hi),
            "lo" => Some(RegId::Lo),
            n    => Reg::from_name(n).map(RegId::Gpr),
        },
        _ => None
    }
}

/// Resolves a coprocessor 0 register reference.
///
/// This accepts the hardware number (`$12`), the short name (`status` or `$status`),
/// or the combined display form (`$12 (status)`).
pub fn parse_cp0_reg(src: &str) -> Option<Cp0Reg> {
    match &*tokenize(src).ok()? {
        [Token::RegNumber(n)] => Cp0Reg::from_number(*n),
        [Token::RegName(name)] | [Token::Ident(name)] => Cp0Reg::from_short_name(name),
        [Token::RegNumber(n), Token::LParen, Token::Ident(name), Token::RParen] => {
            Cp0Reg::from_number(*n).filter(|r| r.short_name().eq_ignore_ascii_case(name))
        },
        _ => None
    }
}

/// Parses a single integer literal.
///
/// Decimal literals must fit in a signed 32-bit integer.
/// Hex and binary literals may use all 32 bits and are reinterpreted as signed
/// (e.g., `0xFFFFFFFF` is `-1`).
pub fn parse_int(src: &str) -> Result<i32, LexErr> {
    match &*tokenize(src.trim())? {
        [Token::Unsigned(n)] => Ok(*n as i32),
        [Token::Signed(n)]   => Ok(*n),
        _ => Err(LexErr::Unexpected)
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_cp0_reg, parse_int, parse_reg};
    use crate::ast::reg_consts::{RA, SP, T0, ZERO};
    use crate::ast::{Cp0Reg, RegId};
    use crate::parse::lex::LexErr;

    #[test]
    fn test_parse_reg_forms() {
        assert_eq!(parse_reg("$t0"), Some(RegId::Gpr(T0)));
        assert_eq!(parse_reg("$8"), Some(RegId::Gpr(T0)));
        assert_eq!(parse_reg("t0"), Some(RegId::Gpr(T0)));
        assert_eq!(parse_reg("$zero"), Some(RegId::Gpr(ZERO)));
        assert_eq!(parse_reg("$31"), Some(RegId::Gpr(RA)));
        assert_eq!(parse_reg(" $sp "), Some(RegId::Gpr(SP)));
        assert_eq!(parse_reg("PC"), Some(RegId::Pc));
        assert_eq!(parse_reg("hi"), Some(RegId::Hi));
        assert_eq!(parse_reg("lo"), Some(RegId::Lo));
    }

    #[test]
    fn test_parse_reg_not_found() {
        assert_eq!(parse_reg("$32"), None);
        assert_eq!(parse_reg("$t10"), None);
        assert_eq!(parse_reg("$pc"), None);
        assert_eq!(parse_reg(""), None);
        assert_eq!(parse_reg("$t0 $t1"), None);
        assert_eq!(parse_reg("#?"), None);
    }

    #[test]
    fn test_parse_cp0() {
        assert_eq!(parse_cp0_reg("$12"), Some(Cp0Reg::Status));
        assert_eq!(parse_cp0_reg("status"), Some(Cp0Reg::Status));
        assert_eq!(parse_cp0_reg("$epc"), Some(Cp0Reg::Epc));
        assert_eq!(parse_cp0_reg("$13 (cause)"), Some(Cp0Reg::Cause));
        assert_eq!(parse_cp0_reg("$13 (status)"), None);
        assert_eq!(parse_cp0_reg("$9"), None);
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("123"), Ok(123));
        assert_eq!(parse_int("  -5\n"), Ok(-5));
        assert_eq!(parse_int("0xFFFFFFFF"), Ok(-1));
        assert_eq!(parse_int("0b11"), Ok(3));
        assert_eq!(parse_int("1 2"), Err(LexErr::Unexpected));
        assert_eq!(parse_int(""), Err(LexErr::Unexpected));
        assert_eq!(parse_int("abc"), Err(LexErr::Unexpected));
        assert_eq!(parse_int("9x"), Err(LexErr::InvalidNumeric));
    }
}
