//! Tokenizing register references and numeric literals.
//!
//! This module holds the tokens used when a register or number is written as text
//! (e.g., a register name typed into a debugger, or an integer read by a syscall).
//!
//! The module's key data structure is the [`Token`] enum.

use std::num::IntErrorKind;

use logos::{Lexer, Logos};

/// A unit of information in a register reference or numeric literal.
#[derive(Debug, Logos, PartialEq, Eq, Clone)]
#[logos(skip r"[ \t]+", error = LexErr)]
pub enum Token {
    // Note, these regexes span over tokens that are technically invalid
    // (e.g., 23trst matches for unsigned even though it shouldn't).
    // This is intended.
    // These regexes collect what would be considered one discernable unit
    // and validates it using the validator function.

    /// An unsigned numeric value (e.g., `9`, `0x7F`, `0b101`)
    #[regex(r"\d\w*", lex_unsigned)]
    Unsigned(u32),

    /// A signed numeric value (e.g., `-9`, `-0x7F`)
    #[regex(r"-\w*", lex_signed)]
    Signed(i32),

    /// A register referenced by number (e.g., `$8`)
    #[regex(r"\$\d\w*", lex_reg_number)]
    RegNumber(u8),

    /// A register referenced by name (e.g., `$t0`, `$zero`)
    #[regex(r"\$[A-Za-z_]\w*", |lx| lx.slice()[1..].to_string())]
    RegName(String),

    /// An identifier (e.g., `t0`, `pc`, `status`)
    #[regex(r"[A-Za-z_]\w*", |lx| lx.slice().to_string())]
    Ident(String),

    /// An open parenthesis
    #[token("(")]
    LParen,

    /// A close parenthesis
    #[token(")")]
    RParen,
}

/// Any errors raised in attempting to tokenize an input stream.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, thiserror::Error)]
pub enum LexErr {
    /// Numeric literal cannot fit within 32 bits
    #[error("numeric literal does not fit within 32 bits")]
    DoesNotFit32,
    /// Hex literal (starting with 0x) has invalid hex digits
    #[error("invalid hex literal")]
    InvalidHex,
    /// Binary literal (starting with 0b) has invalid binary digits
    #[error("invalid binary literal")]
    InvalidBin,
    /// Numeric literal has invalid digits or no digits at all
    #[error("invalid numeric literal")]
    InvalidNumeric,
    /// Register number has invalid digits or is too large
    #[error("invalid register number")]
    InvalidRegNumber,
    /// Input was not the shape that was expected (e.g., two numbers where one was expected)
    #[error("unexpected input")]
    Unexpected,
    /// Token had no valid match
    #[default]
    #[error("unrecognized symbol")]
    InvalidSymbol,
}

/// Parses the magnitude of a literal, handling `0x` and `0b` prefixes.
///
/// Decimal literals are limited to the positive range of a signed 32-bit integer,
/// while hex and binary literals can use all 32 bits.
fn parse_magnitude(s: &str) -> Result<u64, LexErr> {
    fn map_err(e: std::num::ParseIntError, invalid: LexErr) -> LexErr {
        match e.kind() {
            IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => LexErr::DoesNotFit32,
            _ => invalid
        }
    }

    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
            .map(u64::from)
            .map_err(|e| map_err(e, LexErr::InvalidHex))
    } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        u32::from_str_radix(bin, 2)
            .map(u64::from)
            .map_err(|e| map_err(e, LexErr::InvalidBin))
    } else {
        s.parse::<i32>()
            .map_err(|e| map_err(e, LexErr::InvalidNumeric))
            .and_then(|n| u64::try_from(n).map_err(|_| LexErr::InvalidNumeric))
    }
}

fn lex_unsigned(lx: &Lexer<'_, Token>) -> Result<u32, LexErr> {
    parse_magnitude(lx.slice())
        .and_then(|n| u32::try_from(n).map_err(|_| LexErr::DoesNotFit32))
}
fn lex_signed(lx: &Lexer<'_, Token>) -> Result<i32, LexErr> {
    let mag = parse_magnitude(&lx.slice()[1..])?;

    // -0x80000000 is the only negative literal whose magnitude does not fit an i32
    match mag {
        0x8000_0000 => Ok(i32::MIN),
        m => i32::try_from(m).map(|m| -m).map_err(|_| LexErr::DoesNotFit32)
    }
}
fn lex_reg_number(lx: &Lexer<'_, Token>) -> Result<u8, LexErr> {
    lx.slice()[1..]
        .parse::<u8>()
        .map_err(|_| LexErr::InvalidRegNumber)
}

#[cfg(test)]
mod tests {
    use logos::Logos;

    use super::{LexErr, Token};

    fn lex(s: &str) -> Vec<Result<Token, LexErr>> {
        Token::lexer(s).collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(lex("42"), [Ok(Token::Unsigned(42))]);
        assert_eq!(lex("0x7F"), [Ok(Token::Unsigned(0x7F))]);
        assert_eq!(lex("0xFFFFFFFF"), [Ok(Token::Unsigned(u32::MAX))]);
        assert_eq!(lex("0b101"), [Ok(Token::Unsigned(5))]);
        assert_eq!(lex("-17"), [Ok(Token::Signed(-17))]);
        assert_eq!(lex("-0x10"), [Ok(Token::Signed(-16))]);
        assert_eq!(lex("-2147483648"), [Ok(Token::Signed(i32::MIN))]);
    }

    #[test]
    fn test_number_errors() {
        assert_eq!(lex("0xG1"), [Err(LexErr::InvalidHex)]);
        assert_eq!(lex("0b12"), [Err(LexErr::InvalidBin)]);
        assert_eq!(lex("12ab"), [Err(LexErr::InvalidNumeric)]);
        assert_eq!(lex("3000000000"), [Err(LexErr::DoesNotFit32)]);
        assert_eq!(lex("0x100000000"), [Err(LexErr::DoesNotFit32)]);
    }

    #[test]
    fn test_registers() {
        assert_eq!(lex("$t0"), [Ok(Token::RegName("t0".to_string()))]);
        assert_eq!(lex("$8"), [Ok(Token::RegNumber(8))]);
        assert_eq!(lex("pc"), [Ok(Token::Ident("pc".to_string()))]);
        assert_eq!(lex("$12 (status)"), [
            Ok(Token::RegNumber(12)),
            Ok(Token::LParen),
            Ok(Token::Ident("status".to_string())),
            Ok(Token::RParen),
        ]);
        assert_eq!(lex("$999"), [Err(LexErr::InvalidRegNumber)]);
    }
}
