//! Error types used throughout the crate.
//!
//! This module re-exports the error of each stage in one place.

pub use crate::parse::lex::LexErr;
pub use crate::asm::ObjErr;
pub use crate::sim::mem::{AddressErr, LayoutErr};
pub use crate::sim::{ExceptionRaised, SimErr};
