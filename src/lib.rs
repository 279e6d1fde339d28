//! A MIPS32 simulator core.
//!
//! This is meant to be the execution backend of an educational MIPS IDE:
//! it executes assembled programs, supports undoing execution one instruction at a time,
//! and reports register and memory accesses to observers.
//!
//! # Usage
//!
//! Programs are given to the simulator as object files,
//! which hold the program's statements, its initial data, and its labels:
//! ```
//! use mips_ensemble::asm::ObjectFile;
//! use mips_ensemble::ast::reg_consts::{A0, V0, ZERO};
//! use mips_ensemble::ast::sim::{ImmOp, SimInstr};
//!
//! let mut obj_file = ObjectFile::empty();
//! obj_file.add_text_block(0x0040_0000, &[
//!     SimInstr::AluImm(ImmOp::Addiu, A0, ZERO, 2),
//!     SimInstr::AluImm(ImmOp::Addiu, V0, ZERO, 17),
//!     SimInstr::Syscall,
//! ]).unwrap();
//! obj_file.add_label("main", 0x0040_0000);
//! ```
//!
//! Once an object file has been created, it can be executed with the simulator:
//! ```
//! # use mips_ensemble::asm::ObjectFile;
//! # use mips_ensemble::ast::reg_consts::{A0, V0, ZERO};
//! # use mips_ensemble::ast::sim::{ImmOp, SimInstr};
//! #
//! # let mut obj_file = ObjectFile::empty();
//! # obj_file.add_text_block(0x0040_0000, &[
//! #     SimInstr::AluImm(ImmOp::Addiu, A0, ZERO, 2),
//! #     SimInstr::AluImm(ImmOp::Addiu, V0, ZERO, 17),
//! #     SimInstr::Syscall,
//! # ]).unwrap();
//! use mips_ensemble::sim::{RunState, Simulator};
//!
//! let mut simulator = Simulator::new(Default::default());
//! simulator.load_obj_file(&obj_file).unwrap();
//!
//! let state = simulator.run().unwrap(); // <-- Result can be handled accordingly
//! assert!(matches!(state, RunState::Finished(fin) if fin.exit_code == Some(2)));
//! ```
//!
//! If more granularity is needed for simulation, there are also step-in and step-back functions.
//! See the [`sim`] module for more details.
#![warn(missing_docs)]

pub mod parse;
pub mod ast;
pub mod asm;
pub mod sim;
pub mod err;
