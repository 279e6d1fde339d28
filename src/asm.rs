//! Assembled programs, ready to be loaded into the simulator.
//!
//! Turning assembly source into machine code happens outside of this crate.
//! This module holds what the assembler hands over:
//! - [`ProgramStatement`]: one assembled instruction, with its address, encoding, and source
//! - [`ObjectFile`]: the statements of a program, its initial data image, and its labels
//!
//! An object file can also be built up directly from [`SimInstr`]s,
//! which is how most of this crate's tests construct programs:
//!
//! ```
//! use mips_ensemble::asm::ObjectFile;
//! use mips_ensemble::ast::sim::{SimInstr, ImmOp};
//! use mips_ensemble::ast::reg_consts::{T0, ZERO};
//!
//! let mut obj = ObjectFile::empty();
//! obj.add_text_block(0x0040_0000, &[
//!     SimInstr::AluImm(ImmOp::Addiu, T0, ZERO, 5),
//! ]).unwrap();
//! obj.add_label("main", 0x0040_0000);
//!
//! assert_eq!(obj.lookup_label("main"), Some(0x0040_0000));
//! assert_eq!(obj.statement(0x0040_0000).unwrap().source(), "addiu $t0, $zero, 5");
//! ```

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use crate::ast::sim::SimInstr;

/// A single assembled instruction.
///
/// Statements are produced by the assembler and are immutable once created.
/// The simulator keeps them for display and to know which text addresses hold code,
/// but always executes from the bits currently in memory.
#[derive(Debug, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ProgramStatement {
    address: u32,
    binary: u32,
    source_line: Option<usize>,
    source: String
}
impl ProgramStatement {
    /// Creates a new statement.
    pub fn new(address: u32, binary: u32, source_line: Option<usize>, source: impl Into<String>) -> Self {
        Self { address, binary, source_line, source: source.into() }
    }

    /// Creates a statement for an instruction with no source text,
    /// using its disassembly as the source.
    pub fn from_instr(address: u32, instr: SimInstr) -> Self {
        Self::new(address, instr.encode(), None, instr.to_string())
    }

    /// Creates a statement for a raw word which was not produced by the assembler
    /// (e.g., a word written into the text segment by the running program).
    pub fn from_binary(address: u32, binary: u32) -> Self {
        let source = match SimInstr::decode(binary) {
            Ok(instr) => instr.to_string(),
            Err(_) => format!(".word 0x{binary:08x}"),
        };
        Self::new(address, binary, None, source)
    }

    /// The address of this statement.
    pub fn address(&self) -> u32 {
        self.address
    }
    /// The machine encoding of this statement.
    pub fn binary(&self) -> u32 {
        self.binary
    }
    /// The source line this statement was assembled from, if known.
    pub fn source_line(&self) -> Option<usize> {
        self.source_line
    }
    /// The source text of this statement.
    pub fn source(&self) -> &str {
        &self.source
    }
    /// The decoded instruction, if the encoding is valid.
    pub fn instr(&self) -> Option<SimInstr> {
        SimInstr::decode(self.binary).ok()
    }
}

/// Errors which can occur while building or linking an [`ObjectFile`].
#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
pub enum ObjErr {
    /// A statement or data block was placed at an address that is not word-aligned.
    #[error("address 0x{0:08x} is not word-aligned")]
    MisalignedAddress(u32),
    /// Two statements or data blocks occupy the same memory.
    #[error("overlapping blocks at 0x{0:08x}")]
    OverlappingBlocks(u32),
    /// A label was bound to two different addresses.
    #[error("label {0} is defined at two different addresses")]
    OverlappingLabels(String),
}

/// An object file.
///
/// This is the final product after assembly source code is fully assembled.
/// This can be loaded in the simulator to run the assembled code.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ObjectFile {
    /// The program statements, keyed by address.
    statements: BTreeMap<u32, ProgramStatement>,

    /// A mapping of each data block's address to its words.
    ///
    /// Invariants:
    /// - Blocks are word-aligned.
    /// - Blocks do not overlap each other or any statement.
    block_map: BTreeMap<u32, Vec<u32>>,

    /// Labels and their addresses.
    labels: HashMap<String, u32>,

    /// The label execution starts at, if it is defined.
    start_label: String
}

/// Checks if two ranges overlap.
///
/// This assumes (start <= end) for both ranges.
fn ranges_overlap(a: Range<u64>, b: Range<u64>) -> bool {
    a.start < b.end && b.start < a.end
}
fn word_range(start: u32, len: usize) -> Range<u64> {
    u64::from(start) .. u64::from(start) + 4 * len as u64
}

impl ObjectFile {
    /// The default start label.
    pub const DEFAULT_START_LABEL: &'static str = "main";

    /// Creates an empty object file.
    pub fn empty() -> Self {
        ObjectFile {
            statements: BTreeMap::new(),
            block_map: BTreeMap::new(),
            labels: HashMap::new(),
            start_label: Self::DEFAULT_START_LABEL.to_string()
        }
    }

    fn check_free(&self, range: Range<u64>) -> Result<(), ObjErr> {
        let stmt_hit = self.statements.keys()
            .find(|&&a| ranges_overlap(word_range(a, 1), range.clone()));
        let block_hit = self.block_map.iter()
            .find(|(&a, b)| ranges_overlap(word_range(a, b.len()), range.clone()))
            .map(|(a, _)| a);

        match stmt_hit.or(block_hit) {
            Some(&a) => Err(ObjErr::OverlappingBlocks(a)),
            None => Ok(())
        }
    }

    /// Adds a program statement.
    pub fn add_statement(&mut self, stmt: ProgramStatement) -> Result<(), ObjErr> {
        let addr = stmt.address();
        if addr % 4 != 0 { return Err(ObjErr::MisalignedAddress(addr)) };
        self.check_free(word_range(addr, 1))?;

        self.statements.insert(addr, stmt);
        Ok(())
    }

    /// Adds a contiguous run of instructions as statements, starting at the given address.
    pub fn add_text_block(&mut self, start: u32, instrs: &[SimInstr]) -> Result<(), ObjErr> {
        for (i, &instr) in instrs.iter().enumerate() {
            let addr = start.wrapping_add(4 * i as u32);
            self.add_statement(ProgramStatement::from_instr(addr, instr))?;
        }
        Ok(())
    }

    /// Adds a block of initialized data words, starting at the given address.
    pub fn add_data_block(&mut self, start: u32, words: Vec<u32>) -> Result<(), ObjErr> {
        if start % 4 != 0 { return Err(ObjErr::MisalignedAddress(start)) };
        if words.is_empty() { return Ok(()) };
        self.check_free(word_range(start, words.len()))?;

        self.block_map.insert(start, words);
        Ok(())
    }

    /// Binds a label to an address, replacing any previous binding.
    pub fn add_label(&mut self, label: impl Into<String>, addr: u32) {
        self.labels.insert(label.into(), addr);
    }

    /// Sets the label that execution starts at (by default, `main`).
    pub fn set_start_label(&mut self, label: impl Into<String>) {
        self.start_label = label.into();
    }

    /// Links two object files, combining them into one.
    ///
    /// Statements and data blocks cannot overlap.
    /// Labels defined in both files must agree on their address.
    /// The start label of the first file is kept.
    pub fn link(mut a_obj: Self, b_obj: Self) -> Result<Self, ObjErr> {
        let Self { statements, block_map, labels, start_label: _ } = b_obj;

        for (_, stmt) in statements {
            a_obj.add_statement(stmt)?;
        }
        for (addr, block) in block_map {
            a_obj.add_data_block(addr, block)?;
        }
        for (label, addr) in labels {
            match a_obj.labels.entry(label) {
                Entry::Occupied(e) if *e.get() != addr => return Err(ObjErr::OverlappingLabels(e.key().clone())),
                Entry::Occupied(_) => {},
                Entry::Vacant(e) => { e.insert(addr); },
            }
        }

        Ok(a_obj)
    }

    /// Gets the address of a label.
    pub fn lookup_label(&self, label: &str) -> Option<u32> {
        self.labels.get(label).copied()
    }
    /// Gets a label bound to the address, if one exists.
    ///
    /// If several labels share the address, the alphabetically first one is returned.
    pub fn rev_lookup_label(&self, addr: u32) -> Option<&str> {
        self.labels.iter()
            .filter(|&(_, &a)| a == addr)
            .map(|(l, _)| l.as_str())
            .min()
    }
    /// The label execution starts at.
    pub fn start_label(&self) -> &str {
        &self.start_label
    }
    /// The address of the start label, if the label is defined.
    pub fn start_addr(&self) -> Option<u32> {
        self.lookup_label(&self.start_label)
    }

    /// Gets the statement at the given address.
    pub fn statement(&self, addr: u32) -> Option<&ProgramStatement> {
        self.statements.get(&addr)
    }
    /// Iterates over all statements in address order.
    pub fn statements(&self) -> impl Iterator<Item=&ProgramStatement> {
        self.statements.values()
    }
    /// Get an iterator over all of the data blocks of the object file.
    pub fn block_iter(&self) -> impl Iterator<Item=(u32, &[u32])> {
        self.block_map.iter()
            .map(|(&addr, block)| (addr, block.as_slice()))
    }
    /// Gets an iterator over every initialized data word (address, value) in the object file.
    pub fn addr_iter(&self) -> impl Iterator<Item=(u32, u32)> + '_ {
        self.block_iter()
            .flat_map(|(addr, block)| {
                block.iter()
                    .enumerate()
                    .map(move |(i, &v)| (addr.wrapping_add(4 * i as u32), v))
            })
    }
}

impl Default for ObjectFile {
    fn default() -> Self {
        Self::empty()
    }
}
