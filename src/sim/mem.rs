//! Memory handling for the MIPS simulator.
//!
//! This module consists of:
//! - [`MemoryLayout`]: The segments of the address space and its distinguished addresses.
//! - [`Memory`]: The memory.
//! - [`AddressErr`]: The error raised for misaligned or unmapped accesses.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::asm::ProgramStatement;
use crate::ast::sim::SimInstr;
use super::backstep::{Backstepper, Change};
use super::observer::{AccessEvent, AccessSet, Filter, ObserverBus, SubscriptionId, Target};
use super::SimErr;

/// The width of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    /// 1 byte.
    Byte,
    /// 2 bytes.
    Half,
    /// 4 bytes.
    Word
}
impl Width {
    /// The number of bytes accessed.
    pub fn bytes(self) -> u32 {
        match self {
            Width::Byte => 1,
            Width::Half => 2,
            Width::Word => 4,
        }
    }
    fn mask(self) -> u32 {
        match self {
            Width::Byte => 0xFF,
            Width::Half => 0xFFFF,
            Width::Word => 0xFFFF_FFFF,
        }
    }
}

/// A named region of the address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Segment {
    /// User program text.
    Text,
    /// Global data addressed relative to `$gp`.
    Extern,
    /// Static data.
    Data,
    /// Heap (growing up) and stack (growing down).
    Heap,
    /// Kernel text (exception handler).
    KernelText,
    /// Kernel data.
    KernelData,
    /// Memory-mapped IO.
    Mmio
}
impl Segment {
    /// Whether this segment holds instructions.
    pub fn is_text(self) -> bool {
        matches!(self, Segment::Text | Segment::KernelText)
    }
}
impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Segment::Text => ".text",
            Segment::Extern => ".extern",
            Segment::Data => ".data",
            Segment::Heap => "heap/stack",
            Segment::KernelText => ".ktext",
            Segment::KernelData => ".kdata",
            Segment::Mmio => "mmio",
        };
        f.write_str(name)
    }
}

/// The address range of a segment (`base..=limit`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SegmentRange {
    /// The segment.
    pub segment: Segment,
    /// The first address of the segment.
    pub base: u32,
    /// The last address of the segment (inclusive).
    pub limit: u32
}
impl SegmentRange {
    /// Creates a new segment range.
    pub const fn new(segment: Segment, base: u32, limit: u32) -> Self {
        Self { segment, base, limit }
    }
    /// Whether the address lies in this range.
    pub fn contains(&self, addr: u32) -> bool {
        (self.base..=self.limit).contains(&addr)
    }
}

/// The unvalidated parts of a [`MemoryLayout`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct LayoutConfig {
    /// The segments of the address space, in any order.
    pub segments: Vec<SegmentRange>,
    /// Where the static data block starts.
    pub data_base: u32,
    /// Where the heap starts.
    pub heap_base: u32,
    /// Initial value of `$gp`.
    pub global_pointer: u32,
    /// Initial value of `$sp`.
    pub stack_pointer: u32,
    /// Address of the exception handler.
    pub exception_handler: u32
}

/// Errors from an invalid memory layout.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutErr {
    /// A segment's limit is below its base.
    #[error("segment {0} has a limit below its base")]
    InvertedRange(Segment),
    /// A segment was listed more than once.
    #[error("segment {0} is defined more than once")]
    DuplicateSegment(Segment),
    /// Two segments share addresses.
    #[error("segments {0} and {1} overlap")]
    Overlap(Segment, Segment),
    /// A required segment was not listed.
    #[error("layout is missing segment {0}")]
    MissingSegment(Segment),
    /// A distinguished address lies outside of the segment it should be in.
    #[error("{name} (0x{addr:08x}) is outside of its segment")]
    AddressOutside {
        /// Which address.
        name: &'static str,
        /// The offending value.
        addr: u32
    },
}

/// The named presets a [`MemoryLayout`] can be created from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum LayoutPreset {
    /// Text at `0x00400000`, data at `0x10010000`, kernel at `0x80000000`.
    #[default]
    Default,
    /// A 32 KiB address space with data starting at address 0.
    CompactDataAtZero,
    /// A 32 KiB address space with text starting at address 0.
    CompactTextAtZero,
}

/// The layout of the address space.
///
/// A layout is a validated set of segments (non-overlapping and sorted by base address),
/// so any address resolves to at most one segment.
///
/// ```
/// use mips_ensemble::sim::mem::{MemoryLayout, Segment};
///
/// let layout = MemoryLayout::default();
/// assert_eq!(layout.text_base(), 0x0040_0000);
/// assert_eq!(layout.segment_of(0x1001_0000), Some(Segment::Data));
/// assert_eq!(layout.segment_of(0xFFFF_0000), Some(Segment::Mmio));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(try_from = "LayoutConfig", into = "LayoutConfig"))]
pub struct MemoryLayout {
    config: LayoutConfig
}
impl MemoryLayout {
    /// Validates a layout.
    pub fn new(mut config: LayoutConfig) -> Result<Self, LayoutErr> {
        config.segments.sort_by_key(|s| s.base);

        if let Some(s) = config.segments.iter().find(|s| s.limit < s.base) {
            return Err(LayoutErr::InvertedRange(s.segment));
        }
        let mut seen = BTreeSet::new();
        if let Some(s) = config.segments.iter().find(|s| !seen.insert(s.segment)) {
            return Err(LayoutErr::DuplicateSegment(s.segment));
        }
        for pair in config.segments.windows(2) {
            if pair[1].base <= pair[0].limit {
                return Err(LayoutErr::Overlap(pair[0].segment, pair[1].segment));
            }
        }
        for required in [Segment::Text, Segment::Data, Segment::Heap] {
            if !seen.contains(&required) {
                return Err(LayoutErr::MissingSegment(required));
            }
        }

        let layout = Self { config };
        let c = &layout.config;
        let checks: [(&'static str, u32, fn(Segment) -> bool); 5] = [
            ("data base", c.data_base, |s| s == Segment::Data),
            ("heap base", c.heap_base, |s| s == Segment::Heap),
            ("stack pointer", c.stack_pointer, |s| s == Segment::Heap),
            ("global pointer", c.global_pointer, |_| true),
            ("exception handler", c.exception_handler, Segment::is_text),
        ];
        for (name, addr, pred) in checks {
            if !layout.segment_of(addr).is_some_and(pred) {
                return Err(LayoutErr::AddressOutside { name, addr });
            }
        }

        Ok(layout)
    }

    /// Creates the layout for one of the presets.
    pub fn preset(preset: LayoutPreset) -> Self {
        use Segment::*;

        let config = match preset {
            LayoutPreset::Default => LayoutConfig {
                segments: vec![
                    SegmentRange::new(Text,       0x0040_0000, 0x0FFF_FFFF),
                    SegmentRange::new(Extern,     0x1000_0000, 0x1000_FFFF),
                    SegmentRange::new(Data,       0x1001_0000, 0x1003_FFFF),
                    SegmentRange::new(Heap,       0x1004_0000, 0x7FFF_FFFF),
                    SegmentRange::new(KernelText, 0x8000_0000, 0x8FFF_FFFF),
                    SegmentRange::new(KernelData, 0x9000_0000, 0xFFFE_FFFF),
                    SegmentRange::new(Mmio,       0xFFFF_0000, 0xFFFF_FFFF),
                ],
                data_base: 0x1001_0000,
                heap_base: 0x1004_0000,
                global_pointer: 0x1000_8000,
                stack_pointer: 0x7FFF_EFFC,
                exception_handler: 0x8000_0180,
            },
            LayoutPreset::CompactDataAtZero => LayoutConfig {
                segments: vec![
                    SegmentRange::new(Data,       0x0000, 0x0FFF),
                    SegmentRange::new(Extern,     0x1000, 0x1FFF),
                    SegmentRange::new(Heap,       0x2000, 0x2FFF),
                    SegmentRange::new(Text,       0x3000, 0x3FFF),
                    SegmentRange::new(KernelText, 0x4000, 0x4FFF),
                    SegmentRange::new(KernelData, 0x5000, 0x7EFF),
                    SegmentRange::new(Mmio,       0x7F00, 0x7FFF),
                ],
                data_base: 0x0000,
                heap_base: 0x2000,
                global_pointer: 0x1800,
                stack_pointer: 0x2FFC,
                exception_handler: 0x4180,
            },
            LayoutPreset::CompactTextAtZero => LayoutConfig {
                segments: vec![
                    SegmentRange::new(Text,       0x0000, 0x0FFF),
                    SegmentRange::new(Extern,     0x1000, 0x1FFF),
                    SegmentRange::new(Data,       0x2000, 0x2FFF),
                    SegmentRange::new(Heap,       0x3000, 0x3FFF),
                    SegmentRange::new(KernelText, 0x4000, 0x4FFF),
                    SegmentRange::new(KernelData, 0x5000, 0x7EFF),
                    SegmentRange::new(Mmio,       0x7F00, 0x7FFF),
                ],
                data_base: 0x2000,
                heap_base: 0x3000,
                global_pointer: 0x1800,
                stack_pointer: 0x3FFC,
                exception_handler: 0x4180,
            },
        };

        // Presets are known to be ordered and non-overlapping.
        let mut config = config;
        config.segments.sort_by_key(|s| s.base);
        Self { config }
    }

    /// The segments, sorted by base address.
    pub fn segments(&self) -> &[SegmentRange] {
        &self.config.segments
    }
    /// The range of a given segment, if the layout has it.
    pub fn range_of(&self, segment: Segment) -> Option<&SegmentRange> {
        self.config.segments.iter().find(|s| s.segment == segment)
    }
    /// The segment an address resolves to.
    pub fn segment_of(&self, addr: u32) -> Option<Segment> {
        self.config.segments.iter()
            .find(|s| s.contains(addr))
            .map(|s| s.segment)
    }

    /// The first address of the text segment.
    pub fn text_base(&self) -> u32 {
        self.range_of(Segment::Text).map_or(0, |s| s.base)
    }
    /// Where the static data block starts.
    pub fn data_base(&self) -> u32 {
        self.config.data_base
    }
    /// Where the heap starts.
    pub fn heap_base(&self) -> u32 {
        self.config.heap_base
    }
    /// The last address the heap can grow to.
    pub fn heap_limit(&self) -> u32 {
        self.range_of(Segment::Heap).map_or(0, |s| s.limit)
    }
    /// Initial value of `$gp`.
    pub fn global_pointer(&self) -> u32 {
        self.config.global_pointer
    }
    /// Initial value of `$sp`.
    pub fn stack_pointer(&self) -> u32 {
        self.config.stack_pointer
    }
    /// Address of the exception handler.
    pub fn exception_handler(&self) -> u32 {
        self.config.exception_handler
    }
    /// The first address of the MMIO segment, if the layout has one.
    pub fn mmio_base(&self) -> Option<u32> {
        self.range_of(Segment::Mmio).map(|s| s.base)
    }
}
impl Default for MemoryLayout {
    fn default() -> Self {
        Self::preset(LayoutPreset::Default)
    }
}
impl TryFrom<LayoutConfig> for MemoryLayout {
    type Error = LayoutErr;

    fn try_from(value: LayoutConfig) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
impl From<MemoryLayout> for LayoutConfig {
    fn from(value: MemoryLayout) -> Self {
        value.config
    }
}

/// The kind of access which caused an [`AddressErr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    /// A data load.
    Load,
    /// A data store.
    Store,
    /// An instruction fetch.
    Fetch
}
impl std::fmt::Display for AccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessKind::Load  => f.write_str("load"),
            AccessKind::Store => f.write_str("store"),
            AccessKind::Fetch => f.write_str("fetch"),
        }
    }
}

/// Why an address could not be accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum AddrFault {
    /// The address is not a multiple of the access width.
    #[error("address is not aligned")]
    Misaligned,
    /// The address is outside of every segment (or, for fetches, outside of text).
    #[error("address is out of range")]
    Unmapped,
    /// Data accesses to text require self-modifying code to be enabled.
    #[error("cannot access text segment directly")]
    TextProtected,
}

/// An error raised when accessing an invalid address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[error("{kind} at 0x{addr:08x} failed: {fault}")]
pub struct AddressErr {
    /// The offending address.
    pub addr: u32,
    /// The kind of access.
    pub kind: AccessKind,
    /// Why the access failed.
    pub fault: AddrFault
}

const PAGE_BITS: u32 = 12;
const PAGE_SIZE: usize = 1 << PAGE_BITS;
type Page = Box<[u8; PAGE_SIZE]>;

/// Memory.
///
/// This can be addressed with any `u32` (32-bit address), and is stored little-endian.
/// Storage is allocated in 4 KiB pages on first write,
/// so unwritten addresses read as zero.
///
/// Note that this struct provides two methods of accessing memory:
/// - [`Memory::get_word`] (and `get_half`, `get_byte`): silent queries of memory's current state
/// - [`Memory::read`] and [`Memory::write`]: memory access with segment checks, journaling, and notification
///
/// ```
/// use mips_ensemble::sim::backstep::Backstepper;
/// use mips_ensemble::sim::mem::{Memory, MemoryLayout, Width};
///
/// let mut mem = Memory::new(MemoryLayout::default());
/// let mut journal = Backstepper::default();
///
/// assert!(mem.write(0x1001_0000, Width::Word, 0xDEADBEEF, &mut journal).is_ok());
/// assert_eq!(mem.get_byte(0x1001_0000), 0xEF);
/// assert!(mem.write(0x1001_0001, Width::Word, 0, &mut journal).is_err());
/// assert!(mem.read(0x0000_0000, Width::Word).is_err());
/// ```
#[derive(Debug)]
pub struct Memory {
    layout: MemoryLayout,
    pages: HashMap<u32, Page>,
    statements: BTreeMap<u32, ProgramStatement>,
    /// Text words written while the program ran.
    modified_text: BTreeSet<u32>,
    decode_cache: HashMap<u32, SimInstr>,
    self_modifying: bool,
    bus: ObserverBus
}
impl Memory {
    /// Creates a new, empty memory.
    pub fn new(layout: MemoryLayout) -> Self {
        Self {
            layout,
            pages: HashMap::new(),
            statements: BTreeMap::new(),
            modified_text: BTreeSet::new(),
            decode_cache: HashMap::new(),
            self_modifying: false,
            bus: ObserverBus::new()
        }
    }

    /// The layout of this memory.
    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }
    /// The segment an address resolves to.
    pub fn segment_of(&self, addr: u32) -> Option<Segment> {
        self.layout.segment_of(addr)
    }

    /// Whether writes to text are allowed.
    pub fn self_modifying(&self) -> bool {
        self.self_modifying
    }
    /// Allows or refuses writes to text.
    pub fn set_self_modifying(&mut self, enabled: bool) {
        self.self_modifying = enabled;
    }

    /// Clears the memory (keeping subscribers) and switches to a new layout.
    pub(crate) fn reset(&mut self, layout: MemoryLayout) {
        self.layout = layout;
        self.pages.clear();
        self.statements.clear();
        self.modified_text.clear();
        self.decode_cache.clear();
    }

    fn get_raw(&self, addr: u32, width: Width) -> u32 {
        (0..width.bytes())
            .map(|i| addr.wrapping_add(i))
            .map(|a| {
                self.pages.get(&(a >> PAGE_BITS))
                    .map_or(0, |p| p[(a as usize) & (PAGE_SIZE - 1)])
            })
            .rev()
            .fold(0, |acc, b| (acc << 8) | u32::from(b))
    }
    fn set_raw(&mut self, addr: u32, width: Width, value: u32) {
        for i in 0..width.bytes() {
            let a = addr.wrapping_add(i);
            let byte = (value >> (8 * i)) as u8;

            // don't allocate a page just to write zero to it
            if byte == 0 && !self.pages.contains_key(&(a >> PAGE_BITS)) { continue };

            let page = self.pages.entry(a >> PAGE_BITS)
                .or_insert_with(|| Box::new([0; PAGE_SIZE]));
            page[(a as usize) & (PAGE_SIZE - 1)] = byte;
        }
    }

    /// Gets the word at the given address from memory's current state.
    ///
    /// This is **only** meant to query the state of the memory:
    /// it does not check segments, notify observers, or trigger device effects.
    /// The address is aligned down to a word boundary.
    pub fn get_word(&self, addr: u32) -> u32 {
        self.get_raw(addr & !0b11, Width::Word)
    }
    /// Gets the halfword at the given address (aligned down) from memory's current state.
    pub fn get_half(&self, addr: u32) -> u16 {
        self.get_raw(addr & !0b1, Width::Half) as u16
    }
    /// Gets the byte at the given address from memory's current state.
    pub fn get_byte(&self, addr: u32) -> u8 {
        self.get_raw(addr, Width::Byte) as u8
    }

    fn check(&self, addr: u32, width: Width, kind: AccessKind) -> Result<Segment, AddressErr> {
        let err = |fault| AddressErr { addr, kind, fault };

        if addr % width.bytes() != 0 {
            return Err(err(AddrFault::Misaligned));
        }
        let segment = self.segment_of(addr).ok_or(err(AddrFault::Unmapped))?;
        if segment.is_text() && !self.self_modifying {
            return Err(err(AddrFault::TextProtected));
        }
        Ok(segment)
    }

    /// Reads a value from memory, as a program load would.
    ///
    /// The value is zero-extended to 32 bits.
    /// This fails if the address is misaligned, unmapped, or in text
    /// (unless self-modifying code is enabled).
    pub fn read(&mut self, addr: u32, width: Width) -> Result<u32, AddressErr> {
        let segment = self.check(addr, width, AccessKind::Load)?;
        let value = self.get_raw(addr, width);

        if self.bus.wants(AccessSet::READ) {
            self.bus.notify(AccessEvent {
                target: Target::Mem { addr, width, segment },
                old: value,
                new: value,
                accesses: AccessSet::READ
            });
        }
        Ok(value)
    }
    /// Reads a word from memory. See [`Memory::read`].
    pub fn read_word(&mut self, addr: u32) -> Result<u32, AddressErr> {
        self.read(addr, Width::Word)
    }
    /// Reads a halfword from memory. See [`Memory::read`].
    pub fn read_half(&mut self, addr: u32) -> Result<u16, AddressErr> {
        self.read(addr, Width::Half).map(|v| v as u16)
    }
    /// Reads a byte from memory. See [`Memory::read`].
    pub fn read_byte(&mut self, addr: u32) -> Result<u8, AddressErr> {
        self.read(addr, Width::Byte).map(|v| v as u8)
    }

    /// Writes a value to memory, as a program store would.
    ///
    /// Only the low bits of `value` that fit the width are written.
    /// On success, this returns the previous value at the location.
    ///
    /// The write is committed before observers are notified,
    /// and the previous value is recorded to the journal.
    /// On failure, memory is left unchanged.
    pub fn write(&mut self, addr: u32, width: Width, value: u32, journal: &mut Backstepper) -> Result<u32, AddressErr> {
        let segment = self.check(addr, width, AccessKind::Store)?;
        let value = value & width.mask();
        let prev = self.get_raw(addr, width);

        self.set_raw(addr, width, value);
        journal.record(Change::Mem { addr, width, prev });

        if segment.is_text() {
            let word_addr = addr & !0b11;
            self.decode_cache.remove(&word_addr);
            if self.modified_text.insert(word_addr) {
                journal.record(Change::TextMark { addr: word_addr });
            }
        }

        if self.bus.wants(AccessSet::WRITTEN | AccessSet::MODIFIED) {
            self.bus.notify(AccessEvent {
                target: Target::Mem { addr, width, segment },
                old: prev,
                new: value,
                accesses: AccessSet::for_write(prev, value)
            });
        }
        Ok(prev)
    }
    /// Writes a word to memory. See [`Memory::write`].
    pub fn write_word(&mut self, addr: u32, value: u32, journal: &mut Backstepper) -> Result<u32, AddressErr> {
        self.write(addr, Width::Word, value, journal)
    }
    /// Writes a halfword to memory. See [`Memory::write`].
    pub fn write_half(&mut self, addr: u32, value: u16, journal: &mut Backstepper) -> Result<u16, AddressErr> {
        self.write(addr, Width::Half, u32::from(value), journal).map(|v| v as u16)
    }
    /// Writes a byte to memory. See [`Memory::write`].
    pub fn write_byte(&mut self, addr: u32, value: u8, journal: &mut Backstepper) -> Result<u8, AddressErr> {
        self.write(addr, Width::Byte, u32::from(value), journal).map(|v| v as u8)
    }

    /// Silently sets memory, used for device mirroring.
    pub(crate) fn poke(&mut self, addr: u32, width: Width, value: u32) {
        self.set_raw(addr, width, value & width.mask());
    }
    /// Writes back a journaled value.
    pub(crate) fn restore(&mut self, addr: u32, width: Width, prev: u32) {
        self.set_raw(addr, width, prev);
        self.decode_cache.remove(&(addr & !0b11));
    }
    /// Reverts a text word to its loaded (not self-modified) state.
    pub(crate) fn unmark_text(&mut self, addr: u32) {
        self.modified_text.remove(&addr);
        self.decode_cache.remove(&addr);
    }

    /// Installs an initial data image.
    ///
    /// This bypasses segment checks, journaling, and notification.
    pub fn load_image(&mut self, image: &[(u32, u32)]) {
        for &(addr, word) in image {
            self.set_raw(addr, Width::Word, word);
        }
    }
    /// Installs program statements (and their binary encodings) into text.
    ///
    /// This bypasses segment checks, journaling, and notification.
    pub fn load_statements<'a>(&mut self, stmts: impl IntoIterator<Item=&'a ProgramStatement>) {
        for stmt in stmts {
            self.set_raw(stmt.address(), Width::Word, stmt.binary());
            self.decode_cache.remove(&stmt.address());
            self.statements.insert(stmt.address(), stmt.clone());
        }
    }

    /// Whether there is an instruction at the given text address
    /// (a loaded statement or a self-modified word).
    pub fn is_occupied(&self, addr: u32) -> bool {
        self.modified_text.contains(&addr) || self.statements.contains_key(&addr)
    }

    /// Gets the statement at the given address.
    ///
    /// For words written while the program ran, this is synthesized
    /// from the current bits in memory.
    pub fn statement(&self, addr: u32) -> Option<Cow<'_, ProgramStatement>> {
        if self.modified_text.contains(&addr) {
            Some(Cow::Owned(ProgramStatement::from_binary(addr, self.get_word(addr))))
        } else {
            self.statements.get(&addr).map(Cow::Borrowed)
        }
    }

    /// Fetches and decodes the instruction at the given address.
    ///
    /// This returns `Ok(None)` if there is no instruction at the address.
    /// Decodes are cached per address until the word is written.
    pub fn fetch(&mut self, addr: u32) -> Result<Option<SimInstr>, SimErr> {
        let err = |fault| AddressErr { addr, kind: AccessKind::Fetch, fault };
        if addr % 4 != 0 {
            return Err(err(AddrFault::Misaligned).into());
        }
        if !self.segment_of(addr).is_some_and(Segment::is_text) {
            return Err(err(AddrFault::Unmapped).into());
        }
        if !self.is_occupied(addr) {
            return Ok(None);
        }

        if let Some(&instr) = self.decode_cache.get(&addr) {
            return Ok(Some(instr));
        }
        let instr = SimInstr::decode(self.get_word(addr))?;
        self.decode_cache.insert(addr, instr);
        Ok(Some(instr))
    }

    /// Subscribes to accesses of a memory range. See [`ObserverBus::subscribe`].
    pub fn subscribe(&mut self, range: std::ops::RangeInclusive<u32>, accesses: AccessSet) -> (SubscriptionId, crossbeam_channel::Receiver<AccessEvent>) {
        self.bus.subscribe(Filter::MemRange(range), accesses)
    }
    /// Revokes a subscription. See [`ObserverBus::unsubscribe`].
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }
}
