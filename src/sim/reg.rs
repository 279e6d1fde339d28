//! The register store.
//!
//! This module consists of:
//! - [`RegisterFile`]: the 32 general-purpose registers plus PC, HI, and LO.
//! - [`Coprocessor0`]: the exception-handling registers (VADDR, STATUS, CAUSE, EPC).
//!
//! Both banks are only mutated through their `set` methods,
//! which journal the previous value and notify observers.

use crate::ast::reg_consts::{GP, SP, ZERO};
use crate::ast::{Cp0Reg, RegId};
use crate::parse::{parse_cp0_reg, parse_reg};
use super::backstep::{Backstepper, Change};
use super::mem::MemoryLayout;
use super::observer::{AccessEvent, AccessSet, Filter, ObserverBus, SubscriptionId, Target};

/// A single register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    name: String,
    number: u8,
    value: u32,
    default: u32
}
impl Register {
    fn new(name: impl Into<String>, number: u8, default: u32) -> Self {
        Self { name: name.into(), number, value: default, default }
    }
    /// The display name of the register.
    pub fn name(&self) -> &str {
        &self.name
    }
    /// The number of the register within its bank.
    pub fn number(&self) -> u8 {
        self.number
    }
    /// The current value.
    pub fn value(&self) -> u32 {
        self.value
    }
    /// The value the register takes on reset.
    pub fn default_value(&self) -> u32 {
        self.default
    }
}

/// The main register file.
///
/// # Example
///
/// ```
/// use mips_ensemble::sim::backstep::Backstepper;
/// use mips_ensemble::sim::mem::MemoryLayout;
/// use mips_ensemble::sim::reg::RegisterFile;
/// use mips_ensemble::ast::RegId;
/// use mips_ensemble::ast::reg_consts::{T0, ZERO};
///
/// let mut regs = RegisterFile::new(&MemoryLayout::default());
/// let mut journal = Backstepper::default();
///
/// regs.set(RegId::Gpr(T0), 11, &mut journal);
/// assert_eq!(regs.get(RegId::Gpr(T0)), 11);
///
/// regs.set(RegId::Gpr(ZERO), 11, &mut journal);
/// assert_eq!(regs.get(RegId::Gpr(ZERO)), 0);
/// ```
#[derive(Debug)]
pub struct RegisterFile {
    regs: [Register; RegId::COUNT],
    bus: ObserverBus
}

fn slot(id: RegId) -> usize {
    usize::from(id.number())
}

impl RegisterFile {
    /// Creates a register file with the defaults of the given layout.
    pub fn new(layout: &MemoryLayout) -> Self {
        let regs = std::array::from_fn(|i| {
            // RegId::COUNT fits in u8 and every index is a register number
            let id = RegId::from_number(i as u8).unwrap_or(RegId::Gpr(ZERO));
            Register::new(id.name(), i as u8, 0)
        });
        let mut file = Self { regs, bus: ObserverBus::new() };
        file.apply_defaults(layout);
        file
    }

    fn apply_defaults(&mut self, layout: &MemoryLayout) {
        for r in &mut self.regs {
            r.default = 0;
        }
        self.regs[slot(RegId::Gpr(GP))].default = layout.global_pointer();
        self.regs[slot(RegId::Gpr(SP))].default = layout.stack_pointer();
        self.regs[slot(RegId::Pc)].default = layout.text_base();
        for r in &mut self.regs {
            r.value = r.default;
        }
    }

    /// Gets the value of a register.
    ///
    /// This is a silent query. The engine reads registers with [`RegisterFile::read`].
    pub fn get(&self, id: RegId) -> u32 {
        self.regs[slot(id)].value
    }
    /// Reads a register, notifying any observers of the read.
    pub fn read(&mut self, id: RegId) -> u32 {
        let value = self.get(id);
        if self.bus.wants(AccessSet::READ) {
            self.bus.notify(AccessEvent { target: Target::Reg(id), old: value, new: value, accesses: AccessSet::READ });
        }
        value
    }
    /// Gets the full register entry.
    pub fn register(&self, id: RegId) -> &Register {
        &self.regs[slot(id)]
    }
    /// Iterates over every register in numeric order.
    pub fn iter(&self) -> impl Iterator<Item=&Register> {
        self.regs.iter()
    }

    /// Sets a register, returning its previous value.
    ///
    /// Writes to `$zero` are discarded (returning 0).
    /// Writes to the PC are equivalent to [`RegisterFile::set_pc`].
    pub fn set(&mut self, id: RegId, value: u32, journal: &mut Backstepper) -> u32 {
        match id {
            RegId::Gpr(ZERO) => 0,
            RegId::Pc => self.set_pc(value, journal),
            id => {
                let prev = std::mem::replace(&mut self.regs[slot(id)].value, value);
                journal.record(Change::Reg { reg: id, prev });
                self.notify_write(id, prev, value);
                prev
            }
        }
    }
    /// Sets a register by name (see [`RegisterFile::lookup`]), returning its previous value.
    ///
    /// Unknown names are ignored (returning 0).
    pub fn set_by_name(&mut self, name: &str, value: u32, journal: &mut Backstepper) -> u32 {
        match self.lookup(name) {
            Some(id) => self.set(id, value, journal),
            None => 0
        }
    }

    /// The program counter.
    pub fn pc(&self) -> u32 {
        self.regs[slot(RegId::Pc)].value
    }
    /// Sets the program counter, returning its previous value.
    pub fn set_pc(&mut self, value: u32, journal: &mut Backstepper) -> u32 {
        let prev = std::mem::replace(&mut self.regs[slot(RegId::Pc)].value, value);
        journal.record(Change::Pc { prev });
        self.notify_write(RegId::Pc, prev, value);
        prev
    }
    /// Sets the program counter without journaling or notifying.
    ///
    /// This is only meant for loading and resetting a program.
    pub fn init_pc(&mut self, value: u32) {
        self.regs[slot(RegId::Pc)].value = value;
    }
    /// Moves the program counter to the next instruction.
    pub fn increment_pc(&mut self, journal: &mut Backstepper) -> u32 {
        self.set_pc(self.pc().wrapping_add(4), journal)
    }

    /// Restores every register to its default (as given by the layout),
    /// and sets the program counter to the entry point.
    ///
    /// This does not journal or notify.
    pub fn reset(&mut self, layout: &MemoryLayout, entry: u32) {
        self.apply_defaults(layout);
        self.init_pc(entry);
    }

    /// Resolves a register by name or number (e.g., `$t0`, `$8`, `t0`, `pc`).
    pub fn lookup(&self, name: &str) -> Option<RegId> {
        parse_reg(name)
    }

    /// Writes back a journaled value.
    pub(crate) fn restore(&mut self, id: RegId, value: u32) {
        if id != RegId::Gpr(ZERO) {
            self.regs[slot(id)].value = value;
        }
    }

    fn notify_write(&mut self, id: RegId, old: u32, new: u32) {
        if self.bus.wants(AccessSet::WRITTEN | AccessSet::MODIFIED) {
            self.bus.notify(AccessEvent { target: Target::Reg(id), old, new, accesses: AccessSet::for_write(old, new) });
        }
    }

    /// Subscribes to accesses of one register (`Some`) or all registers (`None`).
    pub fn subscribe(&mut self, reg: Option<RegId>, accesses: AccessSet) -> (SubscriptionId, crossbeam_channel::Receiver<AccessEvent>) {
        let filter = reg.map_or(Filter::AllRegs, Filter::Reg);
        self.bus.subscribe(filter, accesses)
    }
    /// Revokes a subscription.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }
}

/// Coprocessor 0, the exception-handling register bank.
#[derive(Debug)]
pub struct Coprocessor0 {
    regs: [Register; Cp0Reg::COUNT],
    bus: ObserverBus
}
impl Coprocessor0 {
    /// STATUS: interrupt enable.
    pub const STATUS_IE: u32 = 1 << 0;
    /// STATUS: exception level.
    pub const STATUS_EXL: u32 = 1 << 1;
    /// STATUS: user mode.
    pub const STATUS_UM: u32 = 1 << 4;
    /// STATUS: interrupt mask (one bit per interrupt level, aligned with the CAUSE pending bits).
    pub const STATUS_INT_MASK: u32 = 0xFF00;
    /// CAUSE: exception code field.
    pub const CAUSE_EXC_CODE: u32 = 0x7C;
    /// CAUSE: pending interrupts.
    ///
    /// A bit is set when its interrupt is taken and cleared by `eret`.
    pub const CAUSE_PENDING: u32 = 0xFF00;

    /// Creates a new bank, with STATUS defaulting to the given value.
    pub fn new(status_default: u32) -> Self {
        let regs = std::array::from_fn(|i| {
            let r = Cp0Reg::all().nth(i).unwrap_or(Cp0Reg::VAddr);
            let default = if r == Cp0Reg::Status { status_default } else { 0 };
            Register::new(r.to_string(), r.number(), default)
        });
        Self { regs, bus: ObserverBus::new() }
    }

    /// Gets the value of a register (silently).
    pub fn get(&self, reg: Cp0Reg) -> u32 {
        self.regs[reg.index()].value
    }
    /// Reads a register, notifying any observers of the read.
    pub fn read(&mut self, reg: Cp0Reg) -> u32 {
        let value = self.get(reg);
        if self.bus.wants(AccessSet::READ) {
            self.bus.notify(AccessEvent { target: Target::Cp0(reg), old: value, new: value, accesses: AccessSet::READ });
        }
        value
    }
    /// Gets the full register entry.
    pub fn register(&self, reg: Cp0Reg) -> &Register {
        &self.regs[reg.index()]
    }
    /// Iterates over the registers.
    pub fn iter(&self) -> impl Iterator<Item=&Register> {
        self.regs.iter()
    }

    /// Sets a register, returning its previous value.
    pub fn set(&mut self, reg: Cp0Reg, value: u32, journal: &mut Backstepper) -> u32 {
        let prev = std::mem::replace(&mut self.regs[reg.index()].value, value);
        journal.record(Change::Cp0 { reg, prev });
        if self.bus.wants(AccessSet::WRITTEN | AccessSet::MODIFIED) {
            self.bus.notify(AccessEvent { target: Target::Cp0(reg), old: prev, new: value, accesses: AccessSet::for_write(prev, value) });
        }
        prev
    }
    /// Sets a register by name (see [`Coprocessor0::lookup`]), returning its previous value.
    ///
    /// Unknown names are ignored (returning 0).
    pub fn set_by_name(&mut self, name: &str, value: u32, journal: &mut Backstepper) -> u32 {
        match self.lookup(name) {
            Some(reg) => self.set(reg, value, journal),
            None => 0
        }
    }

    /// Restores every register to its default, updating the STATUS default.
    pub fn reset(&mut self, status_default: u32) {
        for r in &mut self.regs {
            if r.number == Cp0Reg::Status.number() {
                r.default = status_default;
            }
            r.value = r.default;
        }
    }

    /// Resolves a register by number or name (e.g., `$12`, `status`, `$12 (status)`).
    pub fn lookup(&self, name: &str) -> Option<Cp0Reg> {
        parse_cp0_reg(name)
    }

    /// Writes back a journaled value.
    pub(crate) fn restore(&mut self, reg: Cp0Reg, value: u32) {
        self.regs[reg.index()].value = value;
    }

    /// Whether the STATUS exception level bit is set.
    pub fn exception_level(&self) -> bool {
        self.get(Cp0Reg::Status) & Self::STATUS_EXL != 0
    }

    /// Subscribes to accesses of one register (`Some`) or all registers (`None`).
    pub fn subscribe(&mut self, reg: Option<Cp0Reg>, accesses: AccessSet) -> (SubscriptionId, crossbeam_channel::Receiver<AccessEvent>) {
        let filter = reg.map_or(Filter::AllCp0, Filter::Cp0);
        self.bus.subscribe(filter, accesses)
    }
    /// Revokes a subscription.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{Coprocessor0, RegisterFile};
    use crate::ast::reg_consts::{GP, SP, T0, ZERO};
    use crate::ast::{Cp0Reg, RegId};
    use crate::sim::backstep::Backstepper;
    use crate::sim::mem::{LayoutPreset, MemoryLayout};
    use crate::sim::observer::AccessSet;

    #[test]
    fn test_defaults() {
        let layout = MemoryLayout::default();
        let regs = RegisterFile::new(&layout);
        assert_eq!(regs.get(RegId::Gpr(GP)), 0x1000_8000);
        assert_eq!(regs.get(RegId::Gpr(SP)), 0x7FFF_EFFC);
        assert_eq!(regs.pc(), 0x0040_0000);
        assert_eq!(regs.register(RegId::Hi).name(), "hi");
        assert_eq!(regs.register(RegId::Gpr(T0)).number(), 8);
        assert_eq!(regs.iter().count(), 35);

        let cp0 = Coprocessor0::new(0x0000_FF11);
        assert_eq!(cp0.get(Cp0Reg::Status), 0x0000_FF11);
        assert_eq!(cp0.register(Cp0Reg::Status).name(), "$12 (status)");
        assert!(!cp0.exception_level());
    }

    #[test]
    fn test_reset() {
        let mut j = Backstepper::default();
        let mut regs = RegisterFile::new(&MemoryLayout::default());
        regs.set(RegId::Gpr(T0), 5, &mut j);
        regs.set(RegId::Lo, 5, &mut j);

        let compact = MemoryLayout::preset(LayoutPreset::CompactTextAtZero);
        regs.reset(&compact, 0x20);
        assert_eq!(regs.get(RegId::Gpr(T0)), 0);
        assert_eq!(regs.get(RegId::Lo), 0);
        assert_eq!(regs.get(RegId::Gpr(SP)), 0x3FFC);
        assert_eq!(regs.pc(), 0x20);
        assert_eq!(regs.register(RegId::Pc).default_value(), 0);

        regs.init_pc(0x40);
        assert_eq!(regs.pc(), 0x40);
        assert!(j.is_empty());

        let mut cp0 = Coprocessor0::new(0x0000_FF11);
        cp0.set(Cp0Reg::Status, 0x2, &mut j);
        cp0.set(Cp0Reg::Epc, 0x40, &mut j);
        cp0.reset(0x0000_FF11);
        assert_eq!(cp0.get(Cp0Reg::Status), 0x0000_FF11);
        assert_eq!(cp0.get(Cp0Reg::Epc), 0);
    }

    #[test]
    fn test_lookup_by_name() {
        let mut j = Backstepper::default();
        let mut regs = RegisterFile::new(&MemoryLayout::default());
        assert_eq!(regs.lookup("$t0"), regs.lookup("$8"));
        assert_eq!(regs.set_by_name("t0", 3, &mut j), 0);
        assert_eq!(regs.set_by_name("$t0", 4, &mut j), 3);
        assert_eq!(regs.set_by_name("$bogus", 4, &mut j), 0);
        assert_eq!(regs.get(RegId::Gpr(T0)), 4);

        let mut cp0 = Coprocessor0::new(0);
        assert_eq!(cp0.lookup("$14"), Some(Cp0Reg::Epc));
        cp0.set_by_name("$13 (cause)", 0x24, &mut j);
        assert_eq!(cp0.get(Cp0Reg::Cause), 0x24);
        assert_eq!(cp0.set_by_name("$3", 1, &mut j), 0);
    }

    #[test]
    fn test_observers() {
        let mut j = Backstepper::default();
        let mut regs = RegisterFile::new(&MemoryLayout::default());
        let (_, t0) = regs.subscribe(Some(RegId::Gpr(T0)), AccessSet::ALL);
        let (_, all) = regs.subscribe(None, AccessSet::WRITTEN);

        regs.set(RegId::Gpr(T0), 7, &mut j);
        regs.read(RegId::Gpr(T0));
        regs.get(RegId::Gpr(T0));
        regs.increment_pc(&mut j);
        regs.set(RegId::Gpr(ZERO), 1, &mut j);

        assert_eq!(t0.try_iter().count(), 2);
        let targets: Vec<_> = all.try_iter().map(|e| (e.old, e.new)).collect();
        assert_eq!(targets, [(0, 7), (0x0040_0000, 0x0040_0004)]);
    }

    proptest! {
        #[test]
        fn set_then_get(n in 0u8..35, value: u32) {
            let mut regs = RegisterFile::new(&MemoryLayout::default());
            let id = RegId::from_number(n).unwrap();
            regs.set(id, value, &mut Backstepper::default());

            let expected = if n == 0 { 0 } else { value };
            prop_assert_eq!(regs.get(id), expected);
        }
    }
}
