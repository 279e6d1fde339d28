//! Simulating and execution for MIPS32 machine code.
//!
//! This module is focused on executing fully assembled code (i.e., [`ObjectFile`]).
//!
//! This module consists of:
//! - [`Simulator`]: The struct that simulates assembled code.
//! - [`mem`]: The module handling memory and the segment layout.
//! - [`reg`]: The module handling the register file and coprocessor 0.
//! - [`backstep`]: The module handling the undo journal.
//! - [`observer`]: The module handling subscriptions to register and memory accesses.
//! - [`device`]: The module handling memory-mapped IO, interrupts, and general handling of external devices.
//! - [`io`]: The module handling the console used by syscalls.
//! - [`syscall`]: The module handling syscall services.
//! - [`debug`]: The module handling breakpoints.
//! - [`worker`]: The module handling running the simulator on its own thread.
//!
//! # Usage
//!
//! To simulate some code, you need to instantiate a Simulator and load an object file to it:
//!
//! ```
//! use mips_ensemble::asm::ObjectFile;
//! use mips_ensemble::ast::reg_consts::{T0, V0, ZERO};
//! use mips_ensemble::ast::sim::{ImmOp, SimInstr};
//! use mips_ensemble::ast::RegId;
//! use mips_ensemble::sim::{FinishReason, RunState, Simulator};
//!
//! let mut obj = ObjectFile::empty();
//! obj.add_text_block(0x0040_0000, &[
//!     SimInstr::AluImm(ImmOp::Addiu, T0, ZERO, 3),
//!     SimInstr::AluImm(ImmOp::Addiu, T0, T0, 4),
//!     SimInstr::AluImm(ImmOp::Addiu, V0, ZERO, 10),
//!     SimInstr::Syscall,
//! ]).unwrap();
//!
//! let mut sim = Simulator::new(Default::default());
//! sim.load_obj_file(&obj).unwrap();
//!
//! let RunState::Finished(fin) = sim.run().unwrap() else { unreachable!() };
//! assert_eq!(fin.reason, FinishReason::ExitSyscall);
//! assert_eq!(sim.reg_file.get(RegId::Gpr(T0)), 7);
//! ```
//!
//! ## Flags
//!
//! The simulator can be configured by editing its flags.
//! For example, to enable delayed branching:
//!
//! ```
//! # use mips_ensemble::sim::{Simulator, SimFlags};
//! let mut simulator = Simulator::new(SimFlags { delayed_branching: true, ..Default::default() });
//! ```
//!
//! All of the available flags can be found in [`SimFlags`].
//!
//! ## Execution
//!
//! Beyond the basic [`Simulator::run`] (which runs until the program finishes),
//! there are also:
//! - [`Simulator::step_in`]: manual step-by-step simulation
//! - [`Simulator::step_back`]: undoing one step
//! - [`Simulator::run_while`], [`Simulator::run_with_limit`]: more advanced programmatic execution
//!
//! A program finishes when it exits through a syscall, runs off the end of its text,
//! raises an exception with no handler installed, or is stopped externally
//! (via the flag returned by [`Simulator::run_flag`]).
//! Once finished, further execution calls report the same [`FinishEvent`] until [`Simulator::reset`].
//!
//! ## Querying State
//!
//! - The register file and coprocessor 0 are accessible through the `reg_file` and `cp0` fields.
//! - Memory can be accessed in two ways:
//!     - Directly through the `mem` field, which provides silent queries ([`Memory::get_word`]).
//!     - [`Simulator::read_mem`] and [`Simulator::write_mem`], which are used for accesses
//!       which do trigger address errors and IO.
//!
//! Changes can be observed with [`Simulator::subscribe`].
//!
//! ## Debugging with breakpoints
//!
//! Breakpoints are accessible through the `breakpoints` field on [`Simulator`].
//!
//! Execution pauses before the instruction at a breakpoint is executed.
//! The first cycle of every run call ignores breakpoints, so that resuming from a breakpoint makes progress.
//!
//! ## IO, interrupts, and external devices
//!
//! IO and interrupts are handled by "external devices" (the trait [`ExternalDevice`]).
//! These are registered in the Simulator's device handler (the `device_handler` field).
//!
//! When a load or store to the memory-mapped IO segment occurs,
//! the device handler sends the corresponding load/store to the device for it to handle.
//!
//! Devices can raise interrupts, which are taken when interrupts are enabled in STATUS
//! and an exception handler is installed.
//!
//! [`ExternalDevice`]: device::ExternalDevice
//! [`Memory::get_word`]: mem::Memory::get_word

pub mod mem;
pub mod reg;
pub mod backstep;
pub mod observer;
pub mod debug;
pub mod device;
pub mod io;
pub mod syscall;
pub mod worker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;

use crate::asm::ObjectFile;
use crate::ast::reg_consts::RA;
use crate::ast::sim::{AccumOp, AluOp, CountOp, ImmOp, LoadOp, MulDivOp, ShiftOp, SimInstr, StoreOp};
use crate::ast::{Cp0Reg, Reg, RegId};
use backstep::{Backstepper, Change, Restore};
use debug::Breakpoints;
use device::{DeviceHandler, ExternalDevice, Interrupt};
use io::{Console, NullConsole};
use mem::{AccessKind, AddrFault, AddressErr, Memory, MemoryLayout, Segment, Width};
use observer::{AccessEvent, AccessSet, Filter, SubscriptionId};
use reg::{Coprocessor0, RegisterFile};

/// Errors that can occur during simulation.
///
/// Every error except [`SimErr::Internal`] is a MIPS exception,
/// which is delivered to coprocessor 0 when raised by an instruction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimErr {
    /// Memory was accessed at a misaligned or invalid address.
    #[error(transparent)]
    Address(#[from] AddressErr),
    /// Word could not be decoded into an instruction.
    #[error("invalid instruction 0x{0:08x}")]
    InvalidInstruction(u32),
    /// A trapping arithmetic instruction (`add`, `addi`, `sub`) overflowed.
    #[error("arithmetic overflow")]
    ArithmeticOverflow,
    /// A trap instruction's condition held.
    #[error("trap")]
    Trap,
    /// A `break` instruction was executed.
    #[error("break instruction executed")]
    Break,
    /// A syscall was executed with an unknown service number.
    #[error("invalid or unimplemented syscall service {0}")]
    InvalidSyscall(u32),
    /// A syscall service received input it could not use.
    #[error("invalid input to syscall service {0}")]
    InvalidSyscallInput(u32),
    /// The simulator itself failed.
    #[error("internal simulator error: {0}")]
    Internal(String),
}
impl SimErr {
    /// The exception code delivered to CAUSE for this error.
    ///
    /// This is `None` for internal errors, which are not exceptions.
    pub fn exception_code(&self) -> Option<ExceptionCode> {
        let code = match self {
            SimErr::Address(AddressErr { kind: AccessKind::Store, .. }) => ExceptionCode::AddressStore,
            SimErr::Address(_) => ExceptionCode::AddressLoad,
            SimErr::InvalidInstruction(_) => ExceptionCode::ReservedInstruction,
            SimErr::ArithmeticOverflow => ExceptionCode::Overflow,
            SimErr::Trap => ExceptionCode::Trap,
            SimErr::Break => ExceptionCode::Break,
            SimErr::InvalidSyscall(_) | SimErr::InvalidSyscallInput(_) => ExceptionCode::Syscall,
            SimErr::Internal(_) => return None,
        };
        Some(code)
    }

    /// The address which caused this error, if it is an address error.
    pub fn bad_address(&self) -> Option<u32> {
        match self {
            SimErr::Address(e) => Some(e.addr),
            _ => None
        }
    }
}

/// Exception codes, as written to bits 2-6 of CAUSE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ExceptionCode {
    /// External interrupt.
    Interrupt = 0,
    /// Address error on load or fetch.
    AddressLoad = 4,
    /// Address error on store.
    AddressStore = 5,
    /// Syscall.
    Syscall = 8,
    /// Breakpoint (`break`).
    Break = 9,
    /// Reserved instruction.
    ReservedInstruction = 10,
    /// Arithmetic overflow.
    Overflow = 12,
    /// Trap.
    Trap = 13,
}
impl ExceptionCode {
    /// The numeric code.
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// An exception which was delivered to coprocessor 0.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{error} (exception {code:?} at 0x{epc:08x})")]
pub struct ExceptionRaised {
    /// The exception code.
    pub code: ExceptionCode,
    /// The address of the instruction which raised the exception.
    pub epc: u32,
    /// The bad address, for address errors.
    pub vaddr: Option<u32>,
    /// The error behind the exception.
    #[source]
    pub error: SimErr
}

/// Why a program finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinishReason {
    /// An exception was raised with no handler installed.
    Exception,
    /// The program exited through a syscall.
    ExitSyscall,
    /// The PC reached an address with no instruction.
    RanOffBottom,
    /// The simulator itself failed.
    InternalError,
    /// Execution was stopped from outside the program.
    External,
}

/// The report of a finished program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishEvent {
    /// The PC when the program finished.
    pub pc: u32,
    /// Why the program finished.
    pub reason: FinishReason,
    /// The exception which ended the program (for [`FinishReason::Exception`]).
    pub exception: Option<ExceptionRaised>,
    /// The exit code (for [`FinishReason::ExitSyscall`]).
    pub exit_code: Option<i32>,
}

/// Reason for why execution paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PauseReason {
    /// Program hit a breakpoint.
    Breakpoint,
    /// Program hit a tripwire condition (or a step limit).
    Tripwire,
    /// A single step completed.
    Step,
}

/// The state of the simulator after an execution call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    /// The program can continue running.
    Paused(PauseReason),
    /// The program has finished and cannot continue until reset.
    Finished(FinishEvent),
}

/// Anything that can cause a step to abruptly fail to finish.
enum StepBreak {
    /// The program exited through a syscall.
    Exit(i32),
    /// There was no instruction at the PC.
    RanOffBottom,
    /// An exception was raised and there was no handler to take it.
    Exception(ExceptionRaised),
    /// A simulation error occurred.
    Err(SimErr),
}
impl From<SimErr> for StepBreak {
    fn from(value: SimErr) -> Self {
        Self::Err(value)
    }
}

/// Configuration flags for [`Simulator`].
///
/// These can be modified after the `Simulator` is created with [`Simulator::new`].
/// The layout and the STATUS default take effect on the next [`Simulator::reset`]
/// (or object file load). The other flags take effect on the next execution call.
///
/// Read the field descriptions for more details.
#[derive(Debug, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SimFlags {
    /// The memory layout.
    ///
    /// By default, this is [`MemoryLayout::default`].
    pub layout: MemoryLayout,

    /// Whether branches and jumps are delayed.
    ///
    /// With delayed branching, the instruction after a taken branch (the delay slot)
    /// executes before control reaches the target, and linking instructions
    /// save the address after the delay slot.
    ///
    /// By default, this flag is `false`.
    pub delayed_branching: bool,

    /// Whether the program can write to (and read from) its text segments.
    ///
    /// By default, this flag is `false`.
    pub self_modifying_code: bool,

    /// Whether steps are recorded so that they can be undone.
    ///
    /// By default, this flag is `true`.
    pub backstepping: bool,

    /// The maximum number of steps which can be undone.
    ///
    /// By default, this is [`backstep::DEFAULT_CAPACITY`].
    pub backstep_capacity: usize,

    /// Whether execution starts at the object file's start label (typically `main`)
    /// instead of the start of text.
    ///
    /// By default, this flag is `false`.
    pub start_at_main: bool,

    /// The value STATUS is reset to.
    ///
    /// By default, this is `0x0000FF11` (user mode, interrupts enabled, every interrupt unmasked).
    pub status_default: u32,
}
impl Default for SimFlags {
    fn default() -> Self {
        Self {
            layout: MemoryLayout::default(),
            delayed_branching: false,
            self_modifying_code: false,
            backstepping: true,
            backstep_capacity: backstep::DEFAULT_CAPACITY,
            start_at_main: false,
            status_default: 0x0000_FF11,
        }
    }
}

/// A flag which keeps the simulator running while set.
///
/// Clearing it from another thread stops the current run between two cycles.
pub type RunFlag = Arc<AtomicBool>;

/// Executes assembled code.
pub struct Simulator {
    // ------------------ SIMULATION STATE ------------------
    // Calling [`Simulator::reset`] resets these values.

    /// The simulator's memory.
    pub mem: Memory,

    /// The simulator's register file (including PC, HI, and LO).
    pub reg_file: RegisterFile,

    /// Coprocessor 0.
    pub cp0: Coprocessor0,

    /// The journal of executed steps.
    pub journal: Backstepper,

    /// The number of cycles run since the last reset.
    ///
    /// Cycles spent taking an interrupt or an exception are included.
    /// This can be set to 0 to reset the counter.
    pub instructions_run: u64,

    /// The target of a taken branch, which applies after the delay slot executes.
    delayed_branch: Option<u32>,

    /// The heap break (the next address returned by `sbrk`).
    heap_ptr: u32,

    /// Random streams for syscalls, keyed by stream id.
    rngs: HashMap<u32, StdRng>,

    /// The report of the program, once it has finished.
    finished: Option<FinishEvent>,

    // ------------------ CONFIG/DEBUG STATE ------------------
    // Calling [`Simulator::reset`] does not reset these values.

    /// The loaded object file. It is reinstalled on reset.
    program: Option<ObjectFile>,

    /// Machine control.
    /// If unset, the program stops.
    ///
    /// This is publicly accessible via a reference through [`Simulator::run_flag`].
    run_flag: RunFlag,

    /// The console syscalls read from and write to.
    console: Box<dyn Console>,

    /// Configuration settings for the simulator.
    ///
    /// These are preserved between resets.
    ///
    /// See [`SimFlags`] for more details on what configuration
    /// settings are available.
    pub flags: SimFlags,

    /// Breakpoints for the simulator.
    pub breakpoints: Breakpoints,

    /// All external devices connected to the system (IO and interrupting devices).
    pub device_handler: DeviceHandler,
}
impl Simulator where Simulator: Send {}

impl Simulator {
    /// Creates a new simulator with the provided flags, without a loaded object file.
    pub fn new(flags: SimFlags) -> Self {
        let layout = flags.layout.clone();
        let mut mem = Memory::new(layout.clone());
        mem.set_self_modifying(flags.self_modifying_code);

        Self {
            reg_file: RegisterFile::new(&layout),
            cp0: Coprocessor0::new(flags.status_default),
            journal: Backstepper::new(flags.backstepping, flags.backstep_capacity),
            mem,
            instructions_run: 0,
            delayed_branch: None,
            heap_ptr: layout.heap_base(),
            rngs: HashMap::new(),
            finished: None,

            program: None,
            run_flag: Arc::default(),
            console: Box::new(NullConsole),
            flags,
            breakpoints: Breakpoints::new(),
            device_handler: DeviceHandler::new(),
        }
    }

    /// Resets the simulator.
    ///
    /// This resets the state of the `Simulator` back to before any execution calls,
    /// while preserving configuration and debug state.
    ///
    /// Note that this function preserves:
    /// - Flags
    /// - Breakpoints
    /// - External devices (their state is reset with [`ExternalDevice::io_reset`])
    /// - The console
    /// - The run flag (i.e., anything with access to the flag can still control the Simulator)
    /// - Observer subscriptions
    ///
    /// The loaded object file is reinstalled, and the PC is set to its entry point.
    pub fn reset(&mut self) {
        let layout = self.flags.layout.clone();

        self.mem.reset(layout.clone());
        self.mem.set_self_modifying(self.flags.self_modifying_code);
        self.journal.clear();
        self.sync_flags();
        self.cp0.reset(self.flags.status_default);

        self.instructions_run = 0;
        self.delayed_branch = None;
        self.heap_ptr = layout.heap_base();
        self.rngs.clear();
        self.finished = None;

        if let Some(obj) = &self.program {
            self.mem.load_statements(obj.statements());
            let image: Vec<_> = obj.addr_iter().collect();
            self.mem.load_image(&image);
        }
        let entry = self.entry_point();
        self.reg_file.reset(&layout, entry);
        self.device_handler.io_reset();

        tracing::debug!(entry = format_args!("{entry:#010x}"), "simulator reset");
    }

    /// Loads an object file into this simulator, then resets it.
    ///
    /// This fails if a statement lies outside of text or a data word lies outside of every segment.
    pub fn load_obj_file(&mut self, obj: &ObjectFile) -> Result<(), SimErr> {
        let layout = &self.flags.layout;
        let unmapped = |addr| SimErr::Address(AddressErr { addr, kind: AccessKind::Store, fault: AddrFault::Unmapped });

        if let Some(stmt) = obj.statements().find(|s| !layout.segment_of(s.address()).is_some_and(Segment::is_text)) {
            return Err(unmapped(stmt.address()));
        }
        if let Some((addr, _)) = obj.addr_iter().find(|&(addr, _)| layout.segment_of(addr).is_none()) {
            return Err(unmapped(addr));
        }

        self.program = Some(obj.clone());
        self.reset();
        tracing::debug!(statements = obj.statements().count(), "loaded object file");
        Ok(())
    }

    /// The loaded object file.
    pub fn program(&self) -> Option<&ObjectFile> {
        self.program.as_ref()
    }

    /// The address execution starts at after a reset.
    fn entry_point(&self) -> u32 {
        let text_base = self.mem.layout().text_base();
        if !self.flags.start_at_main { return text_base };

        self.program.as_ref()
            .and_then(ObjectFile::start_addr)
            .filter(|&addr| self.mem.segment_of(addr).is_some_and(Segment::is_text))
            .unwrap_or(text_base)
    }

    /// Brings the memory and journal in line with the current flags.
    fn sync_flags(&mut self) {
        self.mem.set_self_modifying(self.flags.self_modifying_code);
        if self.journal.enabled() != self.flags.backstepping {
            self.journal.set_enabled(self.flags.backstepping);
        }
        if self.journal.capacity() != self.flags.backstep_capacity {
            self.journal.set_capacity(self.flags.backstep_capacity);
        }
    }

    /// Gets a reference to the run flag.
    ///
    /// Clearing this flag (from any thread) finishes the current run
    /// with [`FinishReason::External`] before the next cycle.
    pub fn run_flag(&self) -> &RunFlag {
        &self.run_flag
    }

    /// Sets the console used by syscalls.
    pub fn set_console(&mut self, console: impl Console) {
        self.console = Box::new(console);
    }

    /// The report of the program, if it has finished.
    pub fn finished(&self) -> Option<&FinishEvent> {
        self.finished.as_ref()
    }

    /// The pending delayed branch target, if the next instruction is in a delay slot.
    pub fn delayed_branch(&self) -> Option<u32> {
        self.delayed_branch
    }

    /// The current heap break.
    pub fn heap_pointer(&self) -> u32 {
        self.heap_ptr
    }

    /// The port of a memory-mapped IO address.
    fn mmio_port(&self, addr: u32) -> Option<u32> {
        let base = self.mem.layout().mmio_base()?;
        (self.mem.segment_of(addr) == Some(Segment::Mmio))
            .then(|| (addr & !0b11).wrapping_sub(base))
    }

    /// Fallibly reads a value from memory, as a program load would.
    ///
    /// Reads of memory-mapped IO are first sent to the device handler,
    /// and the value the device returns is written to memory before it is read.
    ///
    /// If you would like to query the memory's state, consider using [`Memory::get_word`].
    pub fn read_mem(&mut self, addr: u32, width: Width) -> Result<u32, SimErr> {
        if addr % width.bytes() == 0 {
            if let Some(port) = self.mmio_port(addr) {
                if let Some(data) = self.device_handler.io_read(port, true) {
                    self.mem.poke(addr & !0b11, Width::Word, data);
                }
            }
        }

        Ok(self.mem.read(addr, width)?)
    }

    /// Fallibly writes a value to memory, as a program store would.
    ///
    /// Writes to memory-mapped IO are written to memory,
    /// then the containing word is sent to the device handler.
    pub fn write_mem(&mut self, addr: u32, width: Width, value: u32) -> Result<(), SimErr> {
        self.mem.write(addr, width, value, &mut self.journal)?;

        if let Some(port) = self.mmio_port(addr) {
            let word = self.mem.get_word(addr);
            if !self.device_handler.io_write(port, word) {
                tracing::trace!(port, word, "write to unhandled IO port");
            }
        }
        Ok(())
    }

    /// Subscribes to accesses of registers, coprocessor 0 registers, or memory.
    ///
    /// Events are delivered over the returned channel. The subscription survives resets.
    pub fn subscribe(&mut self, filter: Filter, accesses: AccessSet) -> (SubscriptionId, crossbeam_channel::Receiver<AccessEvent>) {
        match filter {
            Filter::Reg(r)  => self.reg_file.subscribe(Some(r), accesses),
            Filter::AllRegs => self.reg_file.subscribe(None, accesses),
            Filter::Cp0(r)  => self.cp0.subscribe(Some(r), accesses),
            Filter::AllCp0  => self.cp0.subscribe(None, accesses),
            Filter::MemRange(range) => self.mem.subscribe(range, accesses),
        }
    }
    /// Revokes a subscription made with [`Simulator::subscribe`].
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.reg_file.unsubscribe(id)
            || self.cp0.unsubscribe(id)
            || self.mem.unsubscribe(id)
    }

    fn gpr(&mut self, r: Reg) -> u32 {
        self.reg_file.read(RegId::Gpr(r))
    }
    fn set_gpr(&mut self, r: Reg, value: u32) {
        self.reg_file.set(RegId::Gpr(r), value, &mut self.journal);
    }
    fn hilo(&mut self) -> u64 {
        let hi = self.reg_file.read(RegId::Hi);
        let lo = self.reg_file.read(RegId::Lo);
        (u64::from(hi) << 32) | u64::from(lo)
    }
    fn set_hilo(&mut self, value: u64) {
        self.reg_file.set(RegId::Hi, (value >> 32) as u32, &mut self.journal);
        self.reg_file.set(RegId::Lo, value as u32, &mut self.journal);
    }

    fn set_delayed_branch(&mut self, target: Option<u32>) {
        if self.delayed_branch != target {
            self.journal.record(Change::DelayedBranch { prev: self.delayed_branch });
            self.delayed_branch = target;
        }
    }
    /// Sends control to the target, either now or after the delay slot.
    fn branch_to(&mut self, target: u32) {
        match self.flags.delayed_branching {
            true  => self.set_delayed_branch(Some(target)),
            false => { self.reg_file.set_pc(target, &mut self.journal); },
        }
    }
    /// The return address saved by a linking instruction at the given address.
    fn link_addr(&self, instr_addr: u32) -> u32 {
        match self.flags.delayed_branching {
            true  => instr_addr.wrapping_add(8),
            false => instr_addr.wrapping_add(4),
        }
    }

    /// Runs until the tripwire condition returns false (or any of the typical breaks occur).
    ///
    /// The typical break conditions are:
    /// - the program finishes
    /// - the run flag is cleared
    /// - A breakpoint matches
    ///
    /// This only returns `Err` if the simulator itself fails.
    pub fn run_while(&mut self, tripwire: impl FnMut(&mut Simulator) -> bool) -> Result<RunState, SimErr> {
        if let Some(fin) = &self.finished {
            return Ok(RunState::Finished(fin.clone()));
        }

        self.run_flag.store(true, Ordering::Relaxed);
        let result = self.run_loop(tripwire, true);
        self.run_flag.store(false, Ordering::Relaxed);
        result
    }

    /// Execute the program.
    ///
    /// This blocks until the program ends.
    /// If you would like to limit the maximum number of steps to execute, consider [`Simulator::run_with_limit`].
    pub fn run(&mut self) -> Result<RunState, SimErr> {
        self.run_while(|_| true)
    }

    /// Execute the program with a limit on how many steps to execute.
    ///
    /// This blocks until the program ends or until the number of steps to execute has been hit.
    pub fn run_with_limit(&mut self, max_steps: u64) -> Result<RunState, SimErr> {
        let i = self.instructions_run;
        self.run_while(|sim| sim.instructions_run.wrapping_sub(i) < max_steps)
    }

    /// Runs at most `max_steps` cycles without touching the run flag.
    ///
    /// The worker thread uses this to run in slices,
    /// releasing the simulator between slices.
    pub(crate) fn run_slice(&mut self, max_steps: u64, skip_breakpoint: bool) -> Result<RunState, SimErr> {
        let i = self.instructions_run;
        self.run_loop(|sim| sim.instructions_run.wrapping_sub(i) < max_steps, skip_breakpoint)
    }

    // event loop
    // run until:
    // 1. the run flag is cleared
    // 2. any of the breakpoints are hit
    // 3. the tripwire condition returns false
    // 4. the program finishes
    fn run_loop(&mut self, mut tripwire: impl FnMut(&mut Simulator) -> bool, mut skip_breakpoint: bool) -> Result<RunState, SimErr> {
        if let Some(fin) = &self.finished {
            return Ok(RunState::Finished(fin.clone()));
        }
        self.sync_flags();

        loop {
            if !self.run_flag.load(Ordering::Relaxed) {
                let event = self.finish(FinishReason::External, None, None);
                return Ok(RunState::Finished(event));
            }
            let pc = self.reg_file.pc();
            if !std::mem::take(&mut skip_breakpoint) && self.breakpoints.contains(pc) {
                tracing::debug!(pc = format_args!("{pc:#010x}"), "hit breakpoint");
                return Ok(RunState::Paused(PauseReason::Breakpoint));
            }
            if !tripwire(self) {
                return Ok(RunState::Paused(PauseReason::Tripwire));
            }

            if let Err(brk) = self.step() {
                return self.finish_with(brk);
            }
        }
    }

    /// Simulate one step, executing one instruction.
    ///
    /// Breakpoints and the run flag are not checked.
    pub fn step_in(&mut self) -> Result<RunState, SimErr> {
        if let Some(fin) = &self.finished {
            return Ok(RunState::Finished(fin.clone()));
        }
        self.sync_flags();

        match self.step() {
            Ok(()) => Ok(RunState::Paused(PauseReason::Step)),
            Err(brk) => self.finish_with(brk),
        }
    }

    /// Undoes the most recent step.
    ///
    /// This returns whether there was a step to undo.
    /// Undoing a step clears the finished state, so execution can continue.
    pub fn step_back(&mut self) -> bool {
        let mut journal = std::mem::take(&mut self.journal);
        let undone = journal.undo_step(self);
        self.journal = journal;

        match undone {
            Some(pc) => {
                tracing::trace!(pc = format_args!("{pc:#010x}"), "stepped back");
                self.finished = None;
                true
            },
            None => false
        }
    }

    fn finish(&mut self, reason: FinishReason, exception: Option<ExceptionRaised>, exit_code: Option<i32>) -> FinishEvent {
        let pc = self.reg_file.pc();
        tracing::info!(pc = format_args!("{pc:#010x}"), ?reason, ?exit_code, "program finished");

        let event = FinishEvent { pc, reason, exception, exit_code };
        self.finished = Some(event.clone());
        event
    }
    fn finish_with(&mut self, brk: StepBreak) -> Result<RunState, SimErr> {
        let event = match brk {
            StepBreak::Exit(code)   => self.finish(FinishReason::ExitSyscall, None, Some(code)),
            StepBreak::RanOffBottom => self.finish(FinishReason::RanOffBottom, None, None),
            StepBreak::Exception(e) => self.finish(FinishReason::Exception, Some(e), None),
            StepBreak::Err(e) => {
                self.finish_internal(&e);
                return Err(e);
            }
        };
        Ok(RunState::Finished(event))
    }
    /// Finishes the program because the simulator itself failed.
    pub(crate) fn finish_internal(&mut self, err: &SimErr) -> FinishEvent {
        tracing::error!(%err, "simulator failed");
        self.finish(FinishReason::InternalError, None, None)
    }

    /// Simulate one step as one undoable unit.
    fn step(&mut self) -> Result<(), StepBreak> {
        let pc = self.reg_file.pc();
        self.journal.begin_step(pc);

        let result = match self._step_inner(pc) {
            Err(StepBreak::Err(e)) => self.raise_exception(e, pc),
            r => r
        };

        match result {
            Err(StepBreak::RanOffBottom) => self.journal.end_empty_step(),
            Err(StepBreak::Err(_)) => self.journal.end_step(),
            _ => {
                self.journal.end_step();
                self.instructions_run = self.instructions_run.wrapping_add(1);
            }
        }
        result
    }

    /// Whether an interrupt can be taken right now.
    fn accepts_interrupt(&self, int: Interrupt) -> bool {
        let status = self.cp0.get(Cp0Reg::Status);

        status & Coprocessor0::STATUS_IE != 0
            && status & Coprocessor0::STATUS_EXL == 0
            && status & int.cause_bit() != 0
            && self.delayed_branch.is_none()
    }

    fn take_interrupt(&mut self, int: Interrupt, pc: u32) -> bool {
        let handler = self.mem.layout().exception_handler();
        if !self.mem.is_occupied(handler) {
            tracing::warn!(line = int.line(), "interrupt dropped, no exception handler installed");
            return false;
        }

        let cause = self.cp0.get(Cp0Reg::Cause);
        let cause = (cause & !Coprocessor0::CAUSE_EXC_CODE) | (ExceptionCode::Interrupt.code() << 2) | int.cause_bit();
        self.cp0.set(Cp0Reg::Cause, cause, &mut self.journal);
        self.cp0.set(Cp0Reg::Epc, pc, &mut self.journal);
        let status = self.cp0.get(Cp0Reg::Status);
        self.cp0.set(Cp0Reg::Status, status | Coprocessor0::STATUS_EXL, &mut self.journal);
        self.reg_file.set_pc(handler, &mut self.journal);

        tracing::debug!(line = int.line(), epc = format_args!("{pc:#010x}"), "took interrupt");
        true
    }

    /// Delivers an exception to coprocessor 0.
    ///
    /// If a handler is installed, control goes to the handler.
    /// Otherwise, the PC is left at the faulting instruction and the program finishes.
    fn raise_exception(&mut self, error: SimErr, epc: u32) -> Result<(), StepBreak> {
        let Some(code) = error.exception_code() else {
            return Err(StepBreak::Err(error));
        };
        let vaddr = error.bad_address();

        let cause = self.cp0.get(Cp0Reg::Cause);
        self.cp0.set(Cp0Reg::Cause, (cause & !Coprocessor0::CAUSE_EXC_CODE) | (code.code() << 2), &mut self.journal);
        self.cp0.set(Cp0Reg::Epc, epc, &mut self.journal);
        if let Some(addr) = vaddr {
            self.cp0.set(Cp0Reg::VAddr, addr, &mut self.journal);
        }
        let status = self.cp0.get(Cp0Reg::Status);
        self.cp0.set(Cp0Reg::Status, status | Coprocessor0::STATUS_EXL, &mut self.journal);

        tracing::debug!(?code, epc = format_args!("{epc:#010x}"), %error, "exception raised");

        // A handler which faults on its own first instruction would never make progress.
        let handler = self.mem.layout().exception_handler();
        if self.mem.is_occupied(handler) && epc != handler {
            self.set_delayed_branch(None);
            self.reg_file.set_pc(handler, &mut self.journal);
            Ok(())
        } else {
            self.reg_file.set_pc(epc, &mut self.journal);
            Err(StepBreak::Exception(ExceptionRaised { code, epc, vaddr, error }))
        }
    }

    /// Simulate one step, executing one instruction.
    ///
    /// Errors are returned undelivered. [`Simulator::step`] delivers them as exceptions.
    fn _step_inner(&mut self, pc: u32) -> Result<(), StepBreak> {
        if let Some(int) = self.device_handler.poll_interrupt() {
            // If the interrupt is taken, skip FETCH:
            if self.accepts_interrupt(int) && self.take_interrupt(int, pc) {
                return Ok(());
            }
        }

        let Some(instr) = self.mem.fetch(pc)? else {
            return Err(StepBreak::RanOffBottom);
        };
        tracing::trace!(pc = format_args!("{pc:#010x}"), %instr, "step");

        // If a branch is pending, this instruction is its delay slot.
        let pending = self.delayed_branch;
        self.set_delayed_branch(None);
        self.reg_file.increment_pc(&mut self.journal);

        match instr {
            SimInstr::Shift(op, rd, rt, sa) => {
                let val = self.gpr(rt);
                self.set_gpr(rd, shift(op, val, u32::from(sa)));
            },
            SimInstr::ShiftVar(op, rd, rt, rs) => {
                let val = self.gpr(rt);
                let sa = self.gpr(rs) & 0x1F;
                self.set_gpr(rd, shift(op, val, sa));
            },
            SimInstr::Alu(op, rd, rs, rt) => {
                let a = self.gpr(rs);
                let b = self.gpr(rt);
                let result = match op {
                    AluOp::Movz => if b == 0 { Some(a) } else { None },
                    AluOp::Movn => if b != 0 { Some(a) } else { None },
                    AluOp::Add  => Some(checked_add(a, b)?),
                    AluOp::Addu => Some(a.wrapping_add(b)),
                    AluOp::Sub  => Some((a as i32).checked_sub(b as i32).ok_or(SimErr::ArithmeticOverflow)? as u32),
                    AluOp::Subu => Some(a.wrapping_sub(b)),
                    AluOp::And  => Some(a & b),
                    AluOp::Or   => Some(a | b),
                    AluOp::Xor  => Some(a ^ b),
                    AluOp::Nor  => Some(!(a | b)),
                    AluOp::Slt  => Some(u32::from((a as i32) < (b as i32))),
                    AluOp::Sltu => Some(u32::from(a < b)),
                };
                if let Some(result) = result {
                    self.set_gpr(rd, result);
                }
            },
            SimInstr::AluImm(op, rt, rs, imm) => {
                let a = self.gpr(rs);
                let b = match op.zero_extends() {
                    true  => u32::from(imm),
                    false => imm as i16 as i32 as u32,
                };
                let result = match op {
                    ImmOp::Addi  => checked_add(a, b)?,
                    ImmOp::Addiu => a.wrapping_add(b),
                    ImmOp::Slti  => u32::from((a as i32) < (b as i32)),
                    ImmOp::Sltiu => u32::from(a < b),
                    ImmOp::Andi  => a & b,
                    ImmOp::Ori   => a | b,
                    ImmOp::Xori  => a ^ b,
                };
                self.set_gpr(rt, result);
            },
            SimInstr::Lui(rt, imm) => self.set_gpr(rt, u32::from(imm) << 16),
            SimInstr::Mul(rd, rs, rt) => {
                let product = i64::from(self.gpr(rs) as i32) * i64::from(self.gpr(rt) as i32);
                self.set_hilo(product as u64);
                self.set_gpr(rd, product as u32);
            },
            SimInstr::MulDiv(op, rs, rt) => {
                let a = self.gpr(rs);
                let b = self.gpr(rt);
                match op {
                    MulDivOp::Mult  => self.set_hilo((i64::from(a as i32) * i64::from(b as i32)) as u64),
                    MulDivOp::Multu => self.set_hilo(u64::from(a) * u64::from(b)),
                    // Division by zero leaves HI and LO as they were.
                    MulDivOp::Div if b != 0 => {
                        let (a, b) = (a as i32, b as i32);
                        self.reg_file.set(RegId::Hi, a.wrapping_rem(b) as u32, &mut self.journal);
                        self.reg_file.set(RegId::Lo, a.wrapping_div(b) as u32, &mut self.journal);
                    },
                    MulDivOp::Divu if b != 0 => {
                        self.reg_file.set(RegId::Hi, a % b, &mut self.journal);
                        self.reg_file.set(RegId::Lo, a / b, &mut self.journal);
                    },
                    MulDivOp::Div | MulDivOp::Divu => {},
                }
            },
            SimInstr::Accum(op, rs, rt) => {
                let a = self.gpr(rs);
                let b = self.gpr(rt);
                let acc = self.hilo();
                let signed = (i64::from(a as i32) * i64::from(b as i32)) as u64;
                let unsigned = u64::from(a) * u64::from(b);
                let result = match op {
                    AccumOp::Madd  => acc.wrapping_add(signed),
                    AccumOp::Maddu => acc.wrapping_add(unsigned),
                    AccumOp::Msub  => acc.wrapping_sub(signed),
                    AccumOp::Msubu => acc.wrapping_sub(unsigned),
                };
                self.set_hilo(result);
            },
            SimInstr::Count(op, rd, rs) => {
                let val = self.gpr(rs);
                let count = match op {
                    CountOp::Clz => val.leading_zeros(),
                    CountOp::Clo => val.leading_ones(),
                };
                self.set_gpr(rd, count);
            },
            SimInstr::Mfhi(rd) => {
                let val = self.reg_file.read(RegId::Hi);
                self.set_gpr(rd, val);
            },
            SimInstr::Mthi(rs) => {
                let val = self.gpr(rs);
                self.reg_file.set(RegId::Hi, val, &mut self.journal);
            },
            SimInstr::Mflo(rd) => {
                let val = self.reg_file.read(RegId::Lo);
                self.set_gpr(rd, val);
            },
            SimInstr::Mtlo(rs) => {
                let val = self.gpr(rs);
                self.reg_file.set(RegId::Lo, val, &mut self.journal);
            },
            SimInstr::Trap(cond, rs, rt) => {
                let a = self.gpr(rs);
                let b = self.gpr(rt);
                if cond.check(a, b) {
                    return Err(SimErr::Trap.into());
                }
            },
            SimInstr::TrapImm(cond, rs, imm) => {
                let a = self.gpr(rs);
                if cond.check(a, i32::from(imm) as u32) {
                    return Err(SimErr::Trap.into());
                }
            },
            SimInstr::Branch(op, rs, rt, off) => {
                let a = self.gpr(rs);
                let b = match op.compares_two() {
                    true  => self.gpr(rt),
                    false => 0,
                };
                if op.taken(a, b) {
                    if op.links() {
                        self.set_gpr(RA, self.link_addr(pc));
                    }
                    let target = pc.wrapping_add(4).wrapping_add((i32::from(off) << 2) as u32);
                    self.branch_to(target);
                }
            },
            SimInstr::J(index) => {
                self.branch_to(jump_target(pc, index));
            },
            SimInstr::Jal(index) => {
                self.set_gpr(RA, self.link_addr(pc));
                self.branch_to(jump_target(pc, index));
            },
            SimInstr::Jr(rs) => {
                let target = self.gpr(rs);
                self.branch_to(target);
            },
            SimInstr::Jalr(rd, rs) => {
                // Read the target first, in case rd == rs.
                let target = self.gpr(rs);
                self.set_gpr(rd, self.link_addr(pc));
                self.branch_to(target);
            },
            SimInstr::Load(op, rt, base, off) => {
                let addr = self.gpr(base).wrapping_add(i32::from(off) as u32);
                let val = match op {
                    LoadOp::Lb  => self.read_mem(addr, Width::Byte)? as u8 as i8 as i32 as u32,
                    LoadOp::Lh  => self.read_mem(addr, Width::Half)? as u16 as i16 as i32 as u32,
                    LoadOp::Lbu => self.read_mem(addr, Width::Byte)?,
                    LoadOp::Lhu => self.read_mem(addr, Width::Half)?,
                    LoadOp::Lw | LoadOp::Ll => self.read_mem(addr, Width::Word)?,
                    LoadOp::Lwl => {
                        let mut val = self.gpr(rt);
                        for i in 0..=addr % 4 {
                            let byte = self.read_mem(addr.wrapping_sub(i), Width::Byte)?;
                            val = set_byte(val, 3 - i, byte);
                        }
                        val
                    },
                    LoadOp::Lwr => {
                        let mut val = self.gpr(rt);
                        for i in 0..=3 - addr % 4 {
                            let byte = self.read_mem(addr.wrapping_add(i), Width::Byte)?;
                            val = set_byte(val, i, byte);
                        }
                        val
                    },
                };
                self.set_gpr(rt, val);
            },
            SimInstr::Store(op, rt, base, off) => {
                let addr = self.gpr(base).wrapping_add(i32::from(off) as u32);
                let val = self.gpr(rt);
                match op {
                    StoreOp::Sb => self.write_mem(addr, Width::Byte, val)?,
                    StoreOp::Sh => self.write_mem(addr, Width::Half, val)?,
                    StoreOp::Sw => self.write_mem(addr, Width::Word, val)?,
                    StoreOp::Swl => {
                        for i in 0..=addr % 4 {
                            self.write_mem(addr.wrapping_sub(i), Width::Byte, get_byte(val, 3 - i))?;
                        }
                    },
                    StoreOp::Swr => {
                        for i in 0..=3 - addr % 4 {
                            self.write_mem(addr.wrapping_add(i), Width::Byte, get_byte(val, i))?;
                        }
                    },
                    // There is only one processor, so a link is never broken.
                    StoreOp::Sc => {
                        self.write_mem(addr, Width::Word, val)?;
                        self.set_gpr(rt, 1);
                    },
                }
            },
            SimInstr::Syscall => {
                if let Some(code) = syscall::dispatch(self)? {
                    return Err(StepBreak::Exit(code));
                }
            },
            SimInstr::Break(_) => return Err(SimErr::Break.into()),
            SimInstr::Mfc0(rt, reg) => {
                let val = self.cp0.read(reg);
                self.set_gpr(rt, val);
            },
            SimInstr::Mtc0(rt, reg) => {
                let val = self.gpr(rt);
                self.cp0.set(reg, val, &mut self.journal);
            },
            SimInstr::Eret => {
                let status = self.cp0.read(Cp0Reg::Status);
                self.cp0.set(Cp0Reg::Status, status & !Coprocessor0::STATUS_EXL, &mut self.journal);
                // Serviced interrupts are acknowledged. Devices still asserting their line re-raise it.
                let cause = self.cp0.get(Cp0Reg::Cause);
                if cause & Coprocessor0::CAUSE_PENDING != 0 {
                    self.cp0.set(Cp0Reg::Cause, cause & !Coprocessor0::CAUSE_PENDING, &mut self.journal);
                }
                let epc = self.cp0.read(Cp0Reg::Epc);
                self.reg_file.set_pc(epc, &mut self.journal);
            },
        }

        if let Some(target) = pending {
            self.reg_file.set_pc(target, &mut self.journal);
        }
        Ok(())
    }
}
impl Restore for Simulator {
    fn restore(&mut self, change: Change) {
        match change {
            Change::Boundary { .. } => {},
            Change::Reg { reg, prev } => self.reg_file.restore(reg, prev),
            Change::Pc { prev } => self.reg_file.restore(RegId::Pc, prev),
            Change::Cp0 { reg, prev } => self.cp0.restore(reg, prev),
            Change::Mem { addr, width, prev } => self.mem.restore(addr, width, prev),
            Change::TextMark { addr } => self.mem.unmark_text(addr),
            Change::DelayedBranch { prev } => self.delayed_branch = prev,
            Change::Heap { prev } => self.heap_ptr = prev,
        }
    }
}
impl Default for Simulator {
    fn default() -> Self {
        Self::new(Default::default())
    }
}
impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("pc", &format_args!("{:#010x}", self.reg_file.pc()))
            .field("instructions_run", &self.instructions_run)
            .field("delayed_branch", &self.delayed_branch)
            .field("finished", &self.finished)
            .field("flags", &self.flags)
            .field("breakpoints", &self.breakpoints)
            .field("device_handler", &self.device_handler)
            .finish_non_exhaustive()
    }
}

fn shift(op: ShiftOp, val: u32, sa: u32) -> u32 {
    match op {
        ShiftOp::Sll => val << sa,
        ShiftOp::Srl => val >> sa,
        ShiftOp::Sra => ((val as i32) >> sa) as u32,
    }
}
fn checked_add(a: u32, b: u32) -> Result<u32, SimErr> {
    (a as i32).checked_add(b as i32)
        .map(|r| r as u32)
        .ok_or(SimErr::ArithmeticOverflow)
}
fn jump_target(pc: u32, index: u32) -> u32 {
    (pc.wrapping_add(4) & 0xF000_0000) | (index << 2)
}
fn get_byte(val: u32, i: u32) -> u32 {
    (val >> (8 * i)) & 0xFF
}
fn set_byte(val: u32, i: u32, byte: u32) -> u32 {
    (val & !(0xFF << (8 * i))) | ((byte & 0xFF) << (8 * i))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use proptest::prelude::*;

    use super::{ExceptionCode, FinishEvent, FinishReason, PauseReason, RunState, SimFlags, Simulator};
    use crate::asm::ObjectFile;
    use crate::ast::reg_consts::*;
    use crate::ast::sim::{AluOp, BranchOp, CountOp, ImmOp, LoadOp, MulDivOp, ShiftOp, SimInstr, StoreOp};
    use crate::ast::{Cp0Reg, Reg, RegId};
    use crate::sim::device::BufferedKeyboard;
    use crate::sim::io::BufferedConsole;
    use crate::sim::observer::{AccessSet, Filter};
    use crate::sim::reg::Coprocessor0;

    const TEXT: u32 = 0x0040_0000;
    const DATA: u32 = 0x1001_0000;
    const HANDLER: u32 = 0x8000_0180;

    fn addiu(rt: Reg, rs: Reg, imm: u16) -> SimInstr {
        SimInstr::AluImm(ImmOp::Addiu, rt, rs, imm)
    }
    const NOP: SimInstr = SimInstr::Shift(ShiftOp::Sll, ZERO, ZERO, 0);
    const EXIT: [SimInstr; 2] = [SimInstr::AluImm(ImmOp::Addiu, V0, ZERO, 10), SimInstr::Syscall];

    fn load(flags: SimFlags, instrs: &[SimInstr]) -> Simulator {
        let mut obj = ObjectFile::empty();
        obj.add_text_block(TEXT, instrs).unwrap();
        let mut sim = Simulator::new(flags);
        sim.load_obj_file(&obj).unwrap();
        sim
    }
    fn reg(sim: &Simulator, r: Reg) -> u32 {
        sim.reg_file.get(RegId::Gpr(r))
    }
    fn finished(state: RunState) -> FinishEvent {
        match state {
            RunState::Finished(f) => f,
            s => panic!("expected program to finish, got {s:?}"),
        }
    }

    #[test]
    fn test_delay_slot_runs_once() {
        let program = [
            SimInstr::Branch(BranchOp::Beq, ZERO, ZERO, 2),
            addiu(T0, T0, 1),
            addiu(T1, T1, 1),
            EXIT[0],
            EXIT[1],
        ];

        let mut sim = load(SimFlags { delayed_branching: true, ..Default::default() }, &program);
        sim.step_in().unwrap();
        assert_eq!(sim.delayed_branch(), Some(TEXT + 12));
        assert_eq!(sim.reg_file.pc(), TEXT + 4);
        sim.step_in().unwrap();
        assert_eq!(sim.delayed_branch(), None);
        assert_eq!(sim.reg_file.pc(), TEXT + 12);

        assert_eq!(finished(sim.run().unwrap()).reason, FinishReason::ExitSyscall);
        assert_eq!(reg(&sim, T0), 1);
        assert_eq!(reg(&sim, T1), 0);

        // Without delayed branching, the slot is skipped.
        let mut sim = load(SimFlags::default(), &program);
        sim.run().unwrap();
        assert_eq!(reg(&sim, T0), 0);
        assert_eq!(reg(&sim, T1), 0);
    }

    #[test]
    fn test_link_addresses() {
        let program = [
            SimInstr::Jal((TEXT + 16) >> 2),
            NOP,
            NOP,
            NOP,
            EXIT[0],
            EXIT[1],
        ];

        let mut sim = load(SimFlags { delayed_branching: true, ..Default::default() }, &program);
        sim.run().unwrap();
        assert_eq!(reg(&sim, RA), TEXT + 8);

        let mut sim = load(SimFlags::default(), &program);
        sim.run().unwrap();
        assert_eq!(reg(&sim, RA), TEXT + 4);
    }

    #[test]
    fn test_self_modified_word_is_redecoded() {
        let original = addiu(T0, T0, 1);
        let replacement = addiu(T0, T0, 5);

        let mut obj = ObjectFile::empty();
        obj.add_text_block(TEXT, &[
            SimInstr::Lui(T1, 0x1001),
            SimInstr::Load(LoadOp::Lw, T2, T1, 0),
            SimInstr::Lui(T3, 0x0040),
            SimInstr::Store(StoreOp::Sw, T2, T3, 0x10),
            original,
            EXIT[0],
            EXIT[1],
        ]).unwrap();
        obj.add_data_block(DATA, vec![replacement.encode()]).unwrap();

        let mut sim = Simulator::new(SimFlags { self_modifying_code: true, ..Default::default() });
        sim.load_obj_file(&obj).unwrap();

        // decode the original before it is overwritten
        assert_eq!(sim.mem.fetch(TEXT + 16).unwrap(), Some(original));
        sim.run().unwrap();
        assert_eq!(reg(&sim, T0), 5);
        assert_eq!(sim.mem.statement(TEXT + 16).unwrap().binary(), replacement.encode());

        // undo through the store
        for _ in 0..4 {
            assert!(sim.step_back());
        }
        assert_eq!(sim.reg_file.pc(), TEXT + 12);
        assert_eq!(sim.mem.fetch(TEXT + 16).unwrap(), Some(original));
        assert_eq!(reg(&sim, T0), 0);
        assert!(sim.finished().is_none());
    }

    #[test]
    fn test_text_write_refused() {
        let mut sim = load(SimFlags::default(), &[
            SimInstr::Lui(T3, 0x0040),
            SimInstr::Store(StoreOp::Sw, ZERO, T3, 0),
        ]);

        let fin = finished(sim.run().unwrap());
        let exc = fin.exception.unwrap();
        assert_eq!(exc.code, ExceptionCode::AddressStore);
        assert_eq!(exc.vaddr, Some(TEXT));
        assert_eq!(sim.cp0.get(Cp0Reg::VAddr), TEXT);
    }

    #[test]
    fn test_overflow_exception() {
        let mut sim = load(SimFlags::default(), &[
            SimInstr::Lui(T0, 0x7FFF),
            SimInstr::AluImm(ImmOp::Ori, T0, T0, 0xFFFF),
            SimInstr::AluImm(ImmOp::Addi, T0, T0, 1),
            EXIT[0],
            EXIT[1],
        ]);

        let fin = finished(sim.run().unwrap());
        assert_eq!(fin.reason, FinishReason::Exception);
        assert_eq!(fin.pc, TEXT + 8);

        let exc = fin.exception.unwrap();
        assert_eq!(exc.code, ExceptionCode::Overflow);
        assert_eq!(exc.epc, TEXT + 8);

        assert_eq!(reg(&sim, T0), 0x7FFF_FFFF);
        assert_eq!(sim.cp0.get(Cp0Reg::Epc), TEXT + 8);
        assert_eq!(sim.cp0.get(Cp0Reg::Cause) & Coprocessor0::CAUSE_EXC_CODE, 12 << 2);
        assert!(sim.cp0.exception_level());

        // finished programs stay finished
        assert_eq!(sim.run().unwrap(), RunState::Finished(sim.finished().unwrap().clone()));
    }

    #[test]
    fn test_exception_handler() {
        let mut obj = ObjectFile::empty();
        obj.add_text_block(TEXT, &[
            SimInstr::Break(0),
            addiu(T0, ZERO, 7),
            EXIT[0],
            EXIT[1],
        ]).unwrap();
        // skip the faulting instruction
        obj.add_text_block(HANDLER, &[
            SimInstr::Mfc0(K0, Cp0Reg::Epc),
            addiu(K0, K0, 4),
            SimInstr::Mtc0(K0, Cp0Reg::Epc),
            addiu(S0, S0, 1),
            SimInstr::Eret,
        ]).unwrap();

        let mut sim = Simulator::default();
        sim.load_obj_file(&obj).unwrap();
        sim.step_in().unwrap();
        assert_eq!(sim.reg_file.pc(), HANDLER);
        assert_eq!(sim.cp0.get(Cp0Reg::Cause) & Coprocessor0::CAUSE_EXC_CODE, 9 << 2);

        assert_eq!(finished(sim.run().unwrap()).reason, FinishReason::ExitSyscall);
        assert_eq!(reg(&sim, S0), 1);
        assert_eq!(reg(&sim, T0), 7);
        assert!(!sim.cp0.exception_level());
    }

    #[test]
    fn test_breakpoint_pause() {
        let mut sim = load(SimFlags::default(), &[
            addiu(T0, T0, 1),
            addiu(T0, T0, 1),
            addiu(T0, T0, 1),
            addiu(T0, T0, 1),
            EXIT[0],
            EXIT[1],
        ]);
        sim.breakpoints.insert(TEXT + 8);

        assert_eq!(sim.run().unwrap(), RunState::Paused(PauseReason::Breakpoint));
        assert_eq!(sim.reg_file.pc(), TEXT + 8);
        assert_eq!(reg(&sim, T0), 2);

        // resuming makes progress past the breakpoint
        assert_eq!(finished(sim.run().unwrap()).reason, FinishReason::ExitSyscall);
        assert_eq!(reg(&sim, T0), 4);
    }

    #[test]
    fn test_run_limits_and_stop() {
        let spin = SimInstr::Branch(BranchOp::Beq, ZERO, ZERO, -1);
        let mut sim = load(SimFlags::default(), &[addiu(T0, T0, 1), spin]);

        assert_eq!(sim.run_with_limit(10).unwrap(), RunState::Paused(PauseReason::Tripwire));
        assert_eq!(sim.instructions_run, 10);
        assert_eq!(sim.reg_file.pc(), TEXT + 4);

        let fin = finished(sim.run_while(|s| {
            if s.instructions_run >= 20 {
                s.run_flag().store(false, Ordering::Relaxed);
            }
            true
        }).unwrap());
        assert_eq!(fin.reason, FinishReason::External);
        assert_eq!(sim.instructions_run, 21);
        assert!(!sim.run_flag().load(Ordering::Relaxed));

        sim.reset();
        assert!(sim.finished().is_none());
        assert_eq!(sim.run_with_limit(1).unwrap(), RunState::Paused(PauseReason::Tripwire));
        assert_eq!(reg(&sim, T0), 1);
    }

    #[test]
    fn test_ran_off_bottom() {
        let mut sim = load(SimFlags::default(), &[addiu(T0, T0, 1)]);
        let fin = finished(sim.run().unwrap());
        assert_eq!(fin.reason, FinishReason::RanOffBottom);
        assert_eq!(fin.pc, TEXT + 4);

        // only the one instruction is undone
        assert_eq!(sim.journal.len(), 1);
        assert!(sim.step_back());
        assert!(!sim.step_back());
        assert_eq!(sim.reg_file.pc(), TEXT);
    }

    #[test]
    fn test_arithmetic() {
        let mut sim = load(SimFlags::default(), &[
            addiu(T0, ZERO, 0xFFFD), // -3
            addiu(T1, ZERO, 5),
            SimInstr::MulDiv(MulDivOp::Mult, T0, T1),
            SimInstr::Mfhi(S0),
            SimInstr::Mflo(S1),
            SimInstr::MulDiv(MulDivOp::Div, T1, T0),
            SimInstr::Mfhi(S2),
            SimInstr::Mflo(S3),
            SimInstr::MulDiv(MulDivOp::Divu, T1, ZERO),
            SimInstr::Mfhi(S4),
            SimInstr::Count(CountOp::Clz, S5, T1),
            SimInstr::Shift(ShiftOp::Sra, S6, T0, 1),
            SimInstr::Alu(AluOp::Slt, S7, T0, T1),
            SimInstr::Alu(AluOp::Sltu, T2, T0, T1),
            SimInstr::Alu(AluOp::Sub, T3, T0, T1),
        ]);
        sim.run().unwrap();

        assert_eq!(reg(&sim, S0), 0xFFFF_FFFF);
        assert_eq!(reg(&sim, S1), -15i32 as u32);
        assert_eq!(reg(&sim, S2), 2);
        assert_eq!(reg(&sim, S3), -1i32 as u32);
        // division by zero leaves HI unchanged
        assert_eq!(reg(&sim, S4), 2);
        assert_eq!(reg(&sim, S5), 29);
        assert_eq!(reg(&sim, S6), -2i32 as u32);
        assert_eq!(reg(&sim, S7), 1);
        assert_eq!(reg(&sim, T2), 0);
        assert_eq!(reg(&sim, T3), -8i32 as u32);
    }

    #[test]
    fn test_unaligned_loads_and_stores() {
        let mut obj = ObjectFile::empty();
        obj.add_text_block(TEXT, &[
            SimInstr::Lui(S0, 0x1001),
            SimInstr::Load(LoadOp::Lwr, T0, S0, 1),
            SimInstr::Load(LoadOp::Lwl, T0, S0, 4),
            SimInstr::Store(StoreOp::Swr, T0, S0, 9),
            SimInstr::Store(StoreOp::Swl, T0, S0, 12),
            SimInstr::Load(LoadOp::Lb, T1, S0, 7),
            SimInstr::Load(LoadOp::Lbu, T2, S0, 7),
        ]).unwrap();
        obj.add_data_block(DATA, vec![0x4433_2211, 0x8877_6655]).unwrap();

        let mut sim = Simulator::default();
        sim.load_obj_file(&obj).unwrap();
        sim.run().unwrap();

        assert_eq!(reg(&sim, T0), 0x5544_3322);
        assert_eq!(sim.mem.get_word(DATA + 8), 0x4433_2200);
        assert_eq!(sim.mem.get_word(DATA + 12), 0x0000_0055);
        assert_eq!(reg(&sim, T1), 0xFFFF_FF88);
        assert_eq!(reg(&sim, T2), 0x88);
    }

    #[test]
    fn test_syscalls() {
        let mut obj = ObjectFile::empty();
        obj.add_text_block(TEXT, &[
            addiu(V0, ZERO, 5),
            SimInstr::Syscall,
            SimInstr::Alu(AluOp::Addu, A0, V0, ZERO),
            addiu(V0, ZERO, 1),
            SimInstr::Syscall,
            SimInstr::Lui(A0, 0x1001),
            addiu(V0, ZERO, 4),
            SimInstr::Syscall,
            addiu(A0, ZERO, 5),
            addiu(V0, ZERO, 9),
            SimInstr::Syscall,
            SimInstr::Alu(AluOp::Addu, S0, V0, ZERO),
            addiu(A0, ZERO, 3),
            addiu(V0, ZERO, 17),
            SimInstr::Syscall,
        ]).unwrap();
        // "hi!\0"
        obj.add_data_block(DATA, vec![0x0021_6968]).unwrap();

        let console = BufferedConsole::new();
        console.get_input().write().unwrap().extend(b"42\n");

        let mut sim = Simulator::default();
        sim.set_console(console.clone());
        sim.load_obj_file(&obj).unwrap();

        let heap = sim.mem.layout().heap_base();
        let fin = finished(sim.run().unwrap());
        assert_eq!(fin.reason, FinishReason::ExitSyscall);
        assert_eq!(fin.exit_code, Some(3));
        assert_eq!(&*console.get_output().read().unwrap(), b"42hi!");
        assert_eq!(reg(&sim, S0), heap);
        assert_eq!(sim.heap_pointer(), heap + 8);

        // undoing sbrk restores the break
        for _ in 0..5 {
            sim.step_back();
        }
        assert_eq!(sim.heap_pointer(), heap);
    }

    #[test]
    fn test_invalid_syscall() {
        let mut sim = load(SimFlags::default(), &[addiu(V0, ZERO, 99), SimInstr::Syscall]);
        let fin = finished(sim.run().unwrap());
        assert_eq!(fin.exception.unwrap().code, ExceptionCode::Syscall);

        // reading from an empty console
        let mut sim = load(SimFlags::default(), &[addiu(V0, ZERO, 5), SimInstr::Syscall]);
        let fin = finished(sim.run().unwrap());
        assert_eq!(fin.exception.unwrap().error, super::SimErr::InvalidSyscallInput(5));
    }

    #[test]
    fn test_keyboard_interrupt() {
        let mut obj = ObjectFile::empty();
        obj.add_text_block(TEXT, &[
            SimInstr::Lui(T1, 0xFFFF),
            addiu(T2, ZERO, 2),
            SimInstr::Store(StoreOp::Sw, T2, T1, 0), // enable keyboard interrupts
            addiu(T0, ZERO, 7),
            EXIT[0],
            EXIT[1],
        ]).unwrap();
        obj.add_text_block(HANDLER, &[
            SimInstr::Lui(K1, 0xFFFF),
            SimInstr::Load(LoadOp::Lw, K0, K1, 4),
            SimInstr::Alu(AluOp::Addu, S1, K0, ZERO),
            SimInstr::Mfc0(S2, Cp0Reg::Cause),
            SimInstr::Eret,
        ]).unwrap();

        let kb = BufferedKeyboard::default();
        let mut sim = Simulator::default();
        sim.device_handler.set_keyboard(kb.clone());
        sim.load_obj_file(&obj).unwrap();

        // resets clear the keyboard, so type after loading
        kb.get_buffer().write().unwrap().push_back(b'a');

        assert_eq!(finished(sim.run().unwrap()).reason, FinishReason::ExitSyscall);
        assert_eq!(reg(&sim, S1), u32::from(b'a'));
        assert_eq!(reg(&sim, T0), 7);
        assert_eq!(sim.cp0.get(Cp0Reg::Epc), TEXT + 12);
        // pending while handled, acknowledged by eret
        assert_eq!(reg(&sim, S2) & Coprocessor0::CAUSE_PENDING, 1 << 8);
        assert_eq!(sim.cp0.get(Cp0Reg::Cause) & Coprocessor0::CAUSE_PENDING, 0);
        assert!(!sim.cp0.exception_level());
        assert!(kb.get_buffer().read().unwrap().is_empty());
    }

    #[test]
    fn test_reset_values() {
        let mut sim = load(SimFlags::default(), &[addiu(T0, T0, 1)]);
        sim.run().unwrap();
        sim.cp0.set(Cp0Reg::Status, 0, &mut sim.journal);
        assert_eq!(reg(&sim, T0), 1);

        sim.reset();
        assert_eq!(reg(&sim, T0), 0);
        assert_eq!(sim.cp0.get(Cp0Reg::Status), 0x0000_FF11);
        assert_eq!(sim.reg_file.pc(), TEXT);
        assert_eq!(reg(&sim, SP), sim.mem.layout().stack_pointer());
        assert!(sim.journal.is_empty());
        // the program is reinstalled
        assert_eq!(sim.mem.fetch(TEXT).unwrap(), Some(addiu(T0, T0, 1)));
    }

    #[test]
    fn test_start_at_main() {
        let mut obj = ObjectFile::empty();
        obj.add_text_block(TEXT, &[addiu(T0, T0, 1), addiu(T0, T0, 1)]).unwrap();
        obj.add_label("main", TEXT + 4);

        let mut sim = Simulator::new(SimFlags { start_at_main: true, ..Default::default() });
        sim.load_obj_file(&obj).unwrap();
        assert_eq!(sim.reg_file.pc(), TEXT + 4);

        sim.flags.start_at_main = false;
        sim.reset();
        assert_eq!(sim.reg_file.pc(), TEXT);

        let mut bad = ObjectFile::empty();
        bad.add_text_block(DATA, &[NOP]).unwrap();
        assert!(sim.load_obj_file(&bad).is_err());
    }

    #[test]
    fn test_observers_see_committed_writes() {
        let mut sim = load(SimFlags::default(), &[
            addiu(T0, ZERO, 1),
            addiu(T0, ZERO, 1),
            SimInstr::Lui(T1, 0x1001),
            SimInstr::Store(StoreOp::Sw, T0, T1, 0),
        ]);
        let (_, regs) = sim.subscribe(Filter::Reg(RegId::Gpr(T0)), AccessSet::MODIFIED);
        let (mem_id, mem) = sim.subscribe(Filter::MemRange(DATA..=DATA + 3), AccessSet::WRITTEN);
        sim.run().unwrap();

        let events: Vec<_> = regs.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!((events[0].old, events[0].new), (0, 1));

        let event = mem.try_recv().unwrap();
        assert_eq!(event.new, 1);

        assert!(sim.unsubscribe(mem_id));
        assert!(!sim.unsubscribe(mem_id));
    }

    /// Registers, cp0 and pending branch, followed by the data and text words a test touches.
    fn snapshot(sim: &Simulator) -> (Vec<u32>, Vec<u32>, Option<u32>, Vec<u32>) {
        let regs = sim.reg_file.iter().map(|r| r.value()).collect();
        let cp0 = sim.cp0.iter().map(|r| r.value()).collect();
        let mem = (0..16).map(|i| sim.mem.get_word(DATA + 4 * i))
            .chain((0..32).map(|i| sim.mem.get_word(TEXT + 4 * i)))
            .collect();
        (regs, cp0, sim.delayed_branch(), mem)
    }
    fn undo_all(sim: &mut Simulator) -> usize {
        std::iter::from_fn(|| sim.step_back().then_some(())).count()
    }

    #[test]
    fn test_backstep_through_handler() {
        let mut obj = ObjectFile::empty();
        obj.add_text_block(TEXT, &[
            SimInstr::Lui(S0, 0x0040),
            SimInstr::Branch(BranchOp::Beq, ZERO, ZERO, 1),
            addiu(T0, ZERO, 1), // delay slot
            SimInstr::Break(0),
            SimInstr::Store(StoreOp::Sw, T0, S0, 64), // writes an empty text word
        ]).unwrap();
        obj.add_text_block(HANDLER, &[
            SimInstr::Mfc0(K0, Cp0Reg::Epc),
            addiu(K0, K0, 4),
            SimInstr::Mtc0(K0, Cp0Reg::Epc),
            SimInstr::Eret,
        ]).unwrap();

        let flags = SimFlags { delayed_branching: true, self_modifying_code: true, ..Default::default() };
        let mut sim = Simulator::new(flags);
        sim.load_obj_file(&obj).unwrap();
        let before = snapshot(&sim);

        sim.step_in().unwrap();
        sim.step_in().unwrap();
        assert_eq!(sim.delayed_branch(), Some(TEXT + 12));

        assert_eq!(finished(sim.run().unwrap()).reason, FinishReason::RanOffBottom);
        assert_eq!(reg(&sim, T0), 1);
        assert_eq!(sim.cp0.get(Cp0Reg::Epc), TEXT + 16);
        assert_eq!(sim.cp0.get(Cp0Reg::Cause) & Coprocessor0::CAUSE_EXC_CODE, 9 << 2);
        assert!(sim.mem.is_occupied(TEXT + 64));

        // lui, beq, slot, break, four handler instructions, sw
        assert_eq!(undo_all(&mut sim), 9);
        assert_eq!(snapshot(&sim), before);
        assert!(!sim.mem.is_occupied(TEXT + 64));
        assert_eq!(sim.finished(), None);

        // replaying after the undo lands in the same place
        assert_eq!(finished(sim.run().unwrap()).reason, FinishReason::RanOffBottom);
        assert_eq!(sim.cp0.get(Cp0Reg::Epc), TEXT + 16);
    }

    #[test]
    fn test_backstep_through_interrupt() {
        let mut obj = ObjectFile::empty();
        obj.add_text_block(TEXT, &[
            SimInstr::Lui(T1, 0xFFFF),
            addiu(T2, ZERO, 2),
            SimInstr::Store(StoreOp::Sw, T2, T1, 0),
            addiu(T0, ZERO, 7),
        ]).unwrap();
        obj.add_text_block(HANDLER, &[
            SimInstr::Lui(K1, 0xFFFF),
            SimInstr::Load(LoadOp::Lw, S1, K1, 4),
            SimInstr::Eret,
        ]).unwrap();

        let kb = BufferedKeyboard::default();
        let mut sim = Simulator::default();
        sim.device_handler.set_keyboard(kb.clone());
        sim.load_obj_file(&obj).unwrap();
        kb.get_buffer().write().unwrap().push_back(b'a');
        let before = snapshot(&sim);

        assert_eq!(finished(sim.run().unwrap()).reason, FinishReason::RanOffBottom);
        assert_eq!(reg(&sim, S1), u32::from(b'a'));
        assert_eq!(sim.cp0.get(Cp0Reg::Epc), TEXT + 12);

        // three instructions, the interrupt, three handler instructions, the last instruction
        assert_eq!(undo_all(&mut sim), 8);
        assert_eq!(snapshot(&sim), before);
    }

    fn arb_straight() -> impl Strategy<Value = SimInstr> {
        let reg = prop::sample::select(vec![T0, T1, T2, T3]);
        prop_oneof![
            (reg.clone(), reg.clone(), any::<u16>()).prop_map(|(rt, rs, imm)| SimInstr::AluImm(ImmOp::Addiu, rt, rs, imm)),
            (reg.clone(), reg.clone(), reg.clone()).prop_map(|(rd, rs, rt)| SimInstr::Alu(AluOp::Xor, rd, rs, rt)),
            (reg.clone(), reg.clone()).prop_map(|(rs, rt)| SimInstr::MulDiv(MulDivOp::Multu, rs, rt)),
            (reg.clone(), 0i16..16).prop_map(|(rt, w)| SimInstr::Store(StoreOp::Sw, rt, S0, w * 4)),
            (reg, 0i16..64).prop_map(|(rt, b)| SimInstr::Store(StoreOp::Sb, rt, S0, b)),
        ]
    }
    /// A straight-line instruction, or a forward branch followed by its delay slot.
    fn arb_unit() -> impl Strategy<Value = Vec<SimInstr>> {
        let reg = prop::sample::select(vec![ZERO, T0, T1]);
        let op = prop::sample::select(vec![BranchOp::Beq, BranchOp::Bne, BranchOp::Bgez, BranchOp::Bltzal]);
        prop_oneof![
            arb_straight().prop_map(|i| vec![i]),
            (op, reg.clone(), reg, 1i16..4, arb_straight())
                .prop_map(|(op, rs, rt, off, slot)| vec![SimInstr::Branch(op, rs, rt, off), slot]),
        ]
    }

    proptest! {
        #[test]
        fn backstep_restores_state(
            body in prop::collection::vec(arb_unit(), 1..30),
            delayed_branching: bool
        ) {
            let mut program = vec![SimInstr::Lui(S0, 0x1001)];
            program.extend(body.into_iter().flatten());
            let mut sim = load(SimFlags { delayed_branching, ..Default::default() }, &program);
            let before = snapshot(&sim);

            let fin = finished(sim.run().unwrap());
            prop_assert_eq!(fin.reason, FinishReason::RanOffBottom);
            prop_assert_eq!(sim.delayed_branch(), None);

            let steps = sim.journal.len();
            prop_assert_eq!(undo_all(&mut sim), steps);
            prop_assert!(sim.journal.is_empty());
            prop_assert_eq!(snapshot(&sim), before);
        }
    }
}
