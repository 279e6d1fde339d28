//! The backstep journal, used to undo execution one instruction at a time.
//!
//! This module exposes:
//! - [`Backstepper`]: The journal used by the Simulator.
//!
//! Every mutation the engine performs while executing an instruction
//! (register writes, coprocessor 0 writes, PC changes, memory writes) is recorded
//! alongside the value it replaced. The records of one instruction form a single step,
//! delimited by a boundary marker. Undoing a step replays its records in reverse,
//! writing the previous values back directly (no journaling, no notification).

use std::collections::VecDeque;

use crate::ast::{Cp0Reg, RegId};
use super::mem::Width;

/// The default number of steps the journal retains.
pub const DEFAULT_CAPACITY: usize = 2000;

/// A single undo record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Change {
    /// Start of a step, holding the PC the step began at.
    Boundary { pc: u32 },
    /// A register file write (GPR, HI, or LO).
    Reg { reg: RegId, prev: u32 },
    /// A PC write.
    Pc { prev: u32 },
    /// A coprocessor 0 write.
    Cp0 { reg: Cp0Reg, prev: u32 },
    /// A memory write of the given width.
    Mem { addr: u32, width: Width, prev: u32 },
    /// A text word that was not occupied before being written.
    TextMark { addr: u32 },
    /// The pending delayed branch target.
    DelayedBranch { prev: Option<u32> },
    /// The heap break pointer.
    Heap { prev: u32 },
}

/// Something which can have [`Change`]s reverse-applied to it.
pub(crate) trait Restore {
    /// Writes the previous value held by a change back into the machine state.
    ///
    /// This should not journal nor notify observers.
    fn restore(&mut self, change: Change);
}

/// The journal of executed steps.
///
/// The journal keeps at most [`Backstepper::capacity`] steps.
/// When it is full, the oldest step is discarded to make room.
#[derive(Debug)]
pub struct Backstepper {
    changes: VecDeque<Change>,
    steps: usize,
    capacity: usize,
    enabled: bool,
    in_step: bool
}

impl Backstepper {
    /// Creates a new journal.
    pub fn new(enabled: bool, capacity: usize) -> Self {
        Self {
            changes: VecDeque::new(),
            steps: 0,
            capacity,
            enabled,
            in_step: false
        }
    }

    /// Whether the journal is recording.
    pub fn enabled(&self) -> bool {
        self.enabled
    }
    /// Enables or disables recording.
    ///
    /// Disabling the journal discards every recorded step.
    /// The machine state is unaffected.
    pub fn set_enabled(&mut self, enabled: bool) {
        if !enabled {
            self.clear();
        }
        self.enabled = enabled;
    }

    /// The number of steps which can currently be undone.
    pub fn len(&self) -> usize {
        self.steps
    }
    /// Whether there is nothing to undo.
    pub fn is_empty(&self) -> bool {
        self.steps == 0
    }

    /// The maximum number of steps retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
    /// Sets the maximum number of steps retained, discarding the oldest steps if needed.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.trim();
    }

    /// Discards every recorded step.
    pub fn clear(&mut self) {
        self.changes.clear();
        self.steps = 0;
        self.in_step = false;
    }

    /// The PC of the step which would be undone next.
    pub fn last_step_pc(&self) -> Option<u32> {
        self.changes.iter()
            .rev()
            .find_map(|c| match *c {
                Change::Boundary { pc } => Some(pc),
                _ => None
            })
    }

    /// Opens a new step. Every change recorded until [`Backstepper::end_step`]
    /// is undone together.
    pub(crate) fn begin_step(&mut self, pc: u32) {
        if !self.enabled || self.capacity == 0 { return };

        self.changes.push_back(Change::Boundary { pc });
        self.steps += 1;
        self.in_step = true;
    }
    /// Closes the current step.
    pub(crate) fn end_step(&mut self) {
        self.in_step = false;
        self.trim();
    }

    /// Closes the current step, dropping it entirely if nothing was recorded in it.
    pub(crate) fn end_empty_step(&mut self) {
        if self.in_step && matches!(self.changes.back(), Some(Change::Boundary { .. })) {
            self.changes.pop_back();
            self.steps -= 1;
        }
        self.end_step();
    }

    /// Records a change to the current step.
    ///
    /// Changes made outside of a step (e.g., a debugger editing a register)
    /// and changes made while disabled are not recorded.
    pub(crate) fn record(&mut self, change: Change) {
        if self.enabled && self.in_step {
            self.changes.push_back(change);
        }
    }

    /// Undoes the most recent step.
    ///
    /// This returns the PC the step began at, or `None` if there was nothing to undo.
    pub(crate) fn undo_step(&mut self, target: &mut impl Restore) -> Option<u32> {
        if self.steps == 0 { return None };
        self.in_step = false;

        while let Some(change) = self.changes.pop_back() {
            match change {
                Change::Boundary { pc } => {
                    self.steps -= 1;
                    return Some(pc);
                },
                c => target.restore(c)
            }
        }

        // Only reachable if a boundary was lost, which trim prevents.
        self.steps = 0;
        None
    }

    fn trim(&mut self) {
        while self.steps > self.capacity {
            // Drop the front boundary and everything up to the next one.
            self.changes.pop_front();
            while let Some(c) = self.changes.front() {
                if matches!(c, Change::Boundary { .. }) { break };
                self.changes.pop_front();
            }
            self.steps -= 1;
        }
    }
}
impl Default for Backstepper {
    fn default() -> Self {
        Self::new(true, DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::{Backstepper, Change, Restore};
    use crate::ast::reg_consts::T0;
    use crate::ast::RegId;

    #[derive(Default)]
    struct Log(Vec<Change>);
    impl Restore for Log {
        fn restore(&mut self, change: Change) {
            self.0.push(change);
        }
    }

    fn record_step(bs: &mut Backstepper, pc: u32) {
        bs.begin_step(pc);
        bs.record(Change::Reg { reg: RegId::Gpr(T0), prev: pc });
        bs.record(Change::Pc { prev: pc });
        bs.end_step();
    }

    #[test]
    fn test_undo_order() {
        let mut bs = Backstepper::default();
        record_step(&mut bs, 0x400000);
        record_step(&mut bs, 0x400004);
        assert_eq!(bs.len(), 2);
        assert_eq!(bs.last_step_pc(), Some(0x400004));

        let mut log = Log::default();
        assert_eq!(bs.undo_step(&mut log), Some(0x400004));
        assert_eq!(log.0, [
            Change::Pc { prev: 0x400004 },
            Change::Reg { reg: RegId::Gpr(T0), prev: 0x400004 },
        ]);
        assert_eq!(bs.undo_step(&mut log), Some(0x400000));
        assert_eq!(bs.undo_step(&mut log), None);
        assert!(bs.is_empty());
    }

    #[test]
    fn test_capacity() {
        let mut bs = Backstepper::new(true, 3);
        for i in 0..5 {
            record_step(&mut bs, i * 4);
        }
        assert_eq!(bs.len(), 3);

        let mut log = Log::default();
        let pcs: Vec<_> = std::iter::from_fn(|| bs.undo_step(&mut log)).collect();
        assert_eq!(pcs, [16, 12, 8]);
        assert_eq!(log.0.len(), 6);

        record_step(&mut bs, 0);
        record_step(&mut bs, 4);
        bs.set_capacity(1);
        assert_eq!(bs.len(), 1);
        assert_eq!(bs.last_step_pc(), Some(4));
    }

    #[test]
    fn test_disabled() {
        let mut bs = Backstepper::default();
        record_step(&mut bs, 0);
        bs.set_enabled(false);
        assert!(bs.is_empty());

        record_step(&mut bs, 4);
        assert!(bs.is_empty());
        assert_eq!(bs.undo_step(&mut Log::default()), None);

        // outside of a step, nothing is recorded
        bs.set_enabled(true);
        bs.record(Change::Pc { prev: 0 });
        assert!(bs.is_empty());
        assert_eq!(bs.last_step_pc(), None);
    }
}
