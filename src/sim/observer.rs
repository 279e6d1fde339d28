//! Module handles observers of register and memory accesses.
//!
//! Observers subscribe to a [`Filter`] (a register, a group of registers, or a memory range)
//! through an [`ObserverBus`] and receive [`AccessEvent`]s over a channel.
//! Each register file and memory instance owns its own bus,
//! so observers of one simulator never see events from another.
//!
//! Subscriptions are revoked with [`ObserverBus::unsubscribe`],
//! or implicitly by dropping the receiving end of the channel.
//!
//! ```
//! use mips_ensemble::sim::observer::{AccessSet, Filter, ObserverBus};
//!
//! let mut bus = ObserverBus::new();
//! let (id, rx) = bus.subscribe(Filter::MemRange(0x1001_0000..=0x1001_00FF), AccessSet::WRITTEN);
//! assert_eq!(bus.len(), 1);
//!
//! bus.unsubscribe(id);
//! assert!(bus.is_empty());
//! assert!(rx.try_recv().is_err());
//! ```

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel as cbc;

use crate::ast::{Cp0Reg, RegId};
use super::mem::{Segment, Width};

/// The set of accesses which have occurred at (or are of interest for) a location.
///
/// ## Example
///
/// ```
/// # use mips_ensemble::sim::observer::AccessSet;
///
/// let accesses = AccessSet::READ;
/// assert!(accesses.accessed());
/// assert!(accesses.read());
/// assert!(!accesses.written());
/// assert!(!accesses.modified());
/// ```
#[derive(Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessSet(u8);
impl AccessSet {
    /// Set with only the read flag enabled.
    pub const READ: Self = Self(1 << 0);
    /// Set with only the write flag enabled.
    pub const WRITTEN: Self = Self(1 << 1);
    /// Set with only the modify flag enabled.
    pub const MODIFIED: Self = Self(1 << 2);
    /// Set with every flag enabled.
    pub const ALL: Self = Self(0b111);

    /// True if any access has occurred.
    pub fn accessed(&self) -> bool {
        self.0 != 0
    }

    /// True if a read has occurred.
    pub fn read(&self) -> bool {
        self.0 & Self::READ.0 != 0
    }
    /// True if a write has occurred (does not necessarily have to change data).
    pub fn written(&self) -> bool {
        self.0 & Self::WRITTEN.0 != 0
    }
    /// True if a write has occurred (data must change).
    pub fn modified(&self) -> bool {
        self.0 & Self::MODIFIED.0 != 0
    }
    /// True if the two sets have any flag in common.
    pub fn intersects(&self, other: AccessSet) -> bool {
        self.0 & other.0 != 0
    }

    /// The access set of a write, given the previous and new values.
    pub(crate) fn for_write(old: u32, new: u32) -> Self {
        match old == new {
            true  => Self::WRITTEN,
            false => Self::WRITTEN | Self::MODIFIED,
        }
    }
}
impl std::ops::BitOr for AccessSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}
impl std::ops::BitOrAssign for AccessSet {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}
impl std::fmt::Debug for AccessSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessFlags")
            .field("accessed", &self.accessed())
            .field("read", &self.read())
            .field("written", &self.written())
            .field("modified", &self.modified())
            .finish()
    }
}

/// The location an [`AccessEvent`] happened at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// A register in the main register file.
    Reg(RegId),
    /// A coprocessor 0 register.
    Cp0(Cp0Reg),
    /// A memory location.
    Mem {
        /// The lowest address accessed.
        addr: u32,
        /// The width of the access.
        width: Width,
        /// The segment the address lies in.
        segment: Segment
    }
}

/// A single access, delivered to observers once the access has been committed.
///
/// For reads, `old` and `new` are both the value read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessEvent {
    /// Where the access happened.
    pub target: Target,
    /// The value before the access.
    pub old: u32,
    /// The value after the access.
    pub new: u32,
    /// The kind of access.
    pub accesses: AccessSet
}

/// What a subscription is interested in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// A single register of the main register file.
    Reg(RegId),
    /// Every register of the main register file.
    AllRegs,
    /// A single coprocessor 0 register.
    Cp0(Cp0Reg),
    /// Every coprocessor 0 register.
    AllCp0,
    /// Any memory access overlapping this (inclusive) address range.
    MemRange(RangeInclusive<u32>),
}
impl Filter {
    fn matches(&self, target: &Target) -> bool {
        match (self, target) {
            (Filter::Reg(r), Target::Reg(t)) => r == t,
            (Filter::AllRegs, Target::Reg(_)) => true,
            (Filter::Cp0(r), Target::Cp0(t)) => r == t,
            (Filter::AllCp0, Target::Cp0(_)) => true,
            (Filter::MemRange(range), &Target::Mem { addr, width, .. }) => {
                let last = addr.saturating_add(width.bytes() - 1);
                addr <= *range.end() && *range.start() <= last
            },
            _ => false
        }
    }
}

/// Handle to a subscription, used to revoke it.
///
/// Handles are unique across every bus in the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);
impl SubscriptionId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug)]
struct Subscription {
    id: SubscriptionId,
    filter: Filter,
    accesses: AccessSet,
    tx: cbc::Sender<AccessEvent>
}

/// A publish/subscribe hub for access events.
#[derive(Debug, Default)]
pub struct ObserverBus {
    subs: Vec<Subscription>
}
impl ObserverBus {
    /// Creates a new bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to all accesses matching the filter and access kinds.
    ///
    /// Events are delivered on the returned (unbounded) channel
    /// in the order the accesses were committed.
    pub fn subscribe(&mut self, filter: Filter, accesses: AccessSet) -> (SubscriptionId, cbc::Receiver<AccessEvent>) {
        let (tx, rx) = cbc::unbounded();
        let id = SubscriptionId::next();

        self.subs.push(Subscription { id, filter, accesses, tx });
        (id, rx)
    }

    /// Revokes a subscription.
    ///
    /// This returns whether the subscription existed.
    /// Once revoked, no further events are sent to the subscription's channel.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let len = self.subs.len();
        self.subs.retain(|s| s.id != id);
        self.subs.len() != len
    }

    /// The number of active subscriptions.
    pub fn len(&self) -> usize {
        self.subs.len()
    }
    /// Whether there are no active subscriptions.
    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }
    /// Whether any subscription wants this kind of access.
    ///
    /// Callers can use this to skip building events nobody will receive.
    pub(crate) fn wants(&self, accesses: AccessSet) -> bool {
        self.subs.iter().any(|s| s.accesses.intersects(accesses))
    }

    /// Delivers an event to every matching subscription.
    ///
    /// Subscriptions whose receivers were dropped are removed.
    pub(crate) fn notify(&mut self, event: AccessEvent) {
        if self.subs.is_empty() { return };

        self.subs.retain(|s| {
            if !s.accesses.intersects(event.accesses) || !s.filter.matches(&event.target) {
                return true;
            }
            s.tx.send(event).is_ok()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessEvent, AccessSet, Filter, ObserverBus, Target};
    use crate::ast::reg_consts::{T0, T1};
    use crate::ast::RegId;
    use crate::sim::mem::{Segment, Width};

    fn reg_write(r: RegId, old: u32, new: u32) -> AccessEvent {
        AccessEvent { target: Target::Reg(r), old, new, accesses: AccessSet::for_write(old, new) }
    }
    fn mem_write(addr: u32, width: Width) -> AccessEvent {
        AccessEvent {
            target: Target::Mem { addr, width, segment: Segment::Data },
            old: 0, new: 1,
            accesses: AccessSet::for_write(0, 1)
        }
    }

    #[test]
    fn test_filters() {
        let mut bus = ObserverBus::new();
        let (_, t0_rx) = bus.subscribe(Filter::Reg(RegId::Gpr(T0)), AccessSet::WRITTEN);
        let (_, all_rx) = bus.subscribe(Filter::AllRegs, AccessSet::MODIFIED);
        let (_, mem_rx) = bus.subscribe(Filter::MemRange(0x100..=0x103), AccessSet::ALL);

        bus.notify(reg_write(RegId::Gpr(T0), 0, 5));
        bus.notify(reg_write(RegId::Gpr(T1), 3, 3));
        bus.notify(mem_write(0xFC, Width::Word));
        bus.notify(mem_write(0xFE, Width::Word));
        bus.notify(mem_write(0x104, Width::Byte));

        assert_eq!(t0_rx.try_iter().count(), 1);
        // T1 write did not modify anything:
        assert_eq!(all_rx.try_iter().map(|e| e.new).collect::<Vec<_>>(), [5]);
        // only the word at 0xFE overlaps 0x100..=0x103:
        assert_eq!(mem_rx.try_iter().count(), 1);
    }

    #[test]
    fn test_unsubscribe_and_drop() {
        let mut bus = ObserverBus::new();
        let (a, a_rx) = bus.subscribe(Filter::AllRegs, AccessSet::ALL);
        let (_, b_rx) = bus.subscribe(Filter::AllRegs, AccessSet::ALL);

        assert!(bus.unsubscribe(a));
        assert!(!bus.unsubscribe(a));
        bus.notify(reg_write(RegId::Pc, 0, 4));
        assert!(a_rx.try_recv().is_err());
        assert_eq!(b_rx.try_iter().count(), 1);

        // Dropped receivers are pruned on the next matching event.
        drop(b_rx);
        bus.notify(reg_write(RegId::Pc, 4, 8));
        assert!(bus.is_empty());
    }

    #[test]
    fn test_access_set() {
        assert!(AccessSet::for_write(1, 2).modified());
        assert!(!AccessSet::for_write(2, 2).modified());
        assert!(AccessSet::for_write(2, 2).written());
        assert!(AccessSet::ALL.intersects(AccessSet::READ));
        assert!(!AccessSet::WRITTEN.intersects(AccessSet::READ));
    }
}
