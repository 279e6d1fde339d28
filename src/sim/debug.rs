//! Utilities to debug simulation.
//!
//! The key type here is [`Breakpoints`], the set of addresses held in the [`Simulator`]'s
//! breakpoint field which cause the simulator to pause before executing them.
//!
//! [`Simulator`]: super::Simulator
use std::collections::BTreeSet;

/// The set of breakpoint addresses.
///
/// Addresses are kept in ascending order.
///
/// ```
/// use mips_ensemble::sim::debug::Breakpoints;
///
/// let mut bps = Breakpoints::new();
/// bps.insert(0x0040_0008);
/// bps.insert(0x0040_0000);
/// assert!(bps.contains(0x0040_0000));
/// assert_eq!(bps.iter().collect::<Vec<_>>(), [0x0040_0000, 0x0040_0008]);
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Breakpoints(BTreeSet<u32>);

impl Breakpoints {
    /// Creates an empty breakpoint set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a breakpoint, returning whether it was newly added.
    pub fn insert(&mut self, addr: u32) -> bool {
        self.0.insert(addr)
    }
    /// Removes a breakpoint, returning whether it was present.
    pub fn remove(&mut self, addr: u32) -> bool {
        self.0.remove(&addr)
    }
    /// Adds the breakpoint if absent or removes it if present.
    ///
    /// This returns whether the breakpoint is now set.
    pub fn toggle(&mut self, addr: u32) -> bool {
        if self.0.remove(&addr) {
            false
        } else {
            self.0.insert(addr)
        }
    }
    /// Whether a breakpoint is set at the address.
    pub fn contains(&self, addr: u32) -> bool {
        self.0.contains(&addr)
    }
    /// Replaces every breakpoint with the given addresses.
    pub fn replace_all(&mut self, addrs: impl IntoIterator<Item=u32>) {
        self.0 = addrs.into_iter().collect();
    }
    /// Removes every breakpoint.
    pub fn clear(&mut self) {
        self.0.clear()
    }
    /// Iterates over the breakpoints in ascending order.
    pub fn iter(&self) -> impl Iterator<Item=u32> + '_ {
        self.0.iter().copied()
    }
    /// The number of breakpoints.
    pub fn len(&self) -> usize {
        self.0.len()
    }
    /// Whether there are no breakpoints.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
impl FromIterator<u32> for Breakpoints {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
impl Extend<u32> for Breakpoints {
    fn extend<T: IntoIterator<Item = u32>>(&mut self, iter: T) {
        self.0.extend(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::Breakpoints;

    #[test]
    fn test_toggle_and_replace() {
        let mut bps: Breakpoints = [8, 4].into_iter().collect();
        assert!(!bps.toggle(4));
        assert!(bps.toggle(12));
        assert_eq!(bps.iter().collect::<Vec<_>>(), [8, 12]);

        bps.replace_all([0, 0, 16]);
        assert_eq!(bps.len(), 2);
        assert!(!bps.contains(8));
        assert!(bps.remove(16));
        assert!(!bps.remove(16));

        bps.clear();
        assert!(bps.is_empty());
    }
}
