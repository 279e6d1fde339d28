use std::ops::RangeInclusive;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{ExternalDevice, Interrupt};

/// A countdown device which raises an interrupt line every so many cycles.
///
/// The timer has no ports. While enabled, each poll counts down by one cycle.
/// When the countdown reaches zero, the line is raised and a new interval is drawn
/// from [`TimerDevice::interval`].
#[derive(Debug)]
pub struct TimerDevice {
    rng: StdRng,
    interval: RangeInclusive<u32>,
    countdown: u32,

    /// The interrupt line (0-7).
    pub line: u8,
    /// Whether the countdown is running.
    pub enabled: bool,
}
impl TimerDevice {
    /// Creates a disabled timer raising `line` after a number of cycles drawn from `interval`.
    ///
    /// A `seed` makes the drawn intervals reproducible.
    /// An empty interval never fires.
    pub fn new(seed: Option<u64>, interval: RangeInclusive<u32>, line: u8) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let mut timer = Self { rng, interval, countdown: 0, line, enabled: false };
        timer.rewind();
        timer
    }

    /// The range of cycle counts between interrupts.
    pub fn interval(&self) -> &RangeInclusive<u32> {
        &self.interval
    }
    /// Changes the range of cycle counts between interrupts, restarting the countdown.
    pub fn set_interval(&mut self, interval: RangeInclusive<u32>) {
        self.interval = interval;
        self.rewind();
    }

    /// The number of cycles until the line is raised.
    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    fn rewind(&mut self) {
        self.countdown = match self.interval.is_empty() {
            true  => 0,
            false => self.rng.gen_range(self.interval.clone()),
        };
    }
}
impl Default for TimerDevice {
    /// A disabled, unseeded timer raising line 2 every 50 cycles.
    fn default() -> Self {
        Self::new(None, 50..=50, 2)
    }
}
impl ExternalDevice for TimerDevice {
    fn io_read(&mut self, _port: u32, _effectful: bool) -> Option<u32> {
        None
    }

    fn io_write(&mut self, _port: u32, _data: u32) -> bool {
        false
    }

    fn io_reset(&mut self) {
        self.rewind();
    }

    fn poll_interrupt(&mut self) -> Option<Interrupt> {
        if !self.enabled || self.countdown == 0 { return None };

        self.countdown -= 1;
        if self.countdown > 0 { return None };

        self.rewind();
        Some(Interrupt::new(self.line))
    }
}
