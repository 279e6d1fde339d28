use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockWriteGuard, TryLockError};

use super::{ExternalDevice, Interrupt, CTRL_IE, CTRL_READY, KB_CTRL, KB_DATA, KB_LINE};

/// Scaffolding needed to implement [`ExternalDevice`] for keyboard devices.
trait KeyboardDevice: Send + Sync + 'static {
    /// State of interrupt enabled.
    fn interrupts_enabled(&self) -> bool;
    /// Sets interrupt enabled.
    fn set_interrupts_enabled(&mut self, value: bool);

    /// Whether the keyboard has input to take.
    fn ready(&self) -> bool;
    /// Reads a character from the input (but does not take it).
    fn get_input(&self) -> Option<u8>;
    /// Reads and removes a character from the input.
    fn pop_input(&mut self) -> Option<u8>;
    /// Clears the input completely.
    fn clear_input(&mut self);
}

fn kb_io_read(kb: &mut impl KeyboardDevice, port: u32, effectful: bool) -> Option<u32> {
    match port {
        KB_CTRL => {
            let ready = if kb.ready() { CTRL_READY } else { 0 };
            let ie = if kb.interrupts_enabled() { CTRL_IE } else { 0 };
            Some(ready | ie)
        },
        KB_DATA if effectful => kb.pop_input().map(u32::from),
        KB_DATA => kb.get_input().map(u32::from),
        _ => None
    }
}
fn kb_io_write(kb: &mut impl KeyboardDevice, port: u32, data: u32) -> bool {
    match port {
        KB_CTRL => {
            kb.set_interrupts_enabled(data & CTRL_IE != 0);
            true
        },
        _ => false
    }
}
fn kb_io_reset(kb: &mut impl KeyboardDevice) {
    kb.clear_input();
    kb.set_interrupts_enabled(false);
}
fn kb_poll_interrupt(kb: &mut impl KeyboardDevice) -> Option<Interrupt> {
    match kb.ready() && kb.interrupts_enabled() {
        true  => Some(Interrupt::new(KB_LINE)),
        false => None,
    }
}

/// Keyboard that accesses input from a memory buffer.
///
/// While the buffer holds keys, the control register reports ready.
/// Reading the data register takes the next key.
#[derive(Debug, Default, Clone)]
pub struct BufferedKeyboard {
    buffer: Arc<RwLock<VecDeque<u8>>>,
    interrupts_enabled: bool
}
impl BufferedKeyboard {
    /// Creates a new keyboard, wrapping it around a given buffer.
    pub fn new(buffer: Arc<RwLock<VecDeque<u8>>>) -> Self {
        Self { buffer, interrupts_enabled: false }
    }

    /// Gets a reference to the internal buffer of this keyboard.
    pub fn get_buffer(&self) -> &Arc<RwLock<VecDeque<u8>>> {
        &self.buffer
    }

    fn try_input(&self) -> Option<RwLockWriteGuard<'_, VecDeque<u8>>> {
        match self.buffer.try_write() {
            Ok(g) => Some(g),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}
impl KeyboardDevice for BufferedKeyboard {
    fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled
    }

    fn set_interrupts_enabled(&mut self, value: bool) {
        self.interrupts_enabled = value;
    }

    fn ready(&self) -> bool {
        self.try_input().is_some_and(|buf| !buf.is_empty())
    }

    fn get_input(&self) -> Option<u8> {
        self.try_input()?.front().copied()
    }

    fn pop_input(&mut self) -> Option<u8> {
        self.try_input()?.pop_front()
    }

    fn clear_input(&mut self) {
        if let Some(mut inp) = self.try_input() {
            inp.clear();
        }
    }
}
impl ExternalDevice for BufferedKeyboard {
    fn io_read(&mut self, port: u32, effectful: bool) -> Option<u32> {
        kb_io_read(self, port, effectful)
    }

    fn io_write(&mut self, port: u32, data: u32) -> bool {
        kb_io_write(self, port, data)
    }

    fn io_reset(&mut self) {
        kb_io_reset(self)
    }

    fn poll_interrupt(&mut self) -> Option<Interrupt> {
        kb_poll_interrupt(self)
    }
}
