use std::sync::{Arc, RwLock, RwLockWriteGuard, TryLockError};

use super::{ExternalDevice, Interrupt, CTRL_IE, CTRL_READY, DS_CTRL, DS_DATA, DS_LINE};

/// Scaffolding required to implement [`ExternalDevice`] for display devices.
trait DisplayDevice: Send + Sync + 'static {
    /// Whether the display is ready to take output.
    fn ready(&self) -> bool;
    /// Sends output, returns whether the output was successfully accepted.
    fn send_output(&mut self, byte: u8) -> bool;
    /// Clears all of the current output.
    fn clear_output(&mut self);

    /// State of interrupt enabled.
    fn interrupts_enabled(&self) -> bool;
    /// Sets interrupt enabled.
    fn set_interrupts_enabled(&mut self, value: bool);
    /// Takes the pending "output done" interrupt, if there is one.
    fn take_pending(&mut self) -> bool;
}

fn ds_io_read(ds: &mut impl DisplayDevice, port: u32) -> Option<u32> {
    match port {
        DS_CTRL => {
            let ready = if ds.ready() { CTRL_READY } else { 0 };
            let ie = if ds.interrupts_enabled() { CTRL_IE } else { 0 };
            Some(ready | ie)
        },
        _ => None
    }
}
fn ds_io_write(ds: &mut impl DisplayDevice, port: u32, data: u32) -> bool {
    match port {
        DS_CTRL => {
            ds.set_interrupts_enabled(data & CTRL_IE != 0);
            true
        },
        DS_DATA => ds.send_output(data as u8),
        _ => false
    }
}

/// A display that delegates its output to a buffer.
///
/// When interrupts are enabled, each accepted byte raises one interrupt
/// (signaling the display is ready for more).
#[derive(Debug, Default, Clone)]
pub struct BufferedDisplay {
    buffer: Arc<RwLock<Vec<u8>>>,
    interrupts_enabled: bool,
    pending: bool
}
impl BufferedDisplay {
    /// Creates a new display, wrapping it around a given buffer.
    pub fn new(buffer: Arc<RwLock<Vec<u8>>>) -> Self {
        Self { buffer, interrupts_enabled: false, pending: false }
    }

    /// Gets a reference to the internal buffer of this display.
    pub fn get_buffer(&self) -> &Arc<RwLock<Vec<u8>>> {
        &self.buffer
    }

    fn try_output(&self) -> Option<RwLockWriteGuard<'_, Vec<u8>>> {
        match self.buffer.try_write() {
            Ok(g) => Some(g),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}
impl DisplayDevice for BufferedDisplay {
    fn ready(&self) -> bool {
        self.try_output().is_some()
    }

    fn send_output(&mut self, byte: u8) -> bool {
        let Some(mut d) = self.try_output() else { return false };
        d.push(byte);
        drop(d);

        self.pending = self.interrupts_enabled;
        true
    }

    fn clear_output(&mut self) {
        if let Some(mut out) = self.try_output() {
            out.clear();
        }
    }

    fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled
    }

    fn set_interrupts_enabled(&mut self, value: bool) {
        self.interrupts_enabled = value;
    }

    fn take_pending(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }
}
impl ExternalDevice for BufferedDisplay {
    fn io_read(&mut self, port: u32, _effectful: bool) -> Option<u32> {
        ds_io_read(self, port)
    }

    fn io_write(&mut self, port: u32, data: u32) -> bool {
        ds_io_write(self, port, data)
    }

    fn io_reset(&mut self) {
        self.clear_output();
        self.set_interrupts_enabled(false);
        self.pending = false;
    }

    fn poll_interrupt(&mut self) -> Option<Interrupt> {
        self.take_pending().then(|| Interrupt::new(DS_LINE))
    }
}
