//! Handlers for external devices connected to the Simulator.
//!
//! This handles memory-mapped IO devices (such as the keyboard and display)
//! and handles interrupts.
//!
//! The core types here are:
//! - [`ExternalDevice`]: A device which can be connected to the Simulator.
//! - [`DeviceHandler`]: The handler for the Simulator's IO ports & interrupts.
//!
//! Devices are addressed by port, the word offset of a register from the start of the MMIO segment.
//! The keyboard and display occupy the first four ports:
//!
//! | Port   | Register                                              |
//! |--------|-------------------------------------------------------|
//! | `0x0`  | Keyboard control (bit 0: ready, bit 1: interrupt enable) |
//! | `0x4`  | Keyboard data (the last key pressed)                  |
//! | `0x8`  | Display control (bit 0: ready, bit 1: interrupt enable)  |
//! | `0xC`  | Display data (the byte to print)                      |
//!
//! This module also provides some IO devices:
//! - [`NullDevice`]: Does nothing.
//! - [`BufferedKeyboard`]: Keyboard device that reads off of an input buffer.
//! - [`BufferedDisplay`]: Display device that writes to an output buffer.
//! - [`TimerDevice`]: Raises an interrupt every so many instructions.
//! - [`InterruptFromFn`]: Raises interrupts from a function.

mod keyboard;
mod display;
mod timer;

use std::collections::BTreeMap;

pub use keyboard::BufferedKeyboard;
pub use display::BufferedDisplay;
pub use timer::TimerDevice;

/// Keyboard control port.
pub const KB_CTRL: u32 = 0x0;
/// Keyboard data port.
pub const KB_DATA: u32 = 0x4;
/// Display control port.
pub const DS_CTRL: u32 = 0x8;
/// Display data port.
pub const DS_DATA: u32 = 0xC;

const CTRL_READY: u32 = 1 << 0;
const CTRL_IE: u32 = 1 << 1;

/// Interrupt line raised by the keyboard.
pub const KB_LINE: u8 = 0;
/// Interrupt line raised by the display.
pub const DS_LINE: u8 = 1;

/// An external device, which can be accessed via memory-mapped IO or via interrupts.
pub trait ExternalDevice: Send + Sync + 'static {
    /// Reads the data at the given port.
    ///
    /// `effectful` is false when the read is only a query (e.g., a debugger view),
    /// in which case the device should not change state.
    ///
    /// If successful, this returns the value returned from that port.
    /// If unsuccessful, this returns `None`.
    fn io_read(&mut self, port: u32, effectful: bool) -> Option<u32>;

    /// Writes the data to the given port.
    ///
    /// This returns whether the write was successful or not.
    fn io_write(&mut self, port: u32, data: u32) -> bool;

    /// Resets device.
    fn io_reset(&mut self);

    /// During each instruction cycle, this function is called once to see whether
    /// to trigger an interrupt.
    fn poll_interrupt(&mut self) -> Option<Interrupt>;
}

/// The central hub for all external devices for the Simulator.
pub struct DeviceHandler {
    devices: Vec<Box<dyn ExternalDevice>>,
    ports: BTreeMap<u32, usize>
}

impl DeviceHandler {
    const NULL_DEV: usize = 0;
    const KB_DEV: usize = 1;
    const DS_DEV: usize = 2;
    const FIXED_DEVS: &'static [usize] = &[Self::NULL_DEV, Self::KB_DEV, Self::DS_DEV];

    /// Creates a new device handler.
    pub fn new() -> Self {
        Self {
            devices: vec![Box::new(NullDevice), Box::new(NullDevice), Box::new(NullDevice)],
            ports: BTreeMap::from([
                (KB_CTRL, Self::KB_DEV),
                (KB_DATA, Self::KB_DEV),
                (DS_CTRL, Self::DS_DEV),
                (DS_DATA, Self::DS_DEV),
            ])
        }
    }

    /// Gets the device ID bound to a given port.
    pub fn device_at(&self, port: u32) -> Option<usize> {
        self.ports.get(&port).copied()
    }

    /// Set the keyboard device.
    pub fn set_keyboard(&mut self, kb: impl ExternalDevice) {
        self.devices[Self::KB_DEV] = Box::new(kb);
    }
    /// Set the display device.
    pub fn set_display(&mut self, ds: impl ExternalDevice) {
        self.devices[Self::DS_DEV] = Box::new(ds);
    }
    /// Add a new device (which is not a keyboard or a display).
    ///
    /// This accepts an external device and the ports which the device should act on.
    /// If successful, the ID of the device is returned.
    ///
    /// # Errors
    /// If the device cannot be added, it will be returned back to the user.
    /// This occurs if any port is not word-aligned or is already occupied by another device.
    pub fn add_device<D: ExternalDevice>(&mut self, dev: D, ports: &[u32]) -> Result<usize, D> {
        let all_valid_ports = ports.iter()
            .all(|p| p % 4 == 0 && !self.ports.contains_key(p));
        if !all_valid_ports { return Err(dev) };

        let dev_id = self.devices.len();
        self.devices.push(Box::new(dev));
        for &p in ports {
            self.ports.insert(p, dev_id);
        }

        Ok(dev_id)
    }
    /// Removes the device at the given device ID.
    pub fn remove_device(&mut self, dev_id: usize) {
        if let Some(dev_ref) = self.devices.get_mut(dev_id) {
            *dev_ref = Box::new(NullDevice);

            // Only release ports if they're not keyboard/display.
            if !Self::FIXED_DEVS.contains(&dev_id) {
                self.ports.retain(|_, d| *d != dev_id);
            }
        }
    }
}
impl Default for DeviceHandler {
    fn default() -> Self {
        Self::new()
    }
}
impl std::fmt::Debug for DeviceHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandler")
            .field("devices", &self.devices.len())
            .field("ports", &self.ports)
            .finish()
    }
}
impl ExternalDevice for DeviceHandler {
    /// Accesses the IO device mapped to the given port and tries [`ExternalDevice::io_read`] on it.
    fn io_read(&mut self, port: u32, effectful: bool) -> Option<u32> {
        let dev_id = self.device_at(port)?;
        self.devices[dev_id].io_read(port, effectful)
    }

    /// Accesses the IO device mapped to the given port and tries [`ExternalDevice::io_write`] on it.
    fn io_write(&mut self, port: u32, data: u32) -> bool {
        let Some(dev_id) = self.device_at(port) else { return false };
        self.devices[dev_id].io_write(port, data)
    }

    /// Resets all the devices connected to this handler.
    fn io_reset(&mut self) {
        self.devices.iter_mut().for_each(|d| d.io_reset())
    }

    /// Checks for interrupts on all devices.
    ///
    /// Every device is polled (so that each device sees every cycle),
    /// and the interrupt on the lowest line is returned.
    fn poll_interrupt(&mut self) -> Option<Interrupt> {
        self.devices.iter_mut()
            .filter_map(|d| d.poll_interrupt())
            .min_by_key(|i| i.line())
    }
}

/// An interrupt.
///
/// This is output by an implementation of [`ExternalDevice::poll_interrupt`] if an interrupt should occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interrupt {
    line: u8
}
impl Interrupt {
    /// Creates a new interrupt on one of the 8 hardware lines.
    ///
    /// Note that the line is truncated to 3 bits.
    pub fn new(line: u8) -> Self {
        Self { line: line & 0b111 }
    }
    /// The interrupt line (0-7).
    pub fn line(self) -> u8 {
        self.line
    }
    /// The bit of this interrupt in the CAUSE pending field (and in the STATUS mask).
    pub fn cause_bit(self) -> u32 {
        1 << (8 + u32::from(self.line))
    }
}

/// Does nothing.
///
/// Does not accept any reads nor writes and never interrupts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NullDevice;
impl ExternalDevice for NullDevice {
    fn io_read(&mut self, _port: u32, _effectful: bool) -> Option<u32> {
        None
    }

    fn io_write(&mut self, _port: u32, _data: u32) -> bool {
        false
    }

    fn io_reset(&mut self) {}

    fn poll_interrupt(&mut self) -> Option<Interrupt> {
        None
    }
}

/// A device that handles interrupts with a function.
#[allow(clippy::type_complexity)]
pub struct InterruptFromFn(Box<dyn FnMut() -> Option<Interrupt> + Send + Sync + 'static>);
impl InterruptFromFn {
    /// Creates a new interrupt from a function.
    pub fn new(f: impl FnMut() -> Option<Interrupt> + Send + Sync + 'static) -> Self {
        Self(Box::new(f))
    }
}
impl std::fmt::Debug for InterruptFromFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptFromFn").finish_non_exhaustive()
    }
}
impl ExternalDevice for InterruptFromFn {
    fn io_read(&mut self, _port: u32, _effectful: bool) -> Option<u32> {
        None
    }

    fn io_write(&mut self, _port: u32, _data: u32) -> bool {
        false
    }

    fn io_reset(&mut self) {}

    fn poll_interrupt(&mut self) -> Option<Interrupt> {
        (self.0)()
    }
}

fn resolve_lock<G>(e: std::sync::TryLockResult<G>) -> Option<G> {
    use std::sync::TryLockError;

    match e {
        Ok(guard) => Some(guard),
        Err(TryLockError::WouldBlock) => None,
        Err(TryLockError::Poisoned(e)) => {
            tracing::warn!("device lock was poisoned, recovering");
            Some(e.into_inner())
        }
    }
}
impl<D: ExternalDevice> ExternalDevice for std::sync::Arc<std::sync::RwLock<D>> {
    fn io_read(&mut self, port: u32, effectful: bool) -> Option<u32> {
        resolve_lock(self.try_write())?
            .io_read(port, effectful)
    }

    fn io_write(&mut self, port: u32, data: u32) -> bool {
        resolve_lock(self.try_write())
            .map_or(false, |mut g| g.io_write(port, data))
    }

    fn io_reset(&mut self) {
        if let Some(mut guard) = resolve_lock(self.try_write()) {
            guard.io_reset();
        }
    }

    fn poll_interrupt(&mut self) -> Option<Interrupt> {
        resolve_lock(self.try_write())
            .and_then(|mut g| g.poll_interrupt())
    }
}
impl<D: ExternalDevice> ExternalDevice for std::sync::Arc<std::sync::Mutex<D>> {
    fn io_read(&mut self, port: u32, effectful: bool) -> Option<u32> {
        resolve_lock(self.try_lock())?
            .io_read(port, effectful)
    }

    fn io_write(&mut self, port: u32, data: u32) -> bool {
        resolve_lock(self.try_lock())
            .map_or(false, |mut g| g.io_write(port, data))
    }

    fn io_reset(&mut self) {
        if let Some(mut guard) = resolve_lock(self.try_lock()) {
            guard.io_reset();
        }
    }

    fn poll_interrupt(&mut self) -> Option<Interrupt> {
        resolve_lock(self.try_lock())
            .and_then(|mut g| g.poll_interrupt())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex, RwLock};

    use super::*;

    #[test]
    fn test_keyboard_ports() {
        let input = Arc::new(RwLock::new(VecDeque::from(*b"hi")));
        let mut handler = DeviceHandler::new();
        handler.set_keyboard(BufferedKeyboard::new(Arc::clone(&input)));

        assert_eq!(handler.io_read(KB_CTRL, true), Some(CTRL_READY));
        assert_eq!(handler.io_read(KB_DATA, false), Some(u32::from(b'h')));
        assert_eq!(handler.io_read(KB_DATA, true), Some(u32::from(b'h')));
        assert_eq!(handler.io_read(KB_DATA, true), Some(u32::from(b'i')));
        assert_eq!(handler.io_read(KB_CTRL, true), Some(0));
        assert_eq!(handler.poll_interrupt(), None);

        // enabling interrupts, then pressing a key
        assert!(handler.io_write(KB_CTRL, CTRL_IE));
        input.write().unwrap().push_back(b'!');
        assert_eq!(handler.io_read(KB_CTRL, true), Some(CTRL_READY | CTRL_IE));
        assert_eq!(handler.poll_interrupt(), Some(Interrupt::new(KB_LINE)));
    }

    #[test]
    fn test_display_ports() {
        let output = Arc::new(RwLock::new(vec![]));
        let mut handler = DeviceHandler::new();
        handler.set_display(BufferedDisplay::new(Arc::clone(&output)));

        assert_eq!(handler.io_read(DS_CTRL, true), Some(CTRL_READY));
        assert!(handler.io_write(DS_DATA, u32::from(b'o')));
        assert!(handler.io_write(DS_DATA, 0x100 | u32::from(b'k')));
        assert_eq!(&*output.read().unwrap(), b"ok");
        assert_eq!(handler.poll_interrupt(), None);

        // with interrupts enabled, each output raises one interrupt
        assert!(handler.io_write(DS_CTRL, CTRL_IE));
        assert!(handler.io_write(DS_DATA, u32::from(b'.')));
        assert_eq!(handler.poll_interrupt(), Some(Interrupt::new(DS_LINE)));
        assert_eq!(handler.poll_interrupt(), None);
    }

    #[test]
    fn test_add_remove_device() {
        let mut handler = DeviceHandler::new();
        assert!(handler.add_device(NullDevice, &[KB_CTRL]).is_err());
        assert!(handler.add_device(NullDevice, &[0x12]).is_err());

        let fired = Arc::new(Mutex::new(false));
        let fired2 = Arc::clone(&fired);
        let dev = InterruptFromFn::new(move || {
            let mut f = fired2.lock().unwrap();
            (!std::mem::replace(&mut *f, true)).then(|| Interrupt::new(5))
        });
        let id = handler.add_device(dev, &[0x10, 0x14]).unwrap();
        assert_eq!(handler.device_at(0x14), Some(id));
        assert_eq!(handler.poll_interrupt().map(|i| i.cause_bit()), Some(1 << 13));
        assert_eq!(handler.poll_interrupt(), None);

        handler.remove_device(id);
        assert_eq!(handler.device_at(0x10), None);
        handler.remove_device(DeviceHandler::KB_DEV);
        assert_eq!(handler.device_at(KB_CTRL), Some(DeviceHandler::KB_DEV));
    }

    #[test]
    fn test_shared_device() {
        let timer = Arc::new(Mutex::new(TimerDevice::new(Some(0), 2..=2, 3)));
        timer.lock().unwrap().enabled = true;

        let mut handler = DeviceHandler::new();
        handler.add_device(Arc::clone(&timer), &[]).unwrap();
        assert_eq!(handler.poll_interrupt(), None);
        assert_eq!(handler.poll_interrupt(), Some(Interrupt::new(3)));
    }
}
