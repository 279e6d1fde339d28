//! Syscall services.
//!
//! A `syscall` instruction requests the service whose number is in `$v0`,
//! with arguments in `$a0` and `$a1`. Services which print or read text
//! go through the simulator's [`Console`].
//!
//! [`Console`]: super::io::Console

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ast::reg_consts::{A0, A1, V0};
use crate::ast::RegId;
use super::backstep::Change;
use super::mem::Width;
use super::{SimErr, Simulator};

/// The supported syscall services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Syscall {
    /// Prints `$a0` as a signed integer.
    PrintInt,
    /// Prints the null-terminated string at address `$a0`.
    PrintString,
    /// Reads a line and parses it as an integer into `$v0`.
    ReadInt,
    /// Reads a line into the buffer at `$a0`, which holds at most `$a1` bytes.
    ReadString,
    /// Allocates `$a0` bytes of heap, returning the address in `$v0`.
    Sbrk,
    /// Exits with code 0.
    Exit,
    /// Prints the low byte of `$a0` as a character.
    PrintChar,
    /// Reads a character into `$v0`.
    ReadChar,
    /// Exits with code `$a0`.
    Exit2,
    /// Prints `$a0` in hexadecimal.
    PrintHex,
    /// Prints `$a0` in binary.
    PrintBinary,
    /// Prints `$a0` as an unsigned integer.
    PrintUnsigned,
    /// Seeds the random stream `$a0` with `$a1`.
    SetSeed,
    /// Generates a random integer from stream `$a0` into `$a0`.
    RandInt,
    /// Generates a random integer in `[0, $a1)` from stream `$a0` into `$a0`.
    RandIntRange,
}
impl Syscall {
    /// Gets the service with the given number.
    pub fn from_code(code: u32) -> Option<Self> {
        use Syscall::*;
        let s = match code {
            1 => PrintInt,
            4 => PrintString,
            5 => ReadInt,
            8 => ReadString,
            9 => Sbrk,
            10 => Exit,
            11 => PrintChar,
            12 => ReadChar,
            17 => Exit2,
            34 => PrintHex,
            35 => PrintBinary,
            36 => PrintUnsigned,
            40 => SetSeed,
            41 => RandInt,
            42 => RandIntRange,
            _ => return None
        };
        Some(s)
    }

    /// The number of this service.
    pub fn code(self) -> u32 {
        use Syscall::*;
        match self {
            PrintInt => 1,
            PrintString => 4,
            ReadInt => 5,
            ReadString => 8,
            Sbrk => 9,
            Exit => 10,
            PrintChar => 11,
            ReadChar => 12,
            Exit2 => 17,
            PrintHex => 34,
            PrintBinary => 35,
            PrintUnsigned => 36,
            SetSeed => 40,
            RandInt => 41,
            RandIntRange => 42,
        }
    }
}

/// Runs the syscall service requested in `$v0`.
///
/// This returns `Some(code)` if the service exits the program.
pub(super) fn dispatch(sim: &mut Simulator) -> Result<Option<i32>, SimErr> {
    let code = sim.reg_file.read(RegId::Gpr(V0));
    let Some(service) = Syscall::from_code(code) else {
        return Err(SimErr::InvalidSyscall(code));
    };
    let a0 = sim.reg_file.read(RegId::Gpr(A0));
    tracing::trace!(?service, a0, "syscall");

    match service {
        Syscall::PrintInt => sim.console.print(&(a0 as i32).to_string()),
        Syscall::PrintString => {
            let text = read_c_string(sim, a0)?;
            sim.console.print(&text);
        },
        Syscall::ReadInt => {
            let value = sim.console.read_line()
                .and_then(|line| crate::parse::parse_int(&line).ok())
                .ok_or(SimErr::InvalidSyscallInput(code))?;
            sim.reg_file.set(RegId::Gpr(V0), value as u32, &mut sim.journal);
        },
        Syscall::ReadString => {
            let max_len = sim.reg_file.read(RegId::Gpr(A1)) as i32;
            let line = sim.console.read_line()
                .ok_or(SimErr::InvalidSyscallInput(code))?;
            write_c_string(sim, a0, &line, max_len)?;
        },
        Syscall::Sbrk => {
            let addr = sbrk(sim, a0 as i32).ok_or(SimErr::InvalidSyscallInput(code))?;
            sim.reg_file.set(RegId::Gpr(V0), addr, &mut sim.journal);
        },
        Syscall::Exit => return Ok(Some(0)),
        Syscall::PrintChar => sim.console.print(&char::from(a0 as u8).to_string()),
        Syscall::ReadChar => {
            let c = sim.console.read_char()
                .ok_or(SimErr::InvalidSyscallInput(code))?;
            sim.reg_file.set(RegId::Gpr(V0), u32::from(c), &mut sim.journal);
        },
        Syscall::Exit2 => return Ok(Some(a0 as i32)),
        Syscall::PrintHex => sim.console.print(&format!("0x{a0:08x}")),
        Syscall::PrintBinary => sim.console.print(&format!("{a0:032b}")),
        Syscall::PrintUnsigned => sim.console.print(&a0.to_string()),
        Syscall::SetSeed => {
            let seed = sim.reg_file.read(RegId::Gpr(A1));
            sim.rngs.insert(a0, StdRng::seed_from_u64(u64::from(seed)));
        },
        Syscall::RandInt => {
            let value: u32 = rng_for(sim, a0).gen();
            sim.reg_file.set(RegId::Gpr(A0), value, &mut sim.journal);
        },
        Syscall::RandIntRange => {
            let upper = sim.reg_file.read(RegId::Gpr(A1)) as i32;
            if upper <= 0 {
                return Err(SimErr::InvalidSyscallInput(code));
            }
            let value = rng_for(sim, a0).gen_range(0..upper);
            sim.reg_file.set(RegId::Gpr(A0), value as u32, &mut sim.journal);
        },
    }

    Ok(None)
}

fn rng_for(sim: &mut Simulator, id: u32) -> &mut StdRng {
    sim.rngs.entry(id).or_insert_with(StdRng::from_entropy)
}

fn read_c_string(sim: &mut Simulator, mut addr: u32) -> Result<String, SimErr> {
    let mut bytes = vec![];
    loop {
        let byte = sim.read_mem(addr, Width::Byte)? as u8;
        if byte == 0 { break };
        bytes.push(byte);
        addr = addr.wrapping_add(1);
    }
    Ok(bytes.into_iter().map(char::from).collect())
}

/// Writes a line into a buffer of `max_len` bytes.
///
/// At most `max_len - 1` characters are written. If there is room, a newline follows them.
/// The string is always null-terminated.
fn write_c_string(sim: &mut Simulator, addr: u32, line: &str, max_len: i32) -> Result<(), SimErr> {
    if max_len <= 0 { return Ok(()) };
    let room = (max_len - 1) as usize;

    let mut bytes: Vec<u8> = line.bytes().take(room).collect();
    if bytes.len() < room {
        bytes.push(b'\n');
    }
    bytes.push(0);

    for (i, b) in bytes.into_iter().enumerate() {
        sim.write_mem(addr.wrapping_add(i as u32), Width::Byte, u32::from(b))?;
    }
    Ok(())
}

/// Moves the heap break forward, returning the start of the allocated block.
///
/// The break stays word-aligned. This fails if the request is negative
/// or exceeds the heap.
fn sbrk(sim: &mut Simulator, bytes: i32) -> Option<u32> {
    let bytes = u32::try_from(bytes).ok()?;
    let start = sim.heap_ptr;
    let end = start.checked_add(bytes)?.checked_add(3)? & !0b11;
    if end > sim.mem.layout().heap_limit() {
        return None;
    }

    sim.journal.record(Change::Heap { prev: start });
    sim.heap_ptr = end;
    Some(start)
}

#[cfg(test)]
mod tests {
    use super::Syscall;

    #[test]
    fn test_codes() {
        for code in 0..64 {
            if let Some(s) = Syscall::from_code(code) {
                assert_eq!(s.code(), code);
            }
        }
        assert_eq!(Syscall::from_code(17), Some(Syscall::Exit2));
        assert_eq!(Syscall::from_code(2), None);
    }
}
