//! Console handling for syscalls.
//!
//! Syscall services which print or read text do so through the [`Console`] trait.
//!
//! Besides the trait, this module also includes:
//! - [`NullConsole`]: A console which discards output and has no input.
//! - [`BufferedConsole`]: A console holding a buffered implementation for IO.
//! - [`ChannelConsole`]: A console holding a threaded/channel implementation for IO.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::thread::JoinHandle;

use crossbeam_channel as cbc;

/// A text console that syscall services read from and write to.
///
/// Reads block until input is available.
/// They return `None` if no more input will ever be available.
pub trait Console: Send + 'static {
    /// Writes text to the console.
    fn print(&mut self, text: &str);

    /// Reads one line of input (without its line terminator).
    fn read_line(&mut self) -> Option<String>;

    /// Reads one character of input.
    fn read_char(&mut self) -> Option<char>;
}
impl dyn Console {} // assert Console is dyn safe

/// No console. Output is discarded and reads fail.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NullConsole;
impl Console for NullConsole {
    fn print(&mut self, _text: &str) {}

    fn read_line(&mut self) -> Option<String> {
        None
    }

    fn read_char(&mut self) -> Option<char> {
        None
    }
}

/// A console that reads from an input buffer and writes to an output buffer.
///
/// The buffers can be accessed in code via [`BufferedConsole::get_input`] and [`BufferedConsole::get_output`].
/// Input is never waited for: a read from an empty input buffer fails.
#[derive(Debug, Default, Clone)]
pub struct BufferedConsole {
    input: Arc<RwLock<VecDeque<u8>>>,
    output: Arc<RwLock<Vec<u8>>>
}
impl BufferedConsole {
    /// Creates a new BufferedConsole.
    pub fn new() -> Self {
        Self::default()
    }
    /// Creates a new BufferedConsole from already defined buffers.
    pub fn with_bufs(input: Arc<RwLock<VecDeque<u8>>>, output: Arc<RwLock<Vec<u8>>>) -> Self {
        Self { input, output }
    }

    fn lock_input(&self) -> RwLockWriteGuard<'_, VecDeque<u8>> {
        self.input.write().unwrap_or_else(PoisonError::into_inner)
    }
    fn lock_output(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.output.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gets a reference to the input buffer.
    pub fn get_input(&self) -> &Arc<RwLock<VecDeque<u8>>> {
        &self.input
    }
    /// Gets a reference to the output buffer.
    pub fn get_output(&self) -> &Arc<RwLock<Vec<u8>>> {
        &self.output
    }
}
impl Console for BufferedConsole {
    fn print(&mut self, text: &str) {
        self.lock_output().extend_from_slice(text.as_bytes());
    }

    fn read_line(&mut self) -> Option<String> {
        let mut input = self.lock_input();
        if input.is_empty() { return None };

        let end = input.iter().position(|&b| b == b'\n');
        let line: Vec<u8> = match end {
            Some(i) => {
                let line = input.drain(..i).collect();
                input.pop_front(); // newline
                line
            },
            None => input.drain(..).collect(),
        };
        Some(String::from_utf8_lossy(&line).trim_end_matches('\r').to_string())
    }

    fn read_char(&mut self) -> Option<char> {
        self.lock_input().pop_front().map(char::from)
    }
}

/// A helper struct for [`ChannelConsole::new`],
/// indicating the channel is closed and no more reads/writes will come from it.
#[derive(Clone, Copy, Default, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stop;

/// A console that reads lines from one channel and writes text to another.
///
/// Reading and writing happen on their own threads,
/// so a read syscall blocks only until the reader thread produces a line.
pub struct ChannelConsole {
    lines: cbc::Receiver<String>,
    pending: VecDeque<char>,
    #[allow(unused)]
    read_handler: JoinHandle<()>,

    write_data: Option<cbc::Sender<String>>,
    write_handler: Option<JoinHandle<()>>
}
impl ChannelConsole {
    /// Creates a new channel console with the given reader and writer.
    ///
    /// The reader function is called every time the console needs a line of input.
    /// It should block until a line is ready, or return Stop if there are no more lines to read.
    ///
    /// The writer function is called every time text is printed.
    pub fn new(
        mut reader: impl FnMut() -> Result<String, Stop> + Send + 'static,
        mut writer: impl FnMut(String) -> Result<(), Stop> + Send + 'static
    ) -> Self {
        let (read_tx, read_rx) = cbc::bounded(1);
        let (write_tx, write_rx) = cbc::unbounded::<String>();

        // Reader thread:
        let read_handler = std::thread::spawn(move || loop {
            let Ok(line) = reader() else { return };
            let Ok(()) = read_tx.send(line) else { return };
        });

        // Writer thread:
        let write_handler = std::thread::spawn(move || {
            for text in write_rx {
                let Ok(()) = writer(text) else { return };
            }
        });

        Self {
            lines: read_rx,
            pending: VecDeque::new(),
            read_handler,
            write_data: Some(write_tx),
            write_handler: Some(write_handler)
        }
    }

    /// Creates a channel console with stdin being the input and stdout being the output.
    ///
    /// Stdout is flushed after every print.
    pub fn stdio() -> Self {
        use std::io::{self, BufRead, Write};

        Self::new(
            || {
                let mut line = String::new();
                match io::stdin().lock().read_line(&mut line) {
                    Ok(0) | Err(_) => Err(Stop),
                    Ok(_) => {
                        let trimmed = line.trim_end_matches(['\n', '\r']).len();
                        line.truncate(trimmed);
                        Ok(line)
                    }
                }
            },
            |text| {
                let mut out = io::stdout().lock();
                out.write_all(text.as_bytes())
                    .and_then(|()| out.flush())
                    .map_err(|_| Stop)
            }
        )
    }
}
impl std::fmt::Debug for ChannelConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConsole")
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}
impl Console for ChannelConsole {
    fn print(&mut self, text: &str) {
        if let Some(tx) = &self.write_data {
            // a disconnected writer means output is no longer wanted
            let _ = tx.send(text.to_string());
        }
    }

    fn read_line(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return self.lines.recv().ok();
        }

        let mut line = String::new();
        while let Some(c) = self.pending.pop_front() {
            if c == '\n' { break };
            line.push(c);
        }
        Some(line)
    }

    fn read_char(&mut self) -> Option<char> {
        if self.pending.is_empty() {
            let line = self.lines.recv().ok()?;
            self.pending.extend(line.chars());
            self.pending.push_back('\n');
        }
        self.pending.pop_front()
    }
}
impl Drop for ChannelConsole {
    fn drop(&mut self) {
        // Disconnect the writer so that it finishes its remaining output, then wait for it.
        // The reader is not waited for, since it can be blocked on input indefinitely.
        self.write_data.take();
        if let Some(handle) = self.write_handler.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{BufferedConsole, ChannelConsole, Console, NullConsole, Stop};

    #[test]
    fn test_buffered_console() {
        let mut console = BufferedConsole::new();
        console.get_input().write().unwrap().extend(b"12\r\nab");

        assert_eq!(console.read_line().as_deref(), Some("12"));
        assert_eq!(console.read_char(), Some('a'));
        assert_eq!(console.read_line().as_deref(), Some("b"));
        assert_eq!(console.read_line(), None);
        assert_eq!(console.read_char(), None);

        console.print("hello ");
        console.print("world");
        assert_eq!(&*console.get_output().read().unwrap(), b"hello world");

        let mut null = NullConsole;
        null.print("x");
        assert_eq!(null.read_line(), None);
    }

    #[test]
    fn test_channel_console() {
        let mut lines = vec!["second".to_string(), "first".to_string()];
        let written = Arc::new(Mutex::new(String::new()));
        let written2 = Arc::clone(&written);

        let mut console = ChannelConsole::new(
            move || lines.pop().ok_or(Stop),
            move |text| {
                written2.lock().unwrap().push_str(&text);
                Ok(())
            }
        );

        assert_eq!(console.read_char(), Some('f'));
        assert_eq!(console.read_line().as_deref(), Some("irst"));
        assert_eq!(console.read_line().as_deref(), Some("second"));
        assert_eq!(console.read_line(), None);

        console.print("out");
        drop(console);
        assert_eq!(&*written.lock().unwrap(), "out");
    }
}
