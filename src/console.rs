//! Console output and the kernel log sink
//!
//! Drivers log through the `log` facade. This module installs the sink: every
//! record is formatted as one `[LEVEL] target: message` line and kept in a
//! fixed ring of recent lines, the emulator's equivalent of the kernel message
//! buffer. With the `std` feature the console can also echo lines to stderr.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{self, Write};
use core::sync::atomic::{AtomicBool, Ordering};

use heapless::Deque;
use log::{LevelFilter, Log, Metadata, Record};
use spin::{Mutex, Once};

/// Longest line kept in the ring; longer lines are truncated
pub const LINE_MAX: usize = 160;

/// Number of lines kept in the ring
pub const RING_LINES: usize = 256;

/// One captured console line
pub type LogLine = heapless::String<LINE_MAX>;

/// Console writer
///
/// Collects bytes into the current line and retires complete lines into the
/// ring, dropping the oldest when full.
pub struct Console {
    ring: Deque<LogLine, RING_LINES>,
    current: LogLine,
}

impl Console {
    /// Create a new console instance
    pub const fn new() -> Self {
        Console {
            ring: Deque::new(),
            current: heapless::String::new(),
        }
    }

    /// Write a byte to the console
    pub fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.flush_line(),
            b'\r' => {}
            // Overlong lines are truncated rather than wrapped
            b if b.is_ascii() => {
                let _ = self.current.push(b as char);
            }
            _ => {
                let _ = self.current.push('?');
            }
        }
    }

    /// Write a string to the console
    pub fn write_str(&mut self, s: &str) {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
    }

    fn flush_line(&mut self) {
        let line = core::mem::take(&mut self.current);
        if ECHO.load(Ordering::Relaxed) {
            echo(&line);
        }
        if self.ring.is_full() {
            self.ring.pop_front();
        }
        let _ = self.ring.push_back(line);
    }

    /// Clear the console
    pub fn clear(&mut self) {
        self.ring.clear();
        self.current.clear();
    }

    /// Iterate over retired lines, oldest first
    pub fn lines(&self) -> impl Iterator<Item = &LogLine> {
        self.ring.iter()
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Console::write_str(self, s);
        Ok(())
    }
}

#[cfg(feature = "std")]
fn echo(line: &str) {
    std::eprintln!("{line}");
}

#[cfg(not(feature = "std"))]
fn echo(_line: &str) {}

/// Global console instance
static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

static ECHO: AtomicBool = AtomicBool::new(false);

/// Print formatted text to the console
pub fn print(args: fmt::Arguments) {
    // Console::write_str never fails
    let _ = CONSOLE.lock().write_fmt(args);
}

/// Enable or disable echoing retired lines to stderr
pub fn set_echo(enabled: bool) {
    ECHO.store(enabled, Ordering::Relaxed);
}

/// Snapshot of the retained lines, oldest first
pub fn recent() -> Vec<String> {
    CONSOLE.lock().lines().map(|l| String::from(l.as_str())).collect()
}

/// True if any retained line contains `needle`
pub fn contains(needle: &str) -> bool {
    CONSOLE.lock().lines().any(|l| l.contains(needle))
}

/// Drop all retained lines
pub fn clear() {
    CONSOLE.lock().clear();
}

// ============================================================================
// log facade sink
// ============================================================================

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        print(format_args!(
            "[{:>5}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;
static INIT: Once<()> = Once::new();

/// Install the console as the `log` sink and set the level filter
///
/// Installing is done once per process; later calls only adjust the level.
pub fn init(level: LevelFilter) {
    INIT.call_once(|| {
        // Another logger may already own the facade (e.g. in an embedding
        // program); the console then simply stays unused.
        let _ = log::set_logger(&LOGGER);
    });
    log::set_max_level(level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_lines() {
        let mut console = Console::new();
        console.write_str("first\r\nsecond\n");
        console.write_str("partial");
        let lines: Vec<&str> = console.lines().map(|l| l.as_str()).collect();
        assert_eq!(lines, ["first", "second"]);
    }

    #[test]
    fn test_console_ring_drops_oldest() {
        let mut console = Console::new();
        for i in 0..RING_LINES + 3 {
            let _ = writeln!(console, "line {}", i);
        }
        let first = console.lines().next().map(|l| l.as_str());
        assert_eq!(first, Some("line 3"));
        assert_eq!(console.lines().count(), RING_LINES);
    }

    #[test]
    fn test_console_truncates_long_line() {
        let mut console = Console::new();
        for _ in 0..LINE_MAX * 2 {
            console.write_byte(b'x');
        }
        console.write_byte(b'\n');
        assert_eq!(console.lines().next().map(|l| l.len()), Some(LINE_MAX));
    }

    #[test]
    fn test_logger_sink() {
        init(LevelFilter::Info);
        log::info!(target: "console_test", "sink check {}", 42);
        assert!(contains("console_test: sink check 42"));
    }
}
