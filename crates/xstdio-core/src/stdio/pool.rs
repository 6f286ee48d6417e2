//! Stream slot pool.
//!
//! A [`StreamPool`] owns a fixed number of descriptor slots. Slots 0, 1 and
//! 2 hold stdin (read, buffered), stdout (write, line-buffered) and stderr
//! (write, unbuffered); they are never handed out again, even once closed.
//! User streams take the first free slot from 3 upward.
//!
//! Opening a stream installs a fresh descriptor in the slot, so handles to
//! an earlier stream in the same slot keep seeing their own closed
//! descriptor.
//!
//! The pool and its handles are `!Send`: all streams of a pool live on one
//! thread.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use serde_json::json;

use super::buffer::{Descriptor, StreamFlags};
use super::cookie::{Cookie, CookieOps, Direction, FunCookie};
use super::error::StdioError;
use super::file::{parse_mode, FdCookie};
use super::printf::PrintArg;
use super::stream::Stream;
use crate::config::{StdioConfig, STD_STREAMS};
use crate::trace::{LogEntry, LogLevel, Tracer};

type Slot = Rc<RefCell<Descriptor>>;

const STDIN_SLOT: usize = 0;
const STDOUT_SLOT: usize = 1;
const STDERR_SLOT: usize = 2;

/// Fixed-capacity table of stream descriptors.
pub struct StreamPool {
    slots: Vec<Slot>,
    config: StdioConfig,
    tracer: Tracer,
}

impl std::fmt::Debug for StreamPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPool")
            .field("capacity", &self.capacity())
            .field("open", &self.open_count())
            .field("config", &self.config)
            .field("tracer", &self.tracer)
            .finish()
    }
}

impl Default for StreamPool {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamPool {
    /// Default capacities, standard streams on fds 0, 1 and 2, tracing off.
    #[must_use]
    pub fn new() -> Self {
        Self::build(
            StdioConfig::default(),
            Tracer::disabled(),
            std_cookies(),
        )
    }

    /// Pool with the given configuration; fails only if the trace target
    /// cannot be opened.
    pub fn with_config(config: StdioConfig) -> Result<Self, StdioError> {
        let tracer = Tracer::from_target(&config.trace).map_err(StdioError::Trace)?;
        Ok(Self::build(config, tracer, std_cookies()))
    }

    /// Pool configured from `XSTDIO_*` environment variables.
    pub fn from_env() -> Result<Self, StdioError> {
        Self::with_config(StdioConfig::from_env())
    }

    /// Pool whose standard streams sit on the given cookies instead of
    /// fds 0, 1 and 2.
    pub fn with_std_streams(
        config: StdioConfig,
        stdin: Box<dyn Cookie>,
        stdout: Box<dyn Cookie>,
        stderr: Box<dyn Cookie>,
    ) -> Result<Self, StdioError> {
        let tracer = Tracer::from_target(&config.trace).map_err(StdioError::Trace)?;
        Ok(Self::build(config, tracer, [stdin, stdout, stderr]))
    }

    /// Route every descriptor's events to `tracer`.
    #[must_use]
    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        for cell in &self.slots {
            cell.borrow_mut().tracer = tracer.clone();
        }
        self.tracer = tracer;
        self
    }

    fn build(config: StdioConfig, tracer: Tracer, std: [Box<dyn Cookie>; STD_STREAMS]) -> Self {
        let capacity = config.buffer_capacity;
        let std_flags = [
            StreamFlags::READ,
            StreamFlags::WRITE | StreamFlags::LNBUF,
            StreamFlags::WRITE | StreamFlags::UNBUF,
        ];

        let mut slots: Vec<Slot> = Vec::with_capacity(config.open_max);
        for (slot, (cookie, flags)) in std.into_iter().zip(std_flags).enumerate() {
            let desc = Descriptor::new(slot, cookie, flags, capacity, tracer.clone());
            slots.push(Rc::new(RefCell::new(desc)));
        }
        for slot in STD_STREAMS..config.open_max {
            let desc = Descriptor::vacant(slot, capacity, tracer.clone());
            slots.push(Rc::new(RefCell::new(desc)));
        }

        Self {
            slots,
            config,
            tracer,
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn config(&self) -> &StdioConfig {
        &self.config
    }

    #[must_use]
    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Total slots, standard streams included.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Free user slots.
    #[must_use]
    pub fn available(&self) -> usize {
        self.slots[STD_STREAMS..]
            .iter()
            .filter(|cell| !slot_is_open(cell))
            .count()
    }

    /// Open streams, standard streams included.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|cell| slot_is_open(cell)).count()
    }

    #[must_use]
    pub fn stdin(&self) -> Stream {
        Stream::from_cell(Rc::clone(&self.slots[STDIN_SLOT]))
    }

    #[must_use]
    pub fn stdout(&self) -> Stream {
        Stream::from_cell(Rc::clone(&self.slots[STDOUT_SLOT]))
    }

    #[must_use]
    pub fn stderr(&self) -> Stream {
        Stream::from_cell(Rc::clone(&self.slots[STDERR_SLOT]))
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Open a file by name. The first mode character picks the direction:
    /// `r` reads, anything else writes.
    pub fn open(&mut self, name: impl AsRef<Path>, mode: &str) -> Result<Stream, StdioError> {
        let path = name.as_ref();
        let flags = parse_mode(mode).ok_or_else(|| StdioError::InvalidMode.latch_errno())?;
        let slot = self.allocate()?;

        let cookie = match FdCookie::open(path, &flags) {
            Ok(cookie) => cookie,
            Err(source) => {
                let err = StdioError::OpenFailed {
                    name: path.display().to_string(),
                    source,
                }
                .latch_errno();
                let code = err.errno();
                let name = path.display().to_string();
                self.tracer.record_with(|| {
                    LogEntry::new(LogLevel::Error, "open_failed")
                        .with_mode(flags.direction.as_str())
                        .with_errno(code)
                        .with_details(json!({ "name": name, "mode": mode }))
                });
                return Err(err);
            }
        };

        let stream = self.install(slot, Box::new(cookie), flags.direction);
        let name = path.display().to_string();
        self.tracer.record_with(|| {
            LogEntry::new(LogLevel::Info, "open")
                .with_stream(slot)
                .with_mode(flags.direction.as_str())
                .with_details(json!({ "name": name, "mode": mode }))
        });
        Ok(stream)
    }

    /// Bind any cookie as a new stream.
    pub fn bind(&mut self, cookie: Box<dyn Cookie>, direction: Direction) -> Result<Stream, StdioError> {
        let slot = self.allocate()?;
        let stream = self.install(slot, cookie, direction);
        self.tracer.record_with(|| {
            LogEntry::new(LogLevel::Info, "bind")
                .with_stream(slot)
                .with_mode(direction.as_str())
        });
        Ok(stream)
    }

    /// Bind a value and its operation table. A read operation makes a
    /// read stream; otherwise the stream writes.
    pub fn funopen<T: 'static>(&mut self, cookie: T, ops: CookieOps<T>) -> Result<Stream, StdioError> {
        let direction = ops.direction();
        self.bind(Box::new(FunCookie::new(cookie, ops)), direction)
    }

    /// First free user slot.
    fn allocate(&self) -> Result<usize, StdioError> {
        let free = (STD_STREAMS..self.slots.len()).find(|&slot| !slot_is_open(&self.slots[slot]));
        match free {
            Some(slot) => Ok(slot),
            None => {
                let capacity = self.config.user_slots();
                let err = StdioError::PoolExhausted { capacity }.latch_errno();
                let code = err.errno();
                self.tracer.record_with(|| {
                    LogEntry::new(LogLevel::Warn, "pool_exhausted")
                        .with_errno(code)
                        .with_details(json!({ "capacity": capacity }))
                });
                Err(err)
            }
        }
    }

    fn install(&mut self, slot: usize, cookie: Box<dyn Cookie>, direction: Direction) -> Stream {
        let desc = Descriptor::new(
            slot,
            cookie,
            StreamFlags::for_direction(direction),
            self.config.buffer_capacity,
            self.tracer.clone(),
        );
        let cell = Rc::new(RefCell::new(desc));
        self.slots[slot] = Rc::clone(&cell);
        Stream::from_cell(cell)
    }

    // -----------------------------------------------------------------------
    // Flushing
    // -----------------------------------------------------------------------

    /// Flush every open write stream. All are attempted; the result
    /// reports how many failed.
    pub fn flush_all(&self) -> Result<(), StdioError> {
        let mut failed = 0;
        for cell in &self.slots {
            let Ok(mut desc) = cell.try_borrow_mut() else {
                continue;
            };
            if desc.flags().contains(StreamFlags::WRITE) && desc.flush().is_err() {
                failed += 1;
            }
        }
        if failed == 0 {
            return Ok(());
        }
        let err = StdioError::FlushAll { failed }.latch_errno();
        self.tracer.record_with(|| {
            LogEntry::new(LogLevel::Warn, "flush_all_failed")
                .with_errno(err.errno())
                .with_details(json!({ "failed": failed }))
        });
        Err(err)
    }

    /// Flush one stream, or every write stream when `stream` is `None`.
    pub fn fflush(&self, stream: Option<&Stream>) -> Result<(), StdioError> {
        match stream {
            Some(stream) => stream.flush(),
            None => self.flush_all(),
        }
    }

    // -----------------------------------------------------------------------
    // Standard stream conveniences
    // -----------------------------------------------------------------------

    /// Write `s` (up to NUL) and a newline to stdout. Returns the bytes
    /// written, newline included.
    pub fn puts(&self, s: impl AsRef<[u8]>) -> Option<usize> {
        let stdout = self.stdout();
        let n = stdout.fputs(s)?;
        stdout.putc(b'\n')?;
        Some(n + 1)
    }

    pub fn putchar(&self, byte: u8) -> Option<u8> {
        self.stdout().putc(byte)
    }

    pub fn getchar(&self) -> Option<u8> {
        self.stdin().getc()
    }

    /// Formatted output to stdout.
    pub fn printf(&self, fmt: impl AsRef<[u8]>, args: &[PrintArg<'_>]) -> usize {
        self.stdout().fprintf(fmt, args)
    }

    /// Flush all pending output, then read a line from `stream`.
    pub fn fgets<'a>(&self, stream: &Stream, dst: &'a mut [u8]) -> Option<&'a [u8]> {
        let _ = self.flush_all();
        stream.fgets(dst)
    }

    /// Flush all pending output, then read a line from stdin without its
    /// newline. At most `dst.len() - 1` bytes are stored; the rest of a
    /// longer line stays unread. Returns `None` if stdin ended before any
    /// byte.
    pub fn gets<'a>(&self, dst: &'a mut [u8]) -> Option<&'a [u8]> {
        let _ = self.flush_all();
        if dst.is_empty() {
            return None;
        }
        let stdin = self.stdin();
        let mut n = 0;
        let mut last = None;
        while n + 1 < dst.len() {
            last = stdin.getc();
            match last {
                Some(b'\n') | None => break,
                Some(byte) => {
                    dst[n] = byte;
                    n += 1;
                }
            }
        }
        dst[n] = 0;
        if last.is_none() && n == 0 {
            None
        } else {
            Some(&dst[..n])
        }
    }
}

impl Drop for StreamPool {
    fn drop(&mut self) {
        let _ = self.flush_all();
    }
}

fn slot_is_open(cell: &Slot) -> bool {
    cell.try_borrow().map(|desc| desc.is_open()).unwrap_or(true)
}

fn std_cookies() -> [Box<dyn Cookie>; STD_STREAMS] {
    [
        Box::new(FdCookie::borrowed(libc::STDIN_FILENO)),
        Box::new(FdCookie::borrowed(libc::STDOUT_FILENO)),
        Box::new(FdCookie::borrowed(libc::STDERR_FILENO)),
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
