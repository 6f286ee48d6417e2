//! Buffer engine: per-stream descriptor state plus fill and flush.
//!
//! A descriptor tracks a cursor (`ptr`) and a count (`cnt`) into its
//! buffer region:
//! - read mode: `cnt` bytes starting at `ptr` are unread.
//! - write mode: `cnt` more bytes can be stored at `ptr` before the next
//!   store must go through [`Descriptor::flush_buf`].
//!
//! Invariants:
//! - `ptr + cnt <= region length` at every API boundary.
//! - write mode keeps `ptr + cnt == capacity - 1` while buffered, so an
//!   overflow flush always has room to append its pending byte.
//! - the region is the inline byte iff the stream is unbuffered.

use std::io;

use bitflags::bitflags;
use serde_json::json;

use super::cookie::{Cookie, Direction};
use super::error::StdioError;
use crate::config::UNBUF_SIZE;
use crate::errno;
use crate::trace::{LogEntry, LogLevel, Tracer};

bitflags! {
    /// Per-descriptor state bits. A descriptor with neither `READ` nor
    /// `WRITE` set is a free slot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StreamFlags: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EOF = 1 << 2;
        const ERR = 1 << 3;
        const UNBUF = 1 << 4;
        const LNBUF = 1 << 5;
    }
}

impl StreamFlags {
    #[must_use]
    pub fn for_direction(direction: Direction) -> Self {
        match direction {
            Direction::Read => Self::READ,
            Direction::Write => Self::WRITE,
        }
    }
}

/// Where a descriptor's bytes live.
#[derive(Debug, Default)]
pub enum BufferState {
    /// No I/O yet; the first fill or flush decides.
    #[default]
    Unallocated,
    /// Heap buffer of the configured capacity, owned by the descriptor.
    Buffered(Box<[u8]>),
    /// Single inline byte; the stream stays unbuffered until closed.
    Unbuffered,
}

/// Outcome of a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fetch {
    Byte(u8),
    Eof,
    Error,
}

/// Why a flush did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    NotWritable,
    ErrorLatched,
    WriteFailed,
}

impl From<Fault> for StdioError {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::NotWritable => Self::NotWritable,
            Fault::ErrorLatched => Self::ErrorLatched,
            Fault::WriteFailed => Self::WriteFailed,
        }
    }
}

/// One stream's record: flags, buffer, cursor state and bound cookie.
pub struct Descriptor {
    pub(crate) flags: StreamFlags,
    pub(crate) state: BufferState,
    pub(crate) inline: [u8; UNBUF_SIZE],
    pub(crate) ptr: usize,
    pub(crate) cnt: usize,
    capacity: usize,
    pub(crate) cookie: Option<Box<dyn Cookie>>,
    slot: usize,
    pub(crate) tracer: Tracer,
}

impl std::fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Descriptor")
            .field("slot", &self.slot)
            .field("flags", &self.flags)
            .field("ptr", &self.ptr)
            .field("cnt", &self.cnt)
            .field("capacity", &self.capacity)
            .field("buffer", &self.buffer_label())
            .finish()
    }
}

impl Descriptor {
    /// An open descriptor bound to `cookie`.
    pub(crate) fn new(
        slot: usize,
        cookie: Box<dyn Cookie>,
        flags: StreamFlags,
        capacity: usize,
        tracer: Tracer,
    ) -> Self {
        Self {
            flags,
            state: BufferState::Unallocated,
            inline: [0; UNBUF_SIZE],
            ptr: 0,
            cnt: 0,
            capacity: capacity.max(1),
            cookie: Some(cookie),
            slot,
            tracer,
        }
    }

    /// A free slot.
    pub(crate) fn vacant(slot: usize, capacity: usize, tracer: Tracer) -> Self {
        Self {
            flags: StreamFlags::empty(),
            state: BufferState::Unallocated,
            inline: [0; UNBUF_SIZE],
            ptr: 0,
            cnt: 0,
            capacity: capacity.max(1),
            cookie: None,
            slot,
            tracer,
        }
    }

    #[must_use]
    pub fn flags(&self) -> StreamFlags {
        self.flags
    }

    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Capacity requested when a buffer is allocated.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.flags.intersects(StreamFlags::READ | StreamFlags::WRITE)
    }

    pub(crate) fn direction_label(&self) -> &'static str {
        if self.flags.contains(StreamFlags::READ) {
            Direction::Read.as_str()
        } else if self.flags.contains(StreamFlags::WRITE) {
            Direction::Write.as_str()
        } else {
            "closed"
        }
    }

    fn buffer_label(&self) -> &'static str {
        match self.state {
            BufferState::Unallocated => "unallocated",
            BufferState::Buffered(_) => "buffered",
            BufferState::Unbuffered => "unbuffered",
        }
    }

    /// Length of the current buffer region.
    pub(crate) fn region_len(&self) -> usize {
        match &self.state {
            BufferState::Unallocated => 0,
            BufferState::Buffered(buf) => buf.len(),
            BufferState::Unbuffered => UNBUF_SIZE,
        }
    }

    pub(crate) fn region(&self) -> &[u8] {
        match &self.state {
            BufferState::Unallocated => &[],
            BufferState::Buffered(buf) => buf,
            BufferState::Unbuffered => &self.inline,
        }
    }

    pub(crate) fn region_mut(&mut self) -> &mut [u8] {
        region_of(&mut self.state, &mut self.inline)
    }

    // -----------------------------------------------------------------------
    // Allocation
    // -----------------------------------------------------------------------

    /// Give an unallocated descriptor its buffer.
    ///
    /// Streams flagged unbuffered take the inline byte. Otherwise a buffer
    /// of `capacity` bytes is requested; if the allocator refuses, the
    /// stream degrades to unbuffered instead of failing.
    pub(crate) fn ensure_buffer(&mut self) {
        if !matches!(self.state, BufferState::Unallocated) {
            return;
        }
        if self.flags.contains(StreamFlags::UNBUF) {
            self.state = BufferState::Unbuffered;
            return;
        }
        let mut bytes: Vec<u8> = Vec::new();
        match bytes.try_reserve_exact(self.capacity) {
            Ok(()) => {
                bytes.resize(self.capacity, 0);
                self.state = BufferState::Buffered(bytes.into_boxed_slice());
            }
            Err(_) => self.degrade(),
        }
    }

    /// Switch to unbuffered operation for the rest of the stream's life.
    pub(crate) fn degrade(&mut self) {
        self.flags.insert(StreamFlags::UNBUF);
        self.state = BufferState::Unbuffered;
        self.ptr = 0;
        self.cnt = 0;
        let slot = self.slot;
        let mode = self.direction_label();
        let requested = self.capacity;
        self.tracer.record_with(|| {
            LogEntry::new(LogLevel::Warn, "degrade_unbuffered")
                .with_stream(slot)
                .with_mode(mode)
                .with_errno(errno::ENOMEM)
                .with_details(json!({ "requested_capacity": requested }))
        });
    }

    // -----------------------------------------------------------------------
    // Fill
    // -----------------------------------------------------------------------

    /// Refill an exhausted read buffer and consume its first byte.
    ///
    /// Rejected outright when the stream is not readable or either latch
    /// is set. A zero-byte read latches EOF, a failed read latches ERR;
    /// both leave the count at zero.
    pub(crate) fn fill(&mut self) -> Fetch {
        if !self.flags.contains(StreamFlags::READ) || self.flags.contains(StreamFlags::EOF) {
            return Fetch::Eof;
        }
        if self.flags.contains(StreamFlags::ERR) {
            return Fetch::Error;
        }
        self.ensure_buffer();

        self.ptr = 0;
        self.cnt = 0;
        let len = self.region_len();
        let result = {
            let buf = region_of(&mut self.state, &mut self.inline);
            match self.cookie.as_mut() {
                Some(cookie) => cookie.read(buf),
                None => Err(detached()),
            }
        };

        match result {
            Ok(0) => {
                self.latch_eof();
                Fetch::Eof
            }
            Ok(n) => {
                let n = n.min(len);
                self.ptr = 1;
                self.cnt = n - 1;
                Fetch::Byte(self.region()[0])
            }
            Err(err) => {
                self.latch_error(&err);
                Fetch::Error
            }
        }
    }

    // -----------------------------------------------------------------------
    // Flush
    // -----------------------------------------------------------------------

    /// Write out buffered bytes, appending `pending` first when present.
    ///
    /// `None` is a plain flush: on an unbuffered stream, or a buffered
    /// one holding nothing, it succeeds without touching the cookie.
    pub(crate) fn flush_buf(&mut self, pending: Option<u8>) -> Result<(), Fault> {
        if !self.flags.contains(StreamFlags::WRITE) {
            return Err(Fault::NotWritable);
        }
        if self.flags.contains(StreamFlags::ERR) {
            return Err(Fault::ErrorLatched);
        }

        if matches!(self.state, BufferState::Unallocated) {
            self.ensure_buffer();
            if let BufferState::Buffered(buf) = &mut self.state {
                self.ptr = 0;
                self.cnt = buf.len() - 1;
                // A fresh buffer has room for the pending byte unless it is
                // exactly one byte long.
                if let Some(byte) = pending {
                    if buf.len() > 1 {
                        buf[0] = byte;
                        self.ptr = 1;
                        self.cnt -= 1;
                        return Ok(());
                    }
                }
            }
        }

        let len = match &mut self.state {
            BufferState::Buffered(buf) => {
                if let Some(byte) = pending {
                    buf[self.ptr] = byte;
                    self.ptr += 1;
                }
                self.ptr
            }
            _ => {
                self.ptr = 0;
                self.cnt = 0;
                match pending {
                    Some(byte) => {
                        self.inline[0] = byte;
                        1
                    }
                    None => return Ok(()),
                }
            }
        };

        let result = self.write_region(len);
        if let BufferState::Buffered(buf) = &self.state {
            self.ptr = 0;
            self.cnt = buf.len() - 1;
        }
        result
    }

    /// Push `region[..len]` through the cookie, latching ERR on failure.
    fn write_region(&mut self, len: usize) -> Result<(), Fault> {
        let result = {
            let buf = region_of(&mut self.state, &mut self.inline);
            match self.cookie.as_mut() {
                Some(cookie) => write_fully(cookie.as_mut(), &buf[..len]),
                None => Err(detached()),
            }
        };
        result.map_err(|err| {
            self.latch_error(&err);
            Fault::WriteFailed
        })
    }

    /// Write `data` straight through the cookie, bypassing the buffer.
    pub(crate) fn write_through(&mut self, data: &[u8]) -> Result<(), Fault> {
        if self.flags.contains(StreamFlags::ERR) {
            return Err(Fault::ErrorLatched);
        }
        let result = match self.cookie.as_mut() {
            Some(cookie) => write_fully(cookie.as_mut(), data),
            None => Err(detached()),
        };
        result.map_err(|err| {
            self.latch_error(&err);
            Fault::WriteFailed
        })
    }

    // -----------------------------------------------------------------------
    // Latches
    // -----------------------------------------------------------------------

    pub(crate) fn latch_eof(&mut self) {
        self.flags.insert(StreamFlags::EOF);
        self.cnt = 0;
        let slot = self.slot;
        self.tracer.record_with(|| {
            LogEntry::new(LogLevel::Debug, "eof_latched")
                .with_stream(slot)
                .with_mode(Direction::Read.as_str())
        });
    }

    pub(crate) fn latch_error(&mut self, err: &io::Error) {
        self.flags.insert(StreamFlags::ERR);
        self.cnt = 0;
        let code = errno::from_io(err);
        errno::set_errno(code);
        let slot = self.slot;
        let mode = self.direction_label();
        let message = err.to_string();
        self.tracer.record_with(|| {
            LogEntry::new(LogLevel::Error, "error_latched")
                .with_stream(slot)
                .with_mode(mode)
                .with_errno(code)
                .with_details(json!({ "error": message }))
        });
    }
}

fn region_of<'a>(state: &'a mut BufferState, inline: &'a mut [u8; UNBUF_SIZE]) -> &'a mut [u8] {
    match state {
        BufferState::Unallocated => &mut [],
        BufferState::Buffered(buf) => buf,
        BufferState::Unbuffered => inline,
    }
}

fn detached() -> io::Error {
    io::Error::from_raw_os_error(errno::EBADF)
}

/// Write all of `data`, retrying partial writes from where they stopped.
///
/// A write that accepts nothing counts as failure. Empty input never
/// reaches the cookie.
pub(crate) fn write_fully(cookie: &mut dyn Cookie, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        match cookie.write(data)? {
            0 => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "cookie accepted no bytes",
                ));
            }
            n => data = &data[n.min(data.len())..],
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
