//! Stream API: character, line and block I/O, pushback, seek and close.
//!
//! [`Stream`] is a cloneable handle to one pool slot's [`Descriptor`]. All
//! clones address the same descriptor; once it is closed every handle
//! fails, even after the pool hands the slot to a new stream.
//!
//! Character calls follow the sentinel protocol: `None` means end of
//! stream or error, and callers tell the two apart with [`Stream::feof`]
//! and [`Stream::ferror`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::buffer::{BufferState, Descriptor, Fetch, StreamFlags};
use super::cookie::Whence;
use super::error::StdioError;
use super::printf::{self, PrintArg};
use crate::trace::{LogEntry, LogLevel};

// ---------------------------------------------------------------------------
// Descriptor operations
// ---------------------------------------------------------------------------

impl Descriptor {
    pub(crate) fn getc(&mut self) -> Option<u8> {
        if self.flags.contains(StreamFlags::READ) && self.cnt > 0 {
            let byte = self.region()[self.ptr];
            self.ptr += 1;
            self.cnt -= 1;
            return Some(byte);
        }
        match self.fill() {
            Fetch::Byte(byte) => Some(byte),
            Fetch::Eof | Fetch::Error => None,
        }
    }

    pub(crate) fn putc(&mut self, byte: u8) -> Option<u8> {
        if self.flags.contains(StreamFlags::WRITE) && self.cnt > 0 {
            let at = self.ptr;
            self.region_mut()[at] = byte;
            self.ptr += 1;
            self.cnt -= 1;
        } else if self.flush_buf(Some(byte)).is_err() {
            return None;
        }
        if byte == b'\n'
            && self.flags.contains(StreamFlags::LNBUF)
            && self.flush_buf(None).is_err()
        {
            return None;
        }
        Some(byte)
    }

    pub(crate) fn ungetc(&mut self, byte: u8) -> Option<u8> {
        if !self.flags.contains(StreamFlags::READ) || self.ptr == 0 {
            return None;
        }
        self.ptr -= 1;
        self.cnt += 1;
        let at = self.ptr;
        self.region_mut()[at] = byte;
        Some(byte)
    }

    /// Copy out what is buffered, refill, repeat. Stops short when a fill
    /// produces nothing.
    pub(crate) fn read_block(&mut self, dst: &mut [u8]) -> usize {
        if !self.flags.contains(StreamFlags::READ) {
            return 0;
        }
        let mut done = 0;
        while dst.len() - done > self.cnt {
            let take = self.cnt;
            dst[done..done + take].copy_from_slice(&self.region()[self.ptr..self.ptr + take]);
            self.ptr += take;
            self.cnt = 0;
            done += take;
            match self.fill() {
                // Step back over the byte fill consumed so the next copy
                // includes it.
                Fetch::Byte(_) => {
                    self.ptr -= 1;
                    self.cnt += 1;
                }
                Fetch::Eof | Fetch::Error => return done,
            }
        }
        let take = dst.len() - done;
        dst[done..].copy_from_slice(&self.region()[self.ptr..self.ptr + take]);
        self.ptr += take;
        self.cnt -= take;
        dst.len()
    }

    /// Copy into the buffer, flush, repeat. Unbuffered streams write the
    /// whole block straight through.
    pub(crate) fn write_block(&mut self, src: &[u8]) -> usize {
        if !self.flags.contains(StreamFlags::WRITE) {
            return 0;
        }
        let mut done = 0;
        loop {
            if self.flags.contains(StreamFlags::UNBUF) {
                return match self.write_through(&src[done..]) {
                    Ok(()) => src.len(),
                    Err(_) => done,
                };
            }
            let rest = src.len() - done;
            if rest <= self.cnt {
                break;
            }
            let take = self.cnt;
            let at = self.ptr;
            self.region_mut()[at..at + take].copy_from_slice(&src[done..done + take]);
            self.ptr += take;
            self.cnt = 0;
            done += take;
            if self.flush_buf(None).is_err() {
                return done;
            }
        }
        let take = src.len() - done;
        let at = self.ptr;
        self.region_mut()[at..at + take].copy_from_slice(&src[done..]);
        self.ptr += take;
        self.cnt -= take;
        if self.flags.contains(StreamFlags::LNBUF) && src.contains(&b'\n') {
            // The block is stored either way; a failed flush shows in ferror.
            let _ = self.flush_buf(None);
        }
        src.len()
    }

    /// Read a line into `dst`, NUL-terminated. Returns the number of bytes
    /// copied before the terminator.
    pub(crate) fn read_line(&mut self, dst: &mut [u8]) -> Option<usize> {
        if dst.is_empty() {
            return None;
        }
        let mut n = 0;
        let mut exhausted = false;
        while n + 1 < dst.len() {
            match self.getc() {
                Some(byte) => {
                    dst[n] = byte;
                    n += 1;
                    if byte == b'\n' {
                        break;
                    }
                }
                None => {
                    exhausted = true;
                    break;
                }
            }
        }
        dst[n] = 0;
        if exhausted && n == 0 { None } else { Some(n) }
    }

    pub(crate) fn write_str(&mut self, s: &[u8]) -> Option<usize> {
        let mut n = 0;
        for &byte in s.iter().take_while(|&&b| b != 0) {
            self.putc(byte)?;
            n += 1;
        }
        Some(n)
    }

    pub(crate) fn flush(&mut self) -> Result<(), StdioError> {
        if !self.is_open() {
            return Err(StdioError::Closed);
        }
        self.flush_buf(None).map_err(StdioError::from)
    }

    /// Flush or discard buffered bytes, then reposition through the cookie.
    pub(crate) fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, StdioError> {
        if !self.is_open() {
            return Err(StdioError::Closed);
        }
        let mut offset = offset;
        if self.flags.contains(StreamFlags::WRITE) {
            // A failed flush is already latched in ERR; only the reposition
            // decides the result.
            let _ = self.flush_buf(None);
            self.ptr = 0;
            self.cnt = match &self.state {
                BufferState::Buffered(buf) => buf.len() - 1,
                _ => 0,
            };
        } else {
            if whence == Whence::Current {
                let unread = i64::try_from(self.cnt).unwrap_or(i64::MAX);
                offset = offset.saturating_sub(unread);
            }
            self.ptr = 0;
            self.cnt = 0;
        }

        let cookie = self.cookie.as_mut().ok_or(StdioError::Closed)?;
        let position = cookie.seek(offset, whence).map_err(StdioError::Seek)?;
        self.flags.remove(StreamFlags::EOF);
        Ok(position)
    }

    /// Flush, release the buffer, free the slot, then close the cookie.
    /// The first failure wins.
    pub(crate) fn close(&mut self) -> Result<(), StdioError> {
        if !self.is_open() {
            return Err(StdioError::Closed);
        }
        let mode = self.direction_label();
        let flushed = if self.flags.contains(StreamFlags::WRITE) {
            self.flush_buf(None).map_err(StdioError::from)
        } else {
            Ok(())
        };

        self.flags = StreamFlags::empty();
        self.state = Default::default();
        self.ptr = 0;
        self.cnt = 0;
        let closed = match self.cookie.take() {
            Some(mut cookie) => cookie.close().map_err(StdioError::Close),
            None => Ok(()),
        };

        let result = flushed.and(closed);
        let slot = self.slot();
        match &result {
            Ok(()) => self.tracer.record_with(|| {
                LogEntry::new(LogLevel::Info, "close")
                    .with_stream(slot)
                    .with_mode(mode)
            }),
            Err(err) => {
                let code = err.errno();
                let message = err.to_string();
                self.tracer.record_with(|| {
                    LogEntry::new(LogLevel::Error, "close_failed")
                        .with_stream(slot)
                        .with_mode(mode)
                        .with_errno(code)
                        .with_details(serde_json::json!({ "error": message }))
                });
            }
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to an open (or formerly open) stream.
#[derive(Clone)]
pub struct Stream {
    desc: Rc<RefCell<Descriptor>>,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.desc.try_borrow() {
            Ok(desc) => fmt::Debug::fmt(&*desc, f),
            Err(_) => f.write_str("Stream(<in use>)"),
        }
    }
}

impl Stream {
    pub(crate) fn from_cell(desc: Rc<RefCell<Descriptor>>) -> Self {
        Self { desc }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Descriptor) -> R) -> R {
        f(&mut *self.desc.borrow_mut())
    }

    /// Whether both handles address the same descriptor.
    #[must_use]
    pub fn same_as(&self, other: &Stream) -> bool {
        Rc::ptr_eq(&self.desc, &other.desc)
    }

    #[must_use]
    pub fn slot(&self) -> usize {
        self.desc.borrow().slot()
    }

    // -- character I/O --

    /// Next byte, or `None` at end of stream or on error.
    pub fn getc(&self) -> Option<u8> {
        self.with(Descriptor::getc)
    }

    /// Write one byte; returns it back, or `None` on failure.
    pub fn putc(&self, byte: u8) -> Option<u8> {
        self.with(|d| d.putc(byte))
    }

    /// Push back one byte consumed from the current fill. Only one
    /// pushback is guaranteed between reads.
    pub fn ungetc(&self, byte: u8) -> Option<u8> {
        self.with(|d| d.ungetc(byte))
    }

    // -- block I/O --

    /// Read up to `dst.len()` bytes; a short count means EOF or error.
    pub fn read(&self, dst: &mut [u8]) -> usize {
        self.with(|d| d.read_block(dst))
    }

    /// Write `src`; a short count means the stream failed part way.
    pub fn write(&self, src: &[u8]) -> usize {
        self.with(|d| d.write_block(src))
    }

    /// Read whole items of `size` bytes. Returns the number of complete
    /// items read.
    pub fn fread(&self, dst: &mut [u8], size: usize) -> usize {
        if size == 0 {
            return 0;
        }
        let whole = dst.len() / size * size;
        self.read(&mut dst[..whole]) / size
    }

    /// Write whole items of `size` bytes. Returns the number of complete
    /// items written.
    pub fn fwrite(&self, src: &[u8], size: usize) -> usize {
        if size == 0 {
            return 0;
        }
        let whole = src.len() / size * size;
        self.write(&src[..whole]) / size
    }

    // -- line I/O --

    /// Read a line (newline kept) into `dst`, NUL-terminated.
    ///
    /// Returns the bytes read, or `None` when end of stream came before
    /// any byte. An empty `dst` always yields `None`.
    pub fn fgets<'a>(&self, dst: &'a mut [u8]) -> Option<&'a [u8]> {
        let n = self.with(|d| d.read_line(dst))?;
        Some(&dst[..n])
    }

    /// Write `s` up to its first NUL. Returns the byte count, or `None` on
    /// the first failed write.
    pub fn fputs(&self, s: impl AsRef<[u8]>) -> Option<usize> {
        self.with(|d| d.write_str(s.as_ref()))
    }

    /// Formatted output; returns the number of bytes emitted.
    pub fn fprintf(&self, fmt: impl AsRef<[u8]>, args: &[PrintArg<'_>]) -> usize {
        self.with(|d| printf::format_to(d, fmt.as_ref(), args))
    }

    // -- positioning --

    pub fn flush(&self) -> Result<(), StdioError> {
        self.with(Descriptor::flush).map_err(StdioError::latch_errno)
    }

    /// Reposition the stream. Returns the new absolute offset.
    pub fn seek(&self, offset: i64, whence: Whence) -> Result<u64, StdioError> {
        self.with(|d| d.seek(offset, whence))
            .map_err(StdioError::latch_errno)
    }

    /// Current logical position.
    pub fn tell(&self) -> Result<u64, StdioError> {
        self.seek(0, Whence::Current)
    }

    /// Seek to the start and clear both latches.
    pub fn rewind(&self) -> Result<(), StdioError> {
        let result = self.seek(0, Whence::Start).map(|_| ());
        self.clearerr();
        result
    }

    // -- state --

    pub fn clearerr(&self) {
        self.with(|d| d.flags.remove(StreamFlags::EOF | StreamFlags::ERR));
    }

    #[must_use]
    pub fn feof(&self) -> bool {
        self.desc.borrow().flags().contains(StreamFlags::EOF)
    }

    #[must_use]
    pub fn ferror(&self) -> bool {
        self.desc.borrow().flags().contains(StreamFlags::ERR)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.desc.borrow().is_open()
    }

    #[must_use]
    pub fn is_readable(&self) -> bool {
        self.desc.borrow().flags().contains(StreamFlags::READ)
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.desc.borrow().flags().contains(StreamFlags::WRITE)
    }

    #[must_use]
    pub fn is_unbuffered(&self) -> bool {
        self.desc.borrow().flags().contains(StreamFlags::UNBUF)
    }

    #[must_use]
    pub fn is_line_buffered(&self) -> bool {
        self.desc.borrow().flags().contains(StreamFlags::LNBUF)
    }

    /// Make the stream unbuffered. Only allowed before its first I/O;
    /// returns whether the switch happened.
    pub fn set_unbuffered(&self) -> bool {
        self.with(|d| {
            if !d.is_open() || d.region_len() != 0 {
                return false;
            }
            d.flags.insert(StreamFlags::UNBUF);
            true
        })
    }

    /// Flush, release the buffer and close the cookie exactly once.
    pub fn close(&self) -> Result<(), StdioError> {
        self.with(Descriptor::close).map_err(StdioError::latch_errno)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
