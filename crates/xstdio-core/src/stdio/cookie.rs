//! Cookie abstraction: the four primitive operations a stream is built on.
//!
//! A stream never looks inside its cookie. Anything implementing [`Cookie`]
//! can sit under a [`crate::Stream`]; the crate ships three implementations:
//! [`crate::stdio::file::FdCookie`] (file descriptors), [`FunCookie`]
//! (a value plus an optional-function table) and [`MemCookie`] (a shared
//! in-memory byte vector).

use std::cell::{Cell, RefCell};
use std::fmt;
use std::io;
use std::rc::Rc;

/// Reference point of a seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Current,
    Start,
    End,
}

/// Which way a stream moves bytes. Exactly one per open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

/// Primitive, unbuffered operations over some resource.
///
/// `Err` plays the role of a negative return. `read` returning `Ok(0)` means
/// end of data. `seek` returns the new absolute offset. Operations a cookie
/// does not support keep the defaults: `Unsupported` errors, and a no-op
/// `close`.
pub trait Cookie {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(unsupported("read"))
    }

    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(unsupported("write"))
    }

    fn seek(&mut self, _offset: i64, _whence: Whence) -> io::Result<u64> {
        Err(unsupported("seek"))
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) fn unsupported(op: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cookie has no {op} operation"),
    )
}

// ---------------------------------------------------------------------------
// Function-table cookie
// ---------------------------------------------------------------------------

pub type ReadFn<T> = fn(&mut T, &mut [u8]) -> io::Result<usize>;
pub type WriteFn<T> = fn(&mut T, &[u8]) -> io::Result<usize>;
pub type SeekFn<T> = fn(&mut T, i64, Whence) -> io::Result<u64>;
pub type CloseFn<T> = fn(&mut T) -> io::Result<()>;

/// Up to four operations closing over a cookie value of type `T`.
pub struct CookieOps<T> {
    pub read: Option<ReadFn<T>>,
    pub write: Option<WriteFn<T>>,
    pub seek: Option<SeekFn<T>>,
    pub close: Option<CloseFn<T>>,
}

impl<T> CookieOps<T> {
    /// A table with a read operation binds read-mode; anything else binds
    /// write-mode.
    #[must_use]
    pub fn direction(&self) -> Direction {
        if self.read.is_some() {
            Direction::Read
        } else {
            Direction::Write
        }
    }
}

impl<T> Default for CookieOps<T> {
    fn default() -> Self {
        Self {
            read: None,
            write: None,
            seek: None,
            close: None,
        }
    }
}

impl<T> Clone for CookieOps<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CookieOps<T> {}

impl<T> fmt::Debug for CookieOps<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieOps")
            .field("read", &self.read.is_some())
            .field("write", &self.write.is_some())
            .field("seek", &self.seek.is_some())
            .field("close", &self.close.is_some())
            .finish()
    }
}

/// A cookie value bound to a [`CookieOps`] table.
pub struct FunCookie<T> {
    cookie: T,
    ops: CookieOps<T>,
}

impl<T> FunCookie<T> {
    #[must_use]
    pub fn new(cookie: T, ops: CookieOps<T>) -> Self {
        Self { cookie, ops }
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.ops.direction()
    }
}

impl<T> Cookie for FunCookie<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.ops.read {
            Some(read) => read(&mut self.cookie, buf),
            None => Err(unsupported("read")),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.ops.write {
            Some(write) => write(&mut self.cookie, buf),
            None => Err(unsupported("write")),
        }
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<u64> {
        match self.ops.seek {
            Some(seek) => seek(&mut self.cookie, offset, whence),
            None => Err(unsupported("seek")),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match self.ops.close {
            Some(close) => close(&mut self.cookie),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory cookie
// ---------------------------------------------------------------------------

/// Growable in-memory resource.
///
/// Clones share the bytes and the close counter but keep their own cursor,
/// so one clone can be bound to a stream while another inspects the data.
#[derive(Debug, Clone, Default)]
pub struct MemCookie {
    data: Rc<RefCell<Vec<u8>>>,
    closes: Rc<Cell<u32>>,
    pos: u64,
}

impl MemCookie {
    #[must_use]
    pub fn new(initial: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Rc::new(RefCell::new(initial.into())),
            closes: Rc::new(Cell::new(0)),
            pos: 0,
        }
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }

    /// Number of times `close` has been called on any clone.
    #[must_use]
    pub fn close_count(&self) -> u32 {
        self.closes.get()
    }
}

impl Cookie for MemCookie {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.borrow();
        let start = usize::try_from(self.pos).unwrap_or(usize::MAX).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let start = usize::try_from(self.pos)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset too large"))?;
        let mut data = self.data.borrow_mut();
        let end = start + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        self.pos = end as u64;
        Ok(buf.len())
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<u64> {
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => self.pos as i128,
            Whence::End => self.data.borrow().len() as i128,
        };
        let target = base + i128::from(offset);
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of data",
            ));
        }
        self.pos = u64::try_from(target)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset too large"))?;
        Ok(self.pos)
    }

    fn close(&mut self) -> io::Result<()> {
        self.closes.set(self.closes.get() + 1);
        Ok(())
    }
}
