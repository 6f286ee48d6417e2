//! File-backed cookie and mode-string parsing.
//!
//! The first mode character picks the stream direction: `r` binds a
//! read-mode stream, anything else a write-mode one. The remaining
//! characters only shape how the file is opened.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use libc::c_int;

use super::cookie::{Cookie, Direction, Whence};
use super::sys;

// ---------------------------------------------------------------------------
// Mode parsing
// ---------------------------------------------------------------------------

/// File open mode flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub direction: Direction,
    pub readable: bool,
    pub writable: bool,
    pub append: bool,
    pub truncate: bool,
    pub create: bool,
    pub binary: bool,
    pub exclusive: bool,
}

/// Parse a mode string (e.g. "r", "w", "a+", "rb").
///
/// Returns `None` only for an empty mode. An unrecognized base character
/// opens like `w`; unrecognized modifiers are ignored.
pub fn parse_mode(mode: &str) -> Option<OpenFlags> {
    let (&base, modifiers) = mode.as_bytes().split_first()?;

    let mut flags = OpenFlags {
        direction: Direction::Write,
        readable: false,
        writable: true,
        append: false,
        truncate: true,
        create: true,
        binary: false,
        exclusive: false,
    };
    match base {
        b'r' => {
            flags.direction = Direction::Read;
            flags.readable = true;
            flags.writable = false;
            flags.truncate = false;
            flags.create = false;
        }
        b'a' => {
            flags.append = true;
            flags.truncate = false;
        }
        _ => {}
    }

    for &m in modifiers {
        match m {
            b'+' => {
                flags.readable = true;
                flags.writable = true;
            }
            b'b' => flags.binary = true,
            b'x' => flags.exclusive = true,
            _ => {}
        }
    }

    Some(flags)
}

/// Convert open flags to `O_*` flag bits.
pub fn flags_to_oflags(flags: &OpenFlags) -> c_int {
    let mut oflags = if flags.readable && flags.writable {
        libc::O_RDWR
    } else if flags.writable {
        libc::O_WRONLY
    } else {
        libc::O_RDONLY
    };

    if flags.create {
        oflags |= libc::O_CREAT;
    }
    if flags.truncate {
        oflags |= libc::O_TRUNC;
    }
    if flags.append {
        oflags |= libc::O_APPEND;
    }
    if flags.exclusive {
        oflags |= libc::O_EXCL;
    }

    oflags | libc::O_CLOEXEC
}

fn whence_to_raw(whence: Whence) -> c_int {
    match whence {
        Whence::Current => libc::SEEK_CUR,
        Whence::Start => libc::SEEK_SET,
        Whence::End => libc::SEEK_END,
    }
}

// ---------------------------------------------------------------------------
// Cookie
// ---------------------------------------------------------------------------

/// A file descriptor as a cookie.
///
/// Owned descriptors are closed by `close` (or on drop if never closed).
/// Borrowed ones, used for fds 0, 1 and 2, are never closed here.
#[derive(Debug)]
pub struct FdCookie {
    fd: c_int,
    owned: bool,
}

impl FdCookie {
    /// Open `path` with the given flags; new files get mode 0666 before umask.
    pub fn open(path: &Path, flags: &OpenFlags) -> io::Result<Self> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
        let fd = sys::open(&c_path, flags_to_oflags(flags), 0o666)?;
        Ok(Self { fd, owned: true })
    }

    /// Wrap a descriptor this cookie must not close.
    #[must_use]
    pub fn borrowed(fd: c_int) -> Self {
        Self { fd, owned: false }
    }

    #[must_use]
    pub fn fd(&self) -> c_int {
        self.fd
    }
}

impl Cookie for FdCookie {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        sys::read(self.fd, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        sys::write(self.fd, buf)
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<u64> {
        sys::lseek(self.fd, offset, whence_to_raw(whence))
    }

    fn close(&mut self) -> io::Result<()> {
        if !self.owned || self.fd < 0 {
            return Ok(());
        }
        let fd = std::mem::replace(&mut self.fd, -1);
        sys::close(fd)
    }
}

impl Drop for FdCookie {
    fn drop(&mut self) {
        if self.owned && self.fd >= 0 {
            let _ = sys::close(self.fd);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("xstdio-file-{tag}-{}", std::process::id()))
    }

    #[test]
    fn test_parse_mode_read() {
        let f = parse_mode("r").unwrap();
        assert_eq!(f.direction, Direction::Read);
        assert!(f.readable);
        assert!(!f.writable);
        assert!(!f.create);
    }

    #[test]
    fn test_parse_mode_write() {
        let f = parse_mode("w").unwrap();
        assert_eq!(f.direction, Direction::Write);
        assert!(f.writable);
        assert!(f.truncate);
        assert!(f.create);
    }

    #[test]
    fn test_parse_mode_append_plus() {
        let f = parse_mode("a+").unwrap();
        assert_eq!(f.direction, Direction::Write);
        assert!(f.readable);
        assert!(f.writable);
        assert!(f.append);
        assert!(!f.truncate);
    }

    #[test]
    fn test_parse_mode_read_plus_stays_read_bound() {
        let f = parse_mode("r+b").unwrap();
        assert_eq!(f.direction, Direction::Read);
        assert!(f.writable);
        assert!(f.binary);
    }

    #[test]
    fn test_parse_mode_unknown_base_is_write() {
        let f = parse_mode("z").unwrap();
        assert_eq!(f.direction, Direction::Write);
        assert!(f.truncate);
    }

    #[test]
    fn test_parse_mode_empty() {
        assert!(parse_mode("").is_none());
    }

    #[test]
    fn test_flags_to_oflags() {
        let o = flags_to_oflags(&parse_mode("w").unwrap());
        assert_eq!(o & libc::O_ACCMODE, libc::O_WRONLY);
        assert_ne!(o & libc::O_CREAT, 0);
        assert_ne!(o & libc::O_TRUNC, 0);
        let o = flags_to_oflags(&parse_mode("r+").unwrap());
        assert_eq!(o & libc::O_ACCMODE, libc::O_RDWR);
        let o = flags_to_oflags(&parse_mode("wx").unwrap());
        assert_ne!(o & libc::O_EXCL, 0);
    }

    #[test]
    fn test_fd_cookie_write_seek_read() {
        let path = scratch_path("rw");
        let mut writer = FdCookie::open(&path, &parse_mode("w").unwrap()).unwrap();
        assert_eq!(writer.write(b"abcdef").unwrap(), 6);
        assert_eq!(writer.seek(0, Whence::Current).unwrap(), 6);
        writer.close().unwrap();
        assert_eq!(writer.fd(), -1);
        assert!(writer.close().is_ok());

        let mut reader = FdCookie::open(&path, &parse_mode("r").unwrap()).unwrap();
        assert_eq!(reader.seek(2, Whence::Start).unwrap(), 2);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"cdef");
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        drop(reader);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_fd_cookie_open_missing_file() {
        let path = scratch_path("missing");
        let err = FdCookie::open(&path, &parse_mode("r").unwrap()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
