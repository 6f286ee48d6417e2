//! Raw file-descriptor primitives.
//!
//! Thin wrappers over `open(2)`, `read(2)`, `write(2)`, `lseek(2)` and
//! `close(2)`. A negative return becomes `io::Error::last_os_error()`.
//! `EINTR` is retried for reads and writes so callers only ever see real
//! failures.
//!
//! # Safety
//!
//! Each wrapper passes pointers derived from live Rust slices or `CStr`s, so
//! the kernel only ever sees memory valid for the stated length.

use std::ffi::CStr;
use std::io;

use libc::{c_int, c_void};

pub(crate) fn open(path: &CStr, oflags: c_int, mode: libc::mode_t) -> io::Result<c_int> {
    // SAFETY: `path` is NUL-terminated and outlives the call.
    let fd = unsafe { libc::open(path.as_ptr(), oflags, libc::c_uint::from(mode)) };
    if fd < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(fd)
    }
}

pub(crate) fn read(fd: c_int, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        // SAFETY: `buf` is valid for `buf.len()` writable bytes.
        let rc = unsafe { libc::read(fd, buf.as_mut_ptr().cast::<c_void>(), buf.len()) };
        if rc >= 0 {
            return Ok(rc as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

pub(crate) fn write(fd: c_int, buf: &[u8]) -> io::Result<usize> {
    loop {
        // SAFETY: `buf` is valid for `buf.len()` readable bytes.
        let rc = unsafe { libc::write(fd, buf.as_ptr().cast::<c_void>(), buf.len()) };
        if rc >= 0 {
            return Ok(rc as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

pub(crate) fn lseek(fd: c_int, offset: i64, whence: c_int) -> io::Result<u64> {
    // SAFETY: no pointers cross the boundary.
    let rc = unsafe { libc::lseek(fd, offset as libc::off_t, whence) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as u64)
    }
}

pub(crate) fn close(fd: c_int) -> io::Result<()> {
    // SAFETY: no pointers cross the boundary; the caller gives up `fd`.
    let rc = unsafe { libc::close(fd) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
