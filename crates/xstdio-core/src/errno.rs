//! Error number definitions.
//!
//! Thread-local errno storage plus the constants stream failures map to.

use std::cell::Cell;

thread_local! {
    static ERRNO: Cell<i32> = const { Cell::new(0) };
}

/// Well-known errno constants.
pub const ENOENT: i32 = 2;
pub const EIO: i32 = 5;
pub const EBADF: i32 = 9;
pub const ENOMEM: i32 = 12;
pub const EINVAL: i32 = 22;
pub const EMFILE: i32 = 24;
pub const ESPIPE: i32 = 29;
pub const EPIPE: i32 = 32;
pub const EOPNOTSUPP: i32 = 95;

/// Returns the current thread-local errno value.
///
/// Equivalent to reading C `errno`.
pub fn get_errno() -> i32 {
    ERRNO.get()
}

/// Sets the current thread-local errno value.
///
/// Equivalent to assigning to C `errno`.
pub fn set_errno(value: i32) {
    ERRNO.set(value);
}

/// Best-effort errno for an I/O error returned by a cookie primitive.
pub fn from_io(err: &std::io::Error) -> i32 {
    if let Some(code) = err.raw_os_error() {
        return code;
    }
    match err.kind() {
        std::io::ErrorKind::NotFound => ENOENT,
        std::io::ErrorKind::InvalidInput => EINVAL,
        std::io::ErrorKind::Unsupported => EOPNOTSUPP,
        std::io::ErrorKind::BrokenPipe => EPIPE,
        std::io::ErrorKind::OutOfMemory => ENOMEM,
        _ => EIO,
    }
}
