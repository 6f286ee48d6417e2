//! # xstdio-core
//!
//! Minimal buffered stream I/O over pluggable byte sources.
//!
//! A [`StreamPool`] hands out [`Stream`]s bound to cookies: files, the
//! standard descriptors, or any [`Cookie`] implementation. Streams buffer
//! reads and writes, support single-byte pushback, seek, and a small
//! `printf`. No `unsafe` code is permitted outside the raw descriptor
//! module.

#![deny(unsafe_code)]

pub mod config;
pub mod errno;
pub mod stdio;
pub mod trace;

pub use config::StdioConfig;
pub use stdio::{
    Cookie, CookieOps, Direction, MemCookie, PrintArg, StdioError, Stream, StreamPool, Whence,
};
