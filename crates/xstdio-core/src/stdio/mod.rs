//! Buffered stream I/O.
//!
//! Layers, bottom up:
//! - [`cookie`]: the four primitive operations a stream sits on.
//! - [`file`]: file-descriptor cookies and mode strings.
//! - [`buffer`]: descriptor state, fill and flush.
//! - [`stream`]: character, line, block and positioning calls.
//! - [`printf`]: the formatted-output mini-language.
//! - [`pool`]: the slot table that hands out streams.

pub mod buffer;
pub mod cookie;
pub mod error;
pub mod file;
pub mod pool;
pub mod printf;
pub mod stream;

#[allow(unsafe_code)]
mod sys;

pub use buffer::{BufferState, Descriptor, StreamFlags};
pub use cookie::{Cookie, CookieOps, Direction, FunCookie, MemCookie, Whence};
pub use error::StdioError;
pub use file::{FdCookie, OpenFlags, parse_mode};
pub use pool::StreamPool;
pub use printf::{Emit, PrintArg, format_bytes, format_to};
pub use stream::Stream;
