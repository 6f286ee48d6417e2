//! Stream error type.

use std::io;

use thiserror::Error;

use crate::errno;

/// Failure of a non-character stream operation.
///
/// Character-level calls (`getc`, `putc`, `ungetc`) report end-of-stream as
/// `None` instead; callers tell EOF from error through `feof`/`ferror`.
#[derive(Debug, Error)]
pub enum StdioError {
    #[error("stream pool exhausted: all {capacity} user slots are open")]
    PoolExhausted { capacity: usize },
    #[error("invalid mode string")]
    InvalidMode,
    #[error("cannot open {name}: {source}")]
    OpenFailed {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("stream is closed")]
    Closed,
    #[error("stream is not open for reading")]
    NotReadable,
    #[error("stream is not open for writing")]
    NotWritable,
    #[error("stream error indicator is set")]
    ErrorLatched,
    #[error("write to underlying resource failed")]
    WriteFailed,
    #[error("seek failed: {0}")]
    Seek(#[source] io::Error),
    #[error("close failed: {0}")]
    Close(#[source] io::Error),
    #[error("{failed} stream(s) failed to flush")]
    FlushAll { failed: usize },
    #[error("cannot open trace log: {0}")]
    Trace(#[source] io::Error),
}

impl StdioError {
    /// The errno a libc would report for this failure.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::PoolExhausted { .. } => errno::EMFILE,
            Self::InvalidMode => errno::EINVAL,
            Self::OpenFailed { source, .. } => errno::from_io(source),
            Self::Closed | Self::NotReadable | Self::NotWritable => errno::EBADF,
            Self::ErrorLatched | Self::WriteFailed | Self::FlushAll { .. } => errno::EIO,
            Self::Seek(source) => match source.kind() {
                io::ErrorKind::Unsupported => errno::ESPIPE,
                _ => errno::from_io(source),
            },
            Self::Close(source) | Self::Trace(source) => errno::from_io(source),
        }
    }

    /// Store this failure's errno in the thread-local errno and return self.
    #[must_use]
    pub(crate) fn latch_errno(self) -> Self {
        errno::set_errno(self.errno());
        self
    }
}
