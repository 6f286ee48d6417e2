//! Integration test: stream contract over real files and in-memory cookies.
//!
//! Covers round trips through block I/O, pushback, tell after writes,
//! line reads, pool exhaustion, formatted output, flush edge cases,
//! the unbuffered fallback and the structured event log.
//!
//! Run: cargo test -p xstdio-core --test stream_contract_test

use std::io;
use std::path::PathBuf;

use xstdio_core::errno;
use xstdio_core::trace::{LogEmitter, LogLevel, Tracer};
use xstdio_core::{
    Cookie, CookieOps, Direction, MemCookie, PrintArg, StdioConfig, StdioError, StreamPool,
    Whence,
};

// ---------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------

struct TempPath(PathBuf);

impl TempPath {
    fn new(tag: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "xstdio-contract-{tag}-{}.dat",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        Self(path)
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn mem_pool(config: StdioConfig) -> (StreamPool, MemCookie) {
    let output = MemCookie::default();
    let pool = StreamPool::with_std_streams(
        config,
        Box::new(MemCookie::default()),
        Box::new(output.clone()),
        Box::new(MemCookie::default()),
    )
    .expect("pool");
    (pool, output)
}

fn small_pool() -> (StreamPool, MemCookie) {
    mem_pool(
        StdioConfig::default()
            .with_open_max(6)
            .with_buffer_capacity(8),
    )
}

// ---------------------------------------------------------------------
// Round trips
// ---------------------------------------------------------------------

#[test]
fn block_round_trip_through_file() {
    let tmp = TempPath::new("roundtrip");
    let mut pool = StreamPool::with_config(StdioConfig::default().with_buffer_capacity(64))
        .expect("pool");
    let data: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 251) as u8).collect();

    let out = pool.open(&tmp.0, "w").expect("open w");
    assert_eq!(out.write(&data), data.len());
    out.close().expect("close w");

    let input = pool.open(&tmp.0, "r").expect("open r");
    let mut back = vec![0u8; data.len() + 10];
    assert_eq!(input.read(&mut back), data.len());
    assert_eq!(&back[..data.len()], &data[..]);
    assert!(input.feof());

    input.seek(0, Whence::Start).expect("seek");
    assert!(!input.feof());
    let mut again = vec![0u8; 100];
    assert_eq!(input.read(&mut again), 100);
    assert_eq!(&again[..], &data[..100]);
    input.close().expect("close r");
}

#[test]
fn block_round_trip_through_memory() {
    let (mut pool, _out) = small_pool();
    let mem = MemCookie::default();
    let data = b"the quick brown fox jumps over the lazy dog".to_vec();

    let w = pool.bind(Box::new(mem.clone()), Direction::Write).expect("bind w");
    assert_eq!(w.write(&data), data.len());
    w.close().expect("close w");
    assert_eq!(mem.contents(), data);

    let r = pool.bind(Box::new(mem.clone()), Direction::Read).expect("bind r");
    let mut back = vec![0u8; data.len()];
    assert_eq!(r.read(&mut back), data.len());
    assert_eq!(back, data);
}

#[test]
fn pushback_redelivers_last_byte() {
    let (mut pool, _out) = small_pool();
    let r = pool
        .bind(Box::new(MemCookie::new(b"abcdefghij".to_vec())), Direction::Read)
        .expect("bind");
    for expected in b"abcdefghij" {
        let got = r.getc().expect("byte");
        assert_eq!(got, *expected);
        assert_eq!(r.ungetc(got), Some(got));
        assert_eq!(r.getc(), Some(got));
    }
    assert_eq!(r.getc(), None);
}

#[test]
fn tell_after_write_counts_bytes() {
    let tmp = TempPath::new("tell");
    let mut pool = StreamPool::new();
    let out = pool.open(&tmp.0, "w").expect("open");
    assert_eq!(out.tell().expect("tell"), 0);
    out.write(b"0123456789");
    out.flush().expect("flush");
    assert_eq!(out.tell().expect("tell"), 10);
    out.fputs("abc");
    assert_eq!(out.tell().expect("tell"), 13);
    out.close().expect("close");
    assert_eq!(std::fs::read(&tmp.0).expect("read back"), b"0123456789abc");
}

#[test]
fn append_mode_positions_at_end() {
    let tmp = TempPath::new("append");
    std::fs::write(&tmp.0, b"head-").expect("seed");
    let mut pool = StreamPool::new();
    let out = pool.open(&tmp.0, "a").expect("open");
    out.fputs("tail");
    out.close().expect("close");
    assert_eq!(std::fs::read(&tmp.0).expect("read back"), b"head-tail");
}

// ---------------------------------------------------------------------
// Lines
// ---------------------------------------------------------------------

#[test]
fn fgets_splits_lines_then_signals_end() {
    let (mut pool, _out) = small_pool();
    let r = pool
        .bind(Box::new(MemCookie::new(b"ab\ncd".to_vec())), Direction::Read)
        .expect("bind");
    let mut buf = [0u8; 10];
    assert_eq!(r.fgets(&mut buf), Some(&b"ab\n"[..]));
    assert_eq!(r.fgets(&mut buf), Some(&b"cd"[..]));
    assert_eq!(r.fgets(&mut buf), None);
    assert!(r.feof());
}

#[test]
fn fgets_from_file_with_long_lines() {
    let tmp = TempPath::new("lines");
    std::fs::write(&tmp.0, b"short\nthis line is longer than the buffer\nend").expect("seed");
    let mut pool = StreamPool::with_config(StdioConfig::default().with_buffer_capacity(5))
        .expect("pool");
    let r = pool.open(&tmp.0, "r").expect("open");
    let mut buf = [0u8; 16];
    let mut pieces = Vec::new();
    while let Some(piece) = r.fgets(&mut buf) {
        pieces.push(piece.to_vec());
    }
    let joined: Vec<u8> = pieces.concat();
    assert_eq!(joined, b"short\nthis line is longer than the buffer\nend");
    assert_eq!(pieces[0], b"short\n");
    assert!(pieces.iter().all(|p| p.len() <= 15));
}

// ---------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------

#[test]
fn exhausting_pool_leaves_open_streams_intact() {
    let (mut pool, _out) = small_pool();
    let mems: Vec<MemCookie> = (0..3).map(|_| MemCookie::default()).collect();
    let streams: Vec<_> = mems
        .iter()
        .map(|m| pool.bind(Box::new(m.clone()), Direction::Write).expect("bind"))
        .collect();
    assert_eq!(pool.available(), 0);

    let err = pool
        .bind(Box::new(MemCookie::default()), Direction::Write)
        .expect_err("pool should be full");
    assert!(matches!(err, StdioError::PoolExhausted { capacity: 3 }));
    assert_eq!(err.errno(), errno::EMFILE);

    for (i, s) in streams.iter().enumerate() {
        s.fprintf("stream %d", &[PrintArg::Int(i as i64)]);
        s.close().expect("close");
    }
    for (i, m) in mems.iter().enumerate() {
        assert_eq!(m.contents(), format!("stream {i}").into_bytes());
        assert_eq!(m.close_count(), 1);
    }
    assert_eq!(pool.available(), 3);
}

#[test]
fn exhausted_pool_does_not_open_file() {
    let tmp = TempPath::new("noleak");
    let (mut pool, _out) = mem_pool(StdioConfig::default().with_open_max(4));
    let _held = pool
        .bind(Box::new(MemCookie::default()), Direction::Read)
        .expect("bind");
    let err = pool.open(&tmp.0, "w").expect_err("pool should be full");
    assert!(matches!(err, StdioError::PoolExhausted { .. }));
    assert!(!tmp.0.exists());
}

#[test]
fn open_missing_file_fails_with_enoent() {
    let (mut pool, _out) = small_pool();
    let err = pool
        .open("/nonexistent-dir/xstdio/missing.txt", "r")
        .expect_err("open should fail");
    assert!(matches!(err, StdioError::OpenFailed { .. }));
    assert_eq!(errno::get_errno(), errno::ENOENT);
    assert_eq!(pool.available(), 3);
}

#[test]
fn empty_mode_is_rejected() {
    let (mut pool, _out) = small_pool();
    let err = pool.open("whatever", "").expect_err("empty mode");
    assert!(matches!(err, StdioError::InvalidMode));
    assert_eq!(errno::get_errno(), errno::EINVAL);
}

#[test]
fn funopen_stream_without_seek_reports_espipe() {
    fn upper_write(sink: &mut Vec<u8>, buf: &[u8]) -> io::Result<usize> {
        sink.extend(buf.iter().map(u8::to_ascii_uppercase));
        Ok(buf.len())
    }
    fn mark_closed(sink: &mut Vec<u8>) -> io::Result<()> {
        sink.extend_from_slice(b"|closed");
        Ok(())
    }

    let (mut pool, _out) = small_pool();
    let ops = CookieOps {
        write: Some(upper_write as fn(&mut Vec<u8>, &[u8]) -> io::Result<usize>),
        close: Some(mark_closed as fn(&mut Vec<u8>) -> io::Result<()>),
        ..Default::default()
    };
    let w = pool.funopen(Vec::new(), ops).expect("funopen");
    assert!(w.is_writable());
    w.fputs("shout");
    assert!(matches!(
        w.seek(0, Whence::Start),
        Err(StdioError::Seek(_))
    ));
    assert_eq!(errno::get_errno(), errno::ESPIPE);
    w.close().expect("close");
}

// ---------------------------------------------------------------------
// Formatted output
// ---------------------------------------------------------------------

#[test]
fn printf_reference_outputs() {
    let (pool, out) = small_pool();
    let cases: &[(&str, &[PrintArg<'_>], &str)] = &[
        ("%d", &[PrintArg::Int(-42)], "-42"),
        ("%f", &[PrintArg::Float(3.0)], "3.0000"),
        ("%s", &[PrintArg::Str(b"ab")], "ab"),
        ("%%", &[], "%"),
        ("%q", &[], "%q"),
        ("%p", &[PrintArg::Ptr(0x1f)], "0x1f"),
    ];
    let mut expected = Vec::new();
    for (fmt, args, want) in cases {
        let n = pool.printf(fmt, args);
        assert_eq!(n, want.len(), "count for {fmt}");
        expected.extend_from_slice(want.as_bytes());
    }
    pool.flush_all().expect("flush");
    assert_eq!(out.contents(), expected);
}

// ---------------------------------------------------------------------
// Flush and buffering
// ---------------------------------------------------------------------

#[test]
fn flushing_empty_buffer_is_noop() {
    struct CountingSink(std::rc::Rc<std::cell::Cell<u32>>);
    impl Cookie for CountingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.set(self.0.get() + 1);
            Ok(buf.len())
        }
    }
    let calls = std::rc::Rc::new(std::cell::Cell::new(0));
    let (mut pool, _out) = small_pool();
    let w = pool
        .bind(Box::new(CountingSink(calls.clone())), Direction::Write)
        .expect("bind");
    w.flush().expect("first flush");
    w.flush().expect("second flush");
    assert_eq!(calls.get(), 0);
    assert!(!w.ferror());
}

#[test]
fn failed_write_latches_error_until_cleared() {
    struct Full;
    impl Cookie for Full {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from_raw_os_error(28))
        }
    }
    let (mut pool, _out) = small_pool();
    let w = pool.bind(Box::new(Full), Direction::Write).expect("bind");
    w.fputs("data");
    assert!(matches!(w.flush(), Err(StdioError::WriteFailed)));
    assert!(w.ferror());
    assert!(matches!(w.flush(), Err(StdioError::ErrorLatched)));
    assert_eq!(w.putc(b'x'), None);
    w.clearerr();
    assert!(!w.ferror());
}

#[test]
fn impossible_capacity_degrades_to_unbuffered() {
    let (emitter, log) = LogEmitter::to_buffer("contract");
    let (pool, _out) = mem_pool(
        StdioConfig::default()
            .with_open_max(5)
            .with_buffer_capacity(usize::MAX),
    );
    let mut pool = pool.with_tracer(Tracer::new(emitter));
    let mem = MemCookie::new(b"xyz".to_vec());
    let r = pool.bind(Box::new(mem), Direction::Read).expect("bind");
    assert!(!r.is_unbuffered());
    assert_eq!(r.getc(), Some(b'x'));
    assert!(r.is_unbuffered());
    let mut rest = [0u8; 8];
    assert_eq!(r.read(&mut rest), 2);
    assert_eq!(&rest[..2], b"yz");

    let sink = MemCookie::default();
    let w = pool.bind(Box::new(sink.clone()), Direction::Write).expect("bind");
    assert_eq!(w.write(b"straight"), 8);
    assert!(w.is_unbuffered());
    assert_eq!(sink.contents(), b"straight");

    let entries = log.entries().expect("parse log");
    let degrades: Vec<_> = entries
        .iter()
        .filter(|e| e.event == "degrade_unbuffered")
        .collect();
    assert_eq!(degrades.len(), 2);
    assert!(degrades.iter().all(|e| e.level == LogLevel::Warn));
    assert_eq!(degrades[0].stream, Some(3));
    assert_eq!(degrades[1].stream, Some(4));
}

// ---------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------

#[test]
fn lifecycle_events_are_logged() {
    let tmp = TempPath::new("events");
    let (emitter, log) = LogEmitter::to_buffer("lifecycle");
    let mut pool = StreamPool::new().with_tracer(Tracer::new(emitter));

    let w = pool.open(&tmp.0, "w").expect("open");
    w.fputs("x");
    w.close().expect("close");
    let r = pool.open(&tmp.0, "r").expect("open");
    while r.getc().is_some() {}
    r.close().expect("close");
    let _ = pool.open("/nonexistent-dir/xstdio/nope", "r");

    let entries = log.entries().expect("parse log");
    let events: Vec<&str> = entries.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(
        events,
        vec!["open", "close", "open", "eof_latched", "close", "open_failed"]
    );
    assert_eq!(entries[0].mode.as_deref(), Some("write"));
    assert_eq!(entries[2].mode.as_deref(), Some("read"));
    assert_eq!(entries[5].errno, Some(errno::ENOENT));
    assert!(entries[0].trace_id.starts_with("lifecycle::"));
    for line in log.lines() {
        let value: serde_json::Value = serde_json::from_str(&line).expect("jsonl");
        assert!(value.get("timestamp").is_some());
    }
}
