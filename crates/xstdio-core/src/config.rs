//! Stream pool configuration.
//!
//! Capacities and the trace target come from the environment:
//! - `XSTDIO_OPEN_MAX`: total descriptor slots, the three standard streams
//!   included. Values below `STD_STREAMS + 1` are raised to it.
//! - `XSTDIO_BUFSIZ`: capacity a stream requests when it allocates its buffer.
//! - `XSTDIO_TRACE`: `off` (default), `stderr`, or a path receiving JSONL
//!   stream events.
//!
//! Unparsable or zero numbers fall back to the defaults.

use std::path::PathBuf;

/// Default number of descriptor slots in a pool.
pub const OPEN_MAX: usize = 20;

/// Default buffer capacity for buffered streams.
pub const BUFSIZ: usize = 8192;

/// Size of the inline buffer an unbuffered stream works through.
pub const UNBUF_SIZE: usize = 1;

/// Slots reserved for stdin, stdout and stderr.
pub const STD_STREAMS: usize = 3;

pub const ENV_OPEN_MAX: &str = "XSTDIO_OPEN_MAX";
pub const ENV_BUFSIZ: &str = "XSTDIO_BUFSIZ";
pub const ENV_TRACE: &str = "XSTDIO_TRACE";

/// Where structured stream events go.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum TraceTarget {
    #[default]
    Off,
    Stderr,
    File(PathBuf),
}

impl TraceTarget {
    /// Parse from string (case-insensitive for the keywords).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "off" | "none" | "0" | "false" => Self::Off,
            "stderr" | "on" | "1" | "true" => Self::Stderr,
            _ => Self::File(PathBuf::from(trimmed)),
        }
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        !matches!(self, Self::Off)
    }
}

/// Capacity constants and trace target for a [`crate::StreamPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioConfig {
    pub open_max: usize,
    pub buffer_capacity: usize,
    pub trace: TraceTarget,
}

impl Default for StdioConfig {
    fn default() -> Self {
        Self {
            open_max: OPEN_MAX,
            buffer_capacity: BUFSIZ,
            trace: TraceTarget::Off,
        }
    }
}

impl StdioConfig {
    /// Read the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let open_max = lookup(ENV_OPEN_MAX)
            .and_then(|raw| parse_count(&raw))
            .unwrap_or(defaults.open_max);
        let buffer_capacity = lookup(ENV_BUFSIZ)
            .and_then(|raw| parse_count(&raw))
            .unwrap_or(defaults.buffer_capacity);
        let trace = lookup(ENV_TRACE)
            .map(|raw| TraceTarget::from_str_loose(&raw))
            .unwrap_or_default();
        Self::default()
            .with_open_max(open_max)
            .with_buffer_capacity(buffer_capacity)
            .with_trace(trace)
    }

    #[must_use]
    pub fn with_open_max(mut self, open_max: usize) -> Self {
        self.open_max = open_max.max(STD_STREAMS + 1);
        self
    }

    /// Set the buffer capacity. A capacity the allocator refuses makes every
    /// stream of the pool fall back to unbuffered operation on first use.
    #[must_use]
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity.max(UNBUF_SIZE);
        self
    }

    #[must_use]
    pub fn with_trace(mut self, trace: TraceTarget) -> Self {
        self.trace = trace;
        self
    }

    /// Slots available to user streams.
    #[must_use]
    pub const fn user_slots(&self) -> usize {
        self.open_max - STD_STREAMS
    }
}

fn parse_count(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok().filter(|&n| n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = StdioConfig::default();
        assert_eq!(cfg.open_max, OPEN_MAX);
        assert_eq!(cfg.buffer_capacity, BUFSIZ);
        assert_eq!(cfg.trace, TraceTarget::Off);
        assert_eq!(cfg.user_slots(), OPEN_MAX - STD_STREAMS);
    }

    #[test]
    fn test_from_lookup_reads_all_keys() {
        let cfg = StdioConfig::from_lookup(lookup_from(&[
            (ENV_OPEN_MAX, "8"),
            (ENV_BUFSIZ, " 64 "),
            (ENV_TRACE, "STDERR"),
        ]));
        assert_eq!(cfg.open_max, 8);
        assert_eq!(cfg.buffer_capacity, 64);
        assert_eq!(cfg.trace, TraceTarget::Stderr);
    }

    #[test]
    fn test_from_lookup_falls_back_on_garbage() {
        let cfg = StdioConfig::from_lookup(lookup_from(&[
            (ENV_OPEN_MAX, "lots"),
            (ENV_BUFSIZ, "0"),
        ]));
        assert_eq!(cfg.open_max, OPEN_MAX);
        assert_eq!(cfg.buffer_capacity, BUFSIZ);
    }

    #[test]
    fn test_open_max_leaves_room_for_one_user_stream() {
        let cfg = StdioConfig::default().with_open_max(1);
        assert_eq!(cfg.open_max, STD_STREAMS + 1);
        assert_eq!(cfg.user_slots(), 1);
    }

    #[test]
    fn test_trace_target_parsing() {
        assert_eq!(TraceTarget::from_str_loose("off"), TraceTarget::Off);
        assert_eq!(TraceTarget::from_str_loose(""), TraceTarget::Off);
        assert_eq!(TraceTarget::from_str_loose("On"), TraceTarget::Stderr);
        assert_eq!(
            TraceTarget::from_str_loose("/tmp/events.jsonl"),
            TraceTarget::File(PathBuf::from("/tmp/events.jsonl"))
        );
        assert!(!TraceTarget::Off.enabled());
        assert!(TraceTarget::Stderr.enabled());
    }
}
