//! CLI entrypoint for the xstdio stream harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use xstdio_core::config::TraceTarget;
use xstdio_core::{PrintArg, StdioConfig, Stream, StreamPool};

/// Drive xstdio streams from the command line.
#[derive(Debug, Parser)]
#[command(name = "xstdio")]
#[command(about = "Buffered stream I/O harness for xstdio")]
struct Cli {
    /// Stream event log: `off`, `stderr`, or a JSONL file path.
    /// Defaults to `XSTDIO_TRACE`.
    #[arg(long, global = true)]
    trace: Option<String>,
    /// Buffer capacity for buffered streams. Defaults to `XSTDIO_BUFSIZ`.
    #[arg(long, global = true)]
    bufsiz: Option<usize>,
    /// Total stream slots. Defaults to `XSTDIO_OPEN_MAX`.
    #[arg(long, global = true)]
    open_max: Option<usize>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Concatenate files (or stdin) to stdout.
    Cat {
        /// Input files; stdin when empty.
        files: Vec<PathBuf>,
    },
    /// Copy one file to another through block reads and writes.
    Copy {
        source: PathBuf,
        dest: PathBuf,
        /// Write through an unbuffered destination stream.
        #[arg(long)]
        unbuffered: bool,
        /// Block size used for each read.
        #[arg(long, default_value_t = 4096)]
        block: usize,
        /// Print a JSON summary to stdout when done.
        #[arg(long)]
        json: bool,
    },
    /// Print a file's lines, numbered.
    Lines {
        file: PathBuf,
        /// Longest line read in one piece; longer lines wrap.
        #[arg(long, default_value_t = 256)]
        width: usize,
    },
    /// Formatted output with the `%d %i %f %s %p %%` directives.
    Printf {
        format: String,
        /// Arguments: integers, decimals, `0x` hex pointers, or strings.
        args: Vec<String>,
    },
}

#[derive(Debug, Serialize)]
struct CopySummary {
    source: String,
    dest: String,
    bytes: u64,
    unbuffered: bool,
    read_error: bool,
    write_error: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = StdioConfig::from_env();
    if let Some(trace) = &cli.trace {
        config = config.with_trace(TraceTarget::from_str_loose(trace));
    }
    if let Some(bufsiz) = cli.bufsiz {
        config = config.with_buffer_capacity(bufsiz);
    }
    if let Some(open_max) = cli.open_max {
        config = config.with_open_max(open_max);
    }
    let mut pool = StreamPool::with_config(config)?;

    match cli.command {
        Command::Cat { files } => {
            let stdout = pool.stdout();
            if files.is_empty() {
                pump(&pool.stdin(), &stdout, 4096);
            }
            for path in files {
                let input = pool.open(&path, "r")?;
                pump(&input, &stdout, 4096);
                if input.ferror() {
                    eprintln!("read error on {}", path.display());
                }
                input.close()?;
            }
            pool.flush_all()?;
        }
        Command::Copy {
            source,
            dest,
            unbuffered,
            block,
            json,
        } => {
            let input = pool.open(&source, "r")?;
            let output = pool.open(&dest, "w")?;
            if unbuffered {
                output.set_unbuffered();
            }
            let bytes = pump(&input, &output, block.max(1));
            let summary = CopySummary {
                source: source.display().to_string(),
                dest: dest.display().to_string(),
                bytes,
                unbuffered: output.is_unbuffered(),
                read_error: input.ferror(),
                write_error: output.ferror(),
            };
            input.close()?;
            output.close()?;
            if json {
                pool.puts(serde_json::to_string(&summary)?);
                pool.flush_all()?;
            }
            if summary.read_error || summary.write_error {
                return Err(format!("copy failed after {bytes} bytes").into());
            }
        }
        Command::Lines { file, width } => {
            let input = pool.open(&file, "r")?;
            let mut line = vec![0u8; width.max(2)];
            let mut number: i64 = 0;
            while let Some(text) = pool.fgets(&input, &mut line) {
                number += 1;
                pool.printf("%d: %s", &[PrintArg::Int(number), PrintArg::Str(text)]);
                if !text.ends_with(b"\n") {
                    pool.putchar(b'\n');
                }
            }
            input.close()?;
            pool.flush_all()?;
        }
        Command::Printf { format, args } => {
            let parsed: Vec<PrintArg<'_>> = args.iter().map(|raw| parse_arg(raw)).collect();
            pool.printf(&format, &parsed);
            pool.flush_all()?;
        }
    }

    Ok(())
}

/// Copy `input` to `output` in blocks until a short read. Returns the
/// number of bytes written.
fn pump(input: &Stream, output: &Stream, block: usize) -> u64 {
    let mut buf = vec![0u8; block];
    let mut total = 0u64;
    loop {
        let n = input.read(&mut buf);
        let written = output.write(&buf[..n]);
        total += written as u64;
        if written < n || n < buf.len() {
            break;
        }
    }
    total
}

fn parse_arg(raw: &str) -> PrintArg<'_> {
    if let Some(hex) = raw.strip_prefix("0x") {
        if let Ok(addr) = usize::from_str_radix(hex, 16) {
            return PrintArg::Ptr(addr);
        }
    }
    if let Ok(int) = raw.parse::<i64>() {
        return PrintArg::Int(int);
    }
    if let Ok(float) = raw.parse::<f64>() {
        return PrintArg::Float(float);
    }
    PrintArg::from(raw)
}
