//! Replay raw pulse captures through the 2-bus decoder

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use twobus_parser::{ChecksumStatus, DecoderStats, Frame, SymbolDecoder};

/// Send diagnostics to stderr; stdout carries the decoded frames
fn init_logging(level: tracing::Level, json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(err) = installed {
        eprintln!("logging disabled: {err}");
    }
}

#[derive(Parser, Debug)]
#[command(name = "twobus-replay", version, about = "Decode raw 2-bus pulse captures")]
struct Cli {
    /// Capture files (one pulse duration per byte), replayed in order.
    #[arg(required = true, value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Print one JSON object per frame.
    #[arg(long)]
    json: bool,

    /// Skip frames whose checksum does not match.
    #[arg(long)]
    valid_only: bool,

    /// Start every file with a fresh decoder instead of one continuous stream.
    #[arg(long)]
    reset_between: bool,

    /// Write log lines as JSON.
    #[arg(long)]
    log_json: bool,

    /// Minimum log level: error, warn, info, debug or trace.
    #[arg(long, value_name = "LEVEL", default_value = "warn", env = "TWOBUS_LOG_LEVEL")]
    log_level: tracing::Level,
}

#[derive(Serialize)]
struct FrameRecord<'a> {
    file: &'a Path,
    frame: &'a Frame,
    checksum: ChecksumStatus,
    command_name: Option<&'static str>,
    bytes: [u8; 6],
}

fn print_frame(cli: &Cli, file: &Path, frame: &Frame) {
    if cli.valid_only && !frame.is_checksum_valid() {
        return;
    }

    if cli.json {
        let record = FrameRecord {
            file,
            frame,
            checksum: frame.checksum_status(),
            command_name: frame.command.name(),
            bytes: frame.received_bytes().unwrap_or_else(|| frame.encode()),
        };
        match serde_json::to_string(&record) {
            Ok(line) => println!("{line}"),
            Err(err) => tracing::error!(error = %err, "failed to serialize frame"),
        }
    } else {
        let flag = match frame.checksum_status() {
            ChecksumStatus::Mismatch { .. } => " [checksum mismatch]",
            _ => "",
        };
        println!("{}: {}{}", file.display(), frame, flag);
    }
}

/// Decode captures in order, as one stream unless `reset_between` is set
fn replay_captures<F>(captures: &[(PathBuf, Vec<u8>)], reset_between: bool, mut on_frame: F) -> DecoderStats
where
    F: FnMut(&Path, Frame),
{
    let mut decoder = SymbolDecoder::new();
    for (path, pulses) in captures {
        tracing::info!(file = %path.display(), pulses = pulses.len(), "replaying capture");
        if reset_between {
            decoder.reset();
        }
        decoder.push_pulses(pulses, |frame| on_frame(path.as_path(), frame));
        if reset_between {
            if let Some(frame) = decoder.finish() {
                on_frame(path.as_path(), frame);
            }
        }
    }

    if let (false, Some((last, _))) = (reset_between, captures.last()) {
        if let Some(frame) = decoder.finish() {
            on_frame(last.as_path(), frame);
        }
    }
    decoder.stats()
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level, cli.log_json);

    let mut captures = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        match std::fs::read(path) {
            Ok(pulses) => captures.push((path.clone(), pulses)),
            Err(err) => {
                tracing::error!(file = %path.display(), error = %err, "cannot read capture");
                return ExitCode::FAILURE;
            }
        }
    }

    let stats = replay_captures(&captures, cli.reset_between, |path, frame| {
        print_frame(&cli, path, &frame)
    });
    tracing::info!(
        pulses = stats.pulses,
        frames = stats.frames,
        checksum_mismatches = stats.checksum_mismatches,
        idle_resets = stats.idle_resets,
        "replay finished"
    );
    ExitCode::SUCCESS
}
