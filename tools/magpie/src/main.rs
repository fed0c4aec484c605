//! # magpie
//!
//! Host-side companion to the `busybody` sniffer: reads the COBS frame
//! stream (from a file, or piped in from whatever owns the serial port)
//! and prints the captured bus traffic.

use std::{
    fs::File,
    io::{self, Read},
    path::PathBuf,
};

use clap::Parser;
use miette::{IntoDiagnostic, WrapErr};
use owo_colors::{OwoColorize, Stream};
use snoop_proto::{OwnedSnoopFrame, SnoopFrame};
use tracing::level_filters::LevelFilter;

mod assemble;

use assemble::Assembler;

#[derive(Debug, Parser)]
#[clap(author, version, about = "decode busybody sniffer frames")]
struct Settings {
    /// Capture file to decode. Reads STDIN when omitted, so the sniffer's
    /// serial port can be piped straight in.
    input: Option<PathBuf>,

    /// Dump raw token symbols instead of reassembled transactions.
    #[arg(long)]
    raw: bool,

    /// Log decoding chatter to stderr.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> miette::Result<()> {
    let settings = Settings::parse();

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(if settings.verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::WARN
        })
        .init();

    let reader: Box<dyn Read> = match settings.input {
        Some(ref path) => Box::new(
            File::open(path)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to open {}", path.display()))?,
        ),
        None => Box::new(io::stdin()),
    };

    decode_stream(reader, settings.raw)
}

fn decode_stream(mut reader: impl Read, raw: bool) -> miette::Result<()> {
    let mut assembler = Assembler::new();
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut total_dropped: u64 = 0;

    loop {
        let read = reader.read(&mut chunk).into_diagnostic()?;
        if read == 0 {
            break;
        }
        pending.extend_from_slice(&chunk[..read]);

        // frames are zero-terminated; everything up to the last zero is
        // decodable now
        while let Some(end) = pending.iter().position(|b| *b == 0) {
            let frame_bytes: Vec<u8> = pending.drain(..=end).collect();
            if frame_bytes.len() <= 1 {
                // bare delimiter, e.g. the flush byte some transports
                // send on connect
                continue;
            }
            match OwnedSnoopFrame::decode(&frame_bytes) {
                Ok(frame) => {
                    total_dropped += u64::from(frame.dropped);
                    handle_frame(&frame.as_frame(), &mut assembler, raw);
                }
                Err(error) => {
                    tracing::warn!(?error, "skipping undecodable frame");
                }
            }
        }
    }

    // show whatever an unterminated capture left behind
    if let Some(txn) = assembler.flush() {
        println!("{txn}");
    }
    if total_dropped > 0 {
        eprintln!(
            "{}",
            format!("sniffer dropped {total_dropped} tokens (ring overflow)")
                .if_supports_color(Stream::Stderr, |t| t.yellow())
        );
    }
    Ok(())
}

fn handle_frame(frame: &SnoopFrame<'_>, assembler: &mut Assembler, raw: bool) {
    tracing::debug!(
        symbols = frame.symbols.len(),
        dropped = frame.dropped,
        "frame"
    );
    if frame.dropped > 0 {
        eprintln!(
            "{}",
            format!("... {} tokens dropped here ...", frame.dropped)
                .if_supports_color(Stream::Stderr, |t| t.yellow())
        );
    }

    if raw {
        println!("{}", String::from_utf8_lossy(frame.symbols));
        return;
    }

    for token in frame.tokens() {
        match token {
            Some(token) => {
                if let Some(txn) = assembler.push(token) {
                    if txn.complete {
                        println!("{txn}");
                    } else {
                        println!(
                            "{}",
                            txn.to_string()
                                .if_supports_color(Stream::Stdout, |t| t.red())
                        );
                    }
                }
            }
            None => tracing::warn!("byte outside the token alphabet, skipped"),
        }
    }
}
