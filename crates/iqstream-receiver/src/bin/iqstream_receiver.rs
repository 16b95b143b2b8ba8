//! # iqstream Receiver
//!
//! Receives an FEC-protected I/Q stream over UDP, reconstructs the samples
//! and plays them out at the sender's sample rate as raw interleaved I/Q
//! bytes.
//!
//! ## Usage
//!
//! ```bash
//! # Monitor mode (log metadata and timing, discard samples)
//! iqstream-receiver --bind 0.0.0.0 --port 9090
//!
//! # Write samples to a file
//! iqstream-receiver --port 9090 --output capture.iq
//!
//! # Pipe samples to another program
//! iqstream-receiver --multicast 239.255.0.1 --output - | sox ...
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use iqstream_receiver::{ReceiverConfig, ReceiverRuntime, StreamEvent};
use tracing_subscriber::EnvFilter;

/// FEC-protected I/Q stream receiver.
#[derive(Parser, Debug)]
#[command(name = "iqstream-receiver", about = "FEC-protected I/Q stream receiver")]
struct Cli {
    /// TOML configuration file; flags override its values.
    #[arg(long, short = 'c', env = "IQSTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Local address to bind.
    #[arg(long, short = 'b', env = "IQSTREAM_BIND")]
    bind: Option<IpAddr>,

    /// UDP port.
    #[arg(long, short = 'p', env = "IQSTREAM_PORT")]
    port: Option<u16>,

    /// IPv4 multicast group to join.
    #[arg(long, short = 'm', env = "IQSTREAM_MULTICAST")]
    multicast: Option<Ipv4Addr>,

    /// Nominal playout tick in milliseconds.
    #[arg(long, env = "IQSTREAM_TICK_MS")]
    tick_ms: Option<u64>,

    /// Fixed number of decoder slots (disables automatic sizing).
    #[arg(long, env = "IQSTREAM_SLOTS")]
    slots: Option<usize>,

    /// Do not correct the read/write balance.
    #[arg(long, default_value_t = false)]
    no_auto_correction: bool,

    /// Write samples to this file, or `-` for stdout.
    #[arg(long, short = 'o')]
    output: Option<String>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<(ReceiverConfig, Option<String>)> {
        let mut config = match &self.config {
            Some(path) => ReceiverConfig::from_file(path)?,
            None => ReceiverConfig::default(),
        };
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.multicast.is_some() {
            config.multicast_group = self.multicast;
        }
        if let Some(tick_ms) = self.tick_ms {
            config.tick_ms = tick_ms;
        }
        if let Some(slots) = self.slots {
            config.slot_count = slots;
            config.auto_slots = false;
        }
        if self.no_auto_correction {
            config.auto_correction = false;
        }
        config.validate()?;
        Ok((config, self.output))
    }
}

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let (config, output) = Cli::parse().into_config()?;

    tracing::info!(
        bind = %config.socket_addr(),
        multicast = ?config.multicast_group,
        tick_ms = config.tick_ms,
        output = ?output,
        "iqstream-receiver starting"
    );

    // ── Output sink ─────────────────────────────────────────────
    let mut sink: Option<Box<dyn Write>> = match output.as_deref() {
        Some("-") => {
            tracing::info!("output: writing samples to stdout");
            Some(Box::new(BufWriter::new(std::io::stdout())))
        }
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create output file {path}"))?;
            tracing::info!(path, "output: writing samples to file");
            Some(Box::new(BufWriter::new(file)))
        }
        None => {
            tracing::info!("output: monitor mode (set --output to capture)");
            None
        }
    };

    // ── Runtime ─────────────────────────────────────────────────
    let mut runtime = ReceiverRuntime::start(config)?;
    let mut samples_rx = runtime
        .take_output()
        .context("sample output already taken")?;

    // ── Graceful shutdown ───────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutting down...");
            running.store(false, Ordering::Relaxed);
        })
        .context("failed to install Ctrl-C handler")?;
    }

    // ── Main loop ───────────────────────────────────────────────
    let mut total_bytes: u64 = 0;
    let mut total_chunks: u64 = 0;

    while running.load(Ordering::Relaxed) {
        let mut idle = true;

        while let Ok(chunk) = samples_rx.pop() {
            idle = false;
            total_bytes += chunk.len() as u64;
            total_chunks += 1;
            if let Some(out) = sink.as_mut() {
                if let Err(e) = out.write_all(&chunk) {
                    tracing::error!(error = %e, "output write failed");
                    running.store(false, Ordering::Relaxed);
                    break;
                }
            }
        }

        while let Ok(event) = runtime.events().try_recv() {
            idle = false;
            log_event(&event);
        }

        if idle {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────
    runtime.shutdown();
    if let Some(mut out) = sink.take() {
        out.flush().context("failed to flush output")?;
    }
    let stats = runtime.stats();
    tracing::info!(
        total_chunks,
        total_bytes,
        datagrams = stats.datagrams,
        wrong_size = stats.wrong_size,
        fifo_overflows = stats.fifo_overflows,
        resyncs = stats.buffer.resyncs,
        blocks_recovered = stats.buffer.blocks_recovered,
        decode_failures = stats.buffer.decode_failures,
        "iqstream-receiver stopped"
    );

    Ok(())
}

fn log_event(event: &StreamEvent) {
    match event {
        StreamEvent::MetadataChanged(change) => {
            tracing::info!(
                sample_rate = change.sample_rate,
                center_frequency_hz = change.center_frequency_hz,
                timestamp_us = change.timestamp_us,
                "stream parameters changed"
            );
        }
        StreamEvent::Timing(report) => {
            tracing::info!(
                buffer_seconds = report.buffer_seconds,
                gauge = report.gauge,
                correction = report.correction,
                cur_blocks = report.cur_blocks,
                avg_blocks = report.avg_blocks,
                cur_recovery = report.cur_recovery,
                avg_recovery = report.avg_recovery,
                min_blocks = report.min_blocks,
                max_recovery = report.max_recovery,
                status = ?report.decoding_status,
                "timing"
            );
        }
    }
}
