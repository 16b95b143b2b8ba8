use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use iqstream_transport::buffer::PlayoutBuffer;
use iqstream_transport::meta::MetadataChange;
use iqstream_transport::playout::{PlayoutConfig, PlayoutController};
use iqstream_transport::stats::{BufferCounters, TimingReport};
use quanta::Instant;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ReceiverConfig;
use crate::ingest::{UdpIngester, bind_socket};

/// Out-of-band notifications for the consumer.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Sample rate, center frequency or sample format changed.
    MetadataChanged(MetadataChange),
    /// Emitted by the playout thread about once per second.
    Timing(TimingReport),
}

#[derive(Debug, Default)]
pub(crate) struct RuntimeCounters {
    pub(crate) datagrams: AtomicU64,
    pub(crate) wrong_size: AtomicU64,
    pub(crate) chunks: AtomicU64,
    pub(crate) samples: AtomicU64,
    pub(crate) fifo_overflows: AtomicU64,
    pub(crate) events_dropped: AtomicU64,
}

/// Snapshot of the runtime counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuntimeStats {
    /// Datagrams read from the socket.
    pub datagrams: u64,
    /// Datagrams dropped for not being exactly one block long.
    pub wrong_size: u64,
    /// Sample chunks pushed to the output FIFO.
    pub chunks: u64,
    /// Complex samples drained by the playout thread.
    pub samples: u64,
    /// Chunks dropped because the output FIFO was full.
    pub fifo_overflows: u64,
    pub events_dropped: u64,
    pub gauge: i32,
    pub buffer: BufferCounters,
}

/// State shared by the ingest and playout threads.
pub(crate) struct Shared {
    pub(crate) buffer: Mutex<PlayoutBuffer>,
    pub(crate) counters: RuntimeCounters,
    pub(crate) running: AtomicBool,
    /// Set by the ingester when the playout clock should start over.
    pub(crate) restart_playout: AtomicBool,
}

impl Shared {
    /// A panic on one side must not take the other side down with it.
    pub(crate) fn lock_buffer(&self) -> MutexGuard<'_, PlayoutBuffer> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// UDP receiver with its ingest and playout threads.
///
/// Reconstructed sample bytes come out of a lock-free SPSC ring (`rtrb`),
/// one chunk per playout tick; metadata changes and timing reports come out
/// of a bounded crossbeam channel. Neither producer ever blocks: when the
/// consumer falls behind, chunks and events are dropped and counted.
///
/// Dropping the runtime stops both threads and joins them.
pub struct ReceiverRuntime {
    shared: Arc<Shared>,
    output: Option<rtrb::Consumer<Bytes>>,
    events: Receiver<StreamEvent>,
    local_addr: SocketAddr,
    handles: Vec<thread::JoinHandle<()>>,
}

impl ReceiverRuntime {
    /// Bind the socket and start both threads.
    pub fn start(config: ReceiverConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let socket = bind_socket(&config)?;
        let local_addr = socket.local_addr().context("failed to read local address")?;

        let mut buffer = PlayoutBuffer::new(config.slot_count);
        buffer.set_read_interval(u32::try_from(config.tick_ms).unwrap_or(u32::MAX));

        let shared = Arc::new(Shared {
            buffer: Mutex::new(buffer),
            counters: RuntimeCounters::default(),
            running: AtomicBool::new(true),
            restart_playout: AtomicBool::new(false),
        });
        let (producer, consumer) = rtrb::RingBuffer::new(config.fifo_chunks);
        let (event_tx, event_rx) = bounded(config.event_capacity);

        let ingester = UdpIngester::new(socket, shared.clone(), event_tx.clone(), config.auto_slots);
        let ingest_handle = thread::Builder::new()
            .name("iqstream-ingest".into())
            .spawn(move || ingester.run())
            .context("failed to spawn ingest thread")?;

        let playout_shared = shared.clone();
        let playout_config = PlayoutConfig {
            tick: config.tick(),
            auto_correction: config.auto_correction,
        };
        let playout_handle = match thread::Builder::new()
            .name("iqstream-playout".into())
            .spawn(move || playout_loop(playout_shared, producer, event_tx, playout_config))
        {
            Ok(handle) => handle,
            Err(e) => {
                shared.running.store(false, Ordering::Relaxed);
                let _ = ingest_handle.join();
                return Err(e).context("failed to spawn playout thread");
            }
        };

        info!(
            %local_addr,
            tick_ms = config.tick_ms,
            slot_count = config.slot_count,
            auto_slots = config.auto_slots,
            auto_correction = config.auto_correction,
            "receiver runtime started"
        );

        Ok(Self {
            shared,
            output: Some(consumer),
            events: event_rx,
            local_addr,
            handles: vec![ingest_handle, playout_handle],
        })
    }

    /// Address the socket is bound to (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Consumer end of the sample FIFO. Can be taken once.
    pub fn take_output(&mut self) -> Option<rtrb::Consumer<Bytes>> {
        self.output.take()
    }

    pub fn events(&self) -> &Receiver<StreamEvent> {
        &self.events
    }

    pub fn stats(&self) -> RuntimeStats {
        let c = &self.shared.counters;
        let buffer = self.shared.lock_buffer();
        RuntimeStats {
            datagrams: c.datagrams.load(Ordering::Relaxed),
            wrong_size: c.wrong_size.load(Ordering::Relaxed),
            chunks: c.chunks.load(Ordering::Relaxed),
            samples: c.samples.load(Ordering::Relaxed),
            fifo_overflows: c.fifo_overflows.load(Ordering::Relaxed),
            events_dropped: c.events_dropped.load(Ordering::Relaxed),
            gauge: buffer.gauge(),
            buffer: buffer.counters().clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed)
    }

    /// Stop both threads and wait for them. Idempotent.
    pub fn shutdown(&mut self) {
        self.shared.running.store(false, Ordering::Relaxed);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for ReceiverRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Tick the playout controller at the nominal interval and hand every chunk
/// to the consumer FIFO.
fn playout_loop(
    shared: Arc<Shared>,
    mut output: rtrb::Producer<Bytes>,
    events: Sender<StreamEvent>,
    config: PlayoutConfig,
) {
    let tick = config.tick;
    let mut controller = PlayoutController::new(config);

    while shared.running.load(Ordering::Relaxed) {
        thread::sleep(tick);
        if shared.restart_playout.swap(false, Ordering::Relaxed) {
            controller.restart();
        }

        let drained = {
            let mut buffer = shared.lock_buffer();
            controller.tick(Instant::now(), &mut buffer)
        };

        let counters = &shared.counters;
        if !drained.chunk.is_empty() {
            counters
                .samples
                .fetch_add(drained.samples as u64, Ordering::Relaxed);
            match output.push(drained.chunk) {
                Ok(()) => {
                    counters.chunks.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    let overflows = counters.fifo_overflows.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(overflows, "output FIFO full, chunk dropped");
                }
            }
        }

        if let Some(report) = drained.report {
            if let Err(TrySendError::Full(_)) = events.try_send(StreamEvent::Timing(report)) {
                counters.events_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    debug!(
        total_samples = controller.total_samples(),
        "playout loop stopped"
    );
}
