//! # UDP Ingester
//!
//! Socket setup and the datagram loop. Only datagrams of exactly
//! [`UDP_SIZE`] bytes reach the playout buffer; everything else is counted
//! and dropped.
//!
//! The kernel receive buffer is sized for 250 ms of samples at bind time
//! and again on every sample rate change.

use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use crossbeam_channel::{Sender, TrySendError};
use iqstream_transport::buffer::auto_slot_count;
use iqstream_transport::meta::MetadataChange;
use iqstream_transport::wire::{SAMPLE_SIZE, UDP_SIZE};
use tracing::{debug, info, warn};

use crate::config::ReceiverConfig;
use crate::runtime::{Shared, StreamEvent};

/// Large enough that an oversized datagram shows up with a wrong length
/// instead of being truncated to a valid one.
const RECV_BUFFER_SIZE: usize = 2048;

/// Lowest sample rate the socket receive buffer is sized for.
const SOCKET_BUFFER_MIN_RATE: u32 = 96_000;

/// Socket receive buffer for a quarter second of samples.
pub fn socket_buffer_size(sample_rate: u32, bytes_per_sample: usize) -> usize {
    let rate = sample_rate.max(SOCKET_BUFFER_MIN_RATE) as usize;
    let bps = if bytes_per_sample == 0 {
        SAMPLE_SIZE
    } else {
        bytes_per_sample
    };
    rate * bps / 4
}

/// Set `SO_RCVBUF`. The kernel may clamp or double the value.
#[cfg(unix)]
fn set_socket_buffer(socket: &UdpSocket, bytes: usize) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let size = libc::c_int::try_from(bytes).unwrap_or(libc::c_int::MAX);
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &size as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_socket_buffer(_socket: &UdpSocket, _bytes: usize) -> io::Result<()> {
    Ok(())
}

fn apply_socket_buffer(socket: &UdpSocket, sample_rate: u32, bytes_per_sample: usize) {
    let bytes = socket_buffer_size(sample_rate, bytes_per_sample);
    match set_socket_buffer(socket, bytes) {
        Ok(()) => debug!(bytes, sample_rate, "socket receive buffer set"),
        Err(e) => warn!(bytes, error = %e, "SO_RCVBUF failed"),
    }
}

/// Bind the receive socket, join the multicast group if configured and set
/// the read timeout.
pub fn bind_socket(config: &ReceiverConfig) -> anyhow::Result<UdpSocket> {
    let addr = config.socket_addr();
    let socket =
        UdpSocket::bind(addr).with_context(|| format!("failed to bind UDP socket on {addr}"))?;
    apply_socket_buffer(&socket, 0, SAMPLE_SIZE);

    if let Some(group) = config.multicast_group {
        let iface = match config.bind_addr {
            IpAddr::V4(v4) if !v4.is_multicast() => v4,
            _ => Ipv4Addr::UNSPECIFIED,
        };
        match socket.join_multicast_v4(&group, &iface) {
            Ok(()) => info!(%group, %iface, "joined multicast group"),
            Err(e) => warn!(%group, %iface, error = %e, "multicast join failed"),
        }
    }

    socket
        .set_read_timeout(Some(config.socket_timeout()))
        .context("failed to set socket read timeout")?;
    Ok(socket)
}

/// Reader side of the runtime: socket to playout buffer.
pub(crate) struct UdpIngester {
    socket: UdpSocket,
    shared: Arc<Shared>,
    events: Sender<StreamEvent>,
    auto_slots: bool,
}

impl UdpIngester {
    pub(crate) fn new(
        socket: UdpSocket,
        shared: Arc<Shared>,
        events: Sender<StreamEvent>,
        auto_slots: bool,
    ) -> Self {
        Self {
            socket,
            shared,
            events,
            auto_slots,
        }
    }

    /// Receive until the running flag is cleared.
    pub(crate) fn run(self) {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let mut sample_rate = 0u32;

        while self.shared.running.load(Ordering::Relaxed) {
            match self.socket.recv_from(&mut buf) {
                Ok((n, _from)) => {
                    if let Some(change) = self.on_datagram(&buf[..n]) {
                        self.on_metadata_change(change, &mut sample_rate);
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    if !self.shared.running.load(Ordering::Relaxed) {
                        break;
                    }
                    warn!(error = %e, "UDP receive failed");
                }
            }
        }
        debug!("ingest loop stopped");
    }

    fn on_datagram(&self, datagram: &[u8]) -> Option<MetadataChange> {
        let counters = &self.shared.counters;
        counters.datagrams.fetch_add(1, Ordering::Relaxed);
        if datagram.len() != UDP_SIZE {
            counters.wrong_size.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        self.shared.lock_buffer().write_datagram(datagram)
    }

    fn on_metadata_change(&self, change: MetadataChange, sample_rate: &mut u32) {
        if change.sample_rate != *sample_rate {
            *sample_rate = change.sample_rate;
            let bps = {
                let mut buffer = self.shared.lock_buffer();
                let bps = buffer.current_meta().bytes_per_sample();
                if self.auto_slots {
                    let slots = auto_slot_count(change.sample_rate, bps, buffer.frame_bytes());
                    if slots != buffer.slot_count() {
                        buffer.resize(slots);
                    }
                }
                bps
            };
            apply_socket_buffer(&self.socket, change.sample_rate, bps);
            self.shared.restart_playout.store(true, Ordering::Relaxed);
        }

        match self.events.try_send(StreamEvent::MetadataChanged(change)) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                self.shared
                    .counters
                    .events_dropped
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
