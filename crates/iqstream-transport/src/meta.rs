//! # Stream Metadata
//!
//! The metadata record carried at the start of block zero, and the tracker
//! that decides when a new record is a real change of stream parameters.

use bytes::{Buf, BufMut};
use serde::Serialize;

/// Stream parameters announced by the sender in every frame.
#[derive(Debug, Default, Clone, Copy, Eq, Serialize)]
pub struct StreamMetadata {
    /// Center frequency in kHz.
    pub center_frequency_khz: u32,
    /// Complex sample rate in Hz.
    pub sample_rate: u32,
    /// Bytes per I or Q component in the low nibble.
    pub sample_bytes: u8,
    /// Effective bits per component.
    pub sample_bits: u8,
    /// Original blocks per frame, block zero included.
    pub nb_original_blocks: u8,
    /// Recovery blocks per frame.
    pub nb_fec_blocks: u8,
    /// Sender timestamp, seconds.
    pub tv_sec: u32,
    /// Sender timestamp, microseconds.
    pub tv_usec: u32,
}

/// Timestamps change with every frame, so they take no part in equality.
impl PartialEq for StreamMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.center_frequency_khz == other.center_frequency_khz
            && self.sample_rate == other.sample_rate
            && self.sample_bytes == other.sample_bytes
            && self.sample_bits == other.sample_bits
            && self.nb_original_blocks == other.nb_original_blocks
            && self.nb_fec_blocks == other.nb_fec_blocks
    }
}

impl StreamMetadata {
    /// Size of the record at the head of block zero.
    pub const ENCODED_LEN: usize = 20;

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.center_frequency_khz);
        buf.put_u32_le(self.sample_rate);
        buf.put_u8(self.sample_bytes);
        buf.put_u8(self.sample_bits);
        buf.put_u8(self.nb_original_blocks);
        buf.put_u8(self.nb_fec_blocks);
        buf.put_u32_le(self.tv_sec);
        buf.put_u32_le(self.tv_usec);
    }

    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < Self::ENCODED_LEN {
            return None;
        }
        Some(StreamMetadata {
            center_frequency_khz: buf.get_u32_le(),
            sample_rate: buf.get_u32_le(),
            sample_bytes: buf.get_u8(),
            sample_bits: buf.get_u8(),
            nb_original_blocks: buf.get_u8(),
            nb_fec_blocks: buf.get_u8(),
            tv_sec: buf.get_u32_le(),
            tv_usec: buf.get_u32_le(),
        })
    }

    /// Center frequency in Hz.
    #[inline]
    pub fn center_frequency_hz(&self) -> u64 {
        self.center_frequency_khz as u64 * 1000
    }

    /// Bytes of one complex sample (I + Q).
    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        (self.sample_bytes & 0x0F) as usize * 2
    }

    /// Sender timestamp in microseconds since the epoch.
    #[inline]
    pub fn timestamp_us(&self) -> i64 {
        self.tv_sec as i64 * 1_000_000 + self.tv_usec as i64
    }

    /// Whether a record can drive the playout buffer built for
    /// `nb_original_blocks` originals per frame.
    pub fn is_valid(&self, nb_original_blocks: usize) -> bool {
        self.sample_rate != 0
            && self.nb_original_blocks as usize == nb_original_blocks
            && matches!(self.sample_bytes & 0x0F, 1 | 2 | 4)
    }
}

/// Out-of-band notification raised when the stream parameters change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetadataChange {
    pub sample_rate: u32,
    pub center_frequency_hz: u64,
    /// Sender timestamp of the record that triggered the change, µs.
    pub timestamp_us: i64,
}

impl From<&StreamMetadata> for MetadataChange {
    fn from(meta: &StreamMetadata) -> Self {
        MetadataChange {
            sample_rate: meta.sample_rate,
            center_frequency_hz: meta.center_frequency_hz(),
            timestamp_us: meta.timestamp_us(),
        }
    }
}

// ─── Tracker ────────────────────────────────────────────────────────────────

/// Holds the last accepted metadata record.
#[derive(Debug, Default, Clone)]
pub struct MetadataTracker {
    current: StreamMetadata,
}

impl MetadataTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renew the current record. Returns a change notification when anything
    /// other than the timestamp differs from the previous record.
    pub fn update(&mut self, meta: &StreamMetadata) -> Option<MetadataChange> {
        let changed = *meta != self.current;
        self.current = *meta;
        changed.then(|| MetadataChange::from(meta))
    }

    pub fn current(&self) -> &StreamMetadata {
        &self.current
    }
}
