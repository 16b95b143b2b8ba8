//! # Playout Buffer
//!
//! Owns the whole reassembly state: frame synchronizer, decoder slots, the
//! sample ring and the current stream metadata. The ingest side feeds it
//! blocks, the playout side drains it through [`PlayoutBuffer::read`].
//!
//! Both sides run on different threads in the receiver runtime, which wraps
//! the buffer in a `Mutex`. Nothing in here blocks.

use tracing::{debug, info, trace, warn};

use crate::codec::{
    CauchyCodec, CodingParams, DecodeError, ErasureDecoder, OriginalBlock, RecoveryBlock,
};
use crate::meta::{MetadataChange, MetadataTracker, StreamMetadata};
use crate::ring::{self, ReadView, SampleRing};
use crate::slots::{DecoderSlot, SlotPool, SlotSummary};
use crate::stats::{BlockStats, BufferCounters, TimingReport};
use crate::sync::{FrameSync, SyncAction};
use crate::wire::{
    self, block_offset, BlockHeader, SuperBlock, BLOCK_SIZE, BLOCK_ZERO_SAMPLE_BYTES,
    DEFAULT_NB_ORIGINAL_BLOCKS,
};

/// Reads needed before the balance correction is re-estimated.
const CORRECTION_MIN_READS: u32 = 40;

/// Nominal read interval until told otherwise.
const DEFAULT_READ_INTERVAL_MS: u32 = 50;

/// Slot count that keeps about four seconds of samples in the ring.
///
/// Always even and at least 4.
pub fn auto_slot_count(sample_rate: u32, bytes_per_sample: usize, frame_bytes: usize) -> usize {
    if frame_bytes == 0 {
        return 4;
    }
    let bytes = 4 * bytes_per_sample as u64 * sample_rate as u64;
    let frames = bytes.div_ceil(frame_bytes as u64) as usize;
    ((frames / 2) * 2 + 2).max(4)
}

/// Frame reassembly and sample store.
pub struct PlayoutBuffer {
    nb_original_blocks: usize,
    frame_bytes: usize,
    sync: FrameSync,
    slots: SlotPool,
    ring: SampleRing,
    meta: MetadataTracker,
    stats: BlockStats,
    counters: BufferCounters,
    decoder: Box<dyn ErasureDecoder>,
    /// Byte distance from the read cursor to the head slot.
    wr_delta: i64,
    nb_reads: u32,
    nb_writes: u32,
    read_interval_ms: u32,
    read_nb_bytes: usize,
    correction: f64,
    correction_limit: f64,
    buffer_seconds: f64,
    output_timestamp_us: i64,
}

impl PlayoutBuffer {
    /// Buffer for the default frame shape with the Cauchy decoder.
    pub fn new(slot_count: usize) -> Self {
        Self::with_decoder(
            slot_count,
            DEFAULT_NB_ORIGINAL_BLOCKS,
            Box::new(CauchyCodec::new()),
        )
    }

    /// `nb_original_blocks` counts block zero and must be in `2..=255`.
    pub fn with_decoder(
        slot_count: usize,
        nb_original_blocks: usize,
        decoder: Box<dyn ErasureDecoder>,
    ) -> Self {
        let slot_count = slot_count.max(2);
        let nb_original_blocks = nb_original_blocks.clamp(2, 255);
        let frame_bytes = wire::frame_bytes(nb_original_blocks);
        let ring = SampleRing::new(slot_count, frame_bytes);
        let wr_delta = ring.size() as i64 / 2;

        PlayoutBuffer {
            nb_original_blocks,
            frame_bytes,
            sync: FrameSync::new(slot_count),
            slots: SlotPool::new(slot_count),
            ring,
            meta: MetadataTracker::new(),
            stats: BlockStats::new(),
            counters: BufferCounters::default(),
            decoder,
            wr_delta,
            nb_reads: 0,
            nb_writes: 0,
            read_interval_ms: DEFAULT_READ_INTERVAL_MS,
            read_nb_bytes: 1,
            correction: 0.0,
            correction_limit: 0.0,
            buffer_seconds: 0.0,
            output_timestamp_us: 0,
        }
    }

    // ─── Ingest ─────────────────────────────────────────────────────────

    /// Feed one raw datagram. Malformed datagrams are dropped.
    pub fn write_datagram(&mut self, datagram: &[u8]) -> Option<MetadataChange> {
        let sb = SuperBlock::parse(datagram)?;
        self.write_block(sb.header, &sb.block)
    }

    /// Feed one protected block. Returns a notification when the block
    /// completed a frame whose metadata changed the stream parameters.
    pub fn write_block(&mut self, header: BlockHeader, block: &[u8]) -> Option<MetadataChange> {
        self.counters.blocks_received += 1;
        let frame = header.frame_index;

        match self.sync.observe(frame) {
            SyncAction::Initialize => {
                debug!(frame, "synchronized on first frame");
                self.restart(frame);
            }
            SyncAction::Resync { distance } => {
                info!(frame, distance, "frame index jump, resynchronizing");
                self.counters.resyncs += 1;
                self.restart(frame);
            }
            SyncAction::Advance { slots } => {
                let previous = frame.wrapping_sub(slots as u16);
                for n in 1..=slots as u16 {
                    let claimed = previous.wrapping_add(n);
                    let slot = self.sync.slot_of(claimed);
                    self.release_slot(slot);
                    self.slots.get_mut(slot).claim(claimed);
                }
                self.head_advanced(self.sync.slot_of(frame), slots as u32);
            }
            SyncAction::Ignore => {
                self.counters.stale += 1;
                trace!(frame, head = ?self.sync.head(), "stale block dropped");
                return None;
            }
            SyncAction::Route => {}
        }

        let slot = self.sync.slot_of(frame);
        let state = self.slots.get_mut(slot);
        if !state.accepts(frame) {
            self.counters.stale += 1;
            trace!(frame, slot, owner = ?state.owner(), "block of a frame that lost its slot");
            return None;
        }
        state.claim(frame);
        self.store_block(slot, header.block_index, block)
    }

    fn store_block(&mut self, slot: usize, block_index: u8, block: &[u8]) -> Option<MetadataChange> {
        let k = self.nb_original_blocks;
        let idx = block_index as usize;
        let nb_fec = self.meta.current().nb_fec_blocks as usize;

        if block.len() != BLOCK_SIZE || (nb_fec > 0 && idx >= k + nb_fec) {
            self.counters.rejected += 1;
            return None;
        }

        let state = self.slots.get_mut(slot);
        let already = state.block_count();
        if !state.mark_received(block_index) {
            self.counters.duplicates += 1;
            trace!(slot, block_index, "duplicate block ignored");
            return None;
        }
        if already >= k {
            return None;
        }

        if idx == 0 {
            state.store_block_zero(block);
            self.ring.frame_mut(slot)[..BLOCK_ZERO_SAMPLE_BYTES]
                .copy_from_slice(&block[StreamMetadata::ENCODED_LEN..]);
        } else if idx < k {
            let start = block_offset(idx);
            self.ring.frame_mut(slot)[start..start + BLOCK_SIZE].copy_from_slice(block);
            state.note_original();
        } else {
            state.store_recovery(block_index, block);
        }

        if state.block_count() == k && !state.is_decoded() {
            return self.decode_slot(slot);
        }
        None
    }

    /// Rebuild missing blocks of a slot that just reached `k` blocks.
    fn decode_slot(&mut self, slot: usize) -> Option<MetadataChange> {
        let k = self.nb_original_blocks;
        let recovery_count = self.recovery_count_for(slot);

        let Self {
            slots,
            ring,
            decoder,
            counters,
            ..
        } = self;
        let state = slots.get_mut(slot);
        state.set_decoded();

        if state.recovery_count() > 0 {
            let originals = state.original_count();
            let used = state.recovery_count();
            match decode_frame(&**decoder, k, recovery_count, state, ring.frame_mut(slot)) {
                Ok(recovered) => {
                    counters.fec_decodes += 1;
                    counters.blocks_recovered += recovered as u64;
                    debug!(slot, originals, recovery = used, recovered, "frame recovered");
                }
                Err(e) => {
                    counters.decode_failures += 1;
                    warn!(
                        slot,
                        originals,
                        recovery = used,
                        recovery_count,
                        error = %e,
                        "erasure decode failed"
                    );
                }
            }
        }

        self.check_metadata(slot)
    }

    /// Recovery blocks per frame for a slot: its own metadata, then the
    /// current stream metadata, then the highest recovery index seen.
    fn recovery_count_for(&self, slot: usize) -> usize {
        let k = self.nb_original_blocks;
        let state = self.slots.get(slot);
        if let Some(meta) = state.metadata().filter(|m| m.is_valid(k)) {
            if meta.nb_fec_blocks > 0 {
                return meta.nb_fec_blocks as usize;
            }
        }
        let current = self.meta.current().nb_fec_blocks as usize;
        if current > 0 {
            return current;
        }
        state
            .recovery_indices()
            .iter()
            .map(|&i| i as usize + 1 - k)
            .max()
            .unwrap_or(0)
    }

    fn check_metadata(&mut self, slot: usize) -> Option<MetadataChange> {
        let meta = self.slots.get(slot).metadata()?;
        if !meta.is_valid(self.nb_original_blocks) {
            trace!(slot, "slot metadata not usable");
            return None;
        }

        let change = self.meta.update(&meta)?;
        self.apply_metadata(&meta);
        info!(
            sample_rate = meta.sample_rate,
            center_frequency_hz = meta.center_frequency_hz(),
            sample_bytes = meta.sample_bytes & 0x0F,
            sample_bits = meta.sample_bits,
            nb_original_blocks = meta.nb_original_blocks,
            nb_fec_blocks = meta.nb_fec_blocks,
            "stream metadata changed"
        );
        Some(change)
    }

    fn apply_metadata(&mut self, meta: &StreamMetadata) {
        let rate = meta.sample_rate as usize;
        let bps = meta.bytes_per_sample();
        if rate == 0 || bps == 0 {
            return;
        }
        self.buffer_seconds = self.ring.size() as f64 / (rate * bps) as f64;
        self.correction_limit = (rate / 400) as f64;
        self.read_nb_bytes = (rate * bps * self.read_interval_ms as usize / 1000).max(1);
    }

    // ─── Frame Lifecycle ────────────────────────────────────────────────

    /// Forget every frame and re-center the read cursor on `frame`.
    fn restart(&mut self, frame: u16) {
        self.slots.reinitialize_all();
        self.slots.get_mut(self.sync.slot_of(frame)).claim(frame);
        self.ring.clear();
        self.ring.reset_read_index(self.sync.slot_of(frame));
        self.wr_delta = self.ring.size() as i64 / 2;
        self.nb_reads = 0;
        self.nb_writes = 0;
    }

    /// Account for and void a slot about to hold a newer frame.
    fn release_slot(&mut self, slot: usize) {
        let summary: SlotSummary = self.slots.reinitialize(slot);
        self.ring.clear_frame(slot);
        if summary.block_count == 0 {
            return;
        }
        if !summary.decoded {
            debug!(
                slot,
                blocks = summary.block_count,
                recovery = summary.recovery_count,
                "incomplete frame"
            );
        }
        self.stats.record(&summary);
    }

    fn head_advanced(&mut self, head_slot: usize, frames: u32) {
        self.wr_delta = self.ring.write_read_delta(head_slot);
        self.update_output_timestamp();
        self.estimate_correction(head_slot);
        self.nb_writes += frames;
    }

    fn update_output_timestamp(&mut self) {
        let meta = self.meta.current();
        let rate = meta.sample_rate as i64;
        let bps = meta.bytes_per_sample() as i64;
        if rate == 0 || bps == 0 {
            return;
        }
        let delay_bytes = if self.wr_delta > 0 {
            self.wr_delta
        } else {
            self.ring.size() as i64 + self.wr_delta
        };
        self.output_timestamp_us = meta.timestamp_us() - delay_bytes * 1_000_000 / (rate * bps);
    }

    /// Re-estimate the samples per read needed to bring the read cursor back
    /// to the slot opposite the write slot.
    fn estimate_correction(&mut self, write_slot: usize) {
        if self.nb_reads < CORRECTION_MIN_READS {
            return;
        }
        let bps = self.meta.current().bytes_per_sample() as i64;
        if bps == 0 {
            return;
        }

        let n = self.ring.slot_count();
        let fb = self.frame_bytes as i64;
        let size = self.ring.size() as i64;
        let pivot = ((write_slot + n / 2) % n) as i64 * fb;
        let read = self.ring.read_index() as i64;
        let normalized = if read < pivot { read + size } else { read } - pivot;
        let rw_delta =
            self.nb_reads as i64 * self.read_nb_bytes as i64 - self.nb_writes as i64 * fb;

        let d_bytes = if normalized < (n / 2) as i64 * fb {
            -normalized - rw_delta
        } else {
            size - normalized - rw_delta
        };

        let estimate = d_bytes as f64 / (bps * self.nb_reads as i64) as f64;
        self.correction = (0.25 * self.correction + 0.75 * estimate)
            .clamp(-self.correction_limit, self.correction_limit);
        trace!(
            normalized,
            rw_delta,
            d_bytes,
            correction = self.correction,
            "balance correction"
        );

        self.nb_reads = 0;
        self.nb_writes = 0;
    }

    // ─── Playout ────────────────────────────────────────────────────────

    /// Read `len` bytes of samples at the read cursor.
    pub fn read(&mut self, len: usize) -> ReadView<'_> {
        self.nb_reads += 1;
        self.counters.reads += 1;
        self.ring.read(len)
    }

    /// Interval between reads the balance correction assumes.
    pub fn set_read_interval(&mut self, interval_ms: u32) {
        self.read_interval_ms = interval_ms.max(1);
        let meta = *self.meta.current();
        self.apply_metadata(&meta);
    }

    /// Change the number of slots. Everything is dropped and the buffer
    /// waits for the next block to synchronize again.
    pub fn resize(&mut self, slot_count: usize) {
        let slot_count = slot_count.max(2);
        info!(
            from = self.sync.slot_count(),
            to = slot_count,
            "resizing playout buffer"
        );
        self.sync = FrameSync::new(slot_count);
        self.slots = SlotPool::new(slot_count);
        self.ring = SampleRing::new(slot_count, self.frame_bytes);
        self.wr_delta = self.ring.size() as i64 / 2;
        self.nb_reads = 0;
        self.nb_writes = 0;
        let meta = *self.meta.current();
        self.apply_metadata(&meta);
    }

    /// Statistics for the window since the previous report. Starts a new
    /// window.
    pub fn timing_report(&mut self) -> TimingReport {
        let meta = *self.meta.current();
        let nb_fec_blocks = meta.nb_fec_blocks as usize;
        let report = TimingReport {
            buffer_seconds: self.buffer_seconds,
            gauge: self.gauge(),
            output_timestamp_us: self.output_timestamp_us,
            correction: self.correction(),
            cur_blocks: self.stats.cur_blocks(),
            avg_blocks: self.stats.avg_blocks(),
            cur_originals: self.stats.cur_originals(),
            avg_originals: self.stats.avg_originals(),
            cur_recovery: self.stats.cur_recovery(),
            avg_recovery: self.stats.avg_recovery(),
            min_blocks: self.stats.min_blocks(),
            min_originals: self.stats.min_originals(),
            max_recovery: self.stats.max_recovery(),
            all_decoded: self.stats.all_decoded(),
            decoding_status: self
                .stats
                .decoding_status(self.nb_original_blocks, nb_fec_blocks),
            nb_original_blocks: self.nb_original_blocks,
            nb_fec_blocks,
            sample_rate: meta.sample_rate,
            sample_bytes: meta.sample_bytes & 0x0F,
            sample_bits: meta.sample_bits,
            counters: self.counters.clone(),
        };
        self.stats.reset_window();
        report
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    /// Read/write balance in percent of the ring, `[-100, 100]`.
    pub fn gauge(&self) -> i32 {
        ring::gauge(self.wr_delta, self.ring.size())
    }

    pub fn wr_delta(&self) -> i64 {
        self.wr_delta
    }

    /// Balance correction in samples per read.
    pub fn correction(&self) -> i32 {
        self.correction.round() as i32
    }

    pub fn buffer_seconds(&self) -> f64 {
        self.buffer_seconds
    }

    pub fn output_timestamp_us(&self) -> i64 {
        self.output_timestamp_us
    }

    pub fn current_meta(&self) -> &StreamMetadata {
        self.meta.current()
    }

    pub fn stats(&self) -> &BlockStats {
        &self.stats
    }

    pub fn counters(&self) -> &BufferCounters {
        &self.counters
    }

    pub fn slot_count(&self) -> usize {
        self.sync.slot_count()
    }

    pub fn slot(&self, slot: usize) -> &DecoderSlot {
        self.slots.get(slot)
    }

    /// Decoded samples of one slot, block zero's first.
    pub fn frame(&self, slot: usize) -> &[u8] {
        self.ring.frame(slot)
    }

    pub fn slot_of(&self, frame_index: u16) -> usize {
        self.sync.slot_of(frame_index)
    }

    pub fn head(&self) -> Option<u16> {
        self.sync.head()
    }

    pub fn read_index(&self) -> usize {
        self.ring.read_index()
    }

    /// Ring size in bytes.
    pub fn size(&self) -> usize {
        self.ring.size()
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    pub fn nb_original_blocks(&self) -> usize {
        self.nb_original_blocks
    }

    pub fn decoder_name(&self) -> &'static str {
        self.decoder.name()
    }
}

/// Run the erasure decoder over one slot and write the rebuilt blocks back.
fn decode_frame(
    decoder: &dyn ErasureDecoder,
    nb_original_blocks: usize,
    recovery_count: usize,
    state: &mut DecoderSlot,
    frame: &mut [u8],
) -> Result<usize, DecodeError> {
    let params = CodingParams::new(nb_original_blocks, recovery_count, BLOCK_SIZE)?;
    let received: Vec<u8> = (0..nb_original_blocks as u8)
        .filter(|&i| state.has_received(i))
        .collect();

    let (recovered, rebuilt_zero) = {
        let (block_zero, stored) = state.decode_parts();
        let samples: &[u8] = frame;
        let originals: Vec<OriginalBlock<'_>> = received
            .iter()
            .map(|&index| OriginalBlock {
                index,
                data: if index == 0 {
                    block_zero
                } else {
                    let start = block_offset(index as usize);
                    &samples[start..start + BLOCK_SIZE]
                },
            })
            .collect();
        let mut recovery: Vec<RecoveryBlock<'_>> = stored
            .map(|(index, data)| RecoveryBlock { index, data })
            .collect();

        let recovered = decoder.decode(&params, &originals, &mut recovery)?;
        drop(originals);

        let mut rebuilt_zero = None;
        for block in &recovery[..recovered] {
            if block.index == 0 {
                frame[..BLOCK_ZERO_SAMPLE_BYTES]
                    .copy_from_slice(&block.data[StreamMetadata::ENCODED_LEN..]);
                rebuilt_zero = Some(block.data.to_vec());
            } else {
                let start = block_offset(block.index as usize);
                frame[start..start + BLOCK_SIZE].copy_from_slice(block.data);
            }
        }
        (recovered, rebuilt_zero)
    };

    if let Some(block) = rebuilt_zero {
        state.restore_block_zero(&block);
        debug!("block zero recovered");
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ErasureEncoder;
    use crate::sender::FrameEncoder;
    use crate::wire::UDP_SIZE;

    fn test_meta(nb_fec: u8) -> StreamMetadata {
        StreamMetadata {
            center_frequency_khz: 435_000,
            sample_rate: 48_000,
            sample_bytes: 2,
            sample_bits: 16,
            nb_original_blocks: DEFAULT_NB_ORIGINAL_BLOCKS as u8,
            nb_fec_blocks: nb_fec,
            tv_sec: 1_700_000_000,
            tv_usec: 0,
        }
    }

    fn frame_samples(seed: u8, frame_bytes: usize) -> Vec<u8> {
        (0..frame_bytes)
            .map(|i| (i as u8).wrapping_mul(13).wrapping_add(seed))
            .collect()
    }

    fn encode(frame_index: u16, meta: &StreamMetadata, seed: u8) -> (Vec<u8>, Vec<bytes::Bytes>) {
        let frame_bytes = wire::frame_bytes(DEFAULT_NB_ORIGINAL_BLOCKS);
        let samples = frame_samples(seed, frame_bytes);
        let encoder = FrameEncoder::new(Box::new(CauchyCodec::new()));
        let datagrams = encoder.encode_frame(frame_index, meta, &samples).unwrap();
        (samples, datagrams)
    }

    /// Decoder that never rebuilds anything.
    struct FailingDecoder;

    impl ErasureDecoder for FailingDecoder {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn decode(
            &self,
            _params: &CodingParams,
            _originals: &[OriginalBlock<'_>],
            _recovery: &mut [RecoveryBlock<'_>],
        ) -> Result<usize, DecodeError> {
            Err(DecodeError::Singular)
        }
    }

    #[test]
    fn complete_frame_without_fec() {
        let mut buf = PlayoutBuffer::new(4);
        let meta = test_meta(4);
        let (samples, datagrams) = encode(10, &meta, 1);

        let mut change = None;
        for d in &datagrams[..DEFAULT_NB_ORIGINAL_BLOCKS] {
            change = change.or(buf.write_datagram(d));
        }
        let slot = buf.slot_of(10);
        assert!(buf.slot(slot).is_decoded());
        assert_eq!(buf.frame(slot), samples.as_slice());
        assert_eq!(change.map(|c| c.sample_rate), Some(48_000));
        assert_eq!(buf.counters().fec_decodes, 0);
    }

    #[test]
    fn block_zero_samples_reach_ring() {
        let mut buf = PlayoutBuffer::new(4);
        let (samples, datagrams) = encode(2, &test_meta(4), 9);
        buf.write_datagram(&datagrams[0]);

        let frame = buf.frame(buf.slot_of(2));
        assert_eq!(
            &frame[..BLOCK_ZERO_SAMPLE_BYTES],
            &samples[..BLOCK_ZERO_SAMPLE_BYTES]
        );
        assert!(frame[BLOCK_ZERO_SAMPLE_BYTES..].iter().all(|&b| b == 0));
    }

    #[test]
    fn late_block_across_wrap_keeps_to_its_frame() {
        // 14 slots: frames 65534 and 0 share slot 0.
        let mut buf = PlayoutBuffer::new(14);
        let meta = test_meta(4);
        let (_, before) = encode(65534, &meta, 1);
        let (_, last) = encode(65535, &meta, 2);
        let (samples, first) = encode(0, &meta, 3);
        assert_eq!(buf.slot_of(65534), buf.slot_of(0));

        for (i, d) in before.iter().enumerate() {
            if i != 5 {
                buf.write_datagram(d);
            }
        }
        for d in &last {
            buf.write_datagram(d);
        }
        buf.write_datagram(&first[0]);
        let stale = buf.counters().stale;
        buf.write_datagram(&before[5]);
        assert_eq!(buf.counters().stale, stale + 1);
        for d in &first[1..] {
            buf.write_datagram(d);
        }

        let slot = buf.slot_of(0);
        assert_eq!(buf.slot(slot).owner(), Some(0));
        assert!(buf.slot(slot).is_decoded());
        assert_eq!(buf.counters().duplicates, 0);
        assert_eq!(buf.frame(slot), samples.as_slice());
    }

    #[test]
    fn wrong_size_datagram_dropped() {
        let mut buf = PlayoutBuffer::new(4);
        assert!(buf.write_datagram(&[0u8; UDP_SIZE - 4]).is_none());
        assert_eq!(buf.head(), None);
        assert_eq!(buf.counters().blocks_received, 0);
    }

    #[test]
    fn duplicates_ignored_and_counted() {
        let mut buf = PlayoutBuffer::new(4);
        let (_, datagrams) = encode(3, &test_meta(4), 2);
        buf.write_datagram(&datagrams[5]);
        buf.write_datagram(&datagrams[5]);
        buf.write_datagram(&datagrams[5]);
        let slot = buf.slot_of(3);
        assert_eq!(buf.slot(slot).block_count(), 1);
        assert_eq!(buf.counters().duplicates, 2);
    }

    #[test]
    fn decode_failure_is_not_fatal() {
        let mut buf = PlayoutBuffer::with_decoder(
            4,
            DEFAULT_NB_ORIGINAL_BLOCKS,
            Box::new(FailingDecoder),
        );
        let (_, datagrams) = encode(0, &test_meta(4), 3);
        for d in datagrams.iter().skip(2) {
            buf.write_datagram(d);
        }
        assert_eq!(buf.counters().decode_failures, 1);
        assert!(buf.slot(0).is_decoded());
    }

    #[test]
    fn recovered_block_zero_yields_metadata() {
        let mut buf = PlayoutBuffer::new(4);
        let meta = test_meta(4);
        let (samples, datagrams) = encode(7, &meta, 4);

        let mut change = None;
        for d in datagrams.iter().skip(1) {
            change = change.or(buf.write_datagram(d));
        }
        let slot = buf.slot_of(7);
        assert!(buf.slot(slot).meta_retrieved());
        assert_eq!(buf.slot(slot).metadata(), Some(meta));
        assert_eq!(buf.frame(slot), samples.as_slice());
        assert!(change.is_some());
        assert_eq!(*buf.current_meta(), meta);
    }

    #[test]
    fn stale_frames_dropped() {
        let mut buf = PlayoutBuffer::new(4);
        let meta = test_meta(4);
        let (_, newer) = encode(100, &meta, 5);
        let (_, older) = encode(90, &meta, 6);
        buf.write_datagram(&newer[1]);
        buf.write_datagram(&older[1]);
        assert_eq!(buf.counters().stale, 1);
        assert_eq!(buf.head(), Some(100));
    }

    #[test]
    fn advance_records_stats_and_voids_slot() {
        let mut buf = PlayoutBuffer::new(4);
        let meta = test_meta(4);
        for frame in 0..5u16 {
            let (_, datagrams) = encode(frame, &meta, frame as u8);
            for d in &datagrams {
                buf.write_datagram(d);
            }
        }
        // frame 0 left the pool when frame 4 took its slot
        assert_eq!(buf.stats().frames(), 1);
        assert_eq!(buf.stats().cur_blocks(), DEFAULT_NB_ORIGINAL_BLOCKS + 4);
        assert_eq!(buf.stats().cur_recovery(), 0);

        let report = buf.timing_report();
        assert_eq!(report.decoding_status, crate::stats::DecodingStatus::Complete);
        assert_eq!(report.sample_rate, 48_000);
    }

    #[test]
    fn out_of_range_index_rejected_once_meta_known() {
        let mut buf = PlayoutBuffer::new(4);
        let meta = test_meta(2);
        let (_, datagrams) = encode(0, &meta, 1);
        for d in &datagrams {
            buf.write_datagram(d);
        }
        let bogus = SuperBlock::encode(BlockHeader::new(0, 200), &[0u8; BLOCK_SIZE]);
        buf.write_datagram(&bogus);
        assert_eq!(buf.counters().rejected, 1);
    }

    #[test]
    fn resize_desynchronizes() {
        let mut buf = PlayoutBuffer::new(4);
        let (_, datagrams) = encode(0, &test_meta(4), 1);
        buf.write_datagram(&datagrams[0]);
        assert!(buf.head().is_some());
        buf.resize(8);
        assert_eq!(buf.head(), None);
        assert_eq!(buf.slot_count(), 8);
        assert_eq!(buf.size(), 8 * buf.frame_bytes());
        assert_eq!(buf.wr_delta(), buf.size() as i64 / 2);
    }

    #[test]
    fn auto_slot_count_is_even() {
        let fb = wire::frame_bytes(DEFAULT_NB_ORIGINAL_BLOCKS);
        assert_eq!(auto_slot_count(0, 4, fb), 4);
        assert_eq!(auto_slot_count(48_000, 4, fb), 14);
        // 4 s at 2.4 MS/s: 38.4 MB over 65004-byte frames
        let n = auto_slot_count(2_400_000, 4, fb);
        assert_eq!(n % 2, 0);
        assert_eq!(n, 592);
    }

    #[test]
    fn codec_roundtrip_through_trait_objects() {
        let encoder: Box<dyn ErasureEncoder> = Box::new(CauchyCodec::new());
        let params = CodingParams::new(2, 1, 4).unwrap();
        let out = encoder.encode(&params, &[&[1, 2, 3, 4], &[4, 3, 2, 1]]).unwrap();
        assert_eq!(out[0], vec![5, 1, 1, 5]);
    }
}
