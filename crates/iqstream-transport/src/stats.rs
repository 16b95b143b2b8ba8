//! # Stream Statistics
//!
//! Block counts captured as frames leave the slot pool, buffer counters, and
//! the periodic timing report. All report types serialize to JSON.

use std::collections::VecDeque;

use serde::Serialize;

use crate::slots::SlotSummary;

/// Frames averaged by the block count moving averages.
pub const AVERAGE_WINDOW: usize = 10;

// ─── Moving Average ─────────────────────────────────────────────────────────

/// Plain moving average over the last `window` values.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    window: usize,
    values: VecDeque<u32>,
    sum: u64,
}

impl MovingAverage {
    pub fn new(window: usize) -> Self {
        MovingAverage {
            window: window.max(1),
            values: VecDeque::with_capacity(window.max(1)),
            sum: 0,
        }
    }

    pub fn push(&mut self, value: u32) {
        if self.values.len() == self.window {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old as u64;
            }
        }
        self.values.push_back(value);
        self.sum += value as u64;
    }

    pub fn average(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.sum as f64 / self.values.len() as f64
        }
    }
}

// ─── Block Stats ────────────────────────────────────────────────────────────

/// How well the frames since the last report were received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodingStatus {
    /// At least one frame had fewer than `nb_original_blocks` blocks.
    Incomplete = 0,
    /// Every frame was complete, some only thanks to recovery blocks.
    Recovered = 1,
    /// Every frame had all of its blocks.
    Complete = 2,
}

/// Per-frame block counts, updated when a slot is voided.
#[derive(Debug, Clone)]
pub struct BlockStats {
    cur_blocks: usize,
    cur_originals: usize,
    cur_recovery: usize,
    avg_blocks: MovingAverage,
    avg_originals: MovingAverage,
    avg_recovery: MovingAverage,
    min_blocks: usize,
    min_originals: usize,
    max_recovery: usize,
    all_decoded: bool,
    frames: u64,
}

impl BlockStats {
    pub fn new() -> Self {
        BlockStats {
            cur_blocks: 0,
            cur_originals: 0,
            cur_recovery: 0,
            avg_blocks: MovingAverage::new(AVERAGE_WINDOW),
            avg_originals: MovingAverage::new(AVERAGE_WINDOW),
            avg_recovery: MovingAverage::new(AVERAGE_WINDOW),
            min_blocks: usize::MAX,
            min_originals: usize::MAX,
            max_recovery: 0,
            all_decoded: true,
            frames: 0,
        }
    }

    /// Account for a frame that just left the pool.
    pub fn record(&mut self, frame: &SlotSummary) {
        self.cur_blocks = frame.block_count;
        self.cur_originals = frame.original_count;
        self.cur_recovery = frame.recovery_count;
        self.avg_blocks.push(frame.block_count as u32);
        self.avg_originals.push(frame.original_count as u32);
        self.avg_recovery.push(frame.recovery_count as u32);
        self.min_blocks = self.min_blocks.min(frame.block_count);
        self.min_originals = self.min_originals.min(frame.original_count);
        self.max_recovery = self.max_recovery.max(frame.recovery_count);
        self.all_decoded &= frame.decoded;
        self.frames += 1;
    }

    /// Start a new reporting window. Moving averages carry over.
    pub fn reset_window(&mut self) {
        self.min_blocks = usize::MAX;
        self.min_originals = usize::MAX;
        self.max_recovery = 0;
        self.all_decoded = true;
    }

    pub fn decoding_status(&self, nb_original_blocks: usize, nb_fec_blocks: usize) -> DecodingStatus {
        let min = self.min_blocks();
        if min < nb_original_blocks {
            DecodingStatus::Incomplete
        } else if min < nb_original_blocks + nb_fec_blocks {
            DecodingStatus::Recovered
        } else {
            DecodingStatus::Complete
        }
    }

    pub fn cur_blocks(&self) -> usize {
        self.cur_blocks
    }

    pub fn cur_originals(&self) -> usize {
        self.cur_originals
    }

    pub fn cur_recovery(&self) -> usize {
        self.cur_recovery
    }

    pub fn avg_blocks(&self) -> f64 {
        self.avg_blocks.average()
    }

    pub fn avg_originals(&self) -> f64 {
        self.avg_originals.average()
    }

    pub fn avg_recovery(&self) -> f64 {
        self.avg_recovery.average()
    }

    /// Minimum blocks per frame in this window, 0 before any frame.
    pub fn min_blocks(&self) -> usize {
        if self.min_blocks == usize::MAX {
            0
        } else {
            self.min_blocks
        }
    }

    pub fn min_originals(&self) -> usize {
        if self.min_originals == usize::MAX {
            0
        } else {
            self.min_originals
        }
    }

    pub fn max_recovery(&self) -> usize {
        self.max_recovery
    }

    pub fn all_decoded(&self) -> bool {
        self.all_decoded
    }

    /// Frames accounted for since construction.
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Default for BlockStats {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Buffer Counters ────────────────────────────────────────────────────────

/// Monotonic counters kept by the playout buffer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BufferCounters {
    /// Blocks handed to the buffer.
    pub blocks_received: u64,
    /// Blocks ignored because their index was already received.
    pub duplicates: u64,
    /// Blocks with an index outside the frame.
    pub rejected: u64,
    /// Blocks dropped because their frame was already overwritten.
    pub stale: u64,
    /// Loss of synchronization events.
    pub resyncs: u64,
    /// Frames that needed the erasure decoder.
    pub fec_decodes: u64,
    /// Original blocks rebuilt by the erasure decoder.
    pub blocks_recovered: u64,
    /// Frames the erasure decoder could not rebuild.
    pub decode_failures: u64,
    /// Reads served by the playout side.
    pub reads: u64,
}

// ─── Timing Report ──────────────────────────────────────────────────────────

/// Snapshot emitted by the playout controller about once per second.
#[derive(Debug, Clone, Serialize)]
pub struct TimingReport {
    /// Ring size in seconds at the current sample rate.
    pub buffer_seconds: f64,
    /// Read/write balance, percent of the ring.
    pub gauge: i32,
    /// Estimated sender time of the samples being played, µs since epoch.
    pub output_timestamp_us: i64,
    /// Current balance correction, samples per read.
    pub correction: i32,
    pub cur_blocks: usize,
    pub avg_blocks: f64,
    pub cur_originals: usize,
    pub avg_originals: f64,
    pub cur_recovery: usize,
    pub avg_recovery: f64,
    pub min_blocks: usize,
    pub min_originals: usize,
    pub max_recovery: usize,
    pub all_decoded: bool,
    pub decoding_status: DecodingStatus,
    pub nb_original_blocks: usize,
    pub nb_fec_blocks: usize,
    pub sample_rate: u32,
    pub sample_bytes: u8,
    pub sample_bits: u8,
    pub counters: BufferCounters,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(blocks: usize, originals: usize, recovery: usize, decoded: bool) -> SlotSummary {
        SlotSummary {
            block_count: blocks,
            original_count: originals,
            recovery_count: recovery,
            decoded,
        }
    }

    #[test]
    fn moving_average_window() {
        let mut avg = MovingAverage::new(3);
        assert_eq!(avg.average(), 0.0);
        for v in [3, 6, 9, 12] {
            avg.push(v);
        }
        assert!((avg.average() - 9.0).abs() < 1e-9);
    }

    #[test]
    fn block_stats_min_max() {
        let mut stats = BlockStats::new();
        stats.record(&frame(132, 128, 4, true));
        stats.record(&frame(129, 126, 3, true));
        stats.record(&frame(131, 128, 3, true));

        assert_eq!(stats.cur_blocks(), 131);
        assert_eq!(stats.min_blocks(), 129);
        assert_eq!(stats.min_originals(), 126);
        assert_eq!(stats.max_recovery(), 4);
        assert!((stats.avg_blocks() - 392.0 / 3.0).abs() < 1e-9);
        assert!(stats.all_decoded());

        stats.reset_window();
        assert_eq!(stats.min_blocks(), 0);
        assert_eq!(stats.max_recovery(), 0);
        assert!((stats.avg_recovery() - 10.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn decoding_status_levels() {
        let mut stats = BlockStats::new();
        stats.record(&frame(132, 128, 4, true));
        assert_eq!(stats.decoding_status(128, 4), DecodingStatus::Complete);

        stats.record(&frame(130, 126, 4, true));
        assert_eq!(stats.decoding_status(128, 4), DecodingStatus::Recovered);

        stats.record(&frame(100, 98, 2, false));
        assert_eq!(stats.decoding_status(128, 4), DecodingStatus::Incomplete);
        assert!(!stats.all_decoded());
    }

    #[test]
    fn report_serialization() {
        let report = TimingReport {
            buffer_seconds: 0.34,
            gauge: -12,
            output_timestamp_us: 1_700_000_000_000_000,
            correction: 3,
            cur_blocks: 132,
            avg_blocks: 131.5,
            cur_originals: 128,
            avg_originals: 127.9,
            cur_recovery: 4,
            avg_recovery: 3.6,
            min_blocks: 130,
            min_originals: 126,
            max_recovery: 4,
            all_decoded: true,
            decoding_status: DecodingStatus::Recovered,
            nb_original_blocks: 128,
            nb_fec_blocks: 4,
            sample_rate: 48_000,
            sample_bytes: 2,
            sample_bits: 16,
            counters: BufferCounters::default(),
        };

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"gauge\":-12"));
        assert!(json.contains("\"decoding_status\":\"recovered\""));
        assert!(json.contains("\"duplicates\":0"));
    }
}
