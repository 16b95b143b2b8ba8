//! # End-to-end reassembly scenarios
//!
//! Frame encoder → datagrams → playout buffer → playout controller.
//! The "network" is a Vec of datagrams that tests drop, shuffle or
//! duplicate before delivery.

use bytes::Bytes;
use quanta::Instant;
use std::time::Duration;

use iqstream_transport::buffer::PlayoutBuffer;
use iqstream_transport::codec::{CauchyCodec, RsSimdCodec};
use iqstream_transport::meta::StreamMetadata;
use iqstream_transport::playout::{PlayoutConfig, PlayoutController};
use iqstream_transport::sender::FrameEncoder;
use iqstream_transport::wire::{SuperBlock, DEFAULT_NB_ORIGINAL_BLOCKS};

// ─── Helpers ────────────────────────────────────────────────────────────────

const NB_FEC: u8 = 4;

fn stream_meta(sample_rate: u32) -> StreamMetadata {
    StreamMetadata {
        center_frequency_khz: 144_800,
        sample_rate,
        sample_bytes: 2,
        sample_bits: 16,
        nb_original_blocks: DEFAULT_NB_ORIGINAL_BLOCKS as u8,
        nb_fec_blocks: NB_FEC,
        tv_sec: 1_700_000_000,
        tv_usec: 500_000,
    }
}

/// Deterministic xorshift so failures reproduce.
struct Shuffler(u64);

impl Shuffler {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = (self.next() % (i as u64 + 1)) as usize;
            items.swap(i, j);
        }
    }
}

fn source_frame(encoder: &FrameEncoder, seed: u32) -> Vec<u8> {
    (0..encoder.frame_bytes() as u32)
        .map(|i| (i.wrapping_mul(2_654_435_761).wrapping_add(seed) >> 13) as u8)
        .collect()
}

fn encode(encoder: &FrameEncoder, frame_index: u16, seed: u32) -> (Vec<u8>, Vec<Bytes>) {
    let samples = source_frame(encoder, seed);
    let datagrams = encoder
        .encode_frame(frame_index, &stream_meta(48_000), &samples)
        .unwrap();
    (samples, datagrams)
}

/// Route buffer logs to the test harness; `RUST_LOG=debug` shows decode
/// outcomes per frame.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn cauchy_encoder() -> FrameEncoder {
    FrameEncoder::new(Box::new(CauchyCodec::new()))
}

// ─── Scenario A: all blocks, random order ───────────────────────────────────

#[test]
fn shuffled_complete_frame_decodes() {
    let encoder = cauchy_encoder();
    let (samples, mut datagrams) = encode(&encoder, 321, 1);
    assert_eq!(datagrams.len(), DEFAULT_NB_ORIGINAL_BLOCKS + NB_FEC as usize);
    Shuffler(0x9E37_79B9_7F4A_7C15).shuffle(&mut datagrams);

    let mut buffer = PlayoutBuffer::new(16);
    for d in &datagrams {
        buffer.write_datagram(d);
    }

    let slot = buffer.slot_of(321);
    assert!(buffer.slot(slot).is_decoded());
    assert_eq!(buffer.slot(slot).block_count(), datagrams.len());
    assert_eq!(buffer.frame(slot), samples.as_slice());
    assert_eq!(buffer.counters().decode_failures, 0);
}

// ─── Scenario B: four originals lost ────────────────────────────────────────

#[test]
fn four_lost_originals_recovered() {
    let encoder = cauchy_encoder();
    let (samples, datagrams) = encode(&encoder, 9, 2);
    let lost = [3usize, 50, 51, 127];
    let mut delivered: Vec<Bytes> = datagrams
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !lost.contains(i))
        .map(|(_, d)| d)
        .collect();
    Shuffler(42).shuffle(&mut delivered);

    let mut buffer = PlayoutBuffer::new(16);
    for d in &delivered {
        buffer.write_datagram(d);
    }

    let slot = buffer.slot_of(9);
    assert!(buffer.slot(slot).is_decoded());
    assert_eq!(buffer.frame(slot), samples.as_slice());
    assert_eq!(buffer.counters().fec_decodes, 1);
    assert_eq!(buffer.counters().blocks_recovered, 4);
}

#[test]
fn lost_block_zero_and_data_recovered() {
    let encoder = cauchy_encoder();
    let (samples, datagrams) = encode(&encoder, 65535, 3);

    let mut buffer = PlayoutBuffer::new(16);
    let mut change = None;
    for (i, d) in datagrams.iter().enumerate() {
        if i == 0 || i == 77 {
            continue;
        }
        change = change.or(buffer.write_datagram(d));
    }

    let slot = buffer.slot_of(65535);
    assert_eq!(buffer.frame(slot), samples.as_slice());
    let change = change.expect("metadata recovered from block zero");
    assert_eq!(change.sample_rate, 48_000);
    assert_eq!(change.center_frequency_hz, 144_800_000);
}

#[test]
fn rs_simd_backend_end_to_end() {
    let encoder = FrameEncoder::new(Box::new(RsSimdCodec::new()));
    let (samples, datagrams) = encode(&encoder, 7, 4);

    let mut buffer = PlayoutBuffer::with_decoder(
        16,
        DEFAULT_NB_ORIGINAL_BLOCKS,
        Box::new(RsSimdCodec::new()),
    );
    assert_eq!(buffer.decoder_name(), "rs-simd");

    // Block zero first so the recovery count is known before decoding.
    for (i, d) in datagrams.iter().enumerate() {
        if [10, 20, 30, 40].contains(&i) {
            continue;
        }
        buffer.write_datagram(d);
    }
    assert_eq!(buffer.frame(buffer.slot_of(7)), samples.as_slice());
}

// ─── Loss beyond FEC capacity ───────────────────────────────────────────────

#[test]
fn loss_beyond_capacity_is_contained() {
    init_tracing();
    let encoder = cauchy_encoder();
    let mut buffer = PlayoutBuffer::new(16);

    let (_, first) = encode(&encoder, 0, 5);
    for (i, d) in first.iter().enumerate() {
        if (1..=5).contains(&i) {
            continue;
        }
        buffer.write_datagram(d);
    }
    let slot0 = buffer.slot_of(0);
    assert!(!buffer.slot(slot0).is_decoded());
    assert_eq!(buffer.slot(slot0).block_count(), DEFAULT_NB_ORIGINAL_BLOCKS - 1);

    // The stream carries on with the next frame.
    let (samples, second) = encode(&encoder, 1, 6);
    for d in &second {
        buffer.write_datagram(d);
    }
    assert_eq!(buffer.frame(buffer.slot_of(1)), samples.as_slice());
}

#[test]
fn duplicated_delivery_is_idempotent() {
    let encoder = cauchy_encoder();
    let (samples, datagrams) = encode(&encoder, 500, 7);

    let mut buffer = PlayoutBuffer::new(16);
    for d in datagrams.iter().chain(datagrams.iter()) {
        buffer.write_datagram(d);
    }

    let slot = buffer.slot_of(500);
    assert_eq!(buffer.frame(slot), samples.as_slice());
    assert_eq!(buffer.counters().duplicates, datagrams.len() as u64);
    assert_eq!(buffer.slot(slot).block_count(), datagrams.len());
}

// ─── Scenario C: frame index jump ───────────────────────────────────────────

#[test]
fn large_jump_resynchronizes_everything() {
    init_tracing();
    let encoder = cauchy_encoder();
    let slot_count = 12;
    let mut buffer = PlayoutBuffer::new(slot_count);

    for frame in 98..=100u16 {
        let (_, datagrams) = encode(&encoder, frame, frame as u32);
        for d in &datagrams {
            buffer.write_datagram(d);
        }
    }
    let old_slot = buffer.slot_of(100);
    assert!(buffer.slot(old_slot).is_decoded());

    let jump = 100u16.wrapping_add(20_000);
    let (_, datagrams) = encode(&encoder, jump, 99);
    buffer.write_datagram(&datagrams[5]);

    assert_eq!(buffer.counters().resyncs, 1);
    assert_eq!(buffer.head(), Some(jump));
    let new_slot = buffer.slot_of(jump);
    assert_ne!(new_slot, old_slot);
    for slot in 0..slot_count {
        let expected = if slot == new_slot { 1 } else { 0 };
        assert_eq!(buffer.slot(slot).block_count(), expected, "slot {}", slot);
    }
    assert!(buffer.frame(old_slot).iter().all(|&b| b == 0));

    let frame_bytes = buffer.frame_bytes();
    assert_eq!(
        buffer.read_index(),
        ((new_slot + slot_count / 2) % slot_count) * frame_bytes
    );
    assert_eq!(buffer.wr_delta(), buffer.size() as i64 / 2);
    assert_eq!(buffer.gauge(), 50);
}

#[test]
fn wraparound_advance_is_not_a_jump() {
    let encoder = cauchy_encoder();
    let mut buffer = PlayoutBuffer::new(16);
    for frame in [65534u16, 65535, 0, 1] {
        let (samples, datagrams) = encode(&encoder, frame, frame as u32);
        for d in &datagrams {
            buffer.write_datagram(d);
        }
        assert_eq!(buffer.frame(buffer.slot_of(frame)), samples.as_slice());
    }
    assert_eq!(buffer.counters().resyncs, 0);
    assert_eq!(buffer.head(), Some(1));
}

#[test]
fn wraparound_with_uneven_slot_count() {
    // 65536 % 14 == 2, so slot numbering repeats two frames early at the wrap.
    let encoder = cauchy_encoder();
    let mut buffer = PlayoutBuffer::new(14);
    let mut late = None;
    for frame in [65532u16, 65533, 65534, 65535, 0, 1, 2] {
        let (samples, datagrams) = encode(&encoder, frame, frame as u32);
        for (i, d) in datagrams.iter().enumerate() {
            // hold back one block of 65534 until frame 1 is under way
            if frame == 65534 && i == 9 {
                late = Some(d.clone());
                continue;
            }
            buffer.write_datagram(d);
            if frame == 1 && i == 0 {
                if let Some(d) = late.take() {
                    buffer.write_datagram(&d);
                }
            }
        }
        assert_eq!(buffer.frame(buffer.slot_of(frame)), samples.as_slice());
        assert_eq!(buffer.slot(buffer.slot_of(frame)).owner(), Some(frame));
    }
    assert_eq!(buffer.counters().resyncs, 0);
    assert_eq!(buffer.counters().duplicates, 0);
    assert_eq!(buffer.counters().stale, 1);
    // the late block did not land in frame 0, which now owns slot 0
    assert_eq!(
        buffer.frame(buffer.slot_of(0)),
        source_frame(&encoder, 0).as_slice()
    );
}

// ─── Scenario D: jittered playout ticks ─────────────────────────────────────

#[test]
fn jittered_ticks_drain_at_sample_rate() {
    let encoder = cauchy_encoder();
    let mut buffer = PlayoutBuffer::new(16);
    for frame in 0..2u16 {
        let (_, datagrams) = encode(&encoder, frame, 10 + frame as u32);
        for d in &datagrams {
            buffer.write_datagram(d);
        }
    }
    assert_eq!(buffer.current_meta().sample_rate, 48_000);

    let mut playout = PlayoutController::new(PlayoutConfig {
        tick: Duration::from_millis(50),
        auto_correction: false,
    });
    let t0 = Instant::now();
    playout.tick(t0, &mut buffer);

    let a = playout.tick(t0 + Duration::from_millis(40), &mut buffer);
    let b = playout.tick(t0 + Duration::from_millis(100), &mut buffer);
    let drained = a.samples + b.samples;
    assert!(drained.abs_diff(4_800) <= 1, "drained {}", drained);
    assert_eq!(a.chunk.len() + b.chunk.len(), drained * 4);
}

#[test]
fn drained_bytes_follow_ring_order() {
    let encoder = cauchy_encoder();
    let mut buffer = PlayoutBuffer::new(4);
    let mut frames = Vec::new();
    for frame in 0..4u16 {
        let (samples, datagrams) = encode(&encoder, frame, 20 + frame as u32);
        for d in &datagrams {
            buffer.write_datagram(d);
        }
        frames.push(samples);
    }

    // Cursor starts half a ring away from the first head (slot 2).
    let fb = buffer.frame_bytes();
    let first = buffer.read(fb).to_vec();
    assert_eq!(first, frames[2]);
    let wrapped = buffer.read(fb + fb / 2).to_vec();
    assert_eq!(&wrapped[..fb], frames[3].as_slice());
    assert_eq!(&wrapped[fb..], &frames[0][..fb / 2]);
}

#[test]
fn wrong_size_datagrams_ignored() {
    let encoder = cauchy_encoder();
    let (_, datagrams) = encode(&encoder, 1, 1);
    let mut buffer = PlayoutBuffer::new(16);

    let truncated = &datagrams[3][..400];
    assert!(SuperBlock::parse(truncated).is_none());
    buffer.write_datagram(truncated);
    let mut padded = datagrams[3].to_vec();
    padded.push(0);
    buffer.write_datagram(&padded);

    assert_eq!(buffer.head(), None);
    assert_eq!(buffer.counters().blocks_received, 0);
}
