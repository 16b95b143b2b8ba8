//! # Playout Rate Controller
//!
//! Drains the playout buffer at the sender's sample rate. The caller ticks
//! it at a nominal interval, but the amount drained is derived from the
//! measured time since the previous tick so timer jitter does not turn into
//! rate error. An optional balance correction from the buffer nudges the
//! read cursor back opposite the write cursor.

use std::time::Duration;

use bytes::Bytes;
use quanta::Instant;

use crate::buffer::PlayoutBuffer;
use crate::stats::TimingReport;

/// Controller settings.
#[derive(Debug, Clone)]
pub struct PlayoutConfig {
    /// Nominal interval between ticks.
    pub tick: Duration,
    /// Add the buffer's balance correction to every read.
    pub auto_correction: bool,
}

impl Default for PlayoutConfig {
    fn default() -> Self {
        PlayoutConfig {
            tick: Duration::from_millis(50),
            auto_correction: true,
        }
    }
}

/// Result of one tick.
#[derive(Debug, Clone, Default)]
pub struct Drained {
    /// Raw sample bytes for the consumer.
    pub chunk: Bytes,
    /// Complex samples in `chunk`.
    pub samples: usize,
    /// Set about once per second.
    pub report: Option<TimingReport>,
}

pub struct PlayoutController {
    config: PlayoutConfig,
    last_tick: Option<Instant>,
    sample_rate: u32,
    toggle: bool,
    ticks: u32,
    report_every: u32,
    total_samples: u64,
}

impl PlayoutController {
    pub fn new(config: PlayoutConfig) -> Self {
        let tick_ms = config.tick.as_millis().max(1) as u32;
        PlayoutController {
            report_every: (1000 / tick_ms).max(1),
            config,
            last_tick: None,
            sample_rate: 0,
            toggle: false,
            ticks: 0,
            total_samples: 0,
        }
    }

    /// Forget the previous tick; the next one uses the nominal interval.
    pub fn restart(&mut self) {
        self.last_tick = None;
    }

    /// Samples to drain for `elapsed` at `sample_rate`, with the alternating
    /// rounding sample.
    fn nominal_samples(&mut self, sample_rate: u32, elapsed: Duration) -> i64 {
        let mut samples = sample_rate as i64 * elapsed.as_micros() as i64 / 1_000_000;
        if self.toggle {
            samples += 1;
        }
        self.toggle = !self.toggle;
        samples
    }

    /// Drain what the time elapsed since the previous tick is worth.
    pub fn tick(&mut self, now: Instant, buffer: &mut PlayoutBuffer) -> Drained {
        let meta = *buffer.current_meta();
        if meta.sample_rate != self.sample_rate {
            self.sample_rate = meta.sample_rate;
            self.last_tick = None;
        }

        let elapsed = match self.last_tick {
            Some(prev) => now.saturating_duration_since(prev),
            None => self.config.tick,
        };
        self.last_tick = Some(now);

        let mut drained = Drained::default();
        let bps = meta.bytes_per_sample();
        if meta.sample_rate != 0 && bps != 0 {
            let mut samples = self.nominal_samples(meta.sample_rate, elapsed);
            if self.config.auto_correction {
                samples += buffer.correction() as i64;
                samples = samples.clamp(0, meta.sample_rate as i64 / 5);
            }
            let samples = samples.max(0) as usize;
            let view = buffer.read(samples * bps);
            drained.samples = view.len() / bps;
            drained.chunk = Bytes::copy_from_slice(&view);
            self.total_samples += drained.samples as u64;
        }

        self.ticks += 1;
        if self.ticks >= self.report_every {
            self.ticks = 0;
            drained.report = Some(buffer.timing_report());
        }
        drained
    }

    /// Samples drained since construction.
    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    pub fn config(&self) -> &PlayoutConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CauchyCodec;
    use crate::meta::StreamMetadata;
    use crate::sender::FrameEncoder;

    fn primed_buffer(sample_rate: u32) -> PlayoutBuffer {
        let mut buffer = PlayoutBuffer::new(8);
        let encoder = FrameEncoder::new(Box::new(CauchyCodec::new()));
        let meta = StreamMetadata {
            center_frequency_khz: 7_100,
            sample_rate,
            sample_bytes: 2,
            sample_bits: 16,
            nb_original_blocks: 128,
            nb_fec_blocks: 0,
            tv_sec: 0,
            tv_usec: 0,
        };
        let samples = vec![0u8; encoder.frame_bytes()];
        for d in encoder.encode_frame(0, &meta, &samples).unwrap() {
            buffer.write_datagram(&d);
        }
        buffer
    }

    fn manual() -> PlayoutConfig {
        PlayoutConfig {
            tick: Duration::from_millis(50),
            auto_correction: false,
        }
    }

    #[test]
    fn nothing_drained_without_rate() {
        let mut buffer = PlayoutBuffer::new(8);
        let mut ctl = PlayoutController::new(manual());
        let drained = ctl.tick(Instant::now(), &mut buffer);
        assert!(drained.chunk.is_empty());
        assert_eq!(drained.samples, 0);
    }

    #[test]
    fn first_tick_uses_nominal_interval() {
        let mut buffer = primed_buffer(48_000);
        let mut ctl = PlayoutController::new(manual());
        let drained = ctl.tick(Instant::now(), &mut buffer);
        assert_eq!(drained.samples, 2400);
        assert_eq!(drained.chunk.len(), 2400 * 4);
    }

    #[test]
    fn jittered_ticks_track_rate() {
        let mut buffer = primed_buffer(48_000);
        let mut ctl = PlayoutController::new(manual());
        let t0 = Instant::now();
        ctl.tick(t0, &mut buffer);

        let a = ctl.tick(t0 + Duration::from_millis(40), &mut buffer).samples;
        let b = ctl.tick(t0 + Duration::from_millis(100), &mut buffer).samples;
        let expected = 48_000 * 100 / 1000;
        assert!((a + b).abs_diff(expected) <= 1, "{} + {}", a, b);
    }

    #[test]
    fn correction_clamped_to_fifth_of_rate() {
        let mut buffer = primed_buffer(1_000);
        let mut ctl = PlayoutController::new(PlayoutConfig {
            tick: Duration::from_millis(50),
            auto_correction: true,
        });
        let t0 = Instant::now();
        ctl.tick(t0, &mut buffer);
        let drained = ctl.tick(t0 + Duration::from_secs(2), &mut buffer);
        assert_eq!(drained.samples, 200);
    }

    #[test]
    fn report_once_per_second() {
        let mut buffer = primed_buffer(48_000);
        let mut ctl = PlayoutController::new(manual());
        let t0 = Instant::now();
        let reports = (0..40)
            .filter(|n| {
                ctl.tick(t0 + Duration::from_millis(50 * n), &mut buffer)
                    .report
                    .is_some()
            })
            .count();
        assert_eq!(reports, 2);
    }
}
