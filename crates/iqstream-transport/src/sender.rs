//! # Frame Encoder
//!
//! Pure logic, no I/O. The sending half of the wire format: cuts a raw I/Q
//! byte stream into frames, prefixes block zero with the metadata record,
//! adds the recovery blocks and serializes every block into a datagram.
//!
//! A frame's first [`BLOCK_ZERO_SAMPLE_BYTES`] go after the metadata record
//! in block zero, the rest fill blocks `1..nb_original_blocks`.

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{CodingParams, EncodeError, ErasureEncoder};
use crate::meta::StreamMetadata;
use crate::wire::{
    self, BlockHeader, SuperBlock, BLOCK_SIZE, BLOCK_ZERO_SAMPLE_BYTES, DEFAULT_NB_ORIGINAL_BLOCKS,
};

/// Counters of the encoder.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct EncoderStats {
    pub frames: u64,
    pub original_blocks: u64,
    pub recovery_blocks: u64,
}

/// Turns sample bytes into datagrams.
pub struct FrameEncoder {
    encoder: Box<dyn ErasureEncoder>,
    nb_original_blocks: usize,
    next_frame: u16,
    pending: BytesMut,
    output: VecDeque<Bytes>,
    stats: EncoderStats,
}

impl FrameEncoder {
    pub fn new(encoder: Box<dyn ErasureEncoder>) -> Self {
        Self::with_original_blocks(encoder, DEFAULT_NB_ORIGINAL_BLOCKS)
    }

    /// `nb_original_blocks` counts block zero and must be in `2..=255`.
    pub fn with_original_blocks(encoder: Box<dyn ErasureEncoder>, nb_original_blocks: usize) -> Self {
        let nb_original_blocks = nb_original_blocks.clamp(2, 255);
        FrameEncoder {
            encoder,
            nb_original_blocks,
            next_frame: 0,
            pending: BytesMut::new(),
            output: VecDeque::new(),
            stats: EncoderStats::default(),
        }
    }

    /// Sample bytes carried by one frame.
    pub fn frame_bytes(&self) -> usize {
        wire::frame_bytes(self.nb_original_blocks)
    }

    /// Index the next frame produced by [`push`](Self::push) will carry.
    pub fn next_frame(&self) -> u16 {
        self.next_frame
    }

    pub fn set_next_frame(&mut self, frame_index: u16) {
        self.next_frame = frame_index;
    }

    /// Serialize one frame: `nb_original_blocks` originals followed by
    /// `meta.nb_fec_blocks` recovery blocks.
    pub fn encode_frame(
        &self,
        frame_index: u16,
        meta: &StreamMetadata,
        samples: &[u8],
    ) -> Result<Vec<Bytes>, EncodeError> {
        let k = self.nb_original_blocks;
        if samples.len() != self.frame_bytes() {
            return Err(EncodeError::FrameSize {
                expected: self.frame_bytes(),
                actual: samples.len(),
            });
        }

        let mut meta = *meta;
        meta.nb_original_blocks = k as u8;
        let (head, rest) = samples.split_at(BLOCK_ZERO_SAMPLE_BYTES);
        let mut block_zero = BytesMut::with_capacity(BLOCK_SIZE);
        meta.encode(&mut block_zero);
        block_zero.put_slice(head);

        let mut originals: Vec<&[u8]> = Vec::with_capacity(k);
        originals.push(&block_zero);
        originals.extend(rest.chunks_exact(BLOCK_SIZE));

        let mut datagrams: Vec<Bytes> = originals
            .iter()
            .enumerate()
            .map(|(i, block)| SuperBlock::encode(BlockHeader::new(frame_index, i as u8), block))
            .collect();

        let r = meta.nb_fec_blocks as usize;
        if r > 0 {
            let params = CodingParams::new(k, r, BLOCK_SIZE).map_err(|_| EncodeError::TooManyBlocks)?;
            let recovery = self.encoder.encode(&params, &originals)?;
            datagrams.extend(recovery.iter().enumerate().map(|(n, block)| {
                SuperBlock::encode(
                    BlockHeader::new(frame_index, params.recovery_block_index(n)),
                    block,
                )
            }));
        }
        Ok(datagrams)
    }

    /// Append samples; every completed frame is encoded and queued.
    /// Returns the number of frames produced.
    pub fn push(&mut self, meta: &StreamMetadata, samples: &[u8]) -> Result<usize, EncodeError> {
        self.pending.extend_from_slice(samples);
        let frame_bytes = self.frame_bytes();
        let mut frames = 0;

        while self.pending.len() >= frame_bytes {
            let frame = self.pending.split_to(frame_bytes);
            let datagrams = self.encode_frame(self.next_frame, meta, &frame)?;
            self.stats.frames += 1;
            self.stats.original_blocks += self.nb_original_blocks as u64;
            self.stats.recovery_blocks += (datagrams.len() - self.nb_original_blocks) as u64;
            self.output.extend(datagrams);
            self.next_frame = self.next_frame.wrapping_add(1);
            frames += 1;
        }
        Ok(frames)
    }

    /// Next queued datagram.
    pub fn poll_output(&mut self) -> Option<Bytes> {
        self.output.pop_front()
    }

    /// All queued datagrams.
    pub fn drain_output(&mut self) -> Vec<Bytes> {
        self.output.drain(..).collect()
    }

    /// Sample bytes waiting for a full frame.
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &EncoderStats {
        &self.stats
    }
}
