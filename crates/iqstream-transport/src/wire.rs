//! # iqstream Wire Format
//!
//! Every datagram has the same fixed size. A frame is a set of blocks that
//! share one frame index and form one erasure-coding matrix.
//!
//! ## Datagram (512 bytes, little-endian)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Frame Index (16)       |  Block Index  |    Filler     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! |               Protected block (508 bytes)                     |
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Block 0 starts its protected block with a 20-byte [`StreamMetadata`]
//! record followed by [`SAMPLES_PER_BLOCK_ZERO`] sample pairs. Blocks
//! `1..nb_original_blocks` carry I/Q sample pairs, and the blocks after them
//! carry recovery data.
//!
//! ## Frame samples
//!
//! ```text
//! | block 0 samples (488) | block 1 (508) | ... | block k-1 (508) |
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::meta::StreamMetadata;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Total datagram size on the wire.
pub const UDP_SIZE: usize = 512;

/// Block header: frame index (2) + block index (1) + filler (1).
pub const HEADER_SIZE: usize = 4;

/// Bytes covered by the erasure code in every block.
pub const BLOCK_SIZE: usize = UDP_SIZE - HEADER_SIZE;

/// One I/Q pair of 16-bit components.
pub const SAMPLE_SIZE: usize = 4;

/// Sample pairs carried by a plain data block.
pub const SAMPLES_PER_BLOCK: usize = BLOCK_SIZE / SAMPLE_SIZE;

/// Sample pairs that fit in block zero after the metadata record.
pub const SAMPLES_PER_BLOCK_ZERO: usize = (BLOCK_SIZE - StreamMetadata::ENCODED_LEN) / SAMPLE_SIZE;

/// Sample bytes carried by block zero after the metadata record.
pub const BLOCK_ZERO_SAMPLE_BYTES: usize = SAMPLES_PER_BLOCK_ZERO * SAMPLE_SIZE;

/// Original blocks per frame used by default senders (block 0 + 127 data blocks).
pub const DEFAULT_NB_ORIGINAL_BLOCKS: usize = 128;

/// Hard limit of the GF(2^8) code: original + recovery blocks per frame.
pub const MAX_BLOCKS_PER_FRAME: usize = 256;

/// Sample bytes of a frame with `nb_original_blocks` originals.
pub const fn frame_bytes(nb_original_blocks: usize) -> usize {
    BLOCK_ZERO_SAMPLE_BYTES + nb_original_blocks.saturating_sub(1) * BLOCK_SIZE
}

/// Where the samples of original block `block_index` start within a frame.
pub const fn block_offset(block_index: usize) -> usize {
    if block_index == 0 {
        0
    } else {
        BLOCK_ZERO_SAMPLE_BYTES + (block_index - 1) * BLOCK_SIZE
    }
}

// ─── Sample ─────────────────────────────────────────────────────────────────

/// One complex sample as carried on the wire.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub i: i16,
    pub q: i16,
}

impl Sample {
    pub fn new(i: i16, q: i16) -> Self {
        Sample { i, q }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i16_le(self.i);
        buf.put_i16_le(self.q);
    }

    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < SAMPLE_SIZE {
            return None;
        }
        Some(Sample {
            i: buf.get_i16_le(),
            q: buf.get_i16_le(),
        })
    }
}

// ─── Block Header ───────────────────────────────────────────────────────────

/// Header prefixed to every protected block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Frame index, wraps at 2^16.
    pub frame_index: u16,
    /// Position within the frame. Zero carries the metadata record.
    pub block_index: u8,
}

impl BlockHeader {
    pub fn new(frame_index: u16, block_index: u8) -> Self {
        BlockHeader {
            frame_index,
            block_index,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16_le(self.frame_index);
        buf.put_u8(self.block_index);
        buf.put_u8(0); // filler
    }

    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < HEADER_SIZE {
            return None;
        }
        let frame_index = buf.get_u16_le();
        let block_index = buf.get_u8();
        let _filler = buf.get_u8();
        Some(BlockHeader {
            frame_index,
            block_index,
        })
    }

    /// Block zero holds the metadata record.
    #[inline]
    pub fn is_meta_block(&self) -> bool {
        self.block_index == 0
    }
}

// ─── Super Block ────────────────────────────────────────────────────────────

/// A parsed datagram: header plus the erasure-protected payload.
#[derive(Debug, Clone)]
pub struct SuperBlock {
    pub header: BlockHeader,
    pub block: Bytes,
}

impl SuperBlock {
    /// Parse one datagram. Anything that is not exactly [`UDP_SIZE`] bytes
    /// long is rejected.
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        if datagram.len() != UDP_SIZE {
            return None;
        }
        let mut buf = datagram;
        let header = BlockHeader::decode(&mut buf)?;
        Some(SuperBlock {
            header,
            block: Bytes::copy_from_slice(buf),
        })
    }

    /// Serialize a header and a full protected block into one datagram.
    pub fn encode(header: BlockHeader, block: &[u8]) -> Bytes {
        debug_assert_eq!(block.len(), BLOCK_SIZE);
        let mut buf = BytesMut::with_capacity(UDP_SIZE);
        header.encode(&mut buf);
        buf.put_slice(&block[..BLOCK_SIZE.min(block.len())]);
        if buf.len() < UDP_SIZE {
            buf.put_bytes(0, UDP_SIZE - buf.len());
        }
        buf.freeze()
    }

    /// Metadata record, when this is block zero.
    pub fn metadata(&self) -> Option<StreamMetadata> {
        if !self.header.is_meta_block() {
            return None;
        }
        StreamMetadata::decode(&mut self.block.as_ref())
    }

    /// Sample pairs carried by this block (after the metadata for block zero).
    pub fn samples(&self) -> impl Iterator<Item = Sample> + '_ {
        let skip = if self.header.is_meta_block() {
            StreamMetadata::ENCODED_LEN
        } else {
            0
        };
        self.block[skip..]
            .chunks_exact(SAMPLE_SIZE)
            .map(|mut c| Sample {
                i: c.get_i16_le(),
                q: c.get_i16_le(),
            })
    }
}
