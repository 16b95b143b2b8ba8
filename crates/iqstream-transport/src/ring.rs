//! # Sample Ring
//!
//! One contiguous store of `slot_count` frame buffers. Decoded frames are
//! written in place at `slot * frame_bytes`; the playout side reads through
//! a single cursor that wraps at the end of the store.

use std::ops::Deref;

/// Bytes returned by [`SampleRing::read`].
///
/// A read that crosses the end of the store is stitched together in an
/// auxiliary buffer; any other read borrows the store directly.
#[derive(Debug)]
pub enum ReadView<'a> {
    Contiguous(&'a [u8]),
    Composed(&'a [u8]),
}

impl ReadView<'_> {
    pub fn is_composed(&self) -> bool {
        matches!(self, ReadView::Composed(_))
    }
}

impl Deref for ReadView<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            ReadView::Contiguous(b) | ReadView::Composed(b) => b,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SampleRing {
    storage: Vec<u8>,
    frame_bytes: usize,
    slot_count: usize,
    read_index: usize,
    aux: Vec<u8>,
}

impl SampleRing {
    pub fn new(slot_count: usize, frame_bytes: usize) -> Self {
        SampleRing {
            storage: vec![0; slot_count * frame_bytes],
            frame_bytes,
            slot_count,
            read_index: 0,
            aux: Vec::new(),
        }
    }

    /// Total bytes in the store.
    #[inline]
    pub fn size(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    #[inline]
    pub fn read_index(&self) -> usize {
        self.read_index
    }

    /// Bytes currently reserved for stitching wrapped reads.
    pub fn aux_capacity(&self) -> usize {
        self.aux.len()
    }

    pub fn frame(&self, slot: usize) -> &[u8] {
        let start = slot * self.frame_bytes;
        &self.storage[start..start + self.frame_bytes]
    }

    pub fn frame_mut(&mut self, slot: usize) -> &mut [u8] {
        let start = slot * self.frame_bytes;
        &mut self.storage[start..start + self.frame_bytes]
    }

    /// Zero one frame buffer.
    pub fn clear_frame(&mut self, slot: usize) {
        self.frame_mut(slot).fill(0);
    }

    pub fn clear(&mut self) {
        self.storage.fill(0);
    }

    /// Put the read cursor half a ring away from `head_slot`.
    pub fn reset_read_index(&mut self, head_slot: usize) {
        if self.slot_count == 0 {
            self.read_index = 0;
            return;
        }
        self.read_index = ((head_slot + self.slot_count / 2) % self.slot_count) * self.frame_bytes;
    }

    /// Signed byte distance from the read cursor to the start of `slot`.
    pub fn write_read_delta(&self, slot: usize) -> i64 {
        (slot * self.frame_bytes) as i64 - self.read_index as i64
    }

    /// Read `len` bytes at the cursor and advance it.
    ///
    /// Requests longer than the store are truncated to the store size.
    pub fn read(&mut self, len: usize) -> ReadView<'_> {
        let size = self.storage.len();
        let len = len.min(size);
        if len == 0 {
            return ReadView::Contiguous(&[]);
        }

        let start = self.read_index;
        if start + len <= size {
            self.read_index = (start + len) % size;
            return ReadView::Contiguous(&self.storage[start..start + len]);
        }

        let first = size - start;
        if self.aux.len() < len {
            self.aux.resize(len, 0);
        }
        self.aux[..first].copy_from_slice(&self.storage[start..]);
        self.aux[first..len].copy_from_slice(&self.storage[..len - first]);
        self.read_index = len - first;
        ReadView::Composed(&self.aux[..len])
    }
}

/// Percentage of the store between read and write cursors, in `[-100, 100]`.
pub fn gauge(wr_delta: i64, size: usize) -> i32 {
    if size == 0 {
        return 0;
    }
    (wr_delta.saturating_mul(100) / size as i64).clamp(-100, 100) as i32
}
