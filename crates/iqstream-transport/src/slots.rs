//! # Decoder Slots
//!
//! Per-frame decode state. The pool is allocated once; a slot is never
//! freed, only reinitialized when a newer frame claims it. Frame samples
//! live in the [`SampleRing`]; a slot keeps the whole of block zero and the
//! recovery blocks.
//!
//! A slot remembers the frame that claimed it. When the slot count does not
//! divide 2^16, two frames a few indices apart around the wrap map to the
//! same slot, and blocks of the one that does not own it must be dropped.
//!
//! [`SampleRing`]: crate::ring::SampleRing

use crate::meta::StreamMetadata;
use crate::wire::{BLOCK_SIZE, MAX_BLOCKS_PER_FRAME};

/// Counters captured from a slot just before it is voided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotSummary {
    pub block_count: usize,
    pub original_count: usize,
    pub recovery_count: usize,
    pub decoded: bool,
}

/// Decode state of one in-flight frame.
#[derive(Debug, Clone)]
pub struct DecoderSlot {
    /// Frame the slot currently belongs to.
    owner: Option<u16>,
    /// Distinct blocks received, stored or not.
    block_count: usize,
    /// Original blocks (block zero included) stored directly.
    original_count: usize,
    /// Recovery blocks stored.
    recovery_count: usize,
    decoded: bool,
    meta_retrieved: bool,
    received: [u64; MAX_BLOCKS_PER_FRAME / 64],
    block_zero: Vec<u8>,
    recovery_index: Vec<u8>,
    recovery_data: Vec<Vec<u8>>,
}

impl DecoderSlot {
    pub fn new() -> Self {
        DecoderSlot {
            owner: None,
            block_count: 0,
            original_count: 0,
            recovery_count: 0,
            decoded: false,
            meta_retrieved: false,
            received: [0; MAX_BLOCKS_PER_FRAME / 64],
            block_zero: vec![0; BLOCK_SIZE],
            recovery_index: Vec::new(),
            recovery_data: Vec::new(),
        }
    }

    /// Hand the slot to `frame_index`.
    pub fn claim(&mut self, frame_index: u16) {
        self.owner = Some(frame_index);
    }

    pub fn owner(&self) -> Option<u16> {
        self.owner
    }

    /// Whether blocks of `frame_index` belong here. An unclaimed slot
    /// accepts any frame.
    pub fn accepts(&self, frame_index: u16) -> bool {
        self.owner.is_none_or(|f| f == frame_index)
    }

    /// Record `block_index` as received. Returns `false` for a duplicate.
    pub fn mark_received(&mut self, block_index: u8) -> bool {
        let (word, bit) = (block_index as usize / 64, block_index as usize % 64);
        let mask = 1u64 << bit;
        if self.received[word] & mask != 0 {
            return false;
        }
        self.received[word] |= mask;
        self.block_count += 1;
        true
    }

    pub fn has_received(&self, block_index: u8) -> bool {
        let (word, bit) = (block_index as usize / 64, block_index as usize % 64);
        self.received[word] & (1u64 << bit) != 0
    }

    /// Store block zero and mark its metadata as retrieved.
    pub fn store_block_zero(&mut self, block: &[u8]) {
        let n = block.len().min(BLOCK_SIZE);
        self.block_zero[..n].copy_from_slice(&block[..n]);
        self.meta_retrieved = true;
        self.original_count += 1;
    }

    /// Count an original data block stored into the ring.
    pub fn note_original(&mut self) {
        self.original_count += 1;
    }

    pub fn store_recovery(&mut self, block_index: u8, block: &[u8]) {
        let n = self.recovery_count;
        if n == self.recovery_data.len() {
            self.recovery_data.push(vec![0; BLOCK_SIZE]);
            self.recovery_index.push(0);
        }
        let len = block.len().min(BLOCK_SIZE);
        self.recovery_data[n][..len].copy_from_slice(&block[..len]);
        self.recovery_index[n] = block_index;
        self.recovery_count += 1;
    }

    /// Block indices of the stored recovery blocks, in arrival order.
    pub fn recovery_indices(&self) -> &[u8] {
        &self.recovery_index[..self.recovery_count]
    }

    /// Block zero and the stored recovery blocks, for the decoder.
    pub fn decode_parts(&mut self) -> (&[u8], impl Iterator<Item = (u8, &mut [u8])>) {
        let n = self.recovery_count;
        let recovery = self
            .recovery_index
            .iter()
            .copied()
            .zip(self.recovery_data.iter_mut().map(|v| v.as_mut_slice()))
            .take(n);
        (&self.block_zero, recovery)
    }

    /// Adopt a recovered block zero.
    pub fn restore_block_zero(&mut self, block: &[u8]) {
        let n = block.len().min(BLOCK_SIZE);
        self.block_zero[..n].copy_from_slice(&block[..n]);
        self.meta_retrieved = true;
    }

    pub fn set_decoded(&mut self) {
        self.decoded = true;
    }

    /// Metadata from block zero, when it was received or recovered.
    pub fn metadata(&self) -> Option<StreamMetadata> {
        if !self.meta_retrieved {
            return None;
        }
        StreamMetadata::decode(&mut self.block_zero.as_slice())
    }

    /// Raw block zero, metadata record first.
    pub fn block_zero(&self) -> &[u8] {
        &self.block_zero
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    pub fn original_count(&self) -> usize {
        self.original_count
    }

    pub fn recovery_count(&self) -> usize {
        self.recovery_count
    }

    pub fn is_decoded(&self) -> bool {
        self.decoded
    }

    pub fn meta_retrieved(&self) -> bool {
        self.meta_retrieved
    }

    pub fn summary(&self) -> SlotSummary {
        SlotSummary {
            block_count: self.block_count,
            original_count: self.original_count,
            recovery_count: self.recovery_count,
            decoded: self.decoded,
        }
    }

    /// Void the slot for a new frame. Allocations are kept.
    pub fn reinitialize(&mut self) -> SlotSummary {
        let summary = self.summary();
        self.owner = None;
        self.block_count = 0;
        self.original_count = 0;
        self.recovery_count = 0;
        self.decoded = false;
        self.meta_retrieved = false;
        self.received = [0; MAX_BLOCKS_PER_FRAME / 64];
        self.block_zero.fill(0);
        summary
    }
}

impl Default for DecoderSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed arena of decoder slots indexed by `frame_index % len`.
#[derive(Debug, Clone)]
pub struct SlotPool {
    slots: Vec<DecoderSlot>,
}

impl SlotPool {
    pub fn new(slot_count: usize) -> Self {
        SlotPool {
            slots: (0..slot_count).map(|_| DecoderSlot::new()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, slot: usize) -> &DecoderSlot {
        &self.slots[slot]
    }

    pub fn get_mut(&mut self, slot: usize) -> &mut DecoderSlot {
        &mut self.slots[slot]
    }

    /// Void one slot and return what it held.
    pub fn reinitialize(&mut self, slot: usize) -> SlotSummary {
        self.slots[slot].reinitialize()
    }

    pub fn reinitialize_all(&mut self) {
        for slot in &mut self.slots {
            slot.reinitialize();
        }
    }
}
