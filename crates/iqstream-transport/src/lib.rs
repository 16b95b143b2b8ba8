//! # iqstream-transport
//!
//! Reassembly of a complex-sample (I/Q) stream sent as fixed-size UDP
//! datagrams protected by a block erasure code.
//!
//! Pure logic, no sockets or threads: the receiver runtime owns those and
//! drives a [`PlayoutBuffer`](buffer::PlayoutBuffer) from both ends.
//!
//! ## Crate structure
//!
//! - [`wire`] - Datagram layout, block header, samples
//! - [`meta`] - Stream metadata record and change tracking
//! - [`sync`] - Frame synchronizer over 16-bit wrapping frame indices
//! - [`codec`] - Erasure codecs (Cauchy Reed-Solomon, reed-solomon-simd)
//! - [`slots`] - Per-frame decoder slots
//! - [`ring`] - Sample ring with wrap-safe reads
//! - [`stats`] - Block statistics and timing reports
//! - [`buffer`] - Playout buffer tying the above together
//! - [`playout`] - Rate controller draining the buffer
//! - [`sender`] - Frame encoder for the sending side

pub mod buffer;
pub mod codec;
pub mod meta;
pub mod playout;
pub mod ring;
pub mod sender;
pub mod slots;
pub mod stats;
pub mod sync;
pub mod wire;
