//! # iqstream-receiver
//!
//! Threaded UDP runtime around the `iqstream-transport` playout buffer.
//!
//! - [`config`] - TOML configuration and validation
//! - [`ingest`] - Socket setup and the datagram loop
//! - [`runtime`] - Ingest and playout threads, output FIFO, event channel

pub mod config;
pub mod ingest;
pub mod runtime;

pub use config::{ConfigError, ReceiverConfig};
pub use runtime::{ReceiverRuntime, RuntimeStats, StreamEvent};
