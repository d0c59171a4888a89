//! `net_core`: wire envelope, field codec and byte transports.
//!
//! Scope
//! - `frame`: `[opcode u8][len u16 LE][payload]` envelope + stream reassembly
//! - `codec`: little-endian field reader/writer and the encode/decode traits
//! - `batch`: one transport write per flush, optionally LZ4-compressed
//! - `channel`/`transport`/`tcp`: byte hand-off between I/O threads and the
//!   simulation step
//!
//! Nothing in here knows about the simulation; `server_core` owns opcodes.
#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

pub mod batch;
pub mod channel;
pub mod codec;
pub mod error;
pub mod frame;
pub mod tcp;
pub mod transport;

pub use error::WireError;
