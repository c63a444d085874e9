//! Wire protocol for streaming parts and UI chunks over HTTP.

pub mod wire;

pub use wire::{
    decode_line, decode_stream, encode, WireRecord, PROTOCOL_VERSION, UI_PROTOCOL_VERSION,
};
