//! Binary packet encoding for Optitact transport sinks.
//!
//! The schema is fixed at configuration time; packets only tag each field
//! with its wire type so a conforming reader with the same configured field
//! list can reproduce the values exactly.

mod packet;
mod wire_type;

pub use packet::{decode_packet, encode_packet, WireField, CURRENT_SUPPORTED_VERSION, GLOBAL_HEADER_BYTE_COUNT};
pub use wire_type::WireType;
