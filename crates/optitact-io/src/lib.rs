//! Transport sinks: ZMQ publishers that broadcast completed frames to
//! remote consumers without ever stalling the frame loop.

mod error;
mod sink;

pub use error::{TransportError, TransportResult};
pub use sink::{parse_schema, TransportSink};
