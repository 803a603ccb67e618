//! The core crate for Optitact. Defines the shared data structures used by
//! every pipeline stage: the per-frame field store, image frames, marker
//! matrices, and the common error type.

mod error;
mod fields;
mod frame;
pub mod data;

pub use error::OptitactDataError;
pub use fields::{FieldStore, FieldValue};
pub use frame::Frame;
