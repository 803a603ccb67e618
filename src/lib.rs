//! # Optitact - real-time optical tactile sensing
//!
//! Optitact turns the camera view of a marker-studded elastomer into contact
//! and force estimates: frames are acquired, markers are tracked in 2D,
//! lifted to 3D, differenced against a calibrated rest state, classified
//! into contact on/off, and mapped to per-marker and resultant forces that
//! stream to remote consumers over ZMQ.
//!
//! This umbrella crate re-exports the workspace members:
//!
//! - [`structures`] - the shared data model (`FieldStore`, images, vectors)
//! - [`serialization`] - the wire packet codec used by the sinks
//! - [`config`] - the TOML pipeline descriptor and its validation
//! - [`observability`] - `tracing` initialization
//! - [`pipeline`] - the stage runtime (tracking, reconstruction, forces)
//! - [`io`] - ZMQ transport sinks
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use optitact::prelude::*;
//!
//! let config = optitact::config::load_config(None)?;
//! let mut service = Service::start(&config)?;
//! for _ in 0..100 {
//!     let frame = service.step()?;
//!     println!("completed frame {}", frame.index());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use optitact_config as config;
pub use optitact_io as io;
pub use optitact_observability as observability;
pub use optitact_pipeline as pipeline;
pub use optitact_serialization as serialization;
pub use optitact_structures as structures;

mod service;

pub use service::{Service, ServiceError};

/// The common imports for driving a pipeline.
pub mod prelude {
    pub use crate::config::{load_config, PipelineConfig};
    pub use crate::pipeline::{field_names, PipelineRunner};
    pub use crate::structures::{FieldStore, FieldValue};
    pub use crate::{Service, ServiceError};
}
