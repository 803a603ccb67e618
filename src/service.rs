//! Service assembly: configuration in, frames out.
//!
//! Glues the frame runner to the transport sinks. One call per frame drives
//! the whole chain and fans the completed store out to every sink.

use thiserror::Error;
use tracing::info;

use optitact_config::{validate_config, ConfigError, PipelineConfig};
use optitact_io::{TransportError, TransportSink};
use optitact_pipeline::PipelineRunner;
use optitact_structures::{Frame, OptitactDataError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] OptitactDataError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub struct Service {
    runner: PipelineRunner,
    sinks: Vec<TransportSink>,
}

impl Service {
    /// Validates the descriptor, builds the stage chain, and starts every
    /// sink. Any failure here is fatal; nothing is left half-started that
    /// the caller needs to tear down.
    pub fn start(config: &PipelineConfig) -> Result<Self, ServiceError> {
        validate_config(config)?;

        let runner = PipelineRunner::from_config(config)?;
        let mut sinks = Vec::with_capacity(config.sinks.len());
        for sink_config in &config.sinks {
            sinks.push(TransportSink::start(sink_config)?);
        }

        info!(
            stages = config.stages.len(),
            sinks = sinks.len(),
            serial = %config.identity.serial_number,
            "Optitact service started"
        );
        Ok(Service { runner, sinks })
    }

    /// Runs one frame through the chain and publishes it to all sinks.
    pub fn step(&mut self) -> Result<Frame, ServiceError> {
        let frame = self.runner.run_frame()?;
        for sink in &self.sinks {
            // A full or dead sink never stalls the chain
            let _ = sink.publish(frame.store().clone());
        }
        Ok(frame)
    }

    pub fn frames_completed(&self) -> u64 {
        self.runner.frames_completed()
    }

    /// Runs `count` frames, stopping early only on a pipeline error.
    pub fn run_frames(&mut self, count: u64) -> Result<(), ServiceError> {
        for _ in 0..count {
            self.step()?;
        }
        Ok(())
    }
}
