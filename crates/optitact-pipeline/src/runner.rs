//! The sequential frame loop.
//!
//! Stages run in configured order inside a single driver thread; a frame is
//! complete only when the whole chain has run, which gives the per-frame
//! barrier for free. Parallelism lives inside stages (worker pools) and in
//! the transport sinks, never between stages of the same frame.

use std::sync::Arc;

use tracing::{debug, error};

use optitact_config::PipelineConfig;
use optitact_structures::{FieldStore, Frame, OptitactDataError};

use crate::calibration::SharedCalibration;
use crate::context::{ContactState, FrameContext};
use crate::registry::build_stage;
use crate::stage::{PipelineStage, StageOutcome};

pub struct PipelineRunner {
    stages: Vec<Box<dyn PipelineStage>>,
    shared: SharedCalibration,
    previous: Arc<FieldStore>,
    contact: ContactState,
    next_frame_index: u64,
}

impl PipelineRunner {
    /// Builds the full stage chain from configuration. Every stage parses its
    /// parameters and loads its resource files here; nothing fails lazily.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, OptitactDataError> {
        let shared = SharedCalibration::new();
        let mut stages = Vec::with_capacity(config.stages.len());
        for stage_config in &config.stages {
            stages.push(build_stage(stage_config, &shared)?);
        }
        Ok(Self::new(stages, shared))
    }

    pub fn new(stages: Vec<Box<dyn PipelineStage>>, shared: SharedCalibration) -> Self {
        PipelineRunner {
            stages,
            shared,
            previous: Arc::new(FieldStore::new()),
            contact: ContactState::default(),
            next_frame_index: 0,
        }
    }

    pub fn shared_calibration(&self) -> &SharedCalibration {
        &self.shared
    }

    pub fn frames_completed(&self) -> u64 {
        self.next_frame_index
    }

    /// Runs the chain once and returns the completed frame.
    ///
    /// When a stage discards the frame, the previous frame's values are
    /// republished for every field downstream of the discarding stage, so
    /// sinks always see a complete field set once one full frame has run.
    pub fn run_frame(&mut self) -> Result<Frame, OptitactDataError> {
        let index = self.next_frame_index;
        let mut ctx = FrameContext::new(index, self.previous.clone(), self.contact);

        let mut discarded_at: Option<usize> = None;
        for (position, stage) in self.stages.iter_mut().enumerate() {
            match stage.process(&mut ctx) {
                Ok(StageOutcome::Advance) => {
                    for field in stage.declared_outputs() {
                        if !ctx.store.contains(field) {
                            return Err(OptitactDataError::FieldContract(format!(
                                "Stage '{}' advanced without publishing '{}'!",
                                stage.name(),
                                field
                            )));
                        }
                    }
                }
                Ok(StageOutcome::DiscardFrame) => {
                    debug!(frame = index, stage = stage.name(), "Frame discarded");
                    discarded_at = Some(position);
                    break;
                }
                Err(e) => {
                    error!(frame = index, stage = stage.name(), error = %e, "Stage failed");
                    return Err(e);
                }
            }
        }

        if let Some(position) = discarded_at {
            // Hold the last known value for everything at and after the
            // discarding stage; fields absent from the previous frame
            // (startup discards) simply stay absent
            for stage in &self.stages[position..] {
                for field in stage.declared_outputs() {
                    if !ctx.store.contains(field) && self.previous.contains(field) {
                        ctx.store.copy_fields_from(&self.previous, &[field])?;
                    }
                }
            }
        }

        if let Some(state) = ctx.contact_out() {
            self.contact = state;
        }
        self.next_frame_index += 1;
        let completed = Arc::new(ctx.store);
        self.previous = completed.clone();
        Ok(Frame::new(index, completed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_names;

    struct EmitStage {
        outputs: &'static [&'static str],
        discard_on: Option<u64>,
        calls: u64,
    }

    impl PipelineStage for EmitStage {
        fn name(&self) -> &'static str {
            "emit"
        }
        fn declared_inputs(&self) -> &'static [&'static str] {
            &[]
        }
        fn declared_outputs(&self) -> &'static [&'static str] {
            self.outputs
        }
        fn process(&mut self, ctx: &mut FrameContext) -> Result<StageOutcome, OptitactDataError> {
            let call = self.calls;
            self.calls += 1;
            if self.discard_on == Some(call) {
                return Ok(StageOutcome::DiscardFrame);
            }
            for field in self.outputs {
                ctx.store.insert(field, call as f64);
            }
            Ok(StageOutcome::Advance)
        }
    }

    struct SilentStage;

    impl PipelineStage for SilentStage {
        fn name(&self) -> &'static str {
            "silent"
        }
        fn declared_inputs(&self) -> &'static [&'static str] {
            &[]
        }
        fn declared_outputs(&self) -> &'static [&'static str] {
            &[field_names::CONTACT_METRIC]
        }
        fn process(&mut self, _ctx: &mut FrameContext) -> Result<StageOutcome, OptitactDataError> {
            // Advances without writing its declared output
            Ok(StageOutcome::Advance)
        }
    }

    #[test]
    fn discarded_frame_republishes_previous_values() {
        let stages: Vec<Box<dyn PipelineStage>> = vec![Box::new(EmitStage {
            outputs: &[field_names::CONTACT_METRIC],
            discard_on: Some(1),
            calls: 0,
        })];
        let mut runner = PipelineRunner::new(stages, SharedCalibration::new());

        let first = runner.run_frame().unwrap();
        assert_eq!(first.index(), 0);
        assert_eq!(first.store().get_scalar(field_names::CONTACT_METRIC).unwrap(), 0.0);

        // Second call discards; the previous value is held
        let second = runner.run_frame().unwrap();
        assert_eq!(second.store().get_scalar(field_names::CONTACT_METRIC).unwrap(), 0.0);

        let third = runner.run_frame().unwrap();
        assert_eq!(third.index(), 2);
        assert_eq!(third.store().get_scalar(field_names::CONTACT_METRIC).unwrap(), 2.0);
        assert_eq!(runner.frames_completed(), 3);
    }

    #[test]
    fn startup_discard_leaves_fields_absent() {
        let stages: Vec<Box<dyn PipelineStage>> = vec![Box::new(EmitStage {
            outputs: &[field_names::CONTACT_METRIC],
            discard_on: Some(0),
            calls: 0,
        })];
        let mut runner = PipelineRunner::new(stages, SharedCalibration::new());

        let first = runner.run_frame().unwrap();
        assert!(!first.store().contains(field_names::CONTACT_METRIC));
    }

    #[test]
    fn missing_declared_output_is_a_contract_violation() {
        let stages: Vec<Box<dyn PipelineStage>> = vec![Box::new(SilentStage)];
        let mut runner = PipelineRunner::new(stages, SharedCalibration::new());
        assert!(runner.run_frame().is_err());
    }
}
