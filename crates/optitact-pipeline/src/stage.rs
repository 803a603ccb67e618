use optitact_structures::OptitactDataError;

use crate::context::FrameContext;

/// What a stage asks the runner to do with the rest of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Outputs were written, continue with the next stage
    Advance,
    /// The frame is unusable; skip the remaining stages and republish the
    /// previous frame's values for every downstream field
    DiscardFrame,
}

/// One processing stage in the fixed chain.
///
/// A stage may only read fields named in `declared_inputs` and must write
/// every field in `declared_outputs` before returning [`StageOutcome::Advance`];
/// the runner enforces the output half of that contract after each call.
pub trait PipelineStage: Send {
    fn name(&self) -> &'static str;

    fn declared_inputs(&self) -> &'static [&'static str];

    fn declared_outputs(&self) -> &'static [&'static str];

    fn process(&mut self, ctx: &mut FrameContext) -> Result<StageOutcome, OptitactDataError>;
}
