use std::sync::Arc;

use optitact_structures::FieldStore;

/// Contact classification carried across the frame boundary.
///
/// This is the pipeline's single feedback edge: the detector writes the state
/// for frame F, the displacement tracker reads it while processing frame F+1.
/// It travels by value inside the frame context, so a partially updated state
/// is never observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContactState {
    /// Debounced classification
    pub in_contact: bool,
    /// Consecutive frames the raw signal has disagreed with `in_contact`
    pub pending_streak: u32,
    /// Consecutive frames the debounced state has been "no contact"
    pub non_contact_streak: u32,
}

/// Per-frame working context handed through the stage chain.
pub struct FrameContext {
    index: u64,
    /// The previous completed frame's store, read-only
    previous: Arc<FieldStore>,
    /// The store being built for this frame
    pub store: FieldStore,
    contact_in: ContactState,
    contact_out: Option<ContactState>,
}

impl FrameContext {
    pub fn new(index: u64, previous: Arc<FieldStore>, contact_in: ContactState) -> Self {
        FrameContext {
            index,
            previous,
            store: FieldStore::new(),
            contact_in,
            contact_out: None,
        }
    }

    pub fn frame_index(&self) -> u64 {
        self.index
    }

    pub fn previous(&self) -> &FieldStore {
        &self.previous
    }

    /// The contact state produced by the previous frame.
    pub fn contact_in(&self) -> ContactState {
        self.contact_in
    }

    /// Publishes this frame's contact state; called once by the detector.
    pub fn set_contact_out(&mut self, state: ContactState) {
        self.contact_out = Some(state);
    }

    pub fn contact_out(&self) -> Option<ContactState> {
        self.contact_out
    }
}
