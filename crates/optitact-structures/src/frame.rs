use std::sync::Arc;

use crate::FieldStore;

/// The unit of pipeline work: a monotonically increasing index plus the
/// completed field store for that tick. Immutable once published; the next
/// frame supersedes it rather than mutating it.
#[derive(Debug, Clone)]
pub struct Frame {
    index: u64,
    store: Arc<FieldStore>,
}

impl Frame {
    pub fn new(index: u64, store: Arc<FieldStore>) -> Self {
        Frame { index, store }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn store(&self) -> &Arc<FieldStore> {
        &self.store
    }
}
