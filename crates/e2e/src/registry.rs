//! FIFO of case references waiting to be dispatched

use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::case::CaseReference;

/// Discovery order in, dispatch order out. Each reference is handed out once.
#[derive(Debug, Default)]
pub struct Registry {
    queue: Mutex<VecDeque<CaseReference>>,
}

impl Registry {
    pub fn new(references: impl IntoIterator<Item = CaseReference>) -> Self {
        Self {
            queue: Mutex::new(references.into_iter().collect()),
        }
    }

    pub fn push(&self, reference: CaseReference) {
        self.queue.lock().push_back(reference);
    }

    pub fn pop_front(&self) -> Option<CaseReference> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}
