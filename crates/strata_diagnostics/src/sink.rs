//! Thread-safe inconsistency accumulator for parallel compilation.

use std::sync::Mutex;

use crate::inconsistency::{Inconsistencies, InconsistentObject};

/// A thread-safe accumulator for inconsistencies found while compiling.
///
/// Multiple workers can emit concurrently via [`emit`](Self::emit).
pub struct InconsistencySink {
    objects: Mutex<Vec<InconsistentObject>>,
}

impl InconsistencySink {
    /// Creates a new empty sink.
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(Vec::new()),
        }
    }

    /// Emits an inconsistency into the sink.
    pub fn emit(&self, object: InconsistentObject) {
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.push(object);
    }

    /// Takes everything emitted so far as an ordered set, leaving the sink
    /// empty. The result does not depend on emission order.
    pub fn take_all(&self) -> Inconsistencies {
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *objects).into_iter().collect()
    }
}

impl Default for InconsistencySink {
    fn default() -> Self {
        Self::new()
    }
}
