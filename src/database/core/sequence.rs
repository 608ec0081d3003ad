//! Instance identity sequence

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Monotonic source of instance numbers
///
/// Clones share the same counter. [`InstanceSequence::process`] is the
/// process-wide sequence used unless a builder is given another one.
#[derive(Debug, Clone, Default)]
pub struct InstanceSequence {
    last: Arc<AtomicU64>,
}

static PROCESS_SEQUENCE: OnceLock<InstanceSequence> = OnceLock::new();

impl InstanceSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// The sequence shared by every handle in this process
    pub fn process() -> InstanceSequence {
        PROCESS_SEQUENCE.get_or_init(InstanceSequence::new).clone()
    }

    /// Next number; the first call returns 1 and numbers are never reused
    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Next identity with the given prefix, e.g. `memdb3`
    pub fn next_identity(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.next())
    }
}
