use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A cloneable cancellation flag shared between batch operations and whatever supervises them.
///
/// Batch loops check the flag between per-record transactions, so triggering it never interrupts a half-written
/// state transition. The remainder of the batch is reported as skipped.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
