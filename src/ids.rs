use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out unique, monotonically increasing integers.
///
/// Shared by reference wherever uniqueness is needed; there is no process-wide instance.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts counting at `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Never returns the same integer twice for the same generator.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
