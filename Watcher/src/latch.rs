use std::sync::atomic::{AtomicBool, Ordering};

/// One-shot flag; concurrent setters observe a single winner.
#[derive(Debug, Default)]
pub struct Latch(AtomicBool);

impl Latch {
    pub const fn new() -> Self {
        Latch(AtomicBool::new(false))
    }

    /// Set the latch. Returns `true` only for the caller that flipped it.
    pub fn set(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
