//! Process-wide one-shot init guard, carried over from the teacher's
//! `INITIALIZED: Flag` pattern in `bft::mod`.

use std::sync::atomic::{AtomicBool, Ordering};

/// A one-shot atomic flag. `test()` checks without side effects; `set()`/
/// `unset()` flip the flag. Used by [`crate::init`] to guard against
/// re-initializing process-wide state (the send-buffer pool, the async
/// runtime) more than once.
pub struct Flag(AtomicBool);

impl Flag {
    pub const fn new() -> Self {
        Flag(AtomicBool::new(false))
    }

    pub fn test(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn unset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_round_trips() {
        let f = Flag::new();
        assert!(!f.test());
        f.set();
        assert!(f.test());
        f.unset();
        assert!(!f.test());
    }
}
