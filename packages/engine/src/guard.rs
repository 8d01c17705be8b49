//! Single-slot guard that keeps two runs from overlapping.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A slot that at most one [`RunPermit`] can hold at a time.
///
/// Cloning shares the slot.
#[derive(Debug, Clone, Default)]
pub struct RunSlot {
    busy: Arc<AtomicBool>,
}

impl RunSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the slot, or returns `None` if a permit is already out.
    #[must_use]
    pub fn try_acquire(&self) -> Option<RunPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit {
                busy: Arc::clone(&self.busy),
            })
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof of holding the [`RunSlot`]. Dropping it frees the slot.
#[derive(Debug)]
pub struct RunPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let slot = RunSlot::new();
        let permit = slot.try_acquire().unwrap();
        assert!(slot.is_busy());
        assert!(slot.try_acquire().is_none());
        assert!(slot.clone().try_acquire().is_none());

        drop(permit);
        assert!(!slot.is_busy());
        assert!(slot.try_acquire().is_some());
    }
}
