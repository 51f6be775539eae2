use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::StageHandle;
use crate::error::InvalidStage;

/// Shared pointer to the active stage.
///
/// The registry itself never changes; switching stages only swaps this
/// index. The capture worker loads it once per cycle, so a selection is
/// picked up by the next frame.
#[derive(Debug, Clone)]
pub struct StageSelector {
    active: Arc<AtomicUsize>,
    len: usize,
}

impl StageSelector {
    /// Creates a selector over `len` stages starting at `initial`.
    pub fn new(len: usize, initial: StageHandle) -> Result<Self, InvalidStage> {
        let selector = Self {
            active: Arc::new(AtomicUsize::new(0)),
            len,
        };
        selector.select(initial)?;
        Ok(selector)
    }

    /// Makes `handle` active for the next capture cycle.
    ///
    /// Out-of-range handles are rejected and the active stage is left alone.
    pub fn select(&self, handle: StageHandle) -> Result<(), InvalidStage> {
        self.validate(handle)?;
        self.active.store(handle.index(), Ordering::SeqCst);
        Ok(())
    }

    pub fn validate(&self, handle: StageHandle) -> Result<(), InvalidStage> {
        if handle.index() >= self.len {
            return Err(InvalidStage {
                requested: handle.index(),
                available: self.len,
            });
        }
        Ok(())
    }

    pub fn current(&self) -> StageHandle {
        StageHandle::new(self.active.load(Ordering::SeqCst))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_in_range() {
        let selector = StageSelector::new(2, StageHandle::new(0)).unwrap();
        selector.select(StageHandle::new(1)).unwrap();
        assert_eq!(selector.current(), StageHandle::new(1));
    }

    #[test]
    fn test_select_out_of_range_keeps_current() {
        let selector = StageSelector::new(2, StageHandle::new(1)).unwrap();
        let err = selector.select(StageHandle::new(2)).unwrap_err();
        assert_eq!(
            err,
            InvalidStage {
                requested: 2,
                available: 2
            }
        );
        assert_eq!(selector.current(), StageHandle::new(1));
    }

    #[test]
    fn test_initial_must_be_valid() {
        assert!(StageSelector::new(1, StageHandle::new(1)).is_err());
        assert!(StageSelector::new(0, StageHandle::new(0)).is_err());
    }

    #[test]
    fn test_clones_share_selection() {
        let selector = StageSelector::new(3, StageHandle::new(0)).unwrap();
        let reader = selector.clone();
        selector.select(StageHandle::new(2)).unwrap();
        assert_eq!(reader.current(), StageHandle::new(2));
    }
}
