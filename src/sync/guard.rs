//! Single-flight guard for queue drains.

use std::sync::atomic::{AtomicBool, Ordering};

/// At most one holder at a time; acquisition never waits.
///
/// Acquire and release are a single atomic compare-exchange / store, so two
/// callers can never both observe "free" and proceed.
#[derive(Debug, Default)]
pub struct DrainLatch {
  held: AtomicBool,
}

/// Proof of holding the latch; released on drop, including on early return
/// or panic.
#[derive(Debug)]
pub struct DrainPermit<'a> {
  latch: &'a DrainLatch,
}

impl DrainLatch {
  pub fn new() -> Self {
    Self::default()
  }

  /// Take the latch, or `None` if someone else holds it.
  pub fn try_acquire(&self) -> Option<DrainPermit<'_>> {
    self
      .held
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| DrainPermit { latch: self })
  }

  pub fn is_held(&self) -> bool {
    self.held.load(Ordering::Acquire)
  }
}

impl Drop for DrainPermit<'_> {
  fn drop(&mut self) {
    self.latch.held.store(false, Ordering::Release);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_second_acquire_fails_until_release() {
    let latch = DrainLatch::new();
    let permit = latch.try_acquire();
    assert!(permit.is_some());
    assert!(latch.is_held());
    assert!(latch.try_acquire().is_none());

    drop(permit);
    assert!(!latch.is_held());
    assert!(latch.try_acquire().is_some());
  }
}
