//! Reentrancy misuse detector.
//!
//! Not a lock: a per-instance depth counter that detects overlapping
//! entry into the same structure. Entering while another call is in
//! progress logs the violation with a backtrace and continues, so both
//! call stacks can be captured; a guard that observes any depth other
//! than one at exit panics, since the structure may have been seen in a
//! transiently inconsistent state and correct use can no longer be
//! assumed.

use core::cell::Cell;
use core::marker::PhantomData;
use std::backtrace::Backtrace;

/// Per-instance call-depth tracker. Embed this in structs to guard
/// public entry-points with `let _g = self.depth.enter();`.
#[derive(Debug)]
pub struct Reentrancy {
    depth: Cell<u32>,
    // Keep !Send + !Sync in line with single-threaded design.
    _nosend: PhantomData<*mut ()>,
}

impl Reentrancy {
    /// Create a new tracker. Const so it can be a field default.
    pub const fn new() -> Self {
        Self {
            depth: Cell::new(0),
            _nosend: PhantomData,
        }
    }

    /// Enter a guarded section.
    ///
    /// Overlapping entry is reported here but tolerated; the exit check
    /// is the one that gives up.
    #[inline]
    pub fn enter(&self) -> ReentrancyGuard<'_> {
        let d = self.depth.get();
        if d != 0 {
            tracing::error!(
                depth = d,
                backtrace = %Backtrace::force_capture(),
                "overlapping entry into single-caller structure"
            );
        }
        self.depth.set(d + 1);
        ReentrancyGuard { owner: self }
    }
}

impl Default for Reentrancy {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by [`Reentrancy::enter`].
pub struct ReentrancyGuard<'a> {
    owner: &'a Reentrancy,
}

impl Drop for ReentrancyGuard<'_> {
    fn drop(&mut self) {
        let d = self.owner.depth.get();
        self.owner.depth.set(d.saturating_sub(1));
        // Skipped mid-unwind: a second panic would abort and mask the
        // primary fault.
        if d != 1 && !std::thread::panicking() {
            panic!("call depth {d} at exit: overlapping use of single-caller structure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Reentrancy;

    #[test]
    fn enter_and_exit_is_ok() {
        let r = Reentrancy::new();
        let _g = r.enter();
    }

    #[test]
    fn sequential_sections_are_ok() {
        let r = Reentrancy::new();
        for _ in 0..3 {
            let _g = r.enter();
        }
    }

    /// Overlapping guards are tolerated on entry but fatal when the
    /// inner guard exits.
    #[test]
    fn overlap_is_fatal_at_exit() {
        let r = Reentrancy::new();
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _g1 = r.enter();
            let _g2 = r.enter(); // reported, not yet fatal
        }));
        assert!(res.is_err(), "expected overlapping exit to panic");
    }

    /// The tracker is reusable after a detected overlap has unwound.
    #[test]
    fn depth_recovers_after_overlap() {
        let r = Reentrancy::new();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _g1 = r.enter();
            let _g2 = r.enter();
        }));
        let _g = r.enter();
    }
}
